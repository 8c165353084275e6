//! Data-quality grading of one source over an evaluation interval.
//!
//! Rules are evaluated in a fixed order and the first match decides the
//! grade. The order is part of the output contract: reports produced by
//! different runs must agree on which reason a source is filed under.

use std::fmt;

use energy_client::domain::{Grade, Reading, SamplingInterval};
use time::{macros::time, Date, Duration, OffsetDateTime, UtcOffset};

use super::monotonic::Violation;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("interval end {end} is before start {start}")]
    Inverted { start: Date, end: Date },
    #[error("buffer of {buffer_days} days around {start}..{end} leaves the calendar range")]
    OutOfRange {
        start: Date,
        end: Date,
        buffer_days: u32,
    },
}

/// Calendar-day interval `[start, end]` plus a buffer of whole days on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradingWindow {
    pub start: Date,
    pub end: Date,
    pub before_start: Date,
    pub after_end: Date,
}

impl GradingWindow {
    pub fn new(start: Date, end: Date, buffer_days: u32) -> Result<Self, WindowError> {
        if end < start {
            return Err(WindowError::Inverted { start, end });
        }
        let buffer = Duration::days(i64::from(buffer_days));
        let out_of_range = || WindowError::OutOfRange {
            start,
            end,
            buffer_days,
        };
        let before_start = start.checked_sub(buffer).ok_or_else(out_of_range)?;
        let after_end = end.checked_add(buffer).ok_or_else(out_of_range)?;

        Ok(Self {
            start,
            end,
            before_start,
            after_end,
        })
    }

    /// Instant bounds of the buffered window, inclusive.
    pub fn bounds(&self, offset: UtcOffset) -> (OffsetDateTime, OffsetDateTime) {
        (
            self.before_start.midnight().assume_offset(offset),
            self.after_end.with_time(time!(23:59:59)).assume_offset(offset),
        )
    }

    /// Calendar days in the buffered window.
    pub fn days_spanned(&self) -> usize {
        ((self.after_end - self.before_start).whole_days() + 1) as usize
    }
}

impl fmt::Display for GradingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {} (buffered {} .. {})",
            self.start, self.end, self.before_start, self.after_end
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GradeReason {
    NoData,
    MissingAfterStart,
    MissingBeforeEnd,
    NonMonotonic,
    NoBufferBeforeStart,
    NoBufferAfterEnd,
    IncompleteDailyCoverage,
    Complete,
}

impl GradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoData => "no data in interval",
            Self::MissingAfterStart => "missing data after start",
            Self::MissingBeforeEnd => "missing data before end",
            Self::NonMonotonic => "non-monotonic data",
            Self::NoBufferBeforeStart => "no buffer before start",
            Self::NoBufferAfterEnd => "no buffer after end",
            Self::IncompleteDailyCoverage => "incomplete daily coverage",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for GradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradeOutcome {
    pub grade: Grade,
    pub reason: GradeReason,
    pub sampling: SamplingInterval,
}

/// Grade a source from its readings in the buffered window.
///
/// `readings` must be ascending by timestamp (as the store returns them) and
/// cover every mtu of the source. `violations` are those found inside the
/// buffered window. Sources without a sampling class are held to the daily
/// coverage rule, which every mtu stream must meet on its own.
pub fn grade(
    readings: &[Reading],
    violations: &[Violation],
    sampling: SamplingInterval,
    window: &GradingWindow,
    offset: UtcOffset,
) -> GradeOutcome {
    let outcome = |grade, reason| GradeOutcome {
        grade,
        reason,
        sampling,
    };
    let local_day = |r: &Reading| r.ts.to_offset(offset).date();

    let (Some(first), Some(last)) = (readings.first(), readings.last()) else {
        return outcome(Grade::C, GradeReason::NoData);
    };
    if local_day(first) > window.start {
        return outcome(Grade::C, GradeReason::MissingAfterStart);
    }
    if local_day(last) < window.end {
        return outcome(Grade::C, GradeReason::MissingBeforeEnd);
    }
    if !violations.is_empty() {
        return outcome(Grade::C, GradeReason::NonMonotonic);
    }
    if !readings.iter().any(|r| local_day(r) < window.start) {
        return outcome(Grade::B, GradeReason::NoBufferBeforeStart);
    }
    if !readings.iter().any(|r| local_day(r) > window.end) {
        return outcome(Grade::B, GradeReason::NoBufferAfterEnd);
    }

    match sampling {
        SamplingInterval::Hourly => outcome(Grade::AHourly, GradeReason::Complete),
        SamplingInterval::Daily | SamplingInterval::NotAvailable => {
            let days = window.days_spanned();
            if super::sampling::stream_counts(readings).values().any(|n| *n != days) {
                outcome(Grade::B, GradeReason::IncompleteDailyCoverage)
            } else {
                outcome(Grade::ADaily, GradeReason::Complete)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    const D: Date = date!(2024-03-10);

    fn window(days: i64) -> GradingWindow {
        GradingWindow::new(D, D + Duration::days(days), 1).unwrap()
    }

    fn at(ts: OffsetDateTime, energy_wh: i64) -> Reading {
        Reading {
            source_name: "m-1".to_string(),
            mtu_id: String::new(),
            ts,
            energy_wh,
            raw_fields: Default::default(),
        }
    }

    fn daily(from: Date, to: Date) -> Vec<Reading> {
        let mut out = Vec::new();
        let mut day = from;
        let mut wh = 0;
        while day <= to {
            out.push(at(day.with_time(time!(12:00)).assume_utc(), wh));
            wh += 100;
            day = day.next_day().unwrap();
        }
        out
    }

    fn hourly(from: Date, to: Date) -> Vec<Reading> {
        let mut out = Vec::new();
        let mut ts = from.midnight().assume_utc();
        let end = to.with_time(time!(23:00)).assume_utc();
        let mut wh = 0;
        while ts <= end {
            out.push(at(ts, wh));
            wh += 10;
            ts += Duration::hours(1);
        }
        out
    }

    fn violation() -> Violation {
        Violation {
            source_name: "m-1".to_string(),
            mtu_id: String::new(),
            previous_ts: datetime!(2024-03-10 00:00:00 UTC),
            previous_reading: "10".to_string(),
            ts: datetime!(2024-03-10 01:00:00 UTC),
            reading: "5".to_string(),
        }
    }

    #[test]
    fn window_spans_buffer_days() {
        let w = window(3);
        assert_eq!(w.before_start, date!(2024-03-09));
        assert_eq!(w.after_end, date!(2024-03-14));
        assert_eq!(w.days_spanned(), 6);
        assert_eq!(
            w.bounds(UtcOffset::UTC),
            (datetime!(2024-03-09 00:00:00 UTC), datetime!(2024-03-14 23:59:59 UTC))
        );
    }

    #[test]
    fn inverted_window_is_rejected() {
        let err = GradingWindow::new(D, D - Duration::days(1), 1).unwrap_err();
        assert!(matches!(err, WindowError::Inverted { .. }));
    }

    #[test]
    fn complete_daily_source_is_a_daily() {
        let w = window(3);
        let readings = daily(w.before_start, w.after_end);
        let out = grade(&readings, &[], SamplingInterval::Daily, &w, UtcOffset::UTC);
        assert_eq!(out.grade, Grade::ADaily);
        assert_eq!(out.reason, GradeReason::Complete);
    }

    #[test]
    fn no_readings_is_c() {
        let out = grade(&[], &[], SamplingInterval::NotAvailable, &window(3), UtcOffset::UTC);
        assert_eq!(out.grade, Grade::C);
        assert_eq!(out.reason.as_str(), "no data in interval");
    }

    #[test]
    fn hourly_source_missing_only_day_after_end_is_b() {
        let w = window(2);
        let readings = hourly(w.before_start, w.end);
        let out = grade(&readings, &[], SamplingInterval::Hourly, &w, UtcOffset::UTC);
        assert_eq!(out.grade, Grade::B);
        assert_eq!(out.reason.as_str(), "no buffer after end");
    }

    #[test]
    fn monotonicity_precedes_buffer_checks() {
        let w = window(2);
        let readings = hourly(w.start, w.after_end);
        let out = grade(&readings, &[violation()], SamplingInterval::Hourly, &w, UtcOffset::UTC);
        assert_eq!(out.grade, Grade::C);
        assert_eq!(out.reason, GradeReason::NonMonotonic);
    }

    #[test]
    fn late_first_reading_is_c() {
        let w = window(2);
        let readings = daily(w.start + Duration::days(1), w.after_end);
        let out = grade(&readings, &[], SamplingInterval::Daily, &w, UtcOffset::UTC);
        assert_eq!(out.reason, GradeReason::MissingAfterStart);
    }

    #[test]
    fn early_last_reading_is_c() {
        let w = window(2);
        let readings = daily(w.before_start, w.end - Duration::days(1));
        let out = grade(&readings, &[], SamplingInterval::Daily, &w, UtcOffset::UTC);
        assert_eq!(out.reason, GradeReason::MissingBeforeEnd);
    }

    #[test]
    fn missing_before_buffer_is_b() {
        let w = window(2);
        let readings = daily(w.start, w.after_end);
        let out = grade(&readings, &[], SamplingInterval::Daily, &w, UtcOffset::UTC);
        assert_eq!(out.grade, Grade::B);
        assert_eq!(out.reason, GradeReason::NoBufferBeforeStart);
    }

    #[test]
    fn daily_gap_inside_interval_is_b() {
        let w = window(4);
        let mut readings = daily(w.before_start, w.after_end);
        readings.remove(3);
        let out = grade(&readings, &[], SamplingInterval::Daily, &w, UtcOffset::UTC);
        assert_eq!(out.grade, Grade::B);
        assert_eq!(out.reason, GradeReason::IncompleteDailyCoverage);
    }

    fn on_mtus(readings: &[Reading], mtus: &[&str]) -> Vec<Reading> {
        let mut out: Vec<Reading> = mtus
            .iter()
            .flat_map(|mtu| {
                readings.iter().map(move |r| Reading {
                    mtu_id: mtu.to_string(),
                    ..r.clone()
                })
            })
            .collect();
        out.sort_by_key(|r| r.ts);
        out
    }

    #[test]
    fn complete_daily_streams_on_two_mtus_are_a_daily() {
        let w = window(3);
        let readings = on_mtus(&daily(w.before_start, w.after_end), &["mtu-1", "mtu-2"]);
        let out = grade(&readings, &[], SamplingInterval::Daily, &w, UtcOffset::UTC);
        assert_eq!(out.grade, Grade::ADaily);
    }

    #[test]
    fn gap_on_one_of_two_mtus_is_b() {
        let w = window(3);
        let full = daily(w.before_start, w.after_end);
        let mut gappy = full.clone();
        gappy.remove(2);
        let mut readings = on_mtus(&full, &["mtu-1"]);
        readings.extend(on_mtus(&gappy, &["mtu-2"]));
        readings.sort_by_key(|r| r.ts);

        let out = grade(&readings, &[], SamplingInterval::Daily, &w, UtcOffset::UTC);
        assert_eq!(out.reason, GradeReason::IncompleteDailyCoverage);
    }

    #[test]
    fn local_day_follows_configured_offset() {
        // 23:30 UTC on the day before start is already `start` at UTC+1.
        let w = window(0);
        let offset = UtcOffset::from_hms(1, 0, 0).unwrap();
        let readings = vec![
            at(datetime!(2024-03-09 23:30:00 UTC), 0),
            at(datetime!(2024-03-10 12:00:00 UTC), 10),
        ];
        let out = grade(&readings, &[], SamplingInterval::Hourly, &w, offset);
        assert_eq!(out.reason, GradeReason::NoBufferBeforeStart);
    }
}
