//! Run statistics, owned by the orchestrator and merged explicitly.

use std::collections::BTreeMap;

use energy_client::domain::Grade;
use serde::Serialize;

use crate::parse::ParseError;
use crate::pipeline::PipelineError;

/// Rejected rows by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejectCounts {
    pub bad_shape: usize,
    pub no_reading: usize,
    pub blank: usize,
    pub not_numeric: usize,
    pub negative: usize,
    pub bad_timestamp: usize,
    pub rate_ceiling: usize,
    /// Rows the delimited reader could not decode at all.
    pub unreadable: usize,
}

impl RejectCounts {
    pub fn total(&self) -> usize {
        self.bad_shape
            + self.no_reading
            + self.blank
            + self.not_numeric
            + self.negative
            + self.bad_timestamp
            + self.rate_ceiling
            + self.unreadable
    }

    fn merge(&mut self, other: &RejectCounts) {
        self.bad_shape += other.bad_shape;
        self.no_reading += other.no_reading;
        self.blank += other.blank;
        self.not_numeric += other.not_numeric;
        self.negative += other.negative;
        self.bad_timestamp += other.bad_timestamp;
        self.rate_ceiling += other.rate_ceiling;
        self.unreadable += other.unreadable;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    /// Input files that could not be opened or imported at all.
    pub files_failed: usize,
    pub rows_read: usize,
    pub readings_parsed: usize,
    pub new_readings: usize,
    pub existing_readings: usize,
    pub store_failures: usize,
    pub new_sources: usize,
    pub rejected: RejectCounts,
    pub monotonic_violations: usize,
    pub monotonic_check_failures: usize,
    pub grades: BTreeMap<String, usize>,
    pub skipped_sources: usize,
    pub runtime_secs: f64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_parse_error(&mut self, error: &ParseError) {
        let r = &mut self.rejected;
        match error {
            ParseError::BadShape { .. } => r.bad_shape += 1,
            ParseError::NoReading { .. } => r.no_reading += 1,
            ParseError::Blank { .. } => r.blank += 1,
            ParseError::NotNumeric { .. } => r.not_numeric += 1,
            ParseError::Negative { .. } => r.negative += 1,
            ParseError::BadTimestamp { .. } => r.bad_timestamp += 1,
        }
    }

    /// Tally an item that failed somewhere upstream of the sink.
    pub fn record_pipeline_error(&mut self, error: &PipelineError) {
        match error {
            PipelineError::Parse { error, .. } => self.record_parse_error(error),
            PipelineError::RateCeiling { .. } => self.rejected.rate_ceiling += 1,
            PipelineError::Open(_) => self.files_failed += 1,
            PipelineError::Source(_) => self.rejected.unreadable += 1,
            PipelineError::Store { .. } | PipelineError::Transform(_) | PipelineError::Sink(_) => {
                self.store_failures += 1
            }
        }
    }

    pub fn record_grade(&mut self, grade: Grade) {
        *self.grades.entry(grade.as_str().to_string()).or_insert(0) += 1;
    }

    pub fn grade_count(&self, grade: Grade) -> usize {
        self.grades.get(grade.as_str()).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.files_failed += other.files_failed;
        self.rows_read += other.rows_read;
        self.readings_parsed += other.readings_parsed;
        self.new_readings += other.new_readings;
        self.existing_readings += other.existing_readings;
        self.store_failures += other.store_failures;
        self.new_sources += other.new_sources;
        self.rejected.merge(&other.rejected);
        self.monotonic_violations += other.monotonic_violations;
        self.monotonic_check_failures += other.monotonic_check_failures;
        for (grade, n) in &other.grades {
            *self.grades.entry(grade.clone()).or_insert(0) += n;
        }
        self.skipped_sources += other.skipped_sources;
        self.runtime_secs += other.runtime_secs;
    }

    pub fn summary(&self) -> String {
        let r = &self.rejected;
        let grades = Grade::ALL
            .iter()
            .map(|g| format!("{}={}", g, self.grade_count(*g)))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "Files: {} failed | Rows: {} read, {} parsed | \
             Readings: {} new, {} existing, {} store failures | \
             Rejected: {} (shape {}, no-reading {}, blank {}, non-numeric {}, negative {}, \
             timestamp {}, rate {}, unreadable {}) | Sources: {} new | \
             Monotonic violations: {} ({} sources unchecked) | Grades: {} | \
             Skipped sources: {} | Runtime: {:.2}s",
            self.files_failed,
            self.rows_read,
            self.readings_parsed,
            self.new_readings,
            self.existing_readings,
            self.store_failures,
            r.total(),
            r.bad_shape,
            r.no_reading,
            r.blank,
            r.not_numeric,
            r.negative,
            r.bad_timestamp,
            r.rate_ceiling,
            r.unreadable,
            self.new_sources,
            self.monotonic_violations,
            self.monotonic_check_failures,
            grades,
            self.skipped_sources,
            self.runtime_secs,
        )
    }
}
