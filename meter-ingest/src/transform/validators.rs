//! Field-level checks shared by the row parsers and the rate ceiling stage.
//!
//! Each validator answers `validate(value) -> bool` and carries a fixed
//! human-readable reason. They are applied in a fixed order (non-blank,
//! numeric, non-negative) so the first failure decides the reject category.

use energy_client::domain::{Reading, SamplingInterval};
use time::OffsetDateTime;

use crate::parse::ParseError;

pub trait FieldValidator: Send + Sync {
    fn validate(&self, value: &str) -> bool;
    fn reason(&self) -> &'static str;
}

/// Value parsed as a number, tolerating `,` thousands separators.
///
/// Non-finite values (`inf`, `NaN`) are not numbers for our purposes.
pub fn parse_numeric(value: &str) -> Option<f64> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub struct NonBlank;

impl FieldValidator for NonBlank {
    fn validate(&self, value: &str) -> bool {
        !value.trim().is_empty()
    }

    fn reason(&self) -> &'static str {
        "value is blank"
    }
}

pub struct Numeric;

impl FieldValidator for Numeric {
    fn validate(&self, value: &str) -> bool {
        parse_numeric(value).is_some()
    }

    fn reason(&self) -> &'static str {
        "value is not numeric"
    }
}

pub struct NonNegative;

impl FieldValidator for NonNegative {
    fn validate(&self, value: &str) -> bool {
        parse_numeric(value).is_some_and(|v| v >= 0.0)
    }

    fn reason(&self) -> &'static str {
        "value is negative"
    }
}

/// A column that must be present.
pub fn check_required(column: usize, value: &str) -> Result<(), ParseError> {
    if !NonBlank.validate(value) {
        return Err(ParseError::Blank { column });
    }
    Ok(())
}

/// A column that must be present and numeric.
pub fn check_numeric(column: usize, value: &str) -> Result<(), ParseError> {
    check_required(column, value)?;
    if !Numeric.validate(value) {
        return Err(ParseError::NotNumeric {
            column,
            value: value.trim().to_string(),
        });
    }
    Ok(())
}

/// A cumulative energy register: present, numeric and never negative.
pub fn check_register(column: usize, value: &str) -> Result<(), ParseError> {
    check_numeric(column, value)?;
    if !NonNegative.validate(value) {
        return Err(ParseError::Negative {
            column,
            value: value.trim().to_string(),
        });
    }
    Ok(())
}

/// Maximum plausible consumption rates, in Wh per elapsed hour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeCeiling {
    pub hourly_wh_per_hour: f64,
    pub daily_wh_per_hour: f64,
}

impl RangeCeiling {
    /// Ceiling rate for a sampling class. Unclassified sources get the
    /// hourly (more permissive) ceiling.
    pub fn rate_for(&self, sampling: SamplingInterval) -> f64 {
        match sampling {
            SamplingInterval::Daily => self.daily_wh_per_hour,
            SamplingInterval::Hourly | SamplingInterval::NotAvailable => self.hourly_wh_per_hour,
        }
    }

    pub fn bind(
        &self,
        previous: Option<&Reading>,
        current_ts: OffsetDateTime,
        sampling: SamplingInterval,
    ) -> BoundRangeCeiling {
        let previous = previous.map(|p| {
            let elapsed_hours = (current_ts - p.ts).as_seconds_f64() / 3600.0;
            (p.energy_wh, self.rate_for(sampling) * elapsed_hours.max(0.0))
        });
        BoundRangeCeiling { previous }
    }
}

/// A [`RangeCeiling`] resolved against the previous reading of a stream.
pub struct BoundRangeCeiling {
    /// (previous register in Wh, allowed consumption in Wh)
    previous: Option<(i64, f64)>,
}

impl BoundRangeCeiling {
    pub fn allowed_wh(&self) -> Option<f64> {
        self.previous.map(|(_, allowed)| allowed)
    }
}

impl FieldValidator for BoundRangeCeiling {
    fn validate(&self, value: &str) -> bool {
        let Some((previous_wh, allowed_wh)) = self.previous else {
            return true;
        };
        match parse_numeric(value) {
            Some(current) => current - previous_wh as f64 <= allowed_wh,
            None => false,
        }
    }

    fn reason(&self) -> &'static str {
        "consumption since previous reading exceeds the rate ceiling"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn previous(energy_wh: i64) -> Reading {
        Reading {
            source_name: "m-1".to_string(),
            mtu_id: String::new(),
            ts: datetime!(2024-01-01 00:00:00 UTC),
            energy_wh,
            raw_fields: BTreeMap::new(),
        }
    }

    const CEILING: RangeCeiling = RangeCeiling {
        hourly_wh_per_hour: 10_000.0,
        daily_wh_per_hour: 2_000.0,
    };

    #[test]
    fn numeric_strips_thousands_separators() {
        assert_eq!(parse_numeric("1,234.5"), Some(1234.5));
        assert_eq!(parse_numeric(" 12 "), Some(12.0));
        assert_eq!(parse_numeric("12kWh"), None);
        assert_eq!(parse_numeric("inf"), None);
    }

    #[test]
    fn chain_reports_first_failure() {
        assert_eq!(check_register(3, "  "), Err(ParseError::Blank { column: 3 }));
        assert!(matches!(check_register(3, "abc"), Err(ParseError::NotNumeric { column: 3, .. })));
        assert!(matches!(check_register(3, "-50"), Err(ParseError::Negative { column: 3, .. })));
        assert_eq!(check_register(3, "0"), Ok(()));
    }

    #[test]
    fn first_reading_passes_rate_ceiling() {
        let bound = CEILING.bind(None, datetime!(2024-01-01 01:00:00 UTC), SamplingInterval::Hourly);
        assert!(bound.validate("999999999"));
        assert_eq!(bound.allowed_wh(), None);
    }

    #[test]
    fn rate_ceiling_scales_with_elapsed_time() {
        let prev = previous(1_000);
        let bound = CEILING.bind(Some(&prev), datetime!(2024-01-01 02:00:00 UTC), SamplingInterval::Hourly);
        assert!(bound.validate("21000"));
        assert!(!bound.validate("21001"));
    }

    #[test]
    fn daily_sources_use_lower_ceiling() {
        let prev = previous(0);
        let bound = CEILING.bind(Some(&prev), datetime!(2024-01-02 00:00:00 UTC), SamplingInterval::Daily);
        assert_eq!(bound.allowed_wh(), Some(48_000.0));
        assert!(!bound.validate("48001"));
    }
}
