//! Row parsers for every supported device family.
//!
//! Families are not types of their own: each one is a static
//! [`ParserConfig`] (layouts, timestamp column, sentinel, date formats, unit
//! factor, post-processing function) handed to the single generic
//! [`parse_row`]. Parsing is pure: the same row and configuration always
//! yield the same `Reading` or the same `ParseError`.

use std::collections::BTreeMap;

use energy_client::domain::Reading;
use time::{
    format_description::BorrowedFormatItem, Date, OffsetDateTime, PrimitiveDateTime, UtcOffset,
};

use crate::transform::validators::{self, parse_numeric};

pub mod family;

pub use family::DeviceFamily;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected row length {found} (expected one of {expected:?})")]
    BadShape { found: usize, expected: Vec<usize> },
    #[error("no reading reported in column {column}")]
    NoReading { column: usize },
    #[error("column {column} is blank")]
    Blank { column: usize },
    #[error("column {column} is not numeric: '{value}'")]
    NotNumeric { column: usize, value: String },
    #[error("column {column} holds a negative register: '{value}'")]
    Negative { column: usize, value: String },
    #[error("unparseable timestamp in column {column}: '{value}'")]
    BadTimestamp { column: usize, value: String },
}

/// Column layout of one historical row length of a family.
#[derive(Debug)]
pub struct Layout {
    pub len: usize,
    /// Cumulative register that becomes `Reading::energy_wh`.
    pub energy_column: usize,
    /// Columns that must be non-blank (identifiers).
    pub required_columns: &'static [usize],
    /// Columns that must be non-blank and numeric.
    pub numeric_columns: &'static [usize],
}

/// Family-specific "no reading" marker.
#[derive(Debug)]
pub struct Sentinel {
    pub value: &'static str,
    pub columns: &'static [usize],
}

pub type PostProcess = fn(&[&str], &Layout, &mut Reading) -> Result<(), ParseError>;

pub struct ParserConfig {
    pub family: DeviceFamily,
    pub layouts: &'static [Layout],
    pub timestamp_column: usize,
    pub sentinel: Option<Sentinel>,
    pub datetime_format: &'static [BorrowedFormatItem<'static>],
    pub date_format: &'static [BorrowedFormatItem<'static>],
    /// Multiplier from the device unit to Wh.
    pub unit_factor: f64,
    pub post_process: PostProcess,
}

impl ParserConfig {
    pub fn accepted_lengths(&self) -> Vec<usize> {
        self.layouts.iter().map(|l| l.len).collect()
    }

    pub fn layout(&self, len: usize) -> Option<&'static Layout> {
        self.layouts.iter().find(|l| l.len == len)
    }

    /// Primary datetime format, falling back to a date-only format at midnight.
    pub fn parse_timestamp(&self, value: &str, offset: UtcOffset) -> Option<OffsetDateTime> {
        let value = value.trim();
        PrimitiveDateTime::parse(value, self.datetime_format)
            .or_else(|_| Date::parse(value, self.date_format).map(Date::midnight))
            .ok()
            .map(|dt| dt.assume_offset(offset))
    }
}

/// Field `idx` of the row, or `""` past the end.
pub(crate) fn field<'a>(row: &[&'a str], idx: usize) -> &'a str {
    row.get(idx).copied().unwrap_or("")
}

/// Numeric field converted to Wh and rounded. `None` when the field is not
/// a number or the result does not fit an `i64`.
pub(crate) fn to_wh(value: &str, unit_factor: f64) -> Option<i64> {
    let wh = (parse_numeric(value)? * unit_factor).round();
    (wh.is_finite() && wh >= i64::MIN as f64 && wh < i64::MAX as f64).then_some(wh as i64)
}

pub fn parse_row(
    config: &ParserConfig,
    source_name: &str,
    row: &[&str],
    offset: UtcOffset,
) -> Result<Reading, ParseError> {
    let layout = config.layout(row.len()).ok_or_else(|| ParseError::BadShape {
        found: row.len(),
        expected: config.accepted_lengths(),
    })?;

    if let Some(sentinel) = &config.sentinel {
        for &column in sentinel.columns {
            if field(row, column).trim().eq_ignore_ascii_case(sentinel.value) {
                return Err(ParseError::NoReading { column });
            }
        }
    }

    for &column in layout.required_columns {
        validators::check_required(column, field(row, column))?;
    }
    for &column in layout.numeric_columns {
        if column == config.timestamp_column {
            continue;
        }
        validators::check_numeric(column, field(row, column))?;
    }
    validators::check_register(layout.energy_column, field(row, layout.energy_column))?;

    let raw_ts = field(row, config.timestamp_column);
    let ts = config
        .parse_timestamp(raw_ts, offset)
        .ok_or_else(|| ParseError::BadTimestamp {
            column: config.timestamp_column,
            value: raw_ts.trim().to_string(),
        })?;

    let raw_energy = field(row, layout.energy_column);
    let energy_wh = match to_wh(raw_energy, config.unit_factor) {
        Some(wh) if wh >= 0 => wh,
        Some(_) => {
            return Err(ParseError::Negative {
                column: layout.energy_column,
                value: raw_energy.trim().to_string(),
            })
        }
        None => {
            return Err(ParseError::NotNumeric {
                column: layout.energy_column,
                value: raw_energy.trim().to_string(),
            })
        }
    };

    let mut reading = Reading {
        source_name: source_name.to_string(),
        mtu_id: String::new(),
        ts,
        energy_wh,
        raw_fields: BTreeMap::new(),
    };
    reading
        .raw_fields
        .insert("family".to_string(), config.family.as_str().to_string());

    (config.post_process)(row, layout, &mut reading)?;
    Ok(reading)
}

/// Parser bound to one input: an optional fixed family and the source name
/// used by families whose rows carry no name column.
#[derive(Debug, Clone)]
pub struct RowParser {
    family: Option<DeviceFamily>,
    source_name: String,
    offset: UtcOffset,
}

impl RowParser {
    pub fn new<S: Into<String>>(family: Option<DeviceFamily>, source_name: S, offset: UtcOffset) -> Self {
        Self {
            family,
            source_name: source_name.into(),
            offset,
        }
    }

    pub fn parse(&self, row: &[&str]) -> Result<Reading, ParseError> {
        let family = match self.family {
            Some(f) => f,
            None => DeviceFamily::sniff(row, self.offset).ok_or_else(|| ParseError::BadShape {
                found: row.len(),
                expected: DeviceFamily::known_lengths(),
            })?,
        };
        parse_row(family.config(), &self.source_name, row, self.offset)
    }
}
