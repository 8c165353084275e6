use std::fmt;

use energy_client::domain::{keys, Reading};
use time::{macros::format_description, UtcOffset};

use super::{field, to_wh, Layout, ParseError, ParserConfig, Sentinel};
use crate::transform::validators::parse_numeric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    PulseMeter,
    SubPanelLegacy,
    SubPanelV2,
    EnvironmentalLogger,
    WholeHouse,
}

impl DeviceFamily {
    pub const ALL: [DeviceFamily; 5] = [
        DeviceFamily::PulseMeter,
        DeviceFamily::SubPanelLegacy,
        DeviceFamily::SubPanelV2,
        DeviceFamily::EnvironmentalLogger,
        DeviceFamily::WholeHouse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PulseMeter => "pulse-meter",
            Self::SubPanelLegacy => "sub-panel-legacy",
            Self::SubPanelV2 => "sub-panel-v2",
            Self::EnvironmentalLogger => "environmental-logger",
            Self::WholeHouse => "whole-house",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s.trim())
    }

    pub fn config(&self) -> &'static ParserConfig {
        match self {
            Self::PulseMeter => &PULSE_METER,
            Self::SubPanelLegacy => &SUB_PANEL_LEGACY,
            Self::SubPanelV2 => &SUB_PANEL_V2,
            Self::EnvironmentalLogger => &ENVIRONMENTAL_LOGGER,
            Self::WholeHouse => &WHOLE_HOUSE,
        }
    }

    pub fn known_lengths() -> Vec<usize> {
        let mut lengths: Vec<usize> = Self::ALL
            .iter()
            .flat_map(|f| f.config().accepted_lengths())
            .collect();
        lengths.sort_unstable();
        lengths.dedup();
        lengths
    }

    /// Pick a family from the row length alone.
    ///
    /// Lengths 5 and 9 are shared with the environmental logger, whose
    /// timestamp lives in column 1; the other family wins only when its own
    /// timestamp column actually holds a timestamp.
    pub fn sniff(row: &[&str], offset: UtcOffset) -> Option<Self> {
        let holds_timestamp = |family: DeviceFamily| {
            let cfg = family.config();
            cfg.parse_timestamp(field(row, cfg.timestamp_column), offset).is_some()
        };

        match row.len() {
            5 if holds_timestamp(Self::SubPanelLegacy) => Some(Self::SubPanelLegacy),
            9 if holds_timestamp(Self::PulseMeter) => Some(Self::PulseMeter),
            5 | 7 | 9 => Some(Self::EnvironmentalLogger),
            19 | 21 => Some(Self::SubPanelV2),
            25 => Some(Self::WholeHouse),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn push_raw(reading: &mut Reading, key: &str, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        reading.raw_fields.insert(key.to_string(), value.to_string());
    }
}

/// Channel register converted to Wh; non-numeric values are kept verbatim.
fn push_channel(reading: &mut Reading, key: &str, value: &str, unit_factor: f64) {
    match to_wh(value, unit_factor) {
        Some(wh) => {
            reading.raw_fields.insert(key.to_string(), wh.to_string());
        }
        None => push_raw(reading, key, value),
    }
}

// Pulse meter export, one row per read:
// 0 meter | 1 install date | 2 mtu | 3 port | 4 meter type | 5 register (kWh)
// 6 rssi | 7 read time | 8 account

static PULSE_METER: ParserConfig = ParserConfig {
    family: DeviceFamily::PulseMeter,
    layouts: &[Layout {
        len: 9,
        energy_column: 5,
        required_columns: &[0, 2],
        numeric_columns: &[5, 6],
    }],
    timestamp_column: 7,
    sentinel: Some(Sentinel {
        value: "No Reading",
        columns: &[5, 6],
    }),
    datetime_format: format_description!(
        "[month padding:none]/[day padding:none]/[year] [hour padding:none]:[minute]:[second]"
    ),
    date_format: format_description!("[month padding:none]/[day padding:none]/[year]"),
    unit_factor: 1000.0,
    post_process: pulse_meter_fields,
};

fn pulse_meter_fields(row: &[&str], _layout: &Layout, reading: &mut Reading) -> Result<(), ParseError> {
    reading.source_name = field(row, 0).trim().to_string();
    reading.mtu_id = field(row, 2).trim().to_string();

    let install = field(row, 1);
    match PULSE_METER.parse_timestamp(install, UtcOffset::UTC) {
        Some(ts) => push_raw(reading, keys::INSTALL_DATE, &ts.date().to_string()),
        None => push_raw(reading, keys::INSTALL_DATE, install),
    }
    push_raw(reading, "port", field(row, 3));
    push_raw(reading, keys::METER_TYPE, field(row, 4));
    push_raw(reading, "rssi", field(row, 6));
    push_raw(reading, "account", field(row, 8));
    Ok(())
}

// Legacy sub-panel: 0 time | 1 whole house | 2..4 channels (kWh registers)

static SUB_PANEL_LEGACY: ParserConfig = ParserConfig {
    family: DeviceFamily::SubPanelLegacy,
    layouts: &[Layout {
        len: 5,
        energy_column: 1,
        required_columns: &[],
        numeric_columns: &[1, 2, 3, 4],
    }],
    timestamp_column: 0,
    sentinel: None,
    datetime_format: format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    date_format: format_description!("[year]-[month]-[day]"),
    unit_factor: 1000.0,
    post_process: sub_panel_legacy_fields,
};

fn sub_panel_legacy_fields(row: &[&str], _layout: &Layout, reading: &mut Reading) -> Result<(), ParseError> {
    for (n, column) in (2..5).enumerate() {
        push_channel(reading, &format!("channel_{}", n + 1), field(row, column), 1000.0);
    }
    Ok(())
}

// Sub-panel v2:
//   19 columns: 0 time | 1 grid | 2..18 channels 1..17
//   21 columns: 0 time | 1 grid | 2 grid (duplicate) | 3..19 channels 1..17 | 20 solar

const V2_CHANNELS: usize = 17;

static SUB_PANEL_V2: ParserConfig = ParserConfig {
    family: DeviceFamily::SubPanelV2,
    layouts: &[
        Layout {
            len: 19,
            energy_column: 1,
            required_columns: &[],
            numeric_columns: &[1],
        },
        Layout {
            len: 21,
            energy_column: 1,
            required_columns: &[],
            numeric_columns: &[1, 2],
        },
    ],
    timestamp_column: 0,
    sentinel: None,
    datetime_format: format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    date_format: format_description!("[year]-[month]-[day]"),
    unit_factor: 1000.0,
    post_process: sub_panel_v2_fields,
};

fn sub_panel_v2_fields(row: &[&str], layout: &Layout, reading: &mut Reading) -> Result<(), ParseError> {
    let first_channel = if layout.len == 21 { 3 } else { 2 };

    if layout.len == 21 {
        let grid = parse_numeric(field(row, 1));
        let duplicate = parse_numeric(field(row, 2));
        if grid != duplicate {
            push_channel(reading, "grid_duplicate", field(row, 2), 1000.0);
        }
        push_channel(reading, "solar", field(row, 20), 1000.0);
    }

    for n in 0..V2_CHANNELS {
        push_channel(
            reading,
            &format!("channel_{}", n + 1),
            field(row, first_channel + n),
            1000.0,
        );
    }
    Ok(())
}

// Environmental logger, energy is a pulse count in Wh and always last:
//   5: 0 record | 1 time | 2 temperature | 3 humidity | 4 energy
//   7: ... 4 light | 5 battery | 6 energy
//   9: ... 4 light | 5 battery | 6 probe temperature | 7 probe humidity | 8 energy

const LOGGER_CHANNELS: [&str; 6] = [
    "temperature",
    "humidity",
    "light",
    "battery",
    "probe_temperature",
    "probe_humidity",
];

static ENVIRONMENTAL_LOGGER: ParserConfig = ParserConfig {
    family: DeviceFamily::EnvironmentalLogger,
    layouts: &[
        Layout {
            len: 5,
            energy_column: 4,
            required_columns: &[0],
            numeric_columns: &[2, 3, 4],
        },
        Layout {
            len: 7,
            energy_column: 6,
            required_columns: &[0],
            numeric_columns: &[2, 3, 4, 5, 6],
        },
        Layout {
            len: 9,
            energy_column: 8,
            required_columns: &[0],
            numeric_columns: &[2, 3, 4, 5, 6, 7, 8],
        },
    ],
    timestamp_column: 1,
    sentinel: None,
    datetime_format: format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    date_format: format_description!("[year]-[month]-[day]"),
    unit_factor: 1.0,
    post_process: environmental_logger_fields,
};

fn environmental_logger_fields(row: &[&str], layout: &Layout, reading: &mut Reading) -> Result<(), ParseError> {
    push_raw(reading, "record", field(row, 0));
    for (column, name) in (2..layout.energy_column).zip(LOGGER_CHANNELS) {
        push_raw(reading, name, field(row, column));
    }
    Ok(())
}

// Whole-house monitor: 0 time | 1 mains | 2..24 channels 1..23 (kWh or "null")

const WHOLE_HOUSE_CHANNELS: usize = 23;
const MISSING_CHANNEL: &str = "null";

static WHOLE_HOUSE: ParserConfig = ParserConfig {
    family: DeviceFamily::WholeHouse,
    layouts: &[Layout {
        len: 25,
        energy_column: 1,
        required_columns: &[],
        numeric_columns: &[1],
    }],
    timestamp_column: 0,
    sentinel: Some(Sentinel {
        value: MISSING_CHANNEL,
        columns: &[1],
    }),
    datetime_format: format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    date_format: format_description!("[year]-[month]-[day]"),
    unit_factor: 1000.0,
    post_process: whole_house_fields,
};

fn whole_house_fields(row: &[&str], _layout: &Layout, reading: &mut Reading) -> Result<(), ParseError> {
    for n in 0..WHOLE_HOUSE_CHANNELS {
        let column = n + 2;
        let value = field(row, column);
        if value.trim().eq_ignore_ascii_case(MISSING_CHANNEL) || value.trim().is_empty() {
            continue;
        }
        let wh = to_wh(value, 1000.0).ok_or_else(|| ParseError::NotNumeric {
            column,
            value: value.trim().to_string(),
        })?;
        reading
            .raw_fields
            .insert(format!("channel_{}", n + 1), wh.to_string());
    }
    Ok(())
}
