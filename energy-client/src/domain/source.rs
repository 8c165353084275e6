use std::{collections::BTreeMap, fmt};

use super::Grade;

/// Well-known `Source` property keys.
pub mod keys {
    pub const INSTALL_DATE: &str = "installDate";
    pub const METER_TYPE: &str = "meterType";
    pub const SAMPLING_INTERVAL: &str = "samplingInterval";
    pub const GRADE: &str = "grade";
}

/// How often a source reports, as observed on one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SamplingInterval {
    Hourly,
    Daily,
    NotAvailable,
}

impl SamplingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::NotAvailable => "n/a",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "n/a" => Some(Self::NotAvailable),
            _ => None,
        }
    }
}

impl fmt::Display for SamplingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical metering point and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Source {
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl Source {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn with_property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.set_property(key, value);
        self
    }

    /// Stored sampling class; missing or unrecognised values read as `n/a`.
    pub fn sampling_interval(&self) -> SamplingInterval {
        self.property(keys::SAMPLING_INTERVAL)
            .and_then(SamplingInterval::parse)
            .unwrap_or(SamplingInterval::NotAvailable)
    }

    pub fn grade(&self) -> Option<Grade> {
        self.property(keys::GRADE).and_then(Grade::parse)
    }

    /// Copy of this record with the classification properties replaced and
    /// every other property preserved.
    pub fn classified(&self, sampling: SamplingInterval, grade: Grade) -> Self {
        self.clone()
            .with_property(keys::SAMPLING_INTERVAL, sampling.as_str())
            .with_property(keys::GRADE, grade.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_interval_round_trips_through_property() {
        let src = Source::new("m-1").with_property(keys::SAMPLING_INTERVAL, "Daily");
        assert_eq!(src.sampling_interval(), SamplingInterval::Daily);
        assert_eq!(Source::new("m-2").sampling_interval(), SamplingInterval::NotAvailable);
    }

    #[test]
    fn classified_keeps_unrelated_properties() {
        let src = Source::new("m-1")
            .with_property(keys::INSTALL_DATE, "2019-04-02")
            .with_property(keys::GRADE, "C");

        let updated = src.classified(SamplingInterval::Hourly, Grade::AHourly);

        assert_eq!(updated.property(keys::INSTALL_DATE), Some("2019-04-02"));
        assert_eq!(updated.property(keys::SAMPLING_INTERVAL), Some("hourly"));
        assert_eq!(updated.grade(), Some(Grade::AHourly));
    }
}
