use std::fmt;

/// Data-quality grade of a source over an evaluation interval, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Grade {
    ADaily,
    AHourly,
    B,
    C,
}

impl Grade {
    pub const ALL: [Grade; 4] = [Grade::ADaily, Grade::AHourly, Grade::B, Grade::C];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ADaily => "A_DAILY",
            Self::AHourly => "A_HOURLY",
            Self::B => "B",
            Self::C => "C",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_labels() {
        assert_eq!(Grade::ADaily.to_string(), "A_DAILY");
        assert_eq!(Grade::parse("a_hourly"), Some(Grade::AHourly));
        assert_eq!(Grade::parse("D"), None);
    }
}
