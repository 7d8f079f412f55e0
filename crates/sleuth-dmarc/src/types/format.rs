use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Failure-report format from the `rf` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Afrf,
    Iodef,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Afrf => "afrf",
            Self::Iodef => "iodef",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "afrf" => Self::Afrf,
            "iodef" => Self::Iodef,
            _ => return Err(format!("invalid report format {s:?}")),
        })
    }
}
