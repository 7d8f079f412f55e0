use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Identifier alignment requested by the `adkim`/`aspf` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentMode {
    Relaxed,
    Strict,
}

impl AlignmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relaxed => "r",
            Self::Strict => "s",
        }
    }
}

impl fmt::Display for AlignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlignmentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "r" => Self::Relaxed,
            "s" => Self::Strict,
            _ => return Err(format!("invalid alignment mode {s:?}")),
        })
    }
}
