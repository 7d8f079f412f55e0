use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// One `rua`/`ruf` destination, with the optional `!` maximum-size
/// suffix, e.g. `mailto:reports@example.net!10m`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackAddress {
    pub uri: String,
    /// Maximum report size in bytes, if the publisher declared one
    pub size_limit: Option<u64>,
}

impl FeedbackAddress {
    pub fn is_mailto(&self) -> bool {
        self.uri.starts_with("mailto:")
    }

    /// The destination domain of a `mailto:` address.
    pub fn domain(&self) -> Option<&str> {
        self.uri
            .strip_prefix("mailto:")?
            .rsplit_once('@')
            .map(|(_, domain)| domain)
    }
}

impl FromStr for FeedbackAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty report address".to_string());
        }

        let (uri, size) = match s.rsplit_once('!') {
            Some((uri, size)) => (uri, Some(size)),
            None => (s, None),
        };

        let size_limit = match size {
            None => None,
            Some(raw) => {
                let (digits, multiplier) = match raw.as_bytes().last() {
                    Some(b'k') => (&raw[..raw.len() - 1], 1u64 << 10),
                    Some(b'm') => (&raw[..raw.len() - 1], 1u64 << 20),
                    Some(b'g') => (&raw[..raw.len() - 1], 1u64 << 30),
                    Some(b't') => (&raw[..raw.len() - 1], 1u64 << 40),
                    _ => (raw, 1),
                };
                let n: u64 = digits
                    .parse()
                    .map_err(|_| format!("invalid size limit {raw:?} on report address {s:?}"))?;
                Some(n * multiplier)
            }
        };

        Ok(Self {
            uri: uri.to_string(),
            size_limit,
        })
    }
}

impl fmt::Display for FeedbackAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)?;
        if let Some(size) = self.size_limit {
            write!(f, "!{size}")?;
        }
        Ok(())
    }
}
