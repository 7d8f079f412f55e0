use serde::Serialize;
use std::fmt;

/// Failure-reporting options from the `fo` tag.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportFailure {
    /// `0`: report when every underlying mechanism fails (the default)
    pub all_fail: bool,
    /// `1`: report when any underlying mechanism fails
    pub any_fail: bool,
    /// `d`: report on DKIM failures regardless of alignment
    pub dkim: bool,
    /// `s`: report on SPF failures regardless of alignment
    pub spf: bool,
}

impl ReportFailure {
    /// Parse the colon-separated member list. Unrecognized members are
    /// returned so the caller can flag them without losing the rest.
    pub fn parse(value: &str) -> (Self, Vec<String>) {
        let mut new = Self::default();
        let mut unknown = vec![];
        for member in value.split(':').map(str::trim) {
            match member {
                "0" => new.all_fail = true,
                "1" => new.any_fail = true,
                "d" => new.dkim = true,
                "s" => new.spf = true,
                other => unknown.push(other.to_string()),
            }
        }
        (new, unknown)
    }
}

impl fmt::Display for ReportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut members = vec![];
        if self.all_fail {
            members.push("0");
        }
        if self.any_fail {
            members.push("1");
        }
        if self.dkim {
            members.push("d");
        }
        if self.spf {
            members.push("s");
        }
        if members.is_empty() {
            members.push("0");
        }
        f.write_str(&members.join(":"))
    }
}
