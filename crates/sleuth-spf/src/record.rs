//! Parsed form of the terms of one SPF record.
//!
//! Targets are kept as plain strings: macro expansion is out of scope
//! for this checker, so a `%` anywhere in a target merely short-circuits
//! dereferencing (see [`has_macro`]).

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Directive(Directive),
    Modifier(Modifier),
}

impl Term {
    /// A term that matches `name=value` at the start is a modifier;
    /// everything else must parse as a directive.
    pub fn parse(s: &str) -> Result<Self, String> {
        match Modifier::parse(s) {
            Ok(m) => Ok(Self::Modifier(m)),
            Err(_) => Directive::parse(s).map(Self::Directive),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub qualifier: Qualifier,
    pub mechanism: Mechanism,
}

impl Directive {
    fn parse(s: &str) -> Result<Self, String> {
        let (qualifier, rest) = match s.chars().next().and_then(Qualifier::parse) {
            Some(q) => (q, &s[1..]),
            None => (Qualifier::default(), s),
        };
        if rest.is_empty() {
            return Err(format!("'{s}' is not a valid directive"));
        }
        Ok(Self {
            qualifier,
            mechanism: Mechanism::parse(rest)?,
        })
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier {
    /// `+`
    #[default]
    Pass,
    /// `-`
    Fail,
    /// `~`
    SoftFail,
    /// `?`
    Neutral,
}

impl Qualifier {
    fn parse(c: char) -> Option<Self> {
        Some(match c {
            '+' => Self::Pass,
            '-' => Self::Fail,
            '~' => Self::SoftFail,
            '?' => Self::Neutral,
            _ => return None,
        })
    }
}

/// The `[/cidr4][//cidr6]` suffix of an `a` or `mx` term. Parsing never
/// fails the term: a bad suffix is kept for the checker to flag while
/// the target lookup still happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CidrSuffix {
    None,
    Valid(DualCidrLength),
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DualCidrLength {
    pub v4: u8,
    pub v6: u8,
}

impl Default for DualCidrLength {
    fn default() -> Self {
        Self { v4: 32, v6: 128 }
    }
}

impl CidrSuffix {
    fn parse_from_end(s: &str) -> (&str, Self) {
        let Some((prefix, suffix)) = s.split_once('/') else {
            return (s, Self::None);
        };

        fn v4_len(s: &str) -> Option<u8> {
            s.parse::<u8>().ok().filter(|n| *n <= 32)
        }
        fn v6_len(s: &str) -> Option<u8> {
            s.parse::<u8>().ok().filter(|n| *n <= 128)
        }

        let parsed = if let Some(v6) = suffix.strip_prefix('/') {
            // "a//64": only an ip6 length
            v6_len(v6).map(|v6| DualCidrLength {
                v6,
                ..Default::default()
            })
        } else if let Some((v4, v6)) = suffix.split_once("//") {
            match (v4_len(v4), v6_len(v6)) {
                (Some(v4), Some(v6)) => Some(DualCidrLength { v4, v6 }),
                _ => None,
            }
        } else {
            v4_len(suffix).map(|v4| DualCidrLength {
                v4,
                ..Default::default()
            })
        };

        match parsed {
            Some(dual) => (prefix, Self::Valid(dual)),
            None => (prefix, Self::Invalid(format!("/{suffix}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    All,
    Include { domain: String },
    A { domain: Option<String>, cidr: CidrSuffix },
    Mx { domain: Option<String>, cidr: CidrSuffix },
    Ptr { domain: Option<String> },
    Ip4 { arg: String },
    Ip6 { arg: String },
    Exists { domain: String },
}

fn starts_with_ident<'a>(s: &'a str, ident: &str) -> Option<&'a str> {
    if s.len() < ident.len() {
        return None;
    }

    if s[0..ident.len()].eq_ignore_ascii_case(ident) {
        Some(&s[ident.len()..])
    } else {
        None
    }
}

/// Like `starts_with_ident`, but only for mechanisms whose argument is
/// optional: the remainder must be empty or introduced by `:` or `/`,
/// so that e.g. `aaa` is not mistaken for an `a` term.
fn ident_arg<'a>(s: &'a str, ident: &str) -> Option<&'a str> {
    let remain = starts_with_ident(s, ident)?;
    if remain.is_empty() || remain.starts_with(':') || remain.starts_with('/') {
        Some(remain)
    } else {
        None
    }
}

impl Mechanism {
    fn parse(s: &str) -> Result<Self, String> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        if let Some(spec) = starts_with_ident(s, "include:") {
            if spec.is_empty() {
                return Err(format!("invalid 'include' mechanism: {s}"));
            }
            return Ok(Self::Include {
                domain: spec.to_string(),
            });
        }

        if let Some(spec) = starts_with_ident(s, "exists:") {
            if spec.is_empty() {
                return Err(format!("invalid 'exists' mechanism: {s}"));
            }
            return Ok(Self::Exists {
                domain: spec.to_string(),
            });
        }

        if let Some(arg) = starts_with_ident(s, "ip4:") {
            if arg.is_empty() {
                return Err(format!("invalid 'ip4' mechanism: {s}"));
            }
            return Ok(Self::Ip4 {
                arg: arg.to_string(),
            });
        }

        if let Some(arg) = starts_with_ident(s, "ip6:") {
            if arg.is_empty() {
                return Err(format!("invalid 'ip6' mechanism: {s}"));
            }
            return Ok(Self::Ip6 {
                arg: arg.to_string(),
            });
        }

        if let Some(remain) = ident_arg(s, "mx") {
            let (remain, cidr) = CidrSuffix::parse_from_end(remain);
            let domain = parse_target(remain).ok_or_else(|| format!("invalid 'mx' mechanism: {s}"))?;
            return Ok(Self::Mx { domain, cidr });
        }

        if let Some(remain) = ident_arg(s, "ptr") {
            let domain =
                parse_target(remain).ok_or_else(|| format!("invalid 'ptr' mechanism: {s}"))?;
            return Ok(Self::Ptr { domain });
        }

        if let Some(remain) = ident_arg(s, "a") {
            let (remain, cidr) = CidrSuffix::parse_from_end(remain);
            let domain = parse_target(remain).ok_or_else(|| format!("invalid 'a' mechanism: {s}"))?;
            return Ok(Self::A { domain, cidr });
        }

        Err(format!("unknown mechanism '{s}'"))
    }
}

/// The optional `:domain` argument; `None` in the outer `Option` marks a
/// syntax error (a bare `:` with nothing behind it).
fn parse_target(remain: &str) -> Option<Option<String>> {
    match remain.strip_prefix(':') {
        Some("") => None,
        Some(domain) => Some(Some(domain.to_string())),
        None if remain.is_empty() => Some(None),
        None => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    Redirect(String),
    Explanation(String),
    Unknown { name: String, value: String },
}

impl Modifier {
    fn parse(s: &str) -> Result<Self, String> {
        if let Some(spec) = starts_with_ident(s, "redirect=") {
            return Ok(Self::Redirect(spec.to_string()));
        }
        if let Some(spec) = starts_with_ident(s, "exp=") {
            return Ok(Self::Explanation(spec.to_string()));
        }

        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| format!("invalid modifier {s}"))?;

        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
        if !valid {
            return Err(format!("modifier name '{name}' is invalid"));
        }

        Ok(Self::Unknown {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

/// Macro detection only: expansion is not performed by this checker.
pub fn has_macro(s: &str) -> bool {
    s.contains('%')
}
