//! DKIM key-record checker.
//!
//! Validates the record published at `<selector>._domainkey.<domain>`
//! per RFC 6376 section 3.6.1 and distills it into a [`DkimKeyState`]
//! that the companion record-builder tool can be seeded from. Key
//! material is checked for shape only; no cryptography happens here.

use dns_resolver::{RecordType, Resolver};
use serde::Serialize;
use sleuth_report::{parse_tag_list, single_tag, Action, Query, Record, Remark, Tag, TagName};
use std::fmt;

#[cfg(test)]
mod tests;

const DNS_NAMESPACE: &str = "_domainkey";
const CITE_KEY_TAGS: &str = "https://datatracker.ietf.org/doc/html/rfc6376#section-3.6.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DkimTag {
    V,
    H,
    K,
    N,
    P,
    S,
    T,
}

impl fmt::Display for DkimTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V => "v",
            Self::H => "h",
            Self::K => "k",
            Self::N => "n",
            Self::P => "p",
            Self::S => "s",
            Self::T => "t",
        })
    }
}

impl TagName for DkimTag {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "v" => Self::V,
            "h" => Self::H,
            "k" => Self::K,
            "n" => Self::N,
            "p" => Self::P,
            "s" => Self::S,
            "t" => Self::T,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyFlag {
    /// `y`: the domain is testing DKIM
    Testing,
    /// `s`: the key is not valid for subdomain identities
    NoSubdomains,
}

impl KeyFlag {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Testing => "y",
            Self::NoSubdomains => "s",
        }
    }
}

/// Normalized view of a validated key record, handed to the companion
/// record-builder tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DkimKeyState {
    pub domain: String,
    pub selector: String,
    pub version: Option<String>,
    pub key_type: Option<String>,
    pub hash_algorithms: Option<String>,
    pub service_type: Option<String>,
    pub notes: Option<String>,
    /// Only populated when the key material passed the shape check
    pub public_key: Option<String>,
    pub flags: Vec<KeyFlag>,
}

impl DkimKeyState {
    /// Render the state back into record text, the way the builder tool
    /// does. Re-validating the output yields an equivalent state.
    pub fn to_record(&self) -> String {
        let mut parts = vec![format!(
            "v={}",
            self.version.as_deref().unwrap_or("DKIM1")
        )];
        if let Some(k) = &self.key_type {
            parts.push(format!("k={k}"));
        }
        if let Some(h) = &self.hash_algorithms {
            parts.push(format!("h={h}"));
        }
        if let Some(s) = &self.service_type {
            parts.push(format!("s={s}"));
        }
        if !self.flags.is_empty() {
            let flags: Vec<&str> = self.flags.iter().map(KeyFlag::as_str).collect();
            parts.push(format!("t={}", flags.join(":")));
        }
        if let Some(n) = &self.notes {
            parts.push(format!("n={n}"));
        }
        parts.push(format!("p={}", self.public_key.as_deref().unwrap_or("")));
        parts.join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DkimReport {
    pub queries: Vec<Query>,
    pub state: Option<DkimKeyState>,
}

pub async fn check_selector(resolver: &dyn Resolver, domain: &str, selector: &str) -> DkimReport {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    let selector = selector.trim().to_ascii_lowercase();
    let name = format!("{selector}.{DNS_NAMESPACE}.{domain}");
    tracing::debug!("checking DKIM key record at {name}");

    let mut query = Query::new(RecordType::Txt, &name);
    let answer = match resolver.resolve_txt(&name).await {
        Ok(answer) => answer,
        Err(err) => {
            query.remark(Remark::error(format!("DNS query failed: {err}")));
            return DkimReport {
                queries: vec![query],
                state: None,
            };
        }
    };
    query = query.answered(&answer);

    let mut contents = answer.as_txt();
    let state = match contents.len() {
        0 => {
            query.remark(Remark::error(format!(
                "no DKIM key record found for selector '{selector}' at {name}"
            )));
            None
        }
        1 => {
            let (record, state) = validate_key_record(contents.remove(0), &domain, &selector);
            query.records.push(record);
            Some(state)
        }
        _ => {
            query.remark(Remark::error(format!(
                "multiple TXT records found at {name}; a selector must publish exactly one key"
            )));
            for content in contents {
                query.records.push(Record::new(content));
            }
            None
        }
    };

    DkimReport {
        queries: vec![query],
        state,
    }
}

fn is_base64ish(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | ' ' | '\t'))
}

fn validate_key_record(content: String, domain: &str, selector: &str) -> (Record, DkimKeyState) {
    let mut record = Record::new(content);
    let tags: Vec<Tag<DkimTag>> = parse_tag_list(&mut record, ';');

    let mut state = DkimKeyState {
        domain: domain.to_string(),
        selector: selector.to_string(),
        ..Default::default()
    };

    match single_tag(&mut record, &tags, DkimTag::V) {
        None => record.remark(
            Remark::info("the v=DKIM1 tag is recommended as the first tag of a key record")
                .cite(CITE_KEY_TAGS),
        ),
        Some(tag) => {
            if tag.value != "DKIM1" {
                record.remark(Remark::info(format!(
                    "unrecognized key record version '{}'",
                    tag.value
                )));
            }
            state.version = Some(tag.value.clone());
        }
    }

    if let Some(tag) = single_tag(&mut record, &tags, DkimTag::K) {
        if tag.value != "rsa" && tag.value != "ed25519" {
            record.remark(Remark::warning(format!(
                "unrecognized key algorithm '{}'",
                tag.value
            )));
        }
        state.key_type = Some(tag.value.clone());
    }

    if let Some(tag) = single_tag(&mut record, &tags, DkimTag::H) {
        if tag.value.contains(':') {
            record.remark(Remark::warning(
                "the h tag should be restricted to a single hash algorithm",
            ));
        } else if !matches!(tag.value.as_str(), "sha1" | "sha256") {
            record.remark(Remark::warning(format!(
                "unrecognized hash algorithm '{}'",
                tag.value
            )));
        }
        state.hash_algorithms = Some(tag.value.clone());
    }

    if let Some(tag) = single_tag(&mut record, &tags, DkimTag::S) {
        if tag.value.contains(':') {
            record.remark(Remark::warning(
                "the s tag should be restricted to a single service type",
            ));
        } else if !matches!(tag.value.as_str(), "*" | "email") {
            record.remark(Remark::warning(format!(
                "unrecognized service type '{}'",
                tag.value
            )));
        }
        state.service_type = Some(tag.value.clone());
    }

    if let Some(tag) = single_tag(&mut record, &tags, DkimTag::T) {
        for flag in tag.value.split(':').map(str::trim) {
            match flag {
                "y" => {
                    state.flags.push(KeyFlag::Testing);
                    record.remark(Remark::info(
                        "this key is flagged as testing; verifiers must not treat \
                         failures as significant",
                    ));
                }
                "s" => state.flags.push(KeyFlag::NoSubdomains),
                other => record.remark(Remark::warning(format!("unknown key flag '{other}'"))),
            }
        }
    }

    if let Some(tag) = single_tag(&mut record, &tags, DkimTag::N) {
        state.notes = Some(tag.value.clone());
    }

    match single_tag(&mut record, &tags, DkimTag::P) {
        None => record.remark(
            Remark::error("the mandatory p tag (public key data) is missing").cite(CITE_KEY_TAGS),
        ),
        Some(tag) if tag.value.is_empty() => {
            record.remark(Remark::info(
                "the p tag is empty, meaning this key has been revoked",
            ));
        }
        Some(tag) => {
            if is_base64ish(&tag.value) {
                state.public_key = Some(tag.value.chars().filter(|c| !c.is_whitespace()).collect());
            } else {
                record.remark(Remark::error(
                    "the p tag does not look like base64 key material",
                ));
            }
        }
    }

    record.actions.push(Action::DkimRecordBuilder {
        domain: domain.to_string(),
        selector: selector.to_string(),
    });

    (record, state)
}
