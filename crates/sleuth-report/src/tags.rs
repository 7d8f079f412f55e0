//! The tag-value parser shared by the `;`-separated record grammars
//! (DKIM, DMARC, BIMI, MTA-STS, TLS-RPT).
//!
//! Each grammar declares its recognized tag names as a closed enum
//! implementing [`TagName`], so validators match on tags exhaustively
//! and unknown names are a checked fallback path rather than a silent
//! string comparison.

use crate::{Record, Remark};
use std::fmt;

pub trait TagName: Copy + Eq + fmt::Display + Sized {
    /// Map a tag name to the grammar's closed set; `None` for
    /// unrecognized names.
    fn parse(name: &str) -> Option<Self>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag<N> {
    pub name: N,
    pub value: String,
}

/// Split `record.content` into `name=value` tags on `separator`.
///
/// A segment that is not of the `name=value` form earns an `error`
/// remark, except for a trailing empty segment which is ignored; an
/// unrecognized name earns a `warning`. Both keep the parse going.
pub fn parse_tag_list<N: TagName>(record: &mut Record, separator: char) -> Vec<Tag<N>> {
    let content = record.content.clone();
    let segments: Vec<&str> = content.split(separator).collect();
    let count = segments.len();

    let mut tags = vec![];
    for (i, segment) in segments.into_iter().enumerate() {
        let segment = segment.trim();
        if segment.is_empty() {
            if i + 1 == count {
                continue;
            }
            record.remark(Remark::error("empty segment is not a valid tag"));
            continue;
        }
        let Some((name, value)) = segment.split_once('=') else {
            record.remark(Remark::error(format!("'{segment}' is not a valid tag")));
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            record.remark(Remark::error(format!("'{segment}' is not a valid tag")));
            continue;
        }
        match N::parse(name) {
            Some(tag_name) => tags.push(Tag {
                name: tag_name,
                value: value.to_string(),
            }),
            None => record.remark(Remark::warning(format!("unknown tag '{name}'"))),
        }
    }
    tags
}

/// Look up a tag that may appear at most once. A repeated occurrence
/// earns an `error` remark on the record; the first occurrence is
/// returned either way.
pub fn single_tag<'t, N: TagName>(
    record: &mut Record,
    tags: &'t [Tag<N>],
    name: N,
) -> Option<&'t Tag<N>> {
    let mut matching = tags.iter().filter(|t| t.name == name);
    let first = matching.next();
    if matching.next().is_some() {
        record.remark(Remark::error(format!(
            "the '{name}' tag may appear at most once"
        )));
    }
    first
}
