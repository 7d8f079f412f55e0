//! The diagnostic vocabulary shared by every validator: remarks with a
//! severity and an optional citation of the governing rule, records, and
//! the ordered query trace a validator run produces.

use dns_resolver::{Answer, RecordType};
use serde::Serialize;
use std::fmt;

mod orgdomain;
pub mod tags;

pub use orgdomain::organizational_domain;
pub use tags::{parse_tag_list, single_tag, Tag, TagName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// One finding about a record or a query. Remarks are only ever added,
/// never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remark {
    pub severity: Severity,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
}

impl Remark {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            text: text.into(),
            citation: None,
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            text: text.into(),
            citation: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            text: text.into(),
            citation: None,
        }
    }

    /// Attach the URL of the rule this remark is based on.
    pub fn cite(mut self, url: impl Into<String>) -> Self {
        self.citation = Some(url.into());
        self
    }
}

/// An affordance the presentation layer can offer next to a validated
/// record, e.g. pre-populating the matching record-builder tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Action {
    DkimRecordBuilder { domain: String, selector: String },
    DmarcRecordBuilder { domain: String },
}

/// One DNS resource record instance, or one fetched policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub content: String,
    pub remarks: Vec<Remark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub actions: Vec<Action>,
}

impl Record {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            remarks: vec![],
            image: None,
            actions: vec![],
        }
    }

    pub fn remark(&mut self, remark: Remark) {
        self.remarks.push(remark);
    }
}

/// One resolution step in a validator run. The trace is the ordered
/// sequence of these; order matters because later queries depend on
/// earlier answers and the steps are shown to the user in issuance order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    /// `None` for a fetched policy file, where `domain` holds the URL
    pub rtype: Option<RecordType>,
    pub domain: String,
    pub cname_chain: Vec<String>,
    pub authenticated: bool,
    pub remarks: Vec<Remark>,
    pub records: Vec<Record>,
}

impl Query {
    pub fn new(rtype: RecordType, domain: impl Into<String>) -> Self {
        Self {
            rtype: Some(rtype),
            domain: domain.into(),
            cname_chain: vec![],
            authenticated: false,
            remarks: vec![],
            records: vec![],
        }
    }

    pub fn for_file(url: impl Into<String>) -> Self {
        Self {
            rtype: None,
            domain: url.into(),
            cname_chain: vec![],
            authenticated: false,
            remarks: vec![],
            records: vec![],
        }
    }

    /// Copy the answer-level facts (CNAME chain, DNSSEC flag) onto this
    /// query.
    pub fn answered(mut self, answer: &Answer) -> Self {
        self.cname_chain = answer.cname_chain.clone();
        self.authenticated = answer.authenticated;
        self
    }

    pub fn remark(&mut self, remark: Remark) {
        self.remarks.push(remark);
    }

    /// The most severe finding on this query or any of its records.
    pub fn worst_severity(&self) -> Option<Severity> {
        self.remarks
            .iter()
            .chain(self.records.iter().flat_map(|r| r.remarks.iter()))
            .map(|r| r.severity)
            .max()
    }
}
