use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

mod resolver;
pub use resolver::HickoryResolver;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    #[error("invalid DNS name {0}")]
    InvalidName(String),
    #[error("{0}")]
    ResolveFailed(String),
}

/// The record types the validators query for. The deprecated SPF type
/// (code 99) is still probed so that stale deployments can be flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Mx,
    Txt,
    Soa,
    Spf,
    Ptr,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Mx => "MX",
            Self::Txt => "TXT",
            Self::Soa => "SOA",
            Self::Spf => "SPF",
            Self::Ptr => "PTR",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecord {
    /// Owner name, after following any CNAME chain
    pub name: String,
    pub rtype: RecordType,
    /// Presentation form of the rdata. TXT character-strings are joined
    /// without a separator, as RFC 7208 requires for record assembly.
    pub data: String,
}

/// The answer for one (name, type) resolution step.
///
/// An `Ok` answer with no records means "no such record"; a transport
/// problem is a `DnsError`. Callers rely on that distinction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub records: Vec<DnsRecord>,
    /// Intermediate CNAME targets, in the order they were followed
    pub cname_chain: Vec<String>,
    /// True if the response was DNSSEC-authenticated for this (name, type)
    pub authenticated: bool,
    /// True if the name itself does not exist (as opposed to NODATA)
    pub nxdomain: bool,
}

impl Answer {
    pub fn as_txt(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.rtype == RecordType::Txt)
            .map(|r| r.data.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A trait for entities that perform DNS resolution.
pub trait Resolver: Sync + Send {
    fn resolve<'a>(
        &'a self,
        name: &'a str,
        rtype: RecordType,
    ) -> BoxFuture<'a, Result<Answer, DnsError>>;

    fn resolve_txt<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Answer, DnsError>> {
        self.resolve(name, RecordType::Txt)
    }
}

/// An in-memory resolver for tests: zone data is declared up front with
/// the `with_*` builder methods and every lookup is answered from it.
#[derive(Default)]
pub struct TestResolver {
    records: HashMap<(String, RecordType), Vec<String>>,
    cnames: HashMap<String, String>,
    failures: HashSet<(String, RecordType)>,
    secure: HashSet<String>,
}

fn key_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl TestResolver {
    pub fn with_record(
        mut self,
        name: &str,
        rtype: RecordType,
        data: impl Into<String>,
    ) -> Self {
        self.records
            .entry((key_name(name), rtype))
            .or_default()
            .push(data.into());
        self
    }

    pub fn with_txt(self, name: &str, content: impl Into<String>) -> Self {
        self.with_record(name, RecordType::Txt, content)
    }

    pub fn with_a(self, name: &str, addr: &str) -> Self {
        self.with_record(name, RecordType::A, addr)
    }

    pub fn with_mx(self, name: &str, pref: u16, host: &str) -> Self {
        self.with_record(name, RecordType::Mx, format!("{pref} {host}"))
    }

    /// Declare `name` as a zone apex by publishing an SOA record for it.
    pub fn with_soa(self, name: &str) -> Self {
        let data = format!("ns1.{name}. hostmaster.{name}. 2024010101 7200 3600 1209600 3600");
        self.with_record(name, RecordType::Soa, data)
    }

    pub fn with_cname(mut self, alias: &str, target: &str) -> Self {
        self.cnames.insert(key_name(alias), key_name(target));
        self
    }

    /// Simulate a transport failure for this (name, type).
    pub fn with_failure(mut self, name: &str, rtype: RecordType) -> Self {
        self.failures.insert((key_name(name), rtype));
        self
    }

    /// Mark every answer at `name` as DNSSEC-authenticated.
    pub fn with_authenticated(mut self, name: &str) -> Self {
        self.secure.insert(key_name(name));
        self
    }
}

impl Resolver for TestResolver {
    fn resolve<'a>(
        &'a self,
        name: &'a str,
        rtype: RecordType,
    ) -> BoxFuture<'a, Result<Answer, DnsError>> {
        Box::pin(async move {
            let mut name = key_name(name);
            let mut cname_chain = vec![];
            while let Some(target) = self.cnames.get(&name) {
                cname_chain.push(target.clone());
                name = target.clone();
                if cname_chain.len() > 8 {
                    return Err(DnsError::ResolveFailed(format!(
                        "CNAME chain too long resolving {name}"
                    )));
                }
            }

            if self.failures.contains(&(name.clone(), rtype)) {
                return Err(DnsError::ResolveFailed(format!(
                    "simulated failure querying {name} {rtype}"
                )));
            }

            let records: Vec<DnsRecord> = self
                .records
                .get(&(name.clone(), rtype))
                .map(|datas| {
                    datas
                        .iter()
                        .map(|data| DnsRecord {
                            name: name.clone(),
                            rtype,
                            data: data.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let nxdomain =
                records.is_empty() && !self.records.keys().any(|(n, _)| *n == name);

            Ok(Answer {
                records,
                cname_chain,
                authenticated: self.secure.contains(&name),
                nxdomain,
            })
        })
    }
}
