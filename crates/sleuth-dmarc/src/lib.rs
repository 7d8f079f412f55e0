//! DMARC policy checker.
//!
//! Discovers the record at `_dmarc.<domain>`, falling back to the
//! organizational domain (found via the SOA apex walk) for subdomains,
//! validates every tag against RFC 7489, and verifies that external
//! report destinations have opted in via the `_report._dmarc`
//! authorization record. The validated record is distilled into a
//! [`DmarcState`] for the companion record-builder tool.

use dns_resolver::{RecordType, Resolver};
use serde::Serialize;
use sleuth_report::{
    organizational_domain, parse_tag_list, single_tag, Action, Query, Record, Remark, Tag, TagName,
};
use std::fmt;

pub mod types;

#[cfg(test)]
mod tests;

use types::feedback_address::FeedbackAddress;
use types::format::ReportFormat;
use types::mode::AlignmentMode;
use types::policy::Policy;
use types::report_failure::ReportFailure;

const CITE_TAGS: &str = "https://datatracker.ietf.org/doc/html/rfc7489#section-6.3";
const CITE_DISCOVERY: &str = "https://datatracker.ietf.org/doc/html/rfc7489#section-6.6.3";
const CITE_REPORT_AUTH: &str = "https://datatracker.ietf.org/doc/html/rfc7489#section-7.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmarcTag {
    Adkim,
    Aspf,
    Fo,
    P,
    Pct,
    Rf,
    Ri,
    Rua,
    Ruf,
    Sp,
    V,
}

impl fmt::Display for DmarcTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Adkim => "adkim",
            Self::Aspf => "aspf",
            Self::Fo => "fo",
            Self::P => "p",
            Self::Pct => "pct",
            Self::Rf => "rf",
            Self::Ri => "ri",
            Self::Rua => "rua",
            Self::Ruf => "ruf",
            Self::Sp => "sp",
            Self::V => "v",
        })
    }
}

impl TagName for DmarcTag {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "adkim" => Self::Adkim,
            "aspf" => Self::Aspf,
            "fo" => Self::Fo,
            "p" => Self::P,
            "pct" => Self::Pct,
            "rf" => Self::Rf,
            "ri" => Self::Ri,
            "rua" => Self::Rua,
            "ruf" => Self::Ruf,
            "sp" => Self::Sp,
            "v" => Self::V,
            _ => return None,
        })
    }
}

/// Normalized view of a validated policy record, handed to the
/// companion record-builder tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DmarcState {
    /// The domain the policy record was found at (the organizational
    /// domain when discovery fell back to it)
    pub domain: String,
    pub policy: Policy,
    pub subdomain_policy: Option<Policy>,
    pub align_dkim: Option<AlignmentMode>,
    pub align_spf: Option<AlignmentMode>,
    pub rate: Option<u8>,
    pub interval: Option<u32>,
    pub formats: Vec<ReportFormat>,
    pub report_failure: Option<ReportFailure>,
    pub aggregate_feedback: Vec<FeedbackAddress>,
    pub message_failure: Vec<FeedbackAddress>,
}

impl DmarcState {
    fn new(domain: &str, policy: Policy) -> Self {
        Self {
            domain: domain.to_string(),
            policy,
            subdomain_policy: None,
            align_dkim: None,
            align_spf: None,
            rate: None,
            interval: None,
            formats: vec![],
            report_failure: None,
            aggregate_feedback: vec![],
            message_failure: vec![],
        }
    }

    /// Render the state back into record text, the way the builder tool
    /// does. Re-validating the output yields an equivalent state.
    pub fn to_record(&self) -> String {
        let mut parts = vec!["v=DMARC1".to_string(), format!("p={}", self.policy)];
        if let Some(sp) = self.subdomain_policy {
            parts.push(format!("sp={sp}"));
        }
        if let Some(mode) = self.align_dkim {
            parts.push(format!("adkim={mode}"));
        }
        if let Some(mode) = self.align_spf {
            parts.push(format!("aspf={mode}"));
        }
        if let Some(rate) = self.rate {
            parts.push(format!("pct={rate}"));
        }
        if let Some(interval) = self.interval {
            parts.push(format!("ri={interval}"));
        }
        if let Some(fo) = &self.report_failure {
            parts.push(format!("fo={fo}"));
        }
        if !self.formats.is_empty() {
            let formats: Vec<&str> = self.formats.iter().map(ReportFormat::as_str).collect();
            parts.push(format!("rf={}", formats.join(":")));
        }
        if !self.aggregate_feedback.is_empty() {
            parts.push(format!("rua={}", join_addresses(&self.aggregate_feedback)));
        }
        if !self.message_failure.is_empty() {
            parts.push(format!("ruf={}", join_addresses(&self.message_failure)));
        }
        parts.join("; ")
    }
}

fn join_addresses(addresses: &[FeedbackAddress]) -> String {
    addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DmarcReport {
    pub queries: Vec<Query>,
    pub state: Option<DmarcState>,
}

pub async fn check_domain(resolver: &dyn Resolver, domain: &str) -> DmarcReport {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    let mut validator = Validator {
        resolver,
        trace: vec![],
    };
    let state = validator.run(&domain).await;
    DmarcReport {
        queries: validator.trace,
        state,
    }
}

fn is_dmarc_record(content: &str) -> bool {
    match content.strip_prefix("v=DMARC1") {
        Some(rest) => rest.is_empty() || rest.starts_with(';') || rest.starts_with(' '),
        None => false,
    }
}

/// How a record is being parsed. The `_report._dmarc` authorization
/// record reuses the policy grammar, but must not trigger the
/// `p`-mandatory rule or any further cross-domain checks, bounding the
/// authorization recursion to one hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordContext<'a> {
    Policy { domain: &'a str },
    ReportAuthorization,
}

struct Validator<'a> {
    resolver: &'a dyn Resolver,
    trace: Vec<Query>,
}

impl<'a> Validator<'a> {
    async fn run(&mut self, domain: &str) -> Option<DmarcState> {
        tracing::debug!("checking DMARC policy for {domain}");
        let candidates = self.query_policy(&format!("_dmarc.{domain}")).await?;
        let qidx = self.trace.len() - 1;

        match candidates.len() {
            0 => {
                let org = organizational_domain(self.resolver, domain, &mut self.trace).await;
                if org == domain {
                    self.trace[qidx].remark(
                        Remark::error(format!("{domain} does not publish a DMARC policy"))
                            .cite(CITE_DISCOVERY),
                    );
                    return None;
                }
                self.trace[qidx].remark(
                    Remark::info(format!(
                        "no DMARC record at {domain}; falling back to the \
                         organizational domain {org}"
                    ))
                    .cite(CITE_DISCOVERY),
                );

                let candidates = self.query_policy(&format!("_dmarc.{org}")).await?;
                let qidx = self.trace.len() - 1;
                self.evaluate(candidates, &org, Some(org.clone()), qidx).await
            }
            _ => self.evaluate(candidates, domain, None, qidx).await,
        }
    }

    /// Cardinality check plus full record validation; `known_org` is the
    /// organizational domain when discovery already walked to it.
    async fn evaluate(
        &mut self,
        mut candidates: Vec<String>,
        policy_domain: &str,
        known_org: Option<String>,
        qidx: usize,
    ) -> Option<DmarcState> {
        match candidates.len() {
            0 => {
                self.trace[qidx].remark(
                    Remark::error(format!("{policy_domain} does not publish a DMARC policy"))
                        .cite(CITE_DISCOVERY),
                );
                None
            }
            1 => {
                let (record, state) = parse_policy_record(
                    candidates.remove(0),
                    RecordContext::Policy {
                        domain: policy_domain,
                    },
                );
                self.trace[qidx].records.push(record);
                if let Some(state) = &state {
                    self.authorize_reports(policy_domain, known_org, state).await;
                }
                state
            }
            _ => {
                self.trace[qidx].remark(
                    Remark::error("a domain may not publish multiple DMARC records")
                        .cite(CITE_DISCOVERY),
                );
                for content in candidates {
                    self.trace[qidx].records.push(Record::new(content));
                }
                None
            }
        }
    }

    async fn query_policy(&mut self, name: &str) -> Option<Vec<String>> {
        let mut query = Query::new(RecordType::Txt, name);
        match self.resolver.resolve_txt(name).await {
            Ok(answer) => {
                query = query.answered(&answer);
                let candidates = answer
                    .as_txt()
                    .into_iter()
                    .filter(|txt| is_dmarc_record(txt))
                    .collect();
                self.trace.push(query);
                Some(candidates)
            }
            Err(err) => {
                query.remark(Remark::error(format!("DNS query failed: {err}")));
                self.trace.push(query);
                None
            }
        }
    }

    /// Check that every external report destination has opted in to
    /// receive reports for `policy_domain`. One authorization query per
    /// distinct destination, and nothing beyond that one hop.
    async fn authorize_reports(
        &mut self,
        policy_domain: &str,
        known_org: Option<String>,
        state: &DmarcState,
    ) {
        let mut destinations: Vec<String> = state
            .aggregate_feedback
            .iter()
            .chain(state.message_failure.iter())
            .filter(|a| a.is_mailto())
            .filter_map(|a| a.domain())
            .map(|d| d.trim_end_matches('.').to_ascii_lowercase())
            .collect();
        destinations.sort();
        destinations.dedup();

        let mut policy_org = known_org;
        for dest in destinations {
            if dest == policy_domain {
                continue;
            }
            let org = match policy_org.clone() {
                Some(org) => org,
                None => {
                    let org =
                        organizational_domain(self.resolver, policy_domain, &mut self.trace).await;
                    policy_org = Some(org.clone());
                    org
                }
            };
            if dest == org {
                continue;
            }
            let dest_org = organizational_domain(self.resolver, &dest, &mut self.trace).await;
            if dest_org == org {
                continue;
            }
            self.check_authorization(policy_domain, &dest).await;
        }
    }

    async fn check_authorization(&mut self, policy_domain: &str, dest: &str) {
        let name = format!("{policy_domain}._report._dmarc.{dest}");
        let Some(candidates) = self.query_policy(&name).await else {
            return;
        };
        let qidx = self.trace.len() - 1;

        if candidates.is_empty() {
            self.trace[qidx].remark(
                Remark::error(format!(
                    "{dest} has not opted in to receive DMARC reports for {policy_domain}"
                ))
                .cite(CITE_REPORT_AUTH),
            );
            return;
        }

        self.trace[qidx].remark(
            Remark::info(format!(
                "{dest} accepts DMARC reports for {policy_domain}"
            ))
            .cite(CITE_REPORT_AUTH),
        );
        for content in candidates {
            let (record, _) = parse_policy_record(content, RecordContext::ReportAuthorization);
            self.trace[qidx].records.push(record);
        }
    }
}

fn parse_policy_record(content: String, ctx: RecordContext) -> (Record, Option<DmarcState>) {
    let mut record = Record::new(content);
    let tags: Vec<Tag<DmarcTag>> = parse_tag_list(&mut record, ';');

    // consumed by the candidate filter already; only the cardinality
    // of the tag itself is still worth checking
    let _ = single_tag(&mut record, &tags, DmarcTag::V);

    let policy = match single_tag(&mut record, &tags, DmarcTag::P) {
        None => {
            if matches!(ctx, RecordContext::Policy { .. }) {
                record.remark(
                    Remark::error("the mandatory p tag (requested policy) is missing")
                        .cite(CITE_TAGS),
                );
            }
            None
        }
        Some(tag) => match tag.value.parse::<Policy>() {
            Ok(policy) => Some(policy),
            Err(err) => {
                record.remark(Remark::error(err).cite(CITE_TAGS));
                None
            }
        },
    };

    let subdomain_policy = single_tag(&mut record, &tags, DmarcTag::Sp).and_then(|tag| {
        match tag.value.parse::<Policy>() {
            Ok(sp) => Some(sp),
            Err(err) => {
                record.remark(Remark::error(err).cite(CITE_TAGS));
                None
            }
        }
    });

    let align_dkim = single_tag(&mut record, &tags, DmarcTag::Adkim).and_then(|tag| {
        match tag.value.parse::<AlignmentMode>() {
            Ok(mode) => Some(mode),
            Err(err) => {
                record.remark(Remark::error(err).cite(CITE_TAGS));
                None
            }
        }
    });

    let align_spf = single_tag(&mut record, &tags, DmarcTag::Aspf).and_then(|tag| {
        match tag.value.parse::<AlignmentMode>() {
            Ok(mode) => Some(mode),
            Err(err) => {
                record.remark(Remark::error(err).cite(CITE_TAGS));
                None
            }
        }
    });

    let rate = single_tag(&mut record, &tags, DmarcTag::Pct).and_then(|tag| {
        match tag.value.parse::<u8>() {
            Ok(rate) if rate <= 100 => Some(rate),
            _ => {
                record.remark(
                    Remark::error(format!(
                        "invalid value {:?} for pct; expected an integer between 0 and 100",
                        tag.value
                    ))
                    .cite(CITE_TAGS),
                );
                None
            }
        }
    });

    let interval = single_tag(&mut record, &tags, DmarcTag::Ri).and_then(|tag| {
        match tag.value.parse::<u32>() {
            Ok(interval) => {
                if interval < 3600 {
                    record.remark(Remark::warning(
                        "reporting intervals shorter than one hour are unlikely to be honored",
                    ));
                }
                Some(interval)
            }
            Err(_) => {
                record.remark(
                    Remark::error(format!("invalid value {:?} for ri", tag.value)).cite(CITE_TAGS),
                );
                None
            }
        }
    });

    let mut formats = vec![];
    let rf_present = if let Some(tag) = single_tag(&mut record, &tags, DmarcTag::Rf) {
        for member in tag.value.split(':').map(str::trim) {
            match member.parse::<ReportFormat>() {
                Ok(format) => formats.push(format),
                Err(err) => record.remark(Remark::warning(err)),
            }
        }
        true
    } else {
        false
    };

    let report_failure = single_tag(&mut record, &tags, DmarcTag::Fo).map(|tag| {
        let (fo, unknown) = ReportFailure::parse(&tag.value);
        for member in unknown {
            record.remark(Remark::warning(format!(
                "unknown failure-reporting option '{member}'"
            )));
        }
        fo
    });

    let aggregate_feedback = parse_addresses(&mut record, &tags, DmarcTag::Rua);
    let message_failure = parse_addresses(&mut record, &tags, DmarcTag::Ruf);

    let RecordContext::Policy { domain } = ctx else {
        return (record, None);
    };

    if let (Some(policy), Some(sp)) = (policy, subdomain_policy) {
        if sp == policy {
            record.remark(
                Remark::info("the sp tag is redundant: it repeats the p policy").cite(CITE_TAGS),
            );
        } else if sp < policy {
            record.remark(
                Remark::warning(
                    "the subdomain policy is weaker than the domain policy; mail from \
                     subdomains can bypass the stricter policy",
                )
                .cite(CITE_TAGS),
            );
        } else {
            record.remark(
                Remark::warning(
                    "the domain policy is weaker than the subdomain policy; mail from \
                     the domain itself bypasses the stricter subdomain policy",
                )
                .cite(CITE_TAGS),
            );
        }
    }

    if interval.is_some() && aggregate_feedback.is_empty() {
        record.remark(Remark::warning(
            "the ri tag has no effect without rua report addresses",
        ));
    }
    if rf_present && message_failure.is_empty() {
        record.remark(Remark::warning(
            "the rf tag has no effect without ruf report addresses",
        ));
    }
    if report_failure.is_some() && message_failure.is_empty() {
        record.remark(Remark::warning(
            "the fo tag has no effect without ruf report addresses",
        ));
    }

    let state = policy.map(|policy| {
        record.actions.push(Action::DmarcRecordBuilder {
            domain: domain.to_string(),
        });
        DmarcState {
            subdomain_policy,
            align_dkim,
            align_spf,
            rate,
            interval,
            formats,
            report_failure,
            aggregate_feedback,
            message_failure,
            ..DmarcState::new(domain, policy)
        }
    });

    (record, state)
}

fn parse_addresses(
    record: &mut Record,
    tags: &[Tag<DmarcTag>],
    name: DmarcTag,
) -> Vec<FeedbackAddress> {
    let Some(tag) = single_tag(record, tags, name) else {
        return vec![];
    };
    let mut addresses = vec![];
    for part in tag.value.split(',') {
        match part.parse::<FeedbackAddress>() {
            Ok(addr) => {
                if !addr.is_mailto() {
                    record.remark(Remark::warning(format!(
                        "report destination '{}' is not a mailto address",
                        addr.uri
                    )));
                }
                addresses.push(addr);
            }
            Err(err) => record.remark(Remark::error(err).cite(CITE_TAGS)),
        }
    }
    addresses
}
