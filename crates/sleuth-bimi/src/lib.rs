//! BIMI record checker.
//!
//! Validates the brand-indicator record at `<selector>._bimi.<domain>`,
//! falling back to the organizational domain like DMARC discovery does.
//! Certificate evidence is not verified; the URLs are checked for shape
//! only.

use dns_resolver::{RecordType, Resolver};
use serde::Serialize;
use sleuth_report::{
    organizational_domain, parse_tag_list, single_tag, Query, Record, Remark, Tag, TagName,
};
use std::fmt;

const CITE_BIMI: &str =
    "https://datatracker.ietf.org/doc/html/draft-brand-indicators-for-message-identification";

pub const DEFAULT_SELECTOR: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BimiTag {
    V,
    L,
    A,
}

impl fmt::Display for BimiTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V => "v",
            Self::L => "l",
            Self::A => "a",
        })
    }
}

impl TagName for BimiTag {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "v" => Self::V,
            "l" => Self::L,
            "a" => Self::A,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BimiReport {
    pub queries: Vec<Query>,
}

fn is_bimi_record(content: &str) -> bool {
    match content.strip_prefix("v=BIMI1") {
        Some(rest) => rest.is_empty() || rest.starts_with(';') || rest.starts_with(' '),
        None => false,
    }
}

pub async fn check_selector(resolver: &dyn Resolver, domain: &str, selector: &str) -> BimiReport {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    let selector = selector.trim().to_ascii_lowercase();
    tracing::debug!("checking BIMI selector '{selector}' for {domain}");

    let mut trace = vec![];
    let Some(candidates) =
        query_bimi(resolver, &format!("{selector}._bimi.{domain}"), &mut trace).await
    else {
        return BimiReport { queries: trace };
    };
    let qidx = trace.len() - 1;

    if candidates.is_empty() {
        let org = organizational_domain(resolver, &domain, &mut trace).await;
        if org == domain {
            trace[qidx].remark(
                Remark::error(format!(
                    "{domain} does not publish a BIMI record for selector '{selector}'"
                ))
                .cite(CITE_BIMI),
            );
            return BimiReport { queries: trace };
        }
        trace[qidx].remark(
            Remark::info(format!(
                "no BIMI record at {domain}; falling back to the organizational domain {org}"
            ))
            .cite(CITE_BIMI),
        );

        let Some(candidates) =
            query_bimi(resolver, &format!("{selector}._bimi.{org}"), &mut trace).await
        else {
            return BimiReport { queries: trace };
        };
        let qidx = trace.len() - 1;
        evaluate(candidates, qidx, &org, &selector, &mut trace);
        return BimiReport { queries: trace };
    }

    evaluate(candidates, qidx, &domain, &selector, &mut trace);
    BimiReport { queries: trace }
}

async fn query_bimi(
    resolver: &dyn Resolver,
    name: &str,
    trace: &mut Vec<Query>,
) -> Option<Vec<String>> {
    let mut query = Query::new(RecordType::Txt, name);
    match resolver.resolve_txt(name).await {
        Ok(answer) => {
            query = query.answered(&answer);
            let candidates = answer
                .as_txt()
                .into_iter()
                .filter(|txt| is_bimi_record(txt))
                .collect();
            trace.push(query);
            Some(candidates)
        }
        Err(err) => {
            query.remark(Remark::error(format!("DNS query failed: {err}")));
            trace.push(query);
            None
        }
    }
}

fn evaluate(
    mut candidates: Vec<String>,
    qidx: usize,
    domain: &str,
    selector: &str,
    trace: &mut Vec<Query>,
) {
    match candidates.len() {
        0 => {
            trace[qidx].remark(
                Remark::error(format!(
                    "{domain} does not publish a BIMI record for selector '{selector}'"
                ))
                .cite(CITE_BIMI),
            );
        }
        1 => {
            let record = validate_record(candidates.remove(0));
            trace[qidx].records.push(record);
        }
        _ => {
            trace[qidx].remark(
                Remark::error("a selector may not publish multiple BIMI records").cite(CITE_BIMI),
            );
            for content in candidates {
                trace[qidx].records.push(Record::new(content));
            }
        }
    }
}

fn validate_record(content: String) -> Record {
    let mut record = Record::new(content);
    let tags: Vec<Tag<BimiTag>> = parse_tag_list(&mut record, ';');

    if let Some(tag) = single_tag(&mut record, &tags, BimiTag::V) {
        let value = tag.value.as_str();
        let valid = value.len() == 5
            && value.starts_with("BIMI")
            && value[4..].chars().all(|c| c.is_ascii_digit());
        if !valid {
            record.remark(
                Remark::error(format!("invalid BIMI version '{value}'")).cite(CITE_BIMI),
            );
        }
    }

    let logo = single_tag(&mut record, &tags, BimiTag::L).map(|tag| tag.value.clone());
    let evidence = single_tag(&mut record, &tags, BimiTag::A).map(|tag| tag.value.clone());

    match logo.as_deref() {
        None | Some("") => {
            record.remark(Remark::info(
                "no indicator location is published; the domain declines to participate",
            ));
        }
        Some(url) => {
            if !url.starts_with("https://") {
                record.remark(
                    Remark::error("the indicator location must be an https URL").cite(CITE_BIMI),
                );
            } else {
                if !strip_query(url).ends_with(".svg") {
                    record.remark(Remark::warning(
                        "the indicator location should point to an SVG image",
                    ));
                }
                record.image = Some(url.to_string());
            }

            if evidence.as_deref().map_or(true, str::is_empty) {
                record.remark(Remark::warning(
                    "without an a tag (evidence document) most clients will not \
                     display the indicator",
                ));
            }
        }
    }

    if let Some(url) = evidence.as_deref().filter(|url| !url.is_empty()) {
        if !url.starts_with("https://") {
            record.remark(
                Remark::error("the evidence location must be an https URL").cite(CITE_BIMI),
            );
        } else if !strip_query(url).ends_with(".pem") {
            record.remark(Remark::warning(
                "the evidence location should point to a PEM certificate chain",
            ));
        }
    }

    record
}

fn strip_query(url: &str) -> &str {
    url.split_once('?').map(|(path, _)| path).unwrap_or(url)
}
