//! TLS-RPT record checker: the `_smtp._tls` reporting record of
//! RFC 8460. A flat grammar with no recursion of any kind.

use dns_resolver::{RecordType, Resolver};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sleuth_report::{parse_tag_list, single_tag, Query, Record, Remark, Tag, TagName};
use std::fmt;

const CITE_TLSRPT: &str = "https://datatracker.ietf.org/doc/html/rfc8460#section-3";

/// The rua value: a comma-separated list of mailto or https URIs.
static RUA_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:mailto:[^\s,!]+|https://[^\s,!]+)(?:\s*,\s*(?:mailto:[^\s,!]+|https://[^\s,!]+))*$")
        .expect("rua grammar compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRptTag {
    V,
    Rua,
}

impl fmt::Display for TlsRptTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V => "v",
            Self::Rua => "rua",
        })
    }
}

impl TagName for TlsRptTag {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "v" => Self::V,
            "rua" => Self::Rua,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TlsRptReport {
    pub queries: Vec<Query>,
}

fn is_tlsrpt_record(content: &str) -> bool {
    match content.strip_prefix("v=TLSRPTv1") {
        Some(rest) => rest.is_empty() || rest.starts_with(';') || rest.starts_with(' '),
        None => false,
    }
}

pub async fn check_domain(resolver: &dyn Resolver, domain: &str) -> TlsRptReport {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    let name = format!("_smtp._tls.{domain}");
    tracing::debug!("checking TLS-RPT record at {name}");

    let mut query = Query::new(RecordType::Txt, &name);
    let answer = match resolver.resolve_txt(&name).await {
        Ok(answer) => answer,
        Err(err) => {
            query.remark(Remark::error(format!("DNS query failed: {err}")));
            return TlsRptReport {
                queries: vec![query],
            };
        }
    };
    query = query.answered(&answer);

    let mut candidates: Vec<String> = answer
        .as_txt()
        .into_iter()
        .filter(|txt| is_tlsrpt_record(txt))
        .collect();

    match candidates.len() {
        0 => {
            query.remark(
                Remark::warning(format!("{domain} does not publish a TLS-RPT record"))
                    .cite(CITE_TLSRPT),
            );
        }
        1 => {
            let record = validate_record(candidates.remove(0));
            query.records.push(record);
        }
        _ => {
            query.remark(
                Remark::error("a domain may not publish multiple TLS-RPT records")
                    .cite(CITE_TLSRPT),
            );
            for content in candidates {
                query.records.push(Record::new(content));
            }
        }
    }

    TlsRptReport {
        queries: vec![query],
    }
}

fn validate_record(content: String) -> Record {
    let mut record = Record::new(content);
    let tags: Vec<Tag<TlsRptTag>> = parse_tag_list(&mut record, ';');

    let _ = single_tag(&mut record, &tags, TlsRptTag::V);

    match single_tag(&mut record, &tags, TlsRptTag::Rua) {
        None => record.remark(
            Remark::error("the mandatory rua tag (report destinations) is missing")
                .cite(CITE_TLSRPT),
        ),
        Some(tag) => {
            if !RUA_LIST.is_match(&tag.value) {
                record.remark(
                    Remark::error(format!(
                        "'{}' is not a valid list of mailto/https report destinations",
                        tag.value
                    ))
                    .cite(CITE_TLSRPT),
                );
            }
        }
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_resolver::TestResolver;
    use sleuth_report::Severity;

    fn remarks_at(report: &TlsRptReport, severity: Severity) -> Vec<String> {
        report
            .queries
            .iter()
            .flat_map(|q| {
                q.remarks
                    .iter()
                    .chain(q.records.iter().flat_map(|r| r.remarks.iter()))
            })
            .filter(|r| r.severity == severity)
            .map(|r| r.text.clone())
            .collect()
    }

    #[tokio::test]
    async fn valid_record_passes() {
        // https://www.rfc-editor.org/rfc/rfc8460#section-3
        let resolver = TestResolver::default().with_txt(
            "_smtp._tls.example.com",
            "v=TLSRPTv1;rua=mailto:reports@example.com",
        );

        let report = check_domain(&resolver, "example.com").await;
        k9::assert_equal!(report.queries.len(), 1);
        assert!(remarks_at(&report, Severity::Error).is_empty());
        assert!(remarks_at(&report, Severity::Warning).is_empty());
    }

    #[tokio::test]
    async fn multiple_destinations_are_allowed() {
        let resolver = TestResolver::default().with_txt(
            "_smtp._tls.example.com",
            "v=TLSRPTv1; rua=mailto:reports@example.com, https://reporting.example.com/v1",
        );

        let report = check_domain(&resolver, "example.com").await;
        assert!(remarks_at(&report, Severity::Error).is_empty());
    }

    #[tokio::test]
    async fn missing_record_is_a_warning() {
        let resolver = TestResolver::default();
        let report = check_domain(&resolver, "example.com").await;
        let warnings = remarks_at(&report, Severity::Warning);
        k9::assert_equal!(warnings.len(), 1);
        assert!(warnings[0].contains("does not publish a TLS-RPT record"));
    }

    #[tokio::test]
    async fn multiple_records_are_an_error() {
        let resolver = TestResolver::default()
            .with_txt("_smtp._tls.example.com", "v=TLSRPTv1;rua=mailto:a@example.com")
            .with_txt("_smtp._tls.example.com", "v=TLSRPTv1;rua=mailto:b@example.com");

        let report = check_domain(&resolver, "example.com").await;
        let errors = remarks_at(&report, Severity::Error);
        k9::assert_equal!(errors.len(), 1);
        assert!(errors[0].contains("multiple TLS-RPT records"));
    }

    #[tokio::test]
    async fn missing_rua_is_an_error() {
        let resolver =
            TestResolver::default().with_txt("_smtp._tls.example.com", "v=TLSRPTv1");

        let report = check_domain(&resolver, "example.com").await;
        let errors = remarks_at(&report, Severity::Error);
        k9::assert_equal!(errors.len(), 1);
        assert!(errors[0].contains("mandatory rua tag"));
    }

    #[tokio::test]
    async fn non_uri_rua_is_an_error() {
        let resolver = TestResolver::default().with_txt(
            "_smtp._tls.example.com",
            "v=TLSRPTv1;rua=reports@example.com",
        );

        let report = check_domain(&resolver, "example.com").await;
        let errors = remarks_at(&report, Severity::Error);
        k9::assert_equal!(errors.len(), 1);
        assert!(errors[0].contains("not a valid list"));
    }

    #[test]
    fn rua_grammar() {
        assert!(RUA_LIST.is_match("mailto:reports@example.com"));
        assert!(RUA_LIST.is_match("https://reporting.example.com/v1"));
        assert!(RUA_LIST.is_match(
            "mailto:reports@example.com,mailto:other@example.net"
        ));
        assert!(!RUA_LIST.is_match(""));
        assert!(!RUA_LIST.is_match("ftp://example.com/reports"));
        assert!(!RUA_LIST.is_match("mailto:reports@example.com,"));
    }
}
