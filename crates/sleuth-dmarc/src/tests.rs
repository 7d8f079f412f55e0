use crate::types::policy::Policy;
use crate::{check_domain, DmarcReport};
use dns_resolver::{RecordType, TestResolver};
use sleuth_report::Severity;

fn remarks_at(report: &DmarcReport, severity: Severity) -> Vec<String> {
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

fn query_domains(report: &DmarcReport) -> Vec<&str> {
    report.queries.iter().map(|q| q.domain.as_str()).collect()
}

#[tokio::test]
async fn simple_policy_parses() {
    // https://www.rfc-editor.org/rfc/rfc7489#appendix-B.2.1
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=none; rua=mailto:dmarc-feedback@example.com",
    );

    let report = check_domain(&resolver, "example.com").await;
    assert!(remarks_at(&report, Severity::Error).is_empty());
    let state = report.state.clone().unwrap();
    k9::assert_equal!(state.policy, Policy::None);
    k9::assert_equal!(state.rate, None);
    k9::assert_equal!(
        state.aggregate_feedback[0].uri,
        "mailto:dmarc-feedback@example.com"
    );
    // same-domain report destination needs no authorization lookup
    k9::assert_equal!(query_domains(&report), vec!["_dmarc.example.com"]);
}

#[tokio::test]
async fn missing_policy_at_the_apex_is_an_error() {
    let resolver = TestResolver::default().with_soa("example.com");
    let report = check_domain(&resolver, "example.com").await;
    let errors = remarks_at(&report, Severity::Error);
    k9::assert_equal!(errors.len(), 1);
    assert!(errors[0].contains("does not publish a DMARC policy"));
    assert!(report.state.is_none());
}

#[tokio::test]
async fn subdomain_falls_back_to_the_organizational_domain() {
    let resolver = TestResolver::default()
        .with_soa("example.com")
        .with_txt("_dmarc.example.com", "v=DMARC1; p=reject");

    let report = check_domain(&resolver, "mail.corp.example.com").await;
    assert!(remarks_at(&report, Severity::Error).is_empty());
    let infos = remarks_at(&report, Severity::Info);
    assert!(infos.iter().any(|i| i.contains("falling back to the organizational domain")));

    let state = report.state.clone().unwrap();
    k9::assert_equal!(state.domain, "example.com");
    k9::assert_equal!(state.policy, Policy::Reject);
    // TXT at the subdomain, the SOA walk, then TXT at the apex
    k9::assert_equal!(
        query_domains(&report),
        vec![
            "_dmarc.mail.corp.example.com",
            "mail.corp.example.com",
            "corp.example.com",
            "example.com",
            "_dmarc.example.com",
        ]
    );
}

#[tokio::test]
async fn multiple_records_are_an_error() {
    let resolver = TestResolver::default()
        .with_txt("_dmarc.example.com", "v=DMARC1; p=none")
        .with_txt("_dmarc.example.com", "v=DMARC1; p=reject");

    let report = check_domain(&resolver, "example.com").await;
    let errors = remarks_at(&report, Severity::Error);
    k9::assert_equal!(errors.len(), 1);
    assert!(errors[0].contains("multiple DMARC records"));
    assert!(report.state.is_none());
}

#[tokio::test]
async fn missing_p_is_an_error() {
    let resolver = TestResolver::default()
        .with_txt("_dmarc.example.com", "v=DMARC1; rua=mailto:a@example.com");

    let report = check_domain(&resolver, "example.com").await;
    let errors = remarks_at(&report, Severity::Error);
    k9::assert_equal!(errors.len(), 1);
    assert!(errors[0].contains("mandatory p tag"));
    assert!(report.state.is_none());
}

#[tokio::test]
async fn sp_equal_to_p_is_redundant() {
    let resolver = TestResolver::default()
        .with_txt("_dmarc.example.com", "v=DMARC1; p=reject; sp=reject");

    let report = check_domain(&resolver, "example.com").await;
    let infos = remarks_at(&report, Severity::Info);
    assert!(infos.iter().any(|i| i.contains("sp tag is redundant")));
    assert!(remarks_at(&report, Severity::Warning).is_empty());
}

#[tokio::test]
async fn weaker_sp_is_a_bypass_warning() {
    let resolver = TestResolver::default()
        .with_txt("_dmarc.example.com", "v=DMARC1; p=reject; sp=none");

    let report = check_domain(&resolver, "example.com").await;
    let warnings = remarks_at(&report, Severity::Warning);
    k9::assert_equal!(warnings.len(), 1);
    assert!(warnings[0].contains("subdomain policy is weaker"));
}

#[tokio::test]
async fn weaker_p_is_also_a_bypass_warning() {
    let resolver = TestResolver::default()
        .with_txt("_dmarc.example.com", "v=DMARC1; p=none; sp=reject");

    let report = check_domain(&resolver, "example.com").await;
    let warnings = remarks_at(&report, Severity::Warning);
    k9::assert_equal!(warnings.len(), 1);
    assert!(warnings[0].contains("domain policy is weaker"));
}

#[tokio::test]
async fn tag_values_are_validated() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=wat; adkim=x; pct=250; ri=abc",
    );

    let report = check_domain(&resolver, "example.com").await;
    let errors = remarks_at(&report, Severity::Error);
    k9::assert_equal!(errors.len(), 4);
    assert!(report.state.is_none());
}

#[tokio::test]
async fn dependent_tags_warn() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=reject; ri=86400; fo=1; rf=afrf",
    );

    let report = check_domain(&resolver, "example.com").await;
    let warnings = remarks_at(&report, Severity::Warning);
    assert!(warnings.iter().any(|w| w.contains("ri tag has no effect without rua")));
    assert!(warnings.iter().any(|w| w.contains("fo tag has no effect without ruf")));
    assert!(warnings.iter().any(|w| w.contains("rf tag has no effect without ruf")));
}

#[tokio::test]
async fn short_interval_warns() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=reject; ri=600; rua=mailto:a@example.com",
    );

    let report = check_domain(&resolver, "example.com").await;
    let warnings = remarks_at(&report, Severity::Warning);
    assert!(warnings.iter().any(|w| w.contains("shorter than one hour")));
}

/// A report address within the same organization needs no authorization
/// lookup.
#[tokio::test]
async fn same_organization_destination_is_not_checked() {
    let resolver = TestResolver::default()
        .with_soa("example.org")
        .with_txt(
            "_dmarc.sub.example.org",
            "v=DMARC1; p=reject; rua=mailto:a@example.org",
        );

    let report = check_domain(&resolver, "sub.example.org").await;
    assert!(remarks_at(&report, Severity::Error).is_empty());
    // sp is absent: no subdomain-policy remark of any kind
    assert!(remarks_at(&report, Severity::Warning).is_empty());
    assert!(!query_domains(&report)
        .iter()
        .any(|d| d.contains("_report._dmarc")));
}

#[tokio::test]
async fn external_destination_must_opt_in() {
    let resolver = TestResolver::default()
        .with_soa("example.com")
        .with_soa("thirdparty.example")
        .with_txt(
            "_dmarc.example.com",
            "v=DMARC1; p=reject; rua=mailto:agg@thirdparty.example",
        );

    let report = check_domain(&resolver, "example.com").await;
    let errors = remarks_at(&report, Severity::Error);
    k9::assert_equal!(errors.len(), 1);
    assert!(errors[0].contains("has not opted in to receive DMARC reports"));
    assert!(query_domains(&report)
        .iter()
        .any(|d| *d == "example.com._report._dmarc.thirdparty.example"));
}

#[tokio::test]
async fn authorized_external_destination_is_fine() {
    let resolver = TestResolver::default()
        .with_soa("example.com")
        .with_soa("thirdparty.example")
        .with_txt(
            "_dmarc.example.com",
            "v=DMARC1; p=reject; rua=mailto:agg@thirdparty.example",
        )
        .with_txt(
            "example.com._report._dmarc.thirdparty.example",
            "v=DMARC1",
        );

    let report = check_domain(&resolver, "example.com").await;
    assert!(remarks_at(&report, Severity::Error).is_empty());
    let infos = remarks_at(&report, Severity::Info);
    assert!(infos.iter().any(|i| i.contains("accepts DMARC reports")));
}

#[tokio::test]
async fn duplicate_destinations_are_checked_once() {
    let resolver = TestResolver::default()
        .with_soa("example.com")
        .with_soa("thirdparty.example")
        .with_txt(
            "_dmarc.example.com",
            "v=DMARC1; p=reject; rua=mailto:a@thirdparty.example; \
             ruf=mailto:b@thirdparty.example",
        )
        .with_txt(
            "example.com._report._dmarc.thirdparty.example",
            "v=DMARC1",
        );

    let report = check_domain(&resolver, "example.com").await;
    let auth_queries = query_domains(&report)
        .iter()
        .filter(|d| d.contains("_report._dmarc"))
        .count();
    k9::assert_equal!(auth_queries, 1);
}

#[tokio::test]
async fn transport_failure_aborts_the_run() {
    let resolver = TestResolver::default().with_failure("_dmarc.example.com", RecordType::Txt);
    let report = check_domain(&resolver, "example.com").await;
    k9::assert_equal!(report.queries.len(), 1);
    let errors = remarks_at(&report, Severity::Error);
    k9::assert_equal!(errors.len(), 1);
    assert!(errors[0].contains("DNS query failed"));
    assert!(report.state.is_none());
}

/// Rendering a validated state through the builder and validating the
/// result again reaches the same state.
#[tokio::test]
async fn state_round_trips_through_the_builder() {
    let resolver = TestResolver::default().with_txt(
        "_dmarc.example.com",
        "v=DMARC1; p=quarantine; sp=reject; adkim=s; aspf=r; pct=25; ri=86400; \
         fo=1:d; rf=afrf; rua=mailto:agg@example.com,mailto:agg2@example.com!10m; \
         ruf=mailto:fail@example.com",
    );
    let report = check_domain(&resolver, "example.com").await;
    let state = report.state.unwrap();
    k9::assert_equal!(state.aggregate_feedback[1].size_limit, Some(10_485_760));

    let rebuilt =
        TestResolver::default().with_txt("_dmarc.example.com", state.to_record());
    let report2 = check_domain(&rebuilt, "example.com").await;
    let state2 = report2.state.unwrap();

    k9::assert_equal!(state, state2);
}
