use crate::{check_selector, DkimKeyState, KeyFlag};
use dns_resolver::{RecordType, TestResolver};
use sleuth_report::{Action, Severity};

const SAMPLE_KEY: &str = "MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDwIRP/UC3SBsEmGqZ9ZJW3/DkMoGeLnQg1fWn7/zYtIxN2SnFCjxOCKG9v3b4jYfcTNh5ijSsq631uBItLa7od+v/RtdC2UzJ1lWT947qR+Rcac2gbto/NMqJ0fzfVjH4OuKhitdY9tf6mcwGjaNBcWToIMmPSPDdQPNUYckcQ2QIDAQAB";

fn key_record(tags: &str) -> String {
    format!("v=DKIM1; k=rsa;{tags} p={SAMPLE_KEY}")
}

fn record_remarks(report: &crate::DkimReport, severity: Severity) -> Vec<String> {
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
async fn valid_record_populates_state() {
    let resolver = TestResolver::default().with_txt(
        "mail._domainkey.example.com",
        key_record(" s=email; t=s;"),
    );

    let report = check_selector(&resolver, "example.com", "mail").await;
    k9::assert_equal!(report.queries.len(), 1);
    assert!(record_remarks(&report, Severity::Error).is_empty());
    assert!(record_remarks(&report, Severity::Warning).is_empty());

    let state = report.state.unwrap();
    k9::assert_equal!(state.version.as_deref(), Some("DKIM1"));
    k9::assert_equal!(state.key_type.as_deref(), Some("rsa"));
    k9::assert_equal!(state.service_type.as_deref(), Some("email"));
    k9::assert_equal!(state.flags, vec![KeyFlag::NoSubdomains]);
    k9::assert_equal!(state.public_key.as_deref(), Some(SAMPLE_KEY));

    let record = &report.queries[0].records[0];
    k9::assert_equal!(
        record.actions,
        vec![Action::DkimRecordBuilder {
            domain: "example.com".to_string(),
            selector: "mail".to_string()
        }]
    );
}

#[tokio::test]
async fn missing_record_is_an_error() {
    let resolver = TestResolver::default();
    let report = check_selector(&resolver, "example.com", "mail").await;
    let errors = record_remarks(&report, Severity::Error);
    k9::assert_equal!(errors.len(), 1);
    assert!(errors[0].contains("no DKIM key record"));
    assert!(report.state.is_none());
}

#[tokio::test]
async fn multiple_records_are_an_error() {
    let resolver = TestResolver::default()
        .with_txt("mail._domainkey.example.com", key_record(""))
        .with_txt("mail._domainkey.example.com", key_record(""));

    let report = check_selector(&resolver, "example.com", "mail").await;
    let errors = record_remarks(&report, Severity::Error);
    k9::assert_equal!(errors.len(), 1);
    assert!(errors[0].contains("exactly one key"));
    assert!(report.state.is_none());
    k9::assert_equal!(report.queries[0].records.len(), 2);
}

/// Missing `p` yields exactly one mandatory-tag error and no public key
/// in the state.
#[tokio::test]
async fn missing_p_is_the_only_error() {
    let resolver = TestResolver::default()
        .with_txt("mail._domainkey.example.com", "v=DKIM1; k=rsa");

    let report = check_selector(&resolver, "example.com", "mail").await;
    let errors = record_remarks(&report, Severity::Error);
    k9::assert_equal!(errors.len(), 1);
    assert!(errors[0].contains("mandatory p tag"));

    let state = report.state.unwrap();
    assert!(state.public_key.is_none());
    k9::assert_equal!(state.key_type.as_deref(), Some("rsa"));
}

#[tokio::test]
async fn empty_p_means_revoked() {
    let resolver =
        TestResolver::default().with_txt("mail._domainkey.example.com", "v=DKIM1; p=");

    let report = check_selector(&resolver, "example.com", "mail").await;
    assert!(record_remarks(&report, Severity::Error).is_empty());
    let infos = record_remarks(&report, Severity::Info);
    assert!(infos.iter().any(|i| i.contains("revoked")));
    assert!(report.state.unwrap().public_key.is_none());
}

#[tokio::test]
async fn bad_key_material_is_an_error() {
    let resolver = TestResolver::default()
        .with_txt("mail._domainkey.example.com", "v=DKIM1; p=not*base64!");

    let report = check_selector(&resolver, "example.com", "mail").await;
    let errors = record_remarks(&report, Severity::Error);
    k9::assert_equal!(errors.len(), 1);
    assert!(errors[0].contains("base64"));
    assert!(report.state.unwrap().public_key.is_none());
}

#[tokio::test]
async fn spaces_in_key_material_are_tolerated() {
    let resolver = TestResolver::default()
        .with_txt("mail._domainkey.example.com", "v=DKIM1; p=AbCd EfGh=");

    let report = check_selector(&resolver, "example.com", "mail").await;
    assert!(record_remarks(&report, Severity::Error).is_empty());
    k9::assert_equal!(
        report.state.unwrap().public_key.as_deref(),
        Some("AbCdEfGh=")
    );
}

#[tokio::test]
async fn missing_version_is_informational() {
    let resolver = TestResolver::default().with_txt(
        "mail._domainkey.example.com",
        format!("k=rsa; p={SAMPLE_KEY}"),
    );

    let report = check_selector(&resolver, "example.com", "mail").await;
    assert!(record_remarks(&report, Severity::Error).is_empty());
    let infos = record_remarks(&report, Severity::Info);
    assert!(infos.iter().any(|i| i.contains("v=DKIM1 tag is recommended")));
}

#[tokio::test]
async fn unknown_algorithm_and_flags_warn() {
    let resolver = TestResolver::default().with_txt(
        "mail._domainkey.example.com",
        format!("v=DKIM1; k=dsa; h=md5; t=y:z; p={SAMPLE_KEY}"),
    );

    let report = check_selector(&resolver, "example.com", "mail").await;
    let warnings = record_remarks(&report, Severity::Warning);
    assert!(warnings.iter().any(|w| w.contains("unrecognized key algorithm 'dsa'")));
    assert!(warnings.iter().any(|w| w.contains("unrecognized hash algorithm 'md5'")));
    assert!(warnings.iter().any(|w| w.contains("unknown key flag 'z'")));

    let state = report.state.unwrap();
    k9::assert_equal!(state.flags, vec![KeyFlag::Testing]);
}

#[tokio::test]
async fn colon_separated_h_warns() {
    let resolver = TestResolver::default().with_txt(
        "mail._domainkey.example.com",
        format!("v=DKIM1; h=sha1:sha256; p={SAMPLE_KEY}"),
    );

    let report = check_selector(&resolver, "example.com", "mail").await;
    let warnings = record_remarks(&report, Severity::Warning);
    assert!(warnings.iter().any(|w| w.contains("single hash algorithm")));
}

#[tokio::test]
async fn transport_failure_is_fatal_to_the_run() {
    let resolver = TestResolver::default()
        .with_failure("mail._domainkey.example.com", RecordType::Txt);

    let report = check_selector(&resolver, "example.com", "mail").await;
    k9::assert_equal!(report.queries.len(), 1);
    let errors = record_remarks(&report, Severity::Error);
    k9::assert_equal!(errors.len(), 1);
    assert!(errors[0].contains("DNS query failed"));
    assert!(report.state.is_none());
}

/// Rendering a validated state through the builder and validating the
/// result again reaches the same state.
#[tokio::test]
async fn state_round_trips_through_the_builder() {
    let resolver = TestResolver::default().with_txt(
        "mail._domainkey.example.com",
        key_record(" s=email; t=y:s; n=ops notes;"),
    );
    let report = check_selector(&resolver, "example.com", "mail").await;
    let state = report.state.unwrap();

    let rebuilt = TestResolver::default()
        .with_txt("mail._domainkey.example.com", state.to_record());
    let report2 = check_selector(&rebuilt, "example.com", "mail").await;
    let state2 = report2.state.unwrap();

    k9::assert_equal!(state, state2);
}

#[test]
fn builder_renders_every_populated_field() {
    let state = DkimKeyState {
        domain: "example.com".to_string(),
        selector: "mail".to_string(),
        version: Some("DKIM1".to_string()),
        key_type: Some("ed25519".to_string()),
        hash_algorithms: None,
        service_type: Some("email".to_string()),
        notes: None,
        public_key: Some("AbCd".to_string()),
        flags: vec![KeyFlag::Testing],
    };
    k9::assert_equal!(
        state.to_record(),
        "v=DKIM1; k=ed25519; s=email; t=y; p=AbCd"
    );
}
