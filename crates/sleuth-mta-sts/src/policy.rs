use futures::future::BoxFuture;
use sleuth_report::{Query, Record, Remark};

const CITE_STS_POLICY: &str = "https://datatracker.ietf.org/doc/html/rfc8461#section-3.2";

/// Upper bound for `max_age` per RFC 8461
const MAX_MAX_AGE: u64 = 31_557_600;

/// A trait for entities that fetch the policy file over HTTPS.
pub trait Get: Sync + Send {
    fn http_get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<String>>;
}

/// Production fetcher with the RFC 8461 restrictions applied.
pub struct HttpsGetter;

impl Get for HttpsGetter {
    fn http_get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            let response = reqwest::Client::builder()
                // <https://datatracker.ietf.org/doc/html/rfc8461#section-3.3>
                // HTTP 3xx redirects MUST NOT be followed
                .redirect(reqwest::redirect::Policy::none())
                .timeout(std::time::Duration::from_secs(20))
                .build()?
                .request(reqwest::Method::GET, url)
                .send()
                .await?;

            // <https://datatracker.ietf.org/doc/html/rfc8461#section-3.3>
            // Policies fetched via HTTPS are only valid if the HTTP
            // response code is 200 (OK)
            let status = response.status();
            if status != reqwest::StatusCode::OK {
                anyhow::bail!("failed to GET {url}: {status}");
            }

            // <https://datatracker.ietf.org/doc/html/rfc8461#section-3.2>
            // senders SHOULD validate that the media type is "text/plain"
            // to guard against cases where web servers allow untrusted
            // users to host non-text content
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .ok_or_else(|| anyhow::anyhow!("missing required Content-Type header"))?;
            let content_type = content_type.to_str()?;
            let ct = match content_type.split_once(';') {
                Some((ct, _)) => ct.trim(),
                None => content_type.trim(),
            };
            if ct != "text/plain" {
                anyhow::bail!("Content-Type must be text/plain, got {content_type}");
            }

            Ok(response.text().await?)
        })
    }
}

/// Fetch and validate the well-known policy file. Absence of the file is
/// reported as info only: the DNS record alone does not promise one yet.
pub(crate) async fn check_policy(getter: &dyn Get, domain: &str, trace: &mut Vec<Query>) {
    let url = format!("https://mta-sts.{domain}/.well-known/mta-sts.txt");
    tracing::debug!("fetching {url}");
    let mut query = Query::for_file(&url);

    match getter.http_get(&url).await {
        Ok(body) => {
            query.records.push(validate_policy(&body));
        }
        Err(err) => {
            query.remark(Remark::info(format!(
                "the policy file could not be retrieved: {err:#}"
            )));
        }
    }
    trace.push(query);
}

fn validate_policy(body: &str) -> Record {
    let mut record = Record::new(body);
    let mut fields: Vec<(String, String)> = vec![];

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        match line.split_once(':') {
            Some((key, value)) => {
                fields.push((key.trim().to_string(), value.trim().to_string()))
            }
            None => record.remark(
                Remark::error(format!("'{line}' is not a valid policy line"))
                    .cite(CITE_STS_POLICY),
            ),
        }
    }

    fn values<'f>(fields: &'f [(String, String)], name: &str) -> Vec<&'f str> {
        fields
            .iter()
            .filter(|(key, _)| key.as_str() == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    match values(&fields, "version").as_slice() {
        [] => record.remark(
            Remark::error("the policy is missing the required version field")
                .cite(CITE_STS_POLICY),
        ),
        [version] => {
            if *version != "STSv1" {
                record.remark(
                    Remark::error(format!("incompatible policy version {version:?}"))
                        .cite(CITE_STS_POLICY),
                );
            }
        }
        _ => record.remark(
            Remark::error("the version field must appear exactly once").cite(CITE_STS_POLICY),
        ),
    }

    let mode = match values(&fields, "mode").as_slice() {
        [] => {
            record.remark(
                Remark::error("the policy is missing the required mode field")
                    .cite(CITE_STS_POLICY),
            );
            None
        }
        [mode] => match *mode {
            "enforce" | "testing" | "none" => Some(*mode),
            other => {
                record.remark(
                    Remark::error(format!("invalid policy mode {other:?}")).cite(CITE_STS_POLICY),
                );
                None
            }
        },
        _ => {
            record.remark(
                Remark::error("the mode field must appear exactly once").cite(CITE_STS_POLICY),
            );
            None
        }
    };

    match values(&fields, "max_age").as_slice() {
        [] => record.remark(
            Remark::error("the policy is missing the required max_age field")
                .cite(CITE_STS_POLICY),
        ),
        [value] => match value.parse::<u64>() {
            Ok(age) if age <= MAX_MAX_AGE => {}
            Ok(_) => record.remark(
                Remark::error(format!(
                    "max_age may not exceed {MAX_MAX_AGE} seconds"
                ))
                .cite(CITE_STS_POLICY),
            ),
            Err(_) => record.remark(
                Remark::error(format!("max_age {value:?} is not a valid integer"))
                    .cite(CITE_STS_POLICY),
            ),
        },
        _ => record.remark(
            Remark::error("the max_age field must appear exactly once").cite(CITE_STS_POLICY),
        ),
    }

    // mx lines are cumulative, unlike the fields above
    let mx_count = values(&fields, "mx").len();
    if mx_count == 0 && matches!(mode, Some("enforce" | "testing")) {
        record.remark(
            Remark::error("at least one mx field is required unless mode is none")
                .cite(CITE_STS_POLICY),
        );
    }

    for (key, _) in &fields {
        if !matches!(key.as_str(), "version" | "mode" | "max_age" | "mx") {
            record.remark(Remark::warning(format!("unknown policy field '{key}'")));
        }
    }

    record
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use sleuth_report::Severity;
    use std::collections::BTreeMap;

    pub struct TestGetter {
        policies: BTreeMap<&'static str, &'static str>,
    }

    impl TestGetter {
        pub fn new<I: IntoIterator<Item = (&'static str, &'static str)>>(iter: I) -> Self {
            Self {
                policies: BTreeMap::from_iter(iter),
            }
        }
    }

    impl Get for TestGetter {
        fn http_get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<String>> {
            Box::pin(async move {
                match self.policies.get(url) {
                    Some(result) => Ok(result.to_string()),
                    None => anyhow::bail!("404 {url}"),
                }
            })
        }
    }

    fn severities(record: &Record) -> Vec<Severity> {
        record.remarks.iter().map(|r| r.severity).collect()
    }

    #[test]
    fn parses_a_valid_policy() {
        let record = validate_policy(
            "version: STSv1\nmode: enforce\nmx: mail.example.com\nmx: *.example.net\nmax_age: 604800",
        );
        assert!(record.remarks.is_empty(), "{:?}", record.remarks);
    }

    #[test]
    fn missing_mx_under_enforce_is_an_error() {
        let record = validate_policy("version: STSv1\nmode: enforce\nmax_age: 604800");
        k9::assert_equal!(severities(&record), vec![Severity::Error]);
        assert!(record.remarks[0].text.contains("at least one mx"));
    }

    #[test]
    fn mode_none_needs_no_mx() {
        let record = validate_policy("version: STSv1\nmode: none\nmax_age: 604800");
        assert!(record.remarks.is_empty(), "{:?}", record.remarks);
    }

    #[test]
    fn duplicate_mode_is_an_error() {
        let record =
            validate_policy("version: STSv1\nmode: enforce\nmode: testing\nmx: a.example\nmax_age: 1");
        k9::assert_equal!(severities(&record), vec![Severity::Error]);
        assert!(record.remarks[0].text.contains("exactly once"));
    }

    #[test]
    fn bad_lines_and_unknown_fields() {
        let record = validate_policy(
            "version: STSv1\nmode: enforce\nmx: a.example\nmax_age: 1\nbogus line\nextra: x",
        );
        let errors: Vec<&str> = record
            .remarks
            .iter()
            .filter(|r| r.severity == Severity::Error)
            .map(|r| r.text.as_str())
            .collect();
        k9::assert_equal!(errors.len(), 1);
        assert!(errors[0].contains("bogus line"));
        assert!(record
            .remarks
            .iter()
            .any(|r| r.severity == Severity::Warning && r.text.contains("extra")));
    }

    #[test]
    fn excessive_max_age_is_an_error() {
        let record =
            validate_policy("version: STSv1\nmode: none\nmax_age: 99999999999");
        k9::assert_equal!(severities(&record), vec![Severity::Error]);
        assert!(record.remarks[0].text.contains("may not exceed"));
    }
}
