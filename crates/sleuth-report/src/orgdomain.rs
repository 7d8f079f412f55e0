use crate::{Query, Record, Remark};
use dns_resolver::{RecordType, Resolver};

/// Find the organizational domain for `domain` by walking up one label
/// at a time until an SOA answer identifies the zone apex.
///
/// Every SOA probe is appended to `trace` in issuance order. The apex is
/// taken from the SOA owner name, so a CNAME on the way is followed
/// implicitly. If the walk fails (transport error, or no SOA before the
/// TLD) the domain itself is returned.
pub async fn organizational_domain(
    resolver: &dyn Resolver,
    domain: &str,
    trace: &mut Vec<Query>,
) -> String {
    let domain = domain.trim_end_matches('.');
    let labels: Vec<&str> = domain.split('.').collect();

    for start in 0..labels.len().saturating_sub(1) {
        let candidate = labels[start..].join(".");
        tracing::debug!("probing {candidate} for a zone apex");
        let mut query = Query::new(RecordType::Soa, &candidate);
        match resolver.resolve(&candidate, RecordType::Soa).await {
            Ok(answer) => {
                query = query.answered(&answer);
                let apex = answer
                    .records
                    .iter()
                    .find(|r| r.rtype == RecordType::Soa)
                    .map(|r| r.name.trim_end_matches('.').to_string());
                for r in &answer.records {
                    if r.rtype == RecordType::Soa {
                        query.records.push(Record::new(r.data.clone()));
                    }
                }
                trace.push(query);
                if let Some(apex) = apex {
                    return apex;
                }
            }
            Err(err) => {
                query.remark(Remark::error(format!("DNS query failed: {err}")));
                trace.push(query);
                return domain.to_string();
            }
        }
    }

    domain.to_string()
}
