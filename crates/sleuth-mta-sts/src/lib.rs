//! MTA-STS checker: the `_mta-sts` discovery record in DNS, then the
//! policy file served at the well-known HTTPS location.
//!
//! <https://datatracker.ietf.org/doc/html/rfc8461>

use dns_resolver::Resolver;
use serde::Serialize;
use sleuth_report::Query;

pub mod dns;
pub mod policy;

pub use policy::{Get, HttpsGetter};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MtaStsReport {
    pub queries: Vec<Query>,
}

pub async fn check_domain(resolver: &dyn Resolver, getter: &dyn Get, domain: &str) -> MtaStsReport {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    tracing::debug!("checking MTA-STS for {domain}");

    let mut trace = vec![];
    if dns::check_record(resolver, &domain, &mut trace).await {
        policy::check_policy(getter, &domain, &mut trace).await;
    }
    MtaStsReport { queries: trace }
}
