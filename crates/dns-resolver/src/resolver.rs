use crate::{Answer, DnsError, DnsRecord, RecordType, Resolver};
use futures::future::BoxFuture;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::{RData, RecordType as HickoryType};
use hickory_resolver::{Name, TokioAsyncResolver};

/// Production resolver on top of hickory's tokio resolver.
///
/// hickory does not perform DNSSEC validation here, so answers are
/// reported with `authenticated: false`; a validating backend can
/// implement [`Resolver`] and set the flag from its own result.
pub struct HickoryResolver {
    inner: TokioAsyncResolver,
}

impl HickoryResolver {
    pub fn from_system_conf() -> Result<Self, DnsError> {
        TokioAsyncResolver::tokio_from_system_conf()
            .map(|inner| Self { inner })
            .map_err(|err| DnsError::ResolveFailed(format!("{err}")))
    }

    pub fn new(inner: TokioAsyncResolver) -> Self {
        Self { inner }
    }
}

fn hickory_type(rtype: RecordType) -> HickoryType {
    match rtype {
        RecordType::A => HickoryType::A,
        RecordType::Mx => HickoryType::MX,
        RecordType::Txt => HickoryType::TXT,
        RecordType::Soa => HickoryType::SOA,
        RecordType::Ptr => HickoryType::PTR,
        // The SPF RR type was obsoleted by RFC 7208 and has no named
        // variant in hickory
        RecordType::Spf => HickoryType::Unknown(99),
    }
}

fn record_data(rdata: &RData) -> String {
    match rdata {
        // TXT character-strings are concatenated without a separator
        RData::TXT(txt) => txt
            .iter()
            .map(|segment| String::from_utf8_lossy(segment))
            .collect::<String>(),
        other => other.to_string(),
    }
}

fn answer_for_error(name: &str, err: ResolveError) -> Result<Answer, DnsError> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => Ok(Answer {
            records: vec![],
            cname_chain: vec![],
            authenticated: false,
            nxdomain: *response_code == ResponseCode::NXDomain,
        }),
        _ => Err(DnsError::ResolveFailed(format!(
            "failed to query DNS for {name}: {err}"
        ))),
    }
}

impl Resolver for HickoryResolver {
    fn resolve<'a>(
        &'a self,
        name: &'a str,
        rtype: RecordType,
    ) -> BoxFuture<'a, Result<Answer, DnsError>> {
        Box::pin(async move {
            tracing::debug!("resolving {name} {rtype}");
            let fq_name = Name::from_str_relaxed(name)
                .map_err(|_| DnsError::InvalidName(name.to_string()))?
                .to_lowercase();

            let lookup = match self.inner.lookup(fq_name, hickory_type(rtype)).await {
                Ok(lookup) => lookup,
                Err(err) => return answer_for_error(name, err),
            };

            let mut records = vec![];
            let mut cname_chain = vec![];
            for r in lookup.record_iter() {
                let Some(rdata) = r.data() else {
                    continue;
                };
                if let RData::CNAME(cname) = rdata {
                    cname_chain.push(cname.0.to_string().trim_end_matches('.').to_string());
                    continue;
                }
                records.push(DnsRecord {
                    name: r.name().to_string().trim_end_matches('.').to_string(),
                    rtype,
                    data: record_data(rdata),
                });
            }

            Ok(Answer {
                records,
                cname_chain,
                authenticated: false,
                nxdomain: false,
            })
        })
    }
}
