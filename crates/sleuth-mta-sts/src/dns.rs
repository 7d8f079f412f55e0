use dns_resolver::{RecordType, Resolver};
use sleuth_report::{parse_tag_list, single_tag, Query, Record, Remark, Tag, TagName};
use std::fmt;

const CITE_STS_RECORD: &str = "https://datatracker.ietf.org/doc/html/rfc8461#section-3.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StsTag {
    V,
    Id,
}

impl fmt::Display for StsTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V => "v",
            Self::Id => "id",
        })
    }
}

impl TagName for StsTag {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "v" => Self::V,
            "id" => Self::Id,
            _ => return None,
        })
    }
}

fn is_sts_record(content: &str) -> bool {
    match content.strip_prefix("v=STSv1") {
        Some(rest) => rest.is_empty() || rest.starts_with(';') || rest.starts_with(' '),
        None => false,
    }
}

/// Validate the `_mta-sts` discovery record. Returns true when a record
/// exists, meaning the policy file is worth fetching.
pub(crate) async fn check_record(
    resolver: &dyn Resolver,
    domain: &str,
    trace: &mut Vec<Query>,
) -> bool {
    let name = format!("_mta-sts.{domain}");
    let mut query = Query::new(RecordType::Txt, &name);
    let answer = match resolver.resolve_txt(&name).await {
        Ok(answer) => answer,
        Err(err) => {
            query.remark(Remark::error(format!("DNS query failed: {err}")));
            trace.push(query);
            return false;
        }
    };
    query = query.answered(&answer);

    let mut candidates: Vec<String> = answer
        .as_txt()
        .into_iter()
        .filter(|txt| is_sts_record(txt))
        .collect();

    let found = match candidates.len() {
        0 => {
            query.remark(
                Remark::warning(format!("{domain} does not publish an MTA-STS policy record"))
                    .cite(CITE_STS_RECORD),
            );
            false
        }
        1 => {
            let record = validate_record(candidates.remove(0));
            query.records.push(record);
            true
        }
        _ => {
            query.remark(
                Remark::error("a domain may not publish multiple MTA-STS records")
                    .cite(CITE_STS_RECORD),
            );
            for content in candidates {
                query.records.push(Record::new(content));
            }
            false
        }
    };

    trace.push(query);
    found
}

fn validate_record(content: String) -> Record {
    let mut record = Record::new(content);
    let tags: Vec<Tag<StsTag>> = parse_tag_list(&mut record, ';');

    let _ = single_tag(&mut record, &tags, StsTag::V);

    match single_tag(&mut record, &tags, StsTag::Id) {
        None => record.remark(
            Remark::error("the mandatory id tag is missing").cite(CITE_STS_RECORD),
        ),
        Some(tag) => {
            let valid = (1..=32).contains(&tag.value.len())
                && tag.value.chars().all(|c| c.is_ascii_alphanumeric());
            if !valid {
                record.remark(
                    Remark::error(format!(
                        "the id tag must be 1 to 32 alphanumeric characters, not {:?}",
                        tag.value
                    ))
                    .cite(CITE_STS_RECORD),
                );
            }
        }
    }

    record
}
