//! Recursive SPF record checker.
//!
//! Given a domain, resolves its SPF policy and walks the whole
//! evaluation tree (`include` and `redirect` targets, `a`/`mx`
//! dereferences) while enforcing the RFC 7208 limit of 10 DNS lookups
//! across the tree. Findings are reported as remarks on the query trace;
//! nothing is matched against a client IP.

use dns_resolver::{RecordType, Resolver};
use futures::future::BoxFuture;
use serde::Serialize;
use sleuth_report::{Query, Record, Remark};

pub mod record;


use record::{CidrSuffix, Mechanism, Modifier, Qualifier, Term};

const CITE_MULTIPLE_RECORDS: &str = "https://datatracker.ietf.org/doc/html/rfc7208#section-4.5";
const CITE_INCLUDE: &str = "https://datatracker.ietf.org/doc/html/rfc7208#section-5.2";
const CITE_LOOKUP_LIMIT: &str = "https://datatracker.ietf.org/doc/html/rfc7208#section-4.6.4";
const CITE_DEFAULT: &str = "https://datatracker.ietf.org/doc/html/rfc7208#section-4.7";
const CITE_ALL: &str = "https://datatracker.ietf.org/doc/html/rfc7208#section-5.1";
const CITE_PTR: &str = "https://datatracker.ietf.org/doc/html/rfc7208#section-5.5";
const CITE_MODIFIERS: &str = "https://datatracker.ietf.org/doc/html/rfc7208#section-6";
const CITE_REDIRECT: &str = "https://datatracker.ietf.org/doc/html/rfc7208#section-6.1";
const CITE_MACROS: &str = "https://datatracker.ietf.org/doc/html/rfc7208#section-7";
const CITE_OBSOLETE_RR: &str = "https://datatracker.ietf.org/doc/html/rfc7208#section-3.1";

/// Terms that cause DNS queries are limited to this count per
/// evaluation tree.
const LOOKUP_LIMIT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpfReport {
    pub queries: Vec<Query>,
}

/// How the current record came to be evaluated. An `include`d record
/// with no SPF is a permanent error per RFC 7208; a missing `redirect`
/// target is reported more leniently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvalKind {
    TopLevel,
    Include,
    Redirect,
}

pub async fn check_domain(resolver: &dyn Resolver, domain: &str) -> SpfReport {
    let mut evaluator = Evaluator {
        resolver,
        trace: vec![],
        lookups: 0,
        budget_reported: false,
        void_lookups: 0,
    };
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    evaluator.evaluate(domain, 0, EvalKind::TopLevel).await;
    SpfReport {
        queries: evaluator.trace,
    }
}

fn is_spf_record(content: &str) -> bool {
    content == "v=spf1" || content.starts_with("v=spf1 ")
}

struct Evaluator<'a> {
    resolver: &'a dyn Resolver,
    trace: Vec<Query>,
    /// Shared across the whole evaluation tree, not per branch
    lookups: u32,
    budget_reported: bool,
    void_lookups: u32,
}

impl<'a> Evaluator<'a> {
    fn evaluate<'s>(
        &'s mut self,
        domain: String,
        include_depth: usize,
        kind: EvalKind,
    ) -> BoxFuture<'s, ()> {
        Box::pin(async move {
            tracing::debug!("evaluating SPF for {domain} at depth {include_depth}");
            let mut query = Query::new(RecordType::Txt, &domain);
            let answer = match self.resolver.resolve_txt(&domain).await {
                Ok(answer) => answer,
                Err(err) => {
                    query.remark(Remark::error(format!("DNS query failed: {err}")));
                    self.trace.push(query);
                    return;
                }
            };
            query = query.answered(&answer);

            let mut candidates: Vec<String> = answer
                .as_txt()
                .into_iter()
                .filter(|txt| is_spf_record(txt))
                .collect();

            if kind == EvalKind::TopLevel {
                self.probe_deprecated_rr(&domain, &mut query).await;
            }

            match candidates.len() {
                0 => {
                    query.remark(match kind {
                        EvalKind::TopLevel => {
                            Remark::error(format!("{domain} does not publish an SPF record"))
                        }
                        EvalKind::Include => Remark::error(format!(
                            "included domain {domain} has no SPF record, \
                             which is a permanent error"
                        ))
                        .cite(CITE_INCLUDE),
                        EvalKind::Redirect => Remark::warning(format!(
                            "redirect target {domain} has no SPF record"
                        )),
                    });
                    self.trace.push(query);
                }
                1 => {
                    let content = candidates.remove(0);
                    let mut record = Record::new(content.as_str());
                    let terms = parse_terms(&content, &mut record);
                    check_syntax(&terms, kind, &mut record);
                    query.records.push(record);

                    let qidx = self.trace.len();
                    self.trace.push(query);
                    self.dereference(&domain, &terms, include_depth, qidx).await;
                }
                _ => {
                    query.remark(
                        Remark::error("a domain may not publish multiple SPF TXT records")
                            .cite(CITE_MULTIPLE_RECORDS),
                    );
                    for content in candidates {
                        query.records.push(Record::new(content));
                    }
                    self.trace.push(query);
                }
            }
        })
    }

    /// Probe for records of the obsolete SPF RR type. Finding any is
    /// worth a warning, and costs one unit of the lookup budget.
    async fn probe_deprecated_rr(&mut self, domain: &str, query: &mut Query) {
        match self.resolver.resolve(domain, RecordType::Spf).await {
            Ok(answer) if !answer.is_empty() => {
                self.lookups += 1;
                query.remark(
                    Remark::warning(format!(
                        "{domain} publishes records of the deprecated SPF RR type; \
                         the type was obsoleted in favor of TXT"
                    ))
                    .cite(CITE_OBSOLETE_RR),
                );
            }
            Ok(_) => {}
            Err(err) => {
                query.remark(Remark::error(format!(
                    "DNS query for the deprecated SPF RR type failed: {err}"
                )));
            }
        }
    }

    async fn dereference(
        &mut self,
        domain: &str,
        terms: &[(String, Term)],
        include_depth: usize,
        qidx: usize,
    ) {
        let all_present = terms.iter().any(|(_, t)| {
            matches!(t, Term::Directive(d) if matches!(d.mechanism, Mechanism::All))
        });
        let mut redirect_done = false;

        for (token, term) in terms {
            match term {
                Term::Directive(directive) => match &directive.mechanism {
                    Mechanism::Include { domain: target } => {
                        if record::has_macro(target) {
                            self.macro_note(qidx, token);
                            continue;
                        }
                        if !self.take_budget(qidx, token) {
                            continue;
                        }
                        self.evaluate(target.clone(), include_depth + 1, EvalKind::Include)
                            .await;
                    }
                    Mechanism::A { domain: target, .. } => {
                        let target = target.clone().unwrap_or_else(|| domain.to_string());
                        self.resolve_hosts(&target, RecordType::A, qidx, token).await;
                    }
                    Mechanism::Mx { domain: target, .. } => {
                        let target = target.clone().unwrap_or_else(|| domain.to_string());
                        self.resolve_hosts(&target, RecordType::Mx, qidx, token).await;
                    }
                    // Counted against the budget but never dereferenced
                    Mechanism::Ptr { .. } | Mechanism::Exists { .. } => {
                        let _ = self.take_budget(qidx, token);
                    }
                    Mechanism::All | Mechanism::Ip4 { .. } | Mechanism::Ip6 { .. } => {}
                },
                Term::Modifier(Modifier::Redirect(target)) => {
                    // ignored when an `all` directive is present; flagged
                    // by the syntax pass
                    if all_present || redirect_done {
                        continue;
                    }
                    redirect_done = true;
                    if record::has_macro(target) {
                        self.macro_note(qidx, token);
                        continue;
                    }
                    if !self.take_budget(qidx, token) {
                        continue;
                    }
                    self.evaluate(target.clone(), include_depth, EvalKind::Redirect)
                        .await;
                }
                Term::Modifier(_) => {}
            }
        }
    }

    async fn resolve_hosts(&mut self, target: &str, rtype: RecordType, qidx: usize, token: &str) {
        if record::has_macro(target) {
            self.macro_note(qidx, token);
            return;
        }
        if !self.take_budget(qidx, token) {
            return;
        }

        let mut query = Query::new(rtype, target);
        match self.resolver.resolve(target, rtype).await {
            Ok(answer) => {
                query = query.answered(&answer);
                if answer.is_empty() {
                    self.void_lookups += 1;
                    query.remark(
                        Remark::warning(format!("void lookup: {target} has no {rtype} records"))
                            .cite(CITE_LOOKUP_LIMIT),
                    );
                    if self.void_lookups == 3 {
                        query.remark(
                            Remark::warning(
                                "more than two void lookups in one evaluation; \
                                 receivers are allowed to reject such records",
                            )
                            .cite(CITE_LOOKUP_LIMIT),
                        );
                    }
                }
                for r in &answer.records {
                    if r.rtype == rtype {
                        query.records.push(Record::new(r.data.clone()));
                    }
                }
            }
            Err(err) => {
                query.remark(Remark::error(format!("DNS query failed: {err}")));
            }
        }
        self.trace.push(query);
    }

    /// Returns false once the tree has used up its lookup allowance. The
    /// term that would have performed the 11th lookup is flagged, once.
    fn take_budget(&mut self, qidx: usize, token: &str) -> bool {
        if self.lookups >= LOOKUP_LIMIT {
            if !self.budget_reported {
                self.budget_reported = true;
                self.remark_on_record(
                    qidx,
                    Remark::error(format!(
                        "'{token}' exceeds the limit of {LOOKUP_LIMIT} DNS lookups \
                         per SPF evaluation; further terms are not resolved"
                    ))
                    .cite(CITE_LOOKUP_LIMIT),
                );
            }
            return false;
        }
        self.lookups += 1;
        true
    }

    fn macro_note(&mut self, qidx: usize, token: &str) {
        self.remark_on_record(
            qidx,
            Remark::info(format!(
                "'{token}' contains a macro and is not evaluated by this checker"
            ))
            .cite(CITE_MACROS),
        );
    }

    fn remark_on_record(&mut self, qidx: usize, remark: Remark) {
        if let Some(record) = self.trace[qidx].records.first_mut() {
            record.remark(remark);
        }
    }
}

fn parse_terms(content: &str, record: &mut Record) -> Vec<(String, Term)> {
    let mut terms = vec![];
    for token in content["v=spf1".len()..].split_whitespace() {
        match Term::parse(token) {
            Ok(term) => terms.push((token.to_string(), term)),
            Err(err) => record.remark(Remark::error(err)),
        }
    }
    terms
}

/// The per-record checks that need no lookups: placement and cardinality
/// of modifiers, reachability, qualifier hygiene, and ip4/ip6 syntax.
fn check_syntax(terms: &[(String, Term)], kind: EvalKind, record: &mut Record) {
    let mut redirects = 0;
    let mut exps = 0;
    let mut all_seen = false;
    let mut modifier_seen = false;
    let mut non_ip_directive_seen = false;
    let mut unreachable_reported = false;
    let mut placement_reported = false;
    let mut ip_order_reported = false;

    for (token, term) in terms {
        match term {
            Term::Directive(directive) => {
                if modifier_seen && !placement_reported {
                    placement_reported = true;
                    record.remark(
                        Remark::warning(
                            "'redirect' and 'exp' modifiers should follow all mechanisms",
                        )
                        .cite(CITE_MODIFIERS),
                    );
                }
                if all_seen && !unreachable_reported {
                    unreachable_reported = true;
                    record.remark(
                        Remark::warning(format!(
                            "'{token}' can never be reached: it follows an 'all' mechanism"
                        ))
                        .cite(CITE_ALL),
                    );
                }

                match &directive.mechanism {
                    Mechanism::All => {
                        all_seen = true;
                        if directive.qualifier == Qualifier::Pass {
                            record.remark(
                                Remark::warning(
                                    "'+all' authorizes every host to send mail for this domain",
                                )
                                .cite(CITE_ALL),
                            );
                        } else if kind == EvalKind::Include
                            && directive.qualifier == Qualifier::Neutral
                        {
                            record.remark(
                                Remark::warning(
                                    "'?all' in an included record makes the include meaningless \
                                     without asserting anything",
                                )
                                .cite(CITE_ALL),
                            );
                        }
                    }
                    Mechanism::Ip4 { arg } => check_ip4(token, arg, record),
                    Mechanism::Ip6 { arg } => check_ip6(token, arg, record),
                    Mechanism::Ptr { .. } => {
                        record.remark(Remark::info(format!(
                            "'{token}' is not evaluated by this checker"
                        )));
                        record.remark(
                            Remark::warning("use of the 'ptr' mechanism is discouraged")
                                .cite(CITE_PTR),
                        );
                    }
                    Mechanism::Exists { .. } => {
                        record.remark(Remark::info(format!(
                            "'{token}' is not evaluated by this checker"
                        )));
                    }
                    Mechanism::A { cidr, .. } | Mechanism::Mx { cidr, .. } => {
                        if let CidrSuffix::Invalid(raw) = cidr {
                            record.remark(Remark::error(format!(
                                "'{token}' has an invalid CIDR suffix '{raw}'"
                            )));
                        }
                    }
                    Mechanism::Include { .. } => {}
                }

                if matches!(
                    directive.mechanism,
                    Mechanism::Ip4 { .. } | Mechanism::Ip6 { .. }
                ) {
                    if non_ip_directive_seen && !ip_order_reported {
                        ip_order_reported = true;
                        record.remark(Remark::info(
                            "place 'ip4' and 'ip6' mechanisms before mechanisms that \
                             need DNS lookups: they match without any",
                        ));
                    }
                } else {
                    non_ip_directive_seen = true;
                }
            }
            Term::Modifier(modifier) => match modifier {
                Modifier::Redirect(_) => {
                    redirects += 1;
                    modifier_seen = true;
                }
                Modifier::Explanation(_) => {
                    exps += 1;
                    modifier_seen = true;
                }
                Modifier::Unknown { .. } => {}
            },
        }
    }

    if redirects > 1 {
        record.remark(
            Remark::error("at most one 'redirect' modifier is allowed").cite(CITE_MODIFIERS),
        );
    }
    if exps > 1 {
        record.remark(Remark::error("at most one 'exp' modifier is allowed").cite(CITE_MODIFIERS));
    }
    if redirects > 0 && all_seen {
        record.remark(
            Remark::warning("the 'redirect' modifier is ignored when an 'all' mechanism is present")
                .cite(CITE_REDIRECT),
        );
    }
    if redirects == 0 && !all_seen {
        record.remark(
            Remark::warning(
                "the record has neither an 'all' mechanism nor a 'redirect' modifier, \
                 so no explicit default is declared",
            )
            .cite(CITE_DEFAULT),
        );
    }
}

fn check_ip4(token: &str, arg: &str, record: &mut Record) {
    let (addr, cidr) = match arg.split_once('/') {
        Some((addr, cidr)) => (addr, Some(cidr)),
        None => (arg, None),
    };
    if addr.parse::<std::net::Ipv4Addr>().is_err() {
        record.remark(Remark::error(format!(
            "'{token}' does not contain a valid IPv4 network address"
        )));
    }
    if let Some(cidr) = cidr {
        if !cidr.parse::<u8>().map(|n| n <= 32).unwrap_or(false) {
            record.remark(Remark::error(format!(
                "'{token}' has an invalid IPv4 CIDR length '/{cidr}'"
            )));
        }
    }
}

fn check_ip6(token: &str, arg: &str, record: &mut Record) {
    let (addr, cidr) = match arg.split_once('/') {
        Some((addr, cidr)) => (addr, Some(cidr)),
        None => (arg, None),
    };
    if addr.parse::<std::net::Ipv6Addr>().is_err() {
        record.remark(Remark::error(format!(
            "'{token}' does not contain a valid IPv6 network address"
        )));
    }
    if let Some(cidr) = cidr {
        if !cidr.parse::<u8>().map(|n| n <= 128).unwrap_or(false) {
            record.remark(Remark::error(format!(
                "'{token}' has an invalid IPv6 CIDR length '/{cidr}'"
            )));
        }
    }
}
