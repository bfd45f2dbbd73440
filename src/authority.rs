//! Custom Hickory DNS authority backed by the records store.
//!
//! The authority sits at the root of the catalog in front of the forwarder.
//! For a query under one of the served domains it answers from the store;
//! everything else is declined with [`LookupControlFlow::Skip`] so the next
//! authority in the chain (forwarding) handles it. Without a next stage the
//! authority is built with [`RecordsAuthority::standalone`] and declines with
//! a response code instead.

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, CNAME};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_server::authority::{
    Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords, MessageRequest,
    UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::metrics::{self, QueryResult, Timer};
use crate::record::RecordData;
use crate::store::RecordStore;

/// Resolution adapter: looks queries up in the [`RecordStore`].
pub struct RecordsAuthority {
    origin: LowerName,
    domains: Arc<[String]>,
    store: RecordStore,
    terminal: bool,
}

impl RecordsAuthority {
    /// Create an authority serving `domains` from `store` that passes
    /// declined queries to the next authority in the chain.
    pub fn new(domains: Vec<String>, store: RecordStore) -> Self {
        Self {
            origin: Name::root().into(),
            domains: domains.into(),
            store,
            terminal: false,
        }
    }

    /// Create an authority that is the last stage of the chain.
    ///
    /// Declined queries are answered with `REFUSED` (outside the served
    /// domains), `NXDOMAIN` (unknown name) or an empty `NOERROR` (name known,
    /// type not served).
    pub fn standalone(domains: Vec<String>, store: RecordStore) -> Self {
        Self {
            terminal: true,
            ..Self::new(domains, store)
        }
    }

    /// Decline a query, with `code` when there is no next stage.
    fn decline(&self, code: ResponseCode) -> LookupControlFlow<LookupRecords> {
        if self.terminal {
            LookupControlFlow::Break(Err(LookupError::ResponseCode(code)))
        } else {
            LookupControlFlow::Skip
        }
    }

    /// Whether `query_name` (dot-terminated) lies under a served domain.
    ///
    /// Plain suffix match on the name as received.
    fn matches_domain(&self, query_name: &str) -> bool {
        self.domains
            .iter()
            .any(|domain| query_name.ends_with(&format!("{domain}.")))
    }

    /// Answer `name`/`rtype` from the store, or decline.
    fn resolve(
        &self,
        name: &Name,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<LookupRecords> {
        let timer = Timer::start();
        let rtype_str = format!("{:?}", rtype);
        let mut query_name = name.to_string();
        if !query_name.ends_with('.') {
            query_name.push('.');
        }

        if !self.matches_domain(&query_name) {
            trace!(name = %query_name, "query outside served domains");
            metrics::record_query(&rtype_str, QueryResult::Declined, timer.elapsed());
            return self.decline(ResponseCode::Refused);
        }

        let Some((label, domain)) = split_query_name(&query_name) else {
            metrics::record_query(&rtype_str, QueryResult::Declined, timer.elapsed());
            return self.decline(ResponseCode::NXDomain);
        };

        let record = match self.store.get(domain, label) {
            Ok(record) => record,
            Err(e) => {
                debug!(name = %query_name, error = %e, "no custom record, declining");
                metrics::record_query(&rtype_str, QueryResult::Declined, timer.elapsed());
                return self.decline(ResponseCode::NXDomain);
            }
        };

        // A stored CNAME answers both CNAME and A queries.
        let (rdata, answer_type, result) = match (&record.data, rtype) {
            (RecordData::Cname(target), RecordType::A | RecordType::CNAME) => {
                let target = if target.ends_with('.') {
                    target.clone()
                } else {
                    format!("{target}.")
                };
                match Name::from_ascii(&target) {
                    Ok(target) => (RData::CNAME(CNAME(target)), RecordType::CNAME, QueryResult::Cname),
                    Err(e) => {
                        debug!(name = %query_name, error = %e, "unusable CNAME target");
                        return LookupControlFlow::Break(Err(LookupError::ResponseCode(
                            ResponseCode::ServFail,
                        )));
                    }
                }
            }
            (RecordData::A(ip), RecordType::A) => (RData::A(A(*ip)), RecordType::A, QueryResult::A),
            _ => {
                debug!(
                    name = %query_name,
                    stored = %record.record_type(),
                    rtype = ?rtype,
                    "custom record does not answer this type, declining"
                );
                metrics::record_query(&rtype_str, QueryResult::Declined, timer.elapsed());
                return self.decline(ResponseCode::NoError);
            }
        };

        debug!(name = %query_name, answer = ?answer_type, ttl = record.ttl, "answering from custom record");
        metrics::record_query(&rtype_str, result, timer.elapsed());

        let mut record_set = RecordSet::new(name.clone(), answer_type, 0);
        let mut answer = Record::from_rdata(name.clone(), record.ttl, rdata);
        answer.set_dns_class(DNSClass::IN);
        record_set.insert(answer, 0);

        LookupControlFlow::Break(Ok(LookupRecords::new(
            lookup_options,
            Arc::new(record_set),
        )))
    }
}

/// Split `name.domain.` into `(name, domain)`.
///
/// Returns `None` for single-label names.
fn split_query_name(query_name: &str) -> Option<(&str, &str)> {
    let trimmed = query_name.strip_suffix('.').unwrap_or(query_name);
    let (label, domain) = trimmed.split_once('.')?;
    if label.is_empty() || domain.is_empty() {
        return None;
    }
    Some((label, domain))
}

#[async_trait]
impl Authority for RecordsAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        self.resolve(&Name::from(name.clone()), rtype, lookup_options)
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        // Match against the name as it was sent, not the lowercased form.
        let query = request_info.query.original();
        self.resolve(query.name(), query.query_type(), lookup_options)
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        LookupControlFlow::Skip
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Records are managed through the HTTP API only.
        Err(ResponseCode::NotImp)
    }
}
