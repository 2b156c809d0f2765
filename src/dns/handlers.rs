use crate::acme::SharedRecordStore;
use crate::config::SharedConfig;
use crate::error::Error;
use crate::store::model::Interaction;
use crate::store::{DynStore, IdGenerator, Store};
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::error;
use trust_dns_proto::rr::rdata::MX;
use trust_dns_server::authority::MessageResponseBuilder;
use trust_dns_server::client::op::{Header, MessageType, OpCode, ResponseCode};
use trust_dns_server::client::rr::rdata::TXT;
use trust_dns_server::client::rr::{Name, RData, Record, RecordType};
use trust_dns_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

/// TTL for every answer we synthesize; challenge TXT answers use the stored
/// record's own TTL instead.
const ANSWER_TTL: u32 = 60;

/// Served for TXT queries that are not ACME challenges.
const DEFAULT_TXT: &str = "hookd interaction server";

const ACME_CHALLENGE_PREFIX: &str = "_acme-challenge.";

#[derive(Clone)]
pub struct Handler {
    config: SharedConfig,
    origin: Name,
    server_ip: Ipv4Addr,
    store: DynStore,
    acme_records: SharedRecordStore,
    generate_id: IdGenerator,
}

impl Handler {
    pub(super) fn new(
        config: SharedConfig,
        server_ip: Ipv4Addr,
        store: DynStore,
        acme_records: SharedRecordStore,
        generate_id: IdGenerator,
    ) -> Result<Self, Error> {
        let origin = Name::from_str(&format!("{}.", config.server.domain))?;
        Ok(Handler {
            config,
            origin,
            server_ip,
            store,
            acme_records,
            generate_id,
        })
    }

    async fn dispatch_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response: R,
    ) -> Result<ResponseInfo, Error> {
        // If it isn't a query, return NOTIMPL.
        if request.op_code() != OpCode::Query || request.message_type() != MessageType::Query {
            return self.handle_notimpl(request, response).await;
        }

        let name: Name = request.query().name().into();
        let qname = normalize(&name.to_string());
        let qtype = request.query().query_type();
        tracing::debug!(%qname, %qtype, client = %request.src(), "dns query received");

        // ACME challenges bypass the zone check: with delegated challenge
        // zones the target name need not sit under our domain.
        if qtype == RecordType::TXT && qname.starts_with(ACME_CHALLENGE_PREFIX) {
            let answers = self.acme_answers(&name, &qname).await;
            return self.send_auth_resp(request, response, answers).await;
        }

        if !self.config.in_zone(&qname) {
            tracing::debug!(%qname, "skipping query for external domain");
            return self.send_auth_resp(request, response, Vec::new()).await;
        }

        if let Some(hook_id) = self.config.hook_label(&qname) {
            self.record_interaction(hook_id, &qname, qtype, request.src().ip().to_string())
                .await;
        }

        let answers = self.zone_answers(&name, qtype);
        self.send_auth_resp(request, response, answers).await
    }

    /// Store a DNS interaction under the hook named in the query. The store
    /// drops interactions for hooks that were never registered.
    async fn record_interaction(&self, hook_id: &str, qname: &str, qtype: RecordType, src: String) {
        let interaction = Interaction::dns(
            (self.generate_id)(),
            src,
            qname.to_string(),
            qtype.to_string(),
        );
        self.store
            .write()
            .await
            .add_interaction(hook_id, interaction)
            .await;
    }

    /// Fixed answers for names inside our zone, by query type. AAAA and
    /// anything unlisted get an empty authoritative answer.
    fn zone_answers(&self, name: &Name, qtype: RecordType) -> Vec<Record> {
        let rdata = match qtype {
            RecordType::A => vec![RData::A(self.server_ip)],
            RecordType::TXT => vec![RData::TXT(TXT::new(vec![DEFAULT_TXT.to_string()]))],
            RecordType::NS => vec![RData::NS(self.origin.clone())],
            RecordType::MX => vec![RData::MX(MX::new(10, self.origin.clone()))],
            _ => Vec::new(),
        };
        rdata
            .into_iter()
            .map(|rd| Record::from_rdata(name.clone(), ANSWER_TTL, rd))
            .collect()
    }

    /// Answer a challenge query from the ACME record store. Candidate zones
    /// are the successive suffixes of the query name; a record matches when
    /// its stored name, joined with the candidate zone, reconstructs the
    /// query name. Answers carry each record's own TTL.
    async fn acme_answers(&self, name: &Name, qname: &str) -> Vec<Record> {
        let parts: Vec<&str> = qname.split('.').collect();
        let store = self.acme_records.read().await;
        let mut answers = Vec::new();
        for i in 1..parts.len() {
            let apex = parts[i..].join(".");
            let zone = format!("{apex}.");
            for record in store.get(&zone) {
                let record_name = normalize(&record.name);
                if record_name == qname || format!("{record_name}.{apex}") == qname {
                    answers.push(Record::from_rdata(
                        name.clone(),
                        record.ttl,
                        RData::TXT(TXT::new(vec![record.data.clone()])),
                    ));
                }
            }
        }
        if answers.is_empty() {
            tracing::warn!(%qname, "no acme records found");
        } else {
            tracing::info!(%qname, count = answers.len(), "acme challenge response");
        }
        answers
    }

    async fn send_auth_resp<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        records: Vec<Record>,
    ) -> Result<ResponseInfo, Error> {
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(header, records.iter(), &[], &[], &[]);
        Ok(response_handle.send_response(response).await?)
    }

    async fn handle_notimpl<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        let response = MessageResponseBuilder::from_message_request(request);
        Ok(response_handle
            .send_response(response.error_msg(request.header(), ResponseCode::NotImp))
            .await?)
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        match self.dispatch_request(request, response_handle).await {
            Ok(info) => info,
            Err(err) => {
                error!("error in RequestHandler: {err:?}");
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{AcmeRecordStore, TxtRecord};
    use crate::config::Config;
    use crate::store::model::InteractionPayload;
    use crate::store::{random_id_generator, InMemoryStore, Store};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    const DOMAIN: &str = "hookd.test.local";

    fn test_handler() -> (Handler, DynStore, SharedRecordStore) {
        let mut config = Config::default();
        config.server.domain = DOMAIN.to_string();
        let store: DynStore = Arc::new(RwLock::new(InMemoryStore::new(random_id_generator())));
        let acme_records: SharedRecordStore = Arc::new(RwLock::new(AcmeRecordStore::default()));
        let handler = Handler::new(
            Arc::new(config),
            Ipv4Addr::new(192, 0, 2, 10),
            store.clone(),
            acme_records.clone(),
            random_id_generator(),
        )
        .unwrap();
        (handler, store, acme_records)
    }

    fn qname(name: &str) -> Name {
        Name::from_str(name).unwrap()
    }

    #[tokio::test]
    async fn a_query_answers_server_ip_with_ttl_60() {
        let (handler, _, _) = test_handler();
        let name = qname("abc.hookd.test.local.");
        let answers = handler.zone_answers(&name, RecordType::A);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].ttl(), 60);
        assert_eq!(
            answers[0].data(),
            Some(&RData::A(Ipv4Addr::new(192, 0, 2, 10)))
        );
    }

    #[tokio::test]
    async fn aaaa_and_unknown_types_answer_empty() {
        let (handler, _, _) = test_handler();
        let name = qname("abc.hookd.test.local.");
        assert!(handler.zone_answers(&name, RecordType::AAAA).is_empty());
        assert!(handler.zone_answers(&name, RecordType::SRV).is_empty());
    }

    #[tokio::test]
    async fn txt_query_answers_banner() {
        let (handler, _, _) = test_handler();
        let answers = handler.zone_answers(&qname("abc.hookd.test.local."), RecordType::TXT);
        assert_eq!(answers.len(), 1);
        match answers[0].data() {
            Some(RData::TXT(txt)) => {
                assert_eq!(txt.txt_data()[0].as_ref(), DEFAULT_TXT.as_bytes());
            }
            other => panic!("expected TXT rdata, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ns_and_mx_point_at_the_zone() {
        let (handler, _, _) = test_handler();
        let name = qname("hookd.test.local.");
        match handler.zone_answers(&name, RecordType::NS)[0].data() {
            Some(RData::NS(ns)) => assert_eq!(ns.to_string(), "hookd.test.local."),
            other => panic!("expected NS rdata, got {other:?}"),
        }
        match handler.zone_answers(&name, RecordType::MX)[0].data() {
            Some(RData::MX(mx)) => {
                assert_eq!(mx.preference(), 10);
                assert_eq!(mx.exchange().to_string(), "hookd.test.local.");
            }
            other => panic!("expected MX rdata, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn records_interaction_for_registered_hook() {
        let (handler, store, _) = test_handler();
        let hook = store.write().await.create_hook(DOMAIN).await;
        let name = format!("{}.{DOMAIN}", hook.id);

        handler
            .record_interaction(&hook.id, &name, RecordType::A, "198.51.100.7".to_string())
            .await;

        let polled = store.write().await.poll(&hook.id).await;
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].source_ip, "198.51.100.7");
        match &polled[0].payload {
            InteractionPayload::Dns(data) => {
                assert_eq!(data.qname, name);
                assert_eq!(data.qtype, "A");
            }
            InteractionPayload::Http(_) => panic!("expected a dns interaction"),
        }
    }

    #[tokio::test]
    async fn drops_interaction_for_unknown_hook() {
        let (handler, store, _) = test_handler();
        handler
            .record_interaction(
                "stranger",
                &format!("stranger.{DOMAIN}"),
                RecordType::A,
                "198.51.100.7".to_string(),
            )
            .await;
        assert_eq!(store.read().await.stats().await.interactions_total, 0);
    }

    #[tokio::test]
    async fn acme_answers_match_suffix_zones() {
        let (handler, _, acme_records) = test_handler();
        acme_records.write().await.append(
            "hookd.test.local.",
            vec![TxtRecord::new("_acme-challenge", "challenge-value", 120)],
        );

        let name = qname("_acme-challenge.hookd.test.local.");
        let answers = handler
            .acme_answers(&name, "_acme-challenge.hookd.test.local")
            .await;
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].ttl(), 120);
        match answers[0].data() {
            Some(RData::TXT(txt)) => {
                assert_eq!(txt.txt_data()[0].as_ref(), b"challenge-value");
            }
            other => panic!("expected TXT rdata, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn acme_answers_both_wildcard_values() {
        let (handler, _, acme_records) = test_handler();
        acme_records.write().await.append(
            "hookd.test.local.",
            vec![
                TxtRecord::new("_acme-challenge", "value-apex", 60),
                TxtRecord::new("_acme-challenge", "value-wildcard", 60),
            ],
        );

        let name = qname("_acme-challenge.hookd.test.local.");
        let answers = handler
            .acme_answers(&name, "_acme-challenge.hookd.test.local")
            .await;
        assert_eq!(answers.len(), 2);
    }

    #[tokio::test]
    async fn acme_unmatched_name_answers_empty() {
        let (handler, _, acme_records) = test_handler();
        acme_records.write().await.append(
            "hookd.test.local.",
            vec![TxtRecord::new("_acme-challenge", "value", 60)],
        );

        let name = qname("_acme-challenge.other.example.");
        let answers = handler
            .acme_answers(&name, "_acme-challenge.other.example")
            .await;
        assert!(answers.is_empty());
    }

    #[tokio::test]
    async fn acme_matching_is_case_insensitive() {
        let (handler, _, acme_records) = test_handler();
        acme_records.write().await.append(
            "hookd.test.local.",
            vec![TxtRecord::new("_ACME-Challenge", "value", 60)],
        );

        let name = qname("_acme-challenge.hookd.test.local.");
        let answers = handler
            .acme_answers(&name, "_acme-challenge.hookd.test.local")
            .await;
        assert_eq!(answers.len(), 1);
    }
}
