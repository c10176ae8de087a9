//! Diameter intra-protocol correlator.
//!
//! Groups Diameter messages into sessions by Session-ID, detects the 3GPP
//! interface from the Application-ID, links request/answer pairs by
//! Hop-by-Hop-ID and maintains reverse indices from subscriber identifiers
//! to sessions.

use crate::correlator::Correlator;
use crate::diameter::session::{DiameterInterface, DiameterMessage, DiameterSession};
use crate::identity::SubscriberContextManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Diameter correlation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiameterStats {
    pub total_messages: usize,
    pub total_sessions: usize,
    pub sessions_by_interface: HashMap<DiameterInterface, usize>,
    pub request_count: usize,
    pub answer_count: usize,
    pub linked_pairs: usize,
    pub error_responses: usize,
}

#[derive(Default)]
struct Inner {
    /// Session-ID -> session.
    sessions: HashMap<String, DiameterSession>,
    order: Vec<String>,
    session_sequence: u64,

    // Hop-by-Hop-ID is unique only within one transport connection at a
    // time. One global overwriting map: the most recent binding is treated
    // as authoritative.
    hop_to_session: HashMap<u32, String>,

    imsi_to_sessions: HashMap<String, Vec<String>>,
    msisdn_to_sessions: HashMap<String, Vec<String>>,
    framed_ip_to_sessions: HashMap<String, Vec<String>>,

    stats: DiameterStats,
}

/// Groups Diameter messages into sessions keyed by Session-ID.
pub struct DiameterCorrelator {
    inner: Mutex<Inner>,
    ctx_manager: Option<Arc<SubscriberContextManager>>,
}

impl DiameterCorrelator {
    pub fn new() -> Self {
        DiameterCorrelator {
            inner: Mutex::new(Inner::default()),
            ctx_manager: None,
        }
    }

    pub fn with_context_manager(ctx_manager: Arc<SubscriberContextManager>) -> Self {
        DiameterCorrelator {
            inner: Mutex::new(Inner::default()),
            ctx_manager: Some(ctx_manager),
        }
    }

    /// All sessions in first-seen order.
    pub fn sessions(&self) -> Vec<DiameterSession> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect()
    }

    pub fn sessions_by_interface(&self, interface: DiameterInterface) -> Vec<DiameterSession> {
        self.sessions()
            .into_iter()
            .filter(|s| s.interface == interface)
            .collect()
    }

    pub fn gx_sessions(&self) -> Vec<DiameterSession> {
        self.sessions_by_interface(DiameterInterface::Gx)
    }

    pub fn rx_sessions(&self) -> Vec<DiameterSession> {
        self.sessions_by_interface(DiameterInterface::Rx)
    }

    pub fn s6a_sessions(&self) -> Vec<DiameterSession> {
        self.sessions_by_interface(DiameterInterface::S6a)
    }

    pub fn cx_sessions(&self) -> Vec<DiameterSession> {
        self.sessions_by_interface(DiameterInterface::Cx)
    }

    pub fn sh_sessions(&self) -> Vec<DiameterSession> {
        self.sessions_by_interface(DiameterInterface::Sh)
    }

    pub fn find_by_session_id(&self, session_id: &str) -> Option<DiameterSession> {
        self.inner.lock().unwrap().sessions.get(session_id).cloned()
    }

    pub fn find_by_imsi(&self, imsi: &str) -> Vec<DiameterSession> {
        let inner = self.inner.lock().unwrap();
        lookup_multi(&inner, inner.imsi_to_sessions.get(imsi))
    }

    pub fn find_by_msisdn(&self, msisdn: &str) -> Vec<DiameterSession> {
        let inner = self.inner.lock().unwrap();
        lookup_multi(&inner, inner.msisdn_to_sessions.get(msisdn))
    }

    pub fn find_by_framed_ip(&self, ip: &str) -> Vec<DiameterSession> {
        let inner = self.inner.lock().unwrap();
        lookup_multi(&inner, inner.framed_ip_to_sessions.get(ip))
    }

    pub fn find_by_framed_ipv6_prefix(&self, prefix: &str) -> Vec<DiameterSession> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.sessions.get(id))
            .filter(|s| {
                s.framed_ipv6_prefix
                    .as_deref()
                    .map_or(false, |p| p == prefix || p.starts_with(prefix))
            })
            .cloned()
            .collect()
    }

    /// Session currently bound to a Hop-by-Hop-ID.
    pub fn find_by_hop_by_hop(&self, hop_by_hop_id: u32) -> Option<DiameterSession> {
        let inner = self.inner.lock().unwrap();
        inner
            .hop_to_session
            .get(&hop_by_hop_id)
            .and_then(|id| inner.sessions.get(id))
            .cloned()
    }

    pub fn stats(&self) -> DiameterStats {
        self.inner.lock().unwrap().stats.clone()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
    }
}

impl Default for DiameterCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup_multi(inner: &Inner, ids: Option<&Vec<String>>) -> Vec<DiameterSession> {
    ids.map(|ids| {
        ids.iter()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect()
    })
    .unwrap_or_default()
}

fn index_session(inner: &mut Inner, session_id: &str) {
    let Some(session) = inner.sessions.get(session_id) else {
        return;
    };
    let imsi = session.imsi.clone();
    let msisdn = session.msisdn.clone();
    let framed_ip = session.framed_ip.clone();

    if let Some(imsi) = imsi {
        let entry = inner.imsi_to_sessions.entry(imsi).or_default();
        if !entry.iter().any(|id| id == session_id) {
            entry.push(session_id.to_string());
        }
    }
    if let Some(msisdn) = msisdn {
        let entry = inner.msisdn_to_sessions.entry(msisdn).or_default();
        if !entry.iter().any(|id| id == session_id) {
            entry.push(session_id.to_string());
        }
    }
    if let Some(ip) = framed_ip {
        let entry = inner.framed_ip_to_sessions.entry(ip).or_default();
        if !entry.iter().any(|id| id == session_id) {
            entry.push(session_id.to_string());
        }
    }
}

impl Correlator for DiameterCorrelator {
    type Message = DiameterMessage;

    fn add_message(&self, msg: DiameterMessage) {
        if msg.session_id.is_empty() {
            debug!(frame = msg.frame_number, "diameter message without Session-ID skipped");
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.stats.total_messages += 1;
        if msg.is_request {
            inner.stats.request_count += 1;
        } else {
            inner.stats.answer_count += 1;
            if msg.is_error_answer() {
                inner.stats.error_responses += 1;
            }
        }

        if !inner.sessions.contains_key(&msg.session_id) {
            inner.session_sequence += 1;
            let intra = format!("{}_D_{}", msg.timestamp, inner.session_sequence);
            let interface = DiameterInterface::from_application_id(msg.application_id);
            let session = DiameterSession::new(&msg.session_id, intra, interface);
            inner.order.push(msg.session_id.clone());
            inner.sessions.insert(msg.session_id.clone(), session);
        }

        // Request/answer linking: a request claims its Hop-by-Hop-ID, the
        // answer consumes the binding.
        let session_id = msg.session_id.clone();
        if msg.is_request {
            inner.hop_to_session.insert(msg.hop_by_hop_id, session_id.clone());
        } else if inner
            .hop_to_session
            .get(&msg.hop_by_hop_id)
            .map_or(false, |bound| *bound == session_id)
        {
            inner.stats.linked_pairs += 1;
            if let Some(session) = inner.sessions.get_mut(&session_id) {
                session.linked_pairs += 1;
            }
        }

        if let Some(session) = inner.sessions.get_mut(&session_id) {
            session.add_message(msg);
        }
        index_session(&mut inner, &session_id);
    }

    fn finalize(&self) {
        let sessions: Vec<DiameterSession> = {
            let mut inner = self.inner.lock().unwrap();
            inner.stats.total_sessions = inner.sessions.len();
            inner.stats.sessions_by_interface.clear();
            let order = inner.order.clone();
            let mut snapshots = Vec::with_capacity(order.len());
            for id in &order {
                let Some(session) = inner.sessions.get(id).cloned() else {
                    continue;
                };
                *inner
                    .stats
                    .sessions_by_interface
                    .entry(session.interface)
                    .or_insert(0) += 1;
                snapshots.push(session);
            }
            snapshots
        };

        let Some(manager) = &self.ctx_manager else {
            return;
        };
        for session in &sessions {
            match (&session.imsi, &session.msisdn) {
                (Some(imsi), Some(msisdn)) => manager.link_imsi_msisdn(imsi, msisdn),
                (Some(imsi), None) => {
                    manager.get_or_create_by_imsi(imsi);
                }
                (None, Some(msisdn)) => {
                    manager.get_or_create_by_msisdn(msisdn);
                }
                (None, None) => {}
            }
            if let (Some(imsi), Some(ip)) = (&session.imsi, &session.framed_ip) {
                manager.link_imsi_ue_ip(imsi, ip);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use crate::types::Timestamp;

    fn request(session_id: &str, app_id: u32, hop: u32, millis: i64) -> DiameterMessage {
        let mut msg = DiameterMessage::new(
            1,
            Timestamp::from_millis(millis),
            MessageKind::DiameterCcr,
            session_id,
            app_id,
        );
        msg.hop_by_hop_id = hop;
        msg.is_request = true;
        msg
    }

    fn answer(session_id: &str, app_id: u32, hop: u32, millis: i64) -> DiameterMessage {
        let mut msg = DiameterMessage::new(
            2,
            Timestamp::from_millis(millis),
            MessageKind::DiameterCca,
            session_id,
            app_id,
        );
        msg.hop_by_hop_id = hop;
        msg.is_request = false;
        msg.result_code = Some(2001);
        msg
    }

    #[test]
    fn test_groups_by_session_id() {
        let correlator = DiameterCorrelator::new();
        correlator.add_message(request("gx;1", 16777238, 10, 0));
        correlator.add_message(answer("gx;1", 16777238, 10, 50));
        correlator.add_message(request("rx;1", 16777236, 11, 100));
        correlator.finalize();

        assert_eq!(correlator.session_count(), 2);
        assert_eq!(correlator.gx_sessions().len(), 1);
        assert_eq!(correlator.rx_sessions().len(), 1);
    }

    #[test]
    fn test_hop_by_hop_linking() {
        let correlator = DiameterCorrelator::new();
        correlator.add_message(request("gx;1", 16777238, 42, 0));
        assert_eq!(
            correlator.find_by_hop_by_hop(42).unwrap().session_id,
            "gx;1"
        );

        correlator.add_message(answer("gx;1", 16777238, 42, 50));
        assert_eq!(correlator.stats().linked_pairs, 1);
    }

    #[test]
    fn test_hop_by_hop_reuse_overwrites() {
        let correlator = DiameterCorrelator::new();
        correlator.add_message(request("gx;1", 16777238, 42, 0));
        correlator.add_message(request("gx;2", 16777238, 42, 100));
        // Most recent binding wins.
        assert_eq!(
            correlator.find_by_hop_by_hop(42).unwrap().session_id,
            "gx;2"
        );
    }

    #[test]
    fn test_reverse_indices() {
        let correlator = DiameterCorrelator::new();
        let mut msg = request("gx;1", 16777238, 1, 0);
        msg.user_name = Some("310260123456789@epc.example".to_string());
        msg.msisdn = Some("14155551234".to_string());
        msg.framed_ip = Some("10.100.1.50".to_string());
        correlator.add_message(msg);
        correlator.finalize();

        assert_eq!(correlator.find_by_imsi("310260123456789").len(), 1);
        assert_eq!(correlator.find_by_msisdn("14155551234").len(), 1);
        assert_eq!(correlator.find_by_framed_ip("10.100.1.50").len(), 1);
        assert!(correlator.find_by_framed_ip("10.0.0.9").is_empty());
    }

    #[test]
    fn test_error_response_counted() {
        let correlator = DiameterCorrelator::new();
        let mut err = answer("gx;1", 16777238, 1, 0);
        err.result_code = Some(5003);
        correlator.add_message(err);
        assert_eq!(correlator.stats().error_responses, 1);
    }

    #[test]
    fn test_stats_by_interface() {
        let correlator = DiameterCorrelator::new();
        correlator.add_message(request("gx;1", 16777238, 1, 0));
        correlator.add_message(request("gx;2", 16777238, 2, 0));
        correlator.add_message(request("s6a;1", 16777251, 3, 0));
        correlator.finalize();

        let stats = correlator.stats();
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.sessions_by_interface[&DiameterInterface::Gx], 2);
        assert_eq!(stats.sessions_by_interface[&DiameterInterface::S6a], 1);
    }

    #[test]
    fn test_finalize_links_subscriber_identities() {
        let manager = Arc::new(SubscriberContextManager::new());
        let correlator = DiameterCorrelator::with_context_manager(manager.clone());
        let mut msg = request("gx;1", 16777238, 1, 0);
        msg.user_name = Some("310260123456789@epc.example".to_string());
        msg.msisdn = Some("+14155551234".to_string());
        msg.framed_ip = Some("10.100.1.50".to_string());
        correlator.add_message(msg);
        correlator.finalize();

        let ctx = manager.find_by_imsi("310260123456789").unwrap();
        assert!(ctx.lock().unwrap().has_msisdn());
        assert!(manager.find_by_ue_ip("10.100.1.50").is_some());
    }
}
