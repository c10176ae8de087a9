//! GTPv2-C intra-protocol correlator.
//!
//! Groups control-plane messages into sessions keyed by the control TEID
//! pair and feeds the tunnel manager on each state-changing message.

use crate::correlator::Correlator;
use crate::gtpv2::session::Gtpv2Session;
use crate::identity::SubscriberContextManager;
use crate::message::{MessageKind, ParsedMessage};
use crate::tunnel::TunnelManager;
use crate::types::{Teid, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// GTPv2-C correlation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gtpv2Stats {
    pub total_messages: usize,
    pub total_sessions: usize,
    pub session_creations: usize,
    pub session_deletions: usize,
    pub bearer_operations: usize,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Gtpv2Session>,
    order: Vec<String>,
    session_sequence: u64,
    teid_index: HashMap<Teid, String>,
    stats: Gtpv2Stats,
}

/// Groups GTPv2-C messages into sessions and drives the tunnel manager.
pub struct Gtpv2Correlator {
    inner: Mutex<Inner>,
    tunnel_manager: Arc<TunnelManager>,
    ctx_manager: Option<Arc<SubscriberContextManager>>,
}

impl Gtpv2Correlator {
    pub fn new() -> Self {
        Gtpv2Correlator {
            inner: Mutex::new(Inner::default()),
            tunnel_manager: Arc::new(TunnelManager::new()),
            ctx_manager: None,
        }
    }

    pub fn with_collaborators(
        ctx_manager: Arc<SubscriberContextManager>,
        tunnel_manager: Arc<TunnelManager>,
    ) -> Self {
        Gtpv2Correlator {
            inner: Mutex::new(Inner::default()),
            tunnel_manager,
            ctx_manager: Some(ctx_manager),
        }
    }

    pub fn tunnel_manager(&self) -> Arc<TunnelManager> {
        self.tunnel_manager.clone()
    }

    pub fn sessions(&self) -> Vec<Gtpv2Session> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|key| inner.sessions.get(key).cloned())
            .collect()
    }

    pub fn find_by_key(&self, key: &str) -> Option<Gtpv2Session> {
        self.inner.lock().unwrap().sessions.get(key).cloned()
    }

    pub fn find_by_teid(&self, teid: Teid) -> Option<Gtpv2Session> {
        let inner = self.inner.lock().unwrap();
        inner
            .teid_index
            .get(&teid)
            .and_then(|key| inner.sessions.get(key))
            .cloned()
    }

    pub fn find_by_imsi(&self, imsi: &str) -> Vec<Gtpv2Session> {
        self.sessions()
            .into_iter()
            .filter(|s| s.imsi.as_deref() == Some(imsi))
            .collect()
    }

    pub fn find_by_msisdn(&self, msisdn: &str) -> Vec<Gtpv2Session> {
        self.sessions()
            .into_iter()
            .filter(|s| s.msisdn.as_deref() == Some(msisdn))
            .collect()
    }

    pub fn find_by_ue_ip(&self, ip: &str) -> Vec<Gtpv2Session> {
        self.sessions()
            .into_iter()
            .filter(|s| s.ue_ipv4.as_deref() == Some(ip) || s.ue_ipv6.as_deref() == Some(ip))
            .collect()
    }

    /// Sessions overlapping `[start, end]` widened by `tolerance_ms`.
    pub fn find_in_window(
        &self,
        start: Timestamp,
        end: Timestamp,
        tolerance_ms: i64,
    ) -> Vec<Gtpv2Session> {
        self.sessions()
            .into_iter()
            .filter(|s| s.overlaps_window(start, end, tolerance_ms))
            .collect()
    }

    pub fn stats(&self) -> Gtpv2Stats {
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

impl Default for Gtpv2Correlator {
    fn default() -> Self {
        Self::new()
    }
}

fn session_key(local: Teid, remote: Teid) -> String {
    format!("{}:{}", local, remote)
}

impl Correlator for Gtpv2Correlator {
    type Message = ParsedMessage;

    fn add_message(&self, msg: ParsedMessage) {
        let Some(teid) = msg.hints.teid_s1u else {
            debug!(frame = msg.frame_number, "gtpv2 message without TEID skipped");
            return;
        };

        {
            let mut inner = self.inner.lock().unwrap();
            inner.stats.total_messages += 1;
            match msg.kind {
                MessageKind::GtpCreateSessionRequest => inner.stats.session_creations += 1,
                MessageKind::GtpDeleteSessionRequest => inner.stats.session_deletions += 1,
                MessageKind::GtpCreateBearerRequest
                | MessageKind::GtpModifyBearerRequest
                | MessageKind::GtpDeleteBearerRequest => inner.stats.bearer_operations += 1,
                _ => {}
            }

            let remote = msg
                .field_u32("peer_teid")
                .map(Teid)
                .unwrap_or_default();
            let key = match inner.teid_index.get(&teid) {
                Some(existing) => existing.clone(),
                None => {
                    inner.session_sequence += 1;
                    let key = session_key(teid, remote);
                    let intra = format!("{}_G_{}", msg.timestamp, inner.session_sequence);
                    let session = Gtpv2Session::new(key.clone(), intra, teid);
                    inner.order.push(key.clone());
                    inner.sessions.insert(key.clone(), session);
                    inner.teid_index.insert(teid, key.clone());
                    key
                }
            };

            if let Some(session) = inner.sessions.get_mut(&key) {
                session.add_message(&msg);
            }
        }

        // Tunnel lifecycle runs outside our own lock.
        self.tunnel_manager.process_message(&msg);
    }

    fn finalize(&self) {
        let sessions: Vec<Gtpv2Session> = {
            let mut inner = self.inner.lock().unwrap();
            inner.stats.total_sessions = inner.sessions.len();
            inner.sessions.values().cloned().collect()
        };

        let Some(manager) = &self.ctx_manager else {
            return;
        };
        for session in &sessions {
            if let Some(imsi) = &session.imsi {
                if let Some(msisdn) = &session.msisdn {
                    manager.link_imsi_msisdn(imsi, msisdn);
                }
                if let Some(ip) = &session.ue_ipv4 {
                    manager.link_imsi_ue_ip(imsi, ip);
                }
                for bearer in &session.bearers {
                    if let Some((teid, ip)) = &bearer.enb_fteid {
                        manager.add_gtpu_tunnel(imsi, ip, *teid);
                    }
                }
            }
        }
    }
}
