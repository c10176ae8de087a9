//! SIP intra-protocol correlator.
//!
//! Groups SIP messages into sessions by Call-ID, classifies the sessions on
//! finalisation and reports caller/callee identities to the subscriber
//! context manager.

use crate::correlator::Correlator;
use crate::identity::msisdn;
use crate::identity::subscriber::NetworkEndpoint;
use crate::identity::SubscriberContextManager;
use crate::sip::session::{SipMessage, SipSession, SipSessionType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// SIP correlation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SipStats {
    pub total_messages: usize,
    pub total_sessions: usize,
    pub registration_sessions: usize,
    pub voice_call_sessions: usize,
    pub video_call_sessions: usize,
    pub sms_sessions: usize,
    pub other_sessions: usize,
}

#[derive(Default)]
struct Inner {
    /// Call-ID -> session.
    sessions: HashMap<String, SipSession>,
    /// Call-IDs in first-seen order, for deterministic iteration.
    order: Vec<String>,
    session_sequence: u64,
    stats: SipStats,
}

/// Groups SIP messages into sessions keyed by Call-ID.
pub struct SipCorrelator {
    inner: Mutex<Inner>,
    ctx_manager: Option<Arc<SubscriberContextManager>>,
}

impl SipCorrelator {
    pub fn new() -> Self {
        SipCorrelator {
            inner: Mutex::new(Inner::default()),
            ctx_manager: None,
        }
    }

    /// Correlator that reports discovered identities to `ctx_manager`.
    pub fn with_context_manager(ctx_manager: Arc<SubscriberContextManager>) -> Self {
        SipCorrelator {
            inner: Mutex::new(Inner::default()),
            ctx_manager: Some(ctx_manager),
        }
    }

    /// All sessions, sorted by start time.
    pub fn sessions(&self) -> Vec<SipSession> {
        let inner = self.inner.lock().unwrap();
        let mut result: Vec<SipSession> = inner
            .order
            .iter()
            .filter_map(|call_id| inner.sessions.get(call_id).cloned())
            .collect();
        result.sort_by_key(|s| s.start_time);
        result
    }

    /// Sessions of one classified type, sorted by start time.
    pub fn sessions_by_type(&self, session_type: SipSessionType) -> Vec<SipSession> {
        self.sessions()
            .into_iter()
            .filter(|s| s.session_type == session_type)
            .collect()
    }

    /// Voice, video, emergency and forwarded calls.
    pub fn call_sessions(&self) -> Vec<SipSession> {
        self.sessions().into_iter().filter(|s| s.is_call()).collect()
    }

    pub fn find_by_call_id(&self, call_id: &str) -> Option<SipSession> {
        self.inner.lock().unwrap().sessions.get(call_id).cloned()
    }

    /// Sessions where either party fuzzily matches the given MSISDN.
    pub fn find_by_msisdn(&self, raw_msisdn: &str) -> Vec<SipSession> {
        let needle = msisdn::normalize(raw_msisdn);
        if needle.is_empty() {
            return Vec::new();
        }
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|call_id| inner.sessions.get(call_id))
            .filter(|s| needle.matches(&s.caller_msisdn) || needle.matches(&s.callee_msisdn))
            .cloned()
            .collect()
    }

    /// Session whose frame range covers the given frame.
    pub fn find_by_frame(&self, frame_number: u32) -> Option<SipSession> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|call_id| inner.sessions.get(call_id))
            .find(|s| (s.start_frame..=s.end_frame).contains(&frame_number))
            .cloned()
    }

    pub fn stats(&self) -> SipStats {
        self.inner.lock().unwrap().stats.clone()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
    }

    fn update_subscriber_context(&self, session: &SipSession) {
        let Some(manager) = &self.ctx_manager else {
            return;
        };

        if !session.caller_msisdn.is_empty() {
            if let Some(ctx) = manager.get_or_create_by_msisdn(&session.caller_uri) {
                let mut guard = ctx.lock().unwrap();
                guard.touch(session.start_time);
                if !session.caller_ip.is_empty() {
                    guard.add_endpoint(NetworkEndpoint::ipv4(&session.caller_ip));
                }
            }
        }
        if !session.callee_msisdn.is_empty() {
            if let Some(ctx) = manager.get_or_create_by_msisdn(&session.callee_uri) {
                let mut guard = ctx.lock().unwrap();
                guard.touch(session.start_time);
                if !session.callee_ip.is_empty() {
                    guard.add_endpoint(NetworkEndpoint::ipv4(&session.callee_ip));
                }
            }
        }
    }
}

impl Default for SipCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator for SipCorrelator {
    type Message = SipMessage;

    fn add_message(&self, msg: SipMessage) {
        if msg.call_id.is_empty() {
            debug!(frame = msg.frame_number, "sip message without Call-ID skipped");
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.stats.total_messages += 1;

        if !inner.sessions.contains_key(&msg.call_id) {
            inner.session_sequence += 1;
            let intra = format!("{}_S_{}", msg.timestamp, inner.session_sequence);
            let session = SipSession::new(&msg.call_id, intra);
            inner.order.push(msg.call_id.clone());
            inner.sessions.insert(msg.call_id.clone(), session);
        }

        let call_id = msg.call_id.clone();
        if let Some(session) = inner.sessions.get_mut(&call_id) {
            session.add_message(msg);
        }
    }

    fn finalize(&self) {
        let finalized: Vec<SipSession> = {
            let mut inner = self.inner.lock().unwrap();
            let order = inner.order.clone();
            let mut snapshots = Vec::with_capacity(order.len());
            inner.stats.total_sessions = 0;
            inner.stats.registration_sessions = 0;
            inner.stats.voice_call_sessions = 0;
            inner.stats.video_call_sessions = 0;
            inner.stats.sms_sessions = 0;
            inner.stats.other_sessions = 0;

            for call_id in &order {
                if let Some(session) = inner.sessions.get_mut(call_id) {
                    session.finalize();
                    let snapshot = session.clone();
                    inner.stats.total_sessions += 1;
                    match snapshot.session_type {
                        SipSessionType::Registration | SipSessionType::Deregistration => {
                            inner.stats.registration_sessions += 1;
                        }
                        SipSessionType::VoiceCall | SipSessionType::CallForwarding => {
                            inner.stats.voice_call_sessions += 1;
                        }
                        SipSessionType::VideoCall => inner.stats.video_call_sessions += 1,
                        SipSessionType::SmsMessage => inner.stats.sms_sessions += 1,
                        _ => inner.stats.other_sessions += 1,
                    }
                    snapshots.push(snapshot);
                }
            }
            snapshots
        };

        for session in &finalized {
            self.update_subscriber_context(session);
        }
    }
}
