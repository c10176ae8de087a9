//! S1AP intra-protocol correlator.
//!
//! Contexts are keyed by the (MME-UE-S1AP-ID, eNB-UE-S1AP-ID) pair. An
//! INITIAL UE MESSAGE only carries the eNB side; its context is indexed by
//! the eNB id alone and re-keyed when the first message with the full pair
//! arrives. Embedded NAS-PDUs are decoded and forwarded into the NAS
//! correlator together with the enclosing ids.

use crate::correlator::Correlator;
use crate::identity::SubscriberContextManager;
use crate::message::MessageKind;
use crate::nas::correlator::{NasCorrelator, NasTransport};
use crate::nas::message::NasMessage;
use crate::s1ap::context::{S1apContext, S1apContextState};
use crate::s1ap::message::S1apMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// S1AP correlation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S1apStats {
    pub total_messages: usize,
    pub total_contexts: usize,
    pub active_contexts: usize,
    pub released_contexts: usize,
    pub initial_ue_messages: usize,
    pub context_setups: usize,
    pub context_releases: usize,
    pub handovers: usize,
    pub nas_messages: usize,
}

#[derive(Default)]
struct Inner {
    contexts: Vec<S1apContext>,
    /// "mme:enb" -> context index.
    pair_index: HashMap<String, usize>,
    mme_index: HashMap<u32, usize>,
    enb_index: HashMap<u32, usize>,
    stats: S1apStats,
}

/// Groups S1AP messages into per-UE contexts.
pub struct S1apCorrelator {
    inner: Mutex<Inner>,
    nas_correlator: Arc<NasCorrelator>,
    ctx_manager: Option<Arc<SubscriberContextManager>>,
}

impl S1apCorrelator {
    pub fn new() -> Self {
        S1apCorrelator {
            inner: Mutex::new(Inner::default()),
            nas_correlator: Arc::new(NasCorrelator::new()),
            ctx_manager: None,
        }
    }

    /// Correlator sharing an externally owned NAS correlator, reporting
    /// identities to `ctx_manager`.
    pub fn with_collaborators(
        ctx_manager: Arc<SubscriberContextManager>,
        nas_correlator: Arc<NasCorrelator>,
    ) -> Self {
        S1apCorrelator {
            inner: Mutex::new(Inner::default()),
            nas_correlator,
            ctx_manager: Some(ctx_manager),
        }
    }

    /// The NAS correlator fed by embedded NAS-PDUs.
    pub fn nas_correlator(&self) -> Arc<NasCorrelator> {
        self.nas_correlator.clone()
    }

    pub fn contexts(&self) -> Vec<S1apContext> {
        self.inner.lock().unwrap().contexts.clone()
    }

    pub fn active_contexts(&self) -> Vec<S1apContext> {
        self.contexts().into_iter().filter(|c| c.is_active()).collect()
    }

    pub fn released_contexts(&self) -> Vec<S1apContext> {
        self.contexts()
            .into_iter()
            .filter(|c| c.state == S1apContextState::Released)
            .collect()
    }

    pub fn find_context(&self, mme_ue_id: u32, enb_ue_id: u32) -> Option<S1apContext> {
        let inner = self.inner.lock().unwrap();
        inner
            .pair_index
            .get(&pair_key(mme_ue_id, enb_ue_id))
            .and_then(|&i| inner.contexts.get(i))
            .cloned()
    }

    pub fn find_by_mme_ue_id(&self, mme_ue_id: u32) -> Option<S1apContext> {
        let inner = self.inner.lock().unwrap();
        inner
            .mme_index
            .get(&mme_ue_id)
            .and_then(|&i| inner.contexts.get(i))
            .cloned()
    }

    pub fn find_by_enb_ue_id(&self, enb_ue_id: u32) -> Option<S1apContext> {
        let inner = self.inner.lock().unwrap();
        inner
            .enb_index
            .get(&enb_ue_id)
            .and_then(|&i| inner.contexts.get(i))
            .cloned()
    }

    pub fn stats(&self) -> S1apStats {
        self.inner.lock().unwrap().stats.clone()
    }

    pub fn context_count(&self) -> usize {
        self.inner.lock().unwrap().contexts.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
    }
}

impl Default for S1apCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

fn pair_key(mme_ue_id: u32, enb_ue_id: u32) -> String {
    format!("{}:{}", mme_ue_id, enb_ue_id)
}

fn find_or_create_context(inner: &mut Inner, msg: &S1apMessage) -> Option<usize> {
    // Initial UE Message: the MME id is not assigned yet.
    if msg.kind == MessageKind::S1apInitialUeMessage {
        let enb_ue_id = msg.enb_ue_s1ap_id?;
        let idx = inner.contexts.len();
        inner.contexts.push(S1apContext::new(0, enb_ue_id));
        inner.enb_index.insert(enb_ue_id, idx);
        return Some(idx);
    }

    let mme_ue_id = msg.mme_ue_s1ap_id?;
    let enb_ue_id = msg.enb_ue_s1ap_id?;

    let key = pair_key(mme_ue_id, enb_ue_id);
    if let Some(&idx) = inner.pair_index.get(&key) {
        return Some(idx);
    }

    // Re-key a context created from an Initial UE Message once the MME id
    // shows up.
    if let Some(&idx) = inner.enb_index.get(&enb_ue_id) {
        if inner.contexts[idx].mme_ue_s1ap_id == 0 {
            inner.contexts[idx].mme_ue_s1ap_id = mme_ue_id;
            inner.pair_index.insert(key, idx);
            inner.mme_index.insert(mme_ue_id, idx);
            return Some(idx);
        }
    }

    let idx = inner.contexts.len();
    inner.contexts.push(S1apContext::new(mme_ue_id, enb_ue_id));
    inner.pair_index.insert(key, idx);
    inner.mme_index.insert(mme_ue_id, idx);
    inner.enb_index.insert(enb_ue_id, idx);
    Some(idx)
}

impl Correlator for S1apCorrelator {
    type Message = S1apMessage;

    fn add_message(&self, msg: S1apMessage) {
        let nas_forward = {
            let mut inner = self.inner.lock().unwrap();
            inner.stats.total_messages += 1;

            let Some(idx) = find_or_create_context(&mut inner, &msg) else {
                debug!(frame = msg.frame_number, "s1ap message without UE ids skipped");
                return;
            };

            match msg.kind {
                MessageKind::S1apInitialUeMessage => inner.stats.initial_ue_messages += 1,
                MessageKind::S1apInitialContextSetupRequest => inner.stats.context_setups += 1,
                MessageKind::S1apUeContextReleaseComplete => inner.stats.context_releases += 1,
                MessageKind::S1apHandoverNotify | MessageKind::S1apPathSwitchRequest => {
                    inner.stats.handovers += 1;
                }
                _ => {}
            }

            let mut forward = None;
            if let Some(pdu) = &msg.nas_pdu {
                inner.stats.nas_messages += 1;
                if let Some(nas) = NasMessage::parse(pdu, msg.frame_number, msg.timestamp) {
                    inner.contexts[idx].absorb_nas_identifiers(&nas);
                    forward = Some(NasTransport {
                        message: nas,
                        mme_ue_s1ap_id: msg.mme_ue_s1ap_id,
                        enb_ue_s1ap_id: msg.enb_ue_s1ap_id,
                    });
                } else {
                    debug!(frame = msg.frame_number, "embedded NAS-PDU failed to parse");
                }
            }

            inner.contexts[idx].add_message(msg);
            forward
        };

        // Forwarded outside our own lock; the NAS correlator takes its own.
        if let Some(transport) = nas_forward {
            self.nas_correlator.add_message(transport);
        }
    }

    fn finalize(&self) {
        let contexts: Vec<S1apContext> = {
            let mut inner = self.inner.lock().unwrap();
            let mut active_contexts = 0;
            let mut released_contexts = 0;
            for ctx in &inner.contexts {
                if ctx.is_active() {
                    active_contexts += 1;
                } else if ctx.state == S1apContextState::Released {
                    released_contexts += 1;
                }
            }
            inner.stats.total_contexts = inner.contexts.len();
            inner.stats.active_contexts = active_contexts;
            inner.stats.released_contexts = released_contexts;
            inner.contexts.clone()
        };

        if let Some(manager) = &self.ctx_manager {
            for ctx in &contexts {
                if let Some(imsi) = &ctx.imsi {
                    manager.get_or_create_by_imsi(imsi);
                    if let Some(imei) = &ctx.imei {
                        manager.link_imsi_imei(imsi, imei);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn initial_ue(enb_ue_id: u32, nas_pdu: &[u8]) -> S1apMessage {
        S1apMessage::new(1, Timestamp::from_millis(0), MessageKind::S1apInitialUeMessage)
            .with_enb_ue_id(enb_ue_id)
            .with_nas_pdu(nas_pdu)
    }

    #[test]
    fn test_initial_ue_message_creates_enb_only_context() {
        let correlator = S1apCorrelator::new();
        correlator.add_message(initial_ue(200, &[0x07, 0x41]));
        assert_eq!(correlator.context_count(), 1);
        let ctx = correlator.find_by_enb_ue_id(200).unwrap();
        assert_eq!(ctx.mme_ue_s1ap_id, 0);
    }

    #[test]
    fn test_context_rekeyed_on_full_pair() {
        let correlator = S1apCorrelator::new();
        correlator.add_message(initial_ue(200, &[0x07, 0x41]));
        correlator.add_message(
            S1apMessage::new(
                2,
                Timestamp::from_millis(50),
                MessageKind::S1apDownlinkNasTransport,
            )
            .with_ue_ids(100, 200)
            .with_nas_pdu(&[0x07, 0x52]),
        );

        assert_eq!(correlator.context_count(), 1);
        let ctx = correlator.find_context(100, 200).unwrap();
        assert_eq!(ctx.mme_ue_s1ap_id, 100);
        assert_eq!(ctx.message_count(), 2);
    }

    #[test]
    fn test_nas_pdu_forwarded() {
        let correlator = S1apCorrelator::new();
        correlator.add_message(initial_ue(200, &[0x07, 0x41]));
        let nas = correlator.nas_correlator();
        assert_eq!(nas.stats().total_messages, 1);
        assert_eq!(nas.stats().attach_procedures, 1);
    }

    #[test]
    fn test_message_without_ids_skipped() {
        let correlator = S1apCorrelator::new();
        correlator.add_message(S1apMessage::new(
            1,
            Timestamp::from_millis(0),
            MessageKind::S1apDownlinkNasTransport,
        ));
        assert_eq!(correlator.context_count(), 0);
    }

    #[test]
    fn test_stats_after_finalize() {
        let correlator = S1apCorrelator::new();
        correlator.add_message(initial_ue(200, &[0x07, 0x41]));
        correlator.add_message(
            S1apMessage::new(
                2,
                Timestamp::from_millis(10),
                MessageKind::S1apInitialContextSetupRequest,
            )
            .with_ue_ids(100, 200),
        );
        correlator.add_message(
            S1apMessage::new(
                3,
                Timestamp::from_millis(20),
                MessageKind::S1apInitialContextSetupResponse,
            )
            .with_ue_ids(100, 200),
        );
        correlator.finalize();

        let stats = correlator.stats();
        assert_eq!(stats.total_contexts, 1);
        assert_eq!(stats.active_contexts, 1);
        assert_eq!(stats.initial_ue_messages, 1);
        assert_eq!(stats.context_setups, 1);
        assert_eq!(stats.nas_messages, 1);
    }
}
