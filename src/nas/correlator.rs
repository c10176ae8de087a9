//! NAS intra-protocol correlator.
//!
//! Sessions are keyed by the enclosing (MME-UE-S1AP-ID, eNB-UE-S1AP-ID)
//! pair when the transport provides one, falling back to IMSI, then TMSI.

use crate::correlator::Correlator;
use crate::identity::SubscriberContextManager;
use crate::nas::message::NasMessage;
use crate::nas::session::{NasSession, NasSessionType};
use crate::nas::types::EmmMessageType;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// NAS message plus the S1AP ids of the transport that carried it.
#[derive(Debug, Clone)]
pub struct NasTransport {
    pub message: NasMessage,
    pub mme_ue_s1ap_id: Option<u32>,
    pub enb_ue_s1ap_id: Option<u32>,
}

impl NasTransport {
    pub fn new(message: NasMessage) -> Self {
        NasTransport {
            message,
            mme_ue_s1ap_id: None,
            enb_ue_s1ap_id: None,
        }
    }

    pub fn with_ue_ids(message: NasMessage, mme_ue_id: u32, enb_ue_id: u32) -> Self {
        NasTransport {
            message,
            mme_ue_s1ap_id: Some(mme_ue_id),
            enb_ue_s1ap_id: Some(enb_ue_id),
        }
    }
}

/// NAS correlation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NasStats {
    pub total_messages: usize,
    pub total_sessions: usize,
    pub emm_sessions: usize,
    pub esm_sessions: usize,
    pub ims_esm_sessions: usize,
    pub attach_procedures: usize,
    pub tau_procedures: usize,
    pub detach_procedures: usize,
}

#[derive(Default)]
struct Inner {
    sessions: Vec<NasSession>,
    /// "mme:enb" -> session index.
    s1ap_index: HashMap<String, usize>,
    imsi_index: HashMap<String, Vec<usize>>,
    tmsi_index: HashMap<u32, usize>,
    stats: NasStats,
}

/// Groups NAS messages into per-UE sessions.
pub struct NasCorrelator {
    inner: Mutex<Inner>,
    ctx_manager: Option<Arc<SubscriberContextManager>>,
}

impl NasCorrelator {
    pub fn new() -> Self {
        NasCorrelator {
            inner: Mutex::new(Inner::default()),
            ctx_manager: None,
        }
    }

    pub fn with_context_manager(ctx_manager: Arc<SubscriberContextManager>) -> Self {
        NasCorrelator {
            inner: Mutex::new(Inner::default()),
            ctx_manager: Some(ctx_manager),
        }
    }

    pub fn sessions(&self) -> Vec<NasSession> {
        self.inner.lock().unwrap().sessions.clone()
    }

    pub fn emm_sessions(&self) -> Vec<NasSession> {
        self.sessions()
            .into_iter()
            .filter(|s| s.session_type == NasSessionType::Emm)
            .collect()
    }

    pub fn esm_sessions(&self) -> Vec<NasSession> {
        self.sessions()
            .into_iter()
            .filter(|s| s.session_type == NasSessionType::Esm)
            .collect()
    }

    /// ESM sessions on the IMS PDN, the ones VoLTE correlation consumes.
    pub fn ims_esm_sessions(&self) -> Vec<NasSession> {
        self.esm_sessions().into_iter().filter(|s| s.is_ims()).collect()
    }

    pub fn find_by_imsi(&self, imsi: &str) -> Vec<NasSession> {
        let inner = self.inner.lock().unwrap();
        inner
            .imsi_index
            .get(imsi)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&i| inner.sessions.get(i).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn find_by_tmsi(&self, tmsi: u32) -> Option<NasSession> {
        let inner = self.inner.lock().unwrap();
        inner
            .tmsi_index
            .get(&tmsi)
            .and_then(|&i| inner.sessions.get(i))
            .cloned()
    }

    pub fn find_by_s1ap_context(&self, mme_ue_id: u32, enb_ue_id: u32) -> Option<NasSession> {
        let inner = self.inner.lock().unwrap();
        inner
            .s1ap_index
            .get(&s1ap_key(mme_ue_id, enb_ue_id))
            .and_then(|&i| inner.sessions.get(i))
            .cloned()
    }

    pub fn stats(&self) -> NasStats {
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

impl Default for NasCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

fn s1ap_key(mme_ue_id: u32, enb_ue_id: u32) -> String {
    format!("{}:{}", mme_ue_id, enb_ue_id)
}

fn find_or_create_session(inner: &mut Inner, transport: &NasTransport) -> usize {
    // Preference order: S1AP id pair, IMSI, TMSI.
    if let (Some(mme), Some(enb)) = (transport.mme_ue_s1ap_id, transport.enb_ue_s1ap_id) {
        if let Some(&idx) = inner.s1ap_index.get(&s1ap_key(mme, enb)) {
            return idx;
        }
    }
    if let Some(imsi) = &transport.message.imsi {
        if let Some(indices) = inner.imsi_index.get(imsi) {
            if let Some(&idx) = indices.first() {
                return idx;
            }
        }
    }
    if let Some(tmsi) = transport.message.tmsi {
        if let Some(&idx) = inner.tmsi_index.get(&tmsi) {
            return idx;
        }
    }

    let mut session = NasSession::new();
    if let (Some(mme), Some(enb)) = (transport.mme_ue_s1ap_id, transport.enb_ue_s1ap_id) {
        session.set_s1ap_context(mme, enb);
    }
    let idx = inner.sessions.len();
    inner.sessions.push(session);

    if let (Some(mme), Some(enb)) = (transport.mme_ue_s1ap_id, transport.enb_ue_s1ap_id) {
        inner.s1ap_index.insert(s1ap_key(mme, enb), idx);
    }
    if let Some(imsi) = &transport.message.imsi {
        inner.imsi_index.entry(imsi.clone()).or_default().push(idx);
    }
    if let Some(tmsi) = transport.message.tmsi {
        inner.tmsi_index.insert(tmsi, idx);
    }

    idx
}

impl Correlator for NasCorrelator {
    type Message = NasTransport;

    fn add_message(&self, transport: NasTransport) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.total_messages += 1;

        match transport.message.emm_type {
            Some(EmmMessageType::AttachRequest) => inner.stats.attach_procedures += 1,
            Some(EmmMessageType::TauRequest) => inner.stats.tau_procedures += 1,
            Some(EmmMessageType::DetachRequest) => inner.stats.detach_procedures += 1,
            _ => {}
        }

        let idx = find_or_create_session(&mut inner, &transport);

        // Late identifier discovery still has to land in the indices.
        if let Some(imsi) = &transport.message.imsi {
            let entry = inner.imsi_index.entry(imsi.clone()).or_default();
            if !entry.contains(&idx) {
                entry.push(idx);
            }
        }
        if let Some(tmsi) = transport.message.tmsi {
            inner.tmsi_index.entry(tmsi).or_insert(idx);
        }

        if let Some(session) = inner.sessions.get_mut(idx) {
            session.add_message(transport.message);
        }
    }

    fn finalize(&self) {
        let sessions: Vec<NasSession> = {
            let mut inner = self.inner.lock().unwrap();
            for session in &mut inner.sessions {
                session.finalize();
            }

            let mut emm_sessions = 0;
            let mut esm_sessions = 0;
            let mut ims_esm_sessions = 0;
            for session in &inner.sessions {
                match session.session_type {
                    NasSessionType::Emm => emm_sessions += 1,
                    NasSessionType::Esm => {
                        esm_sessions += 1;
                        if session.is_ims() {
                            ims_esm_sessions += 1;
                        }
                    }
                    NasSessionType::Unknown => {}
                }
            }
            inner.stats.total_sessions = inner.sessions.len();
            inner.stats.emm_sessions = emm_sessions;
            inner.stats.esm_sessions = esm_sessions;
            inner.stats.ims_esm_sessions = ims_esm_sessions;
            inner.sessions.clone()
        };

        let Some(manager) = &self.ctx_manager else {
            return;
        };
        for session in &sessions {
            if let Some(imsi) = &session.imsi {
                manager.get_or_create_by_imsi(imsi);
                if let Some(imei) = &session.imei {
                    manager.link_imsi_imei(imsi, imei);
                }
                if let Some(guti) = &session.guti {
                    manager.link_imsi_guti(imsi, guti);
                }
                if let Some(tmsi) = session.tmsi {
                    manager.link_imsi_tmsi(imsi, tmsi);
                }
                if let Some(pdn) = &session.pdn_address {
                    manager.link_imsi_ue_ip(imsi, pdn);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn attach_request(imsi: &str) -> NasMessage {
        NasMessage {
            frame_number: 1,
            timestamp: Timestamp::from_millis(0),
            discriminator: Some(crate::nas::types::NasProtocolDiscriminator::Emm),
            emm_type: Some(EmmMessageType::AttachRequest),
            imsi: Some(imsi.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_sessions_keyed_by_s1ap_pair() {
        let correlator = NasCorrelator::new();
        correlator.add_message(NasTransport::with_ue_ids(
            attach_request("310260123456789"),
            100,
            200,
        ));
        correlator.add_message(NasTransport::with_ue_ids(
            NasMessage {
                emm_type: Some(EmmMessageType::AttachAccept),
                discriminator: Some(crate::nas::types::NasProtocolDiscriminator::Emm),
                timestamp: Timestamp::from_millis(100),
                frame_number: 2,
                ..Default::default()
            },
            100,
            200,
        ));
        correlator.finalize();

        assert_eq!(correlator.session_count(), 1);
        let session = correlator.find_by_s1ap_context(100, 200).unwrap();
        assert_eq!(session.message_count(), 2);
    }

    #[test]
    fn test_fallback_to_imsi_key() {
        let correlator = NasCorrelator::new();
        correlator.add_message(NasTransport::new(attach_request("310260123456789")));
        correlator.add_message(NasTransport::new(attach_request("310260123456789")));
        correlator.finalize();
        assert_eq!(correlator.session_count(), 1);
        assert_eq!(correlator.find_by_imsi("310260123456789").len(), 1);
    }

    #[test]
    fn test_distinct_ue_pairs_distinct_sessions() {
        let correlator = NasCorrelator::new();
        correlator.add_message(NasTransport::with_ue_ids(
            attach_request("310260123456789"),
            1,
            1,
        ));
        correlator.add_message(NasTransport::with_ue_ids(
            attach_request("310260999999999"),
            2,
            2,
        ));
        correlator.finalize();
        assert_eq!(correlator.session_count(), 2);
    }

    #[test]
    fn test_procedure_counters() {
        let correlator = NasCorrelator::new();
        correlator.add_message(NasTransport::new(attach_request("310260123456789")));
        let mut tau = attach_request("310260123456789");
        tau.emm_type = Some(EmmMessageType::TauRequest);
        correlator.add_message(NasTransport::new(tau));

        let stats = correlator.stats();
        assert_eq!(stats.attach_procedures, 1);
        assert_eq!(stats.tau_procedures, 1);
    }

    #[test]
    fn test_finalize_pushes_identities() {
        let manager = Arc::new(SubscriberContextManager::new());
        let correlator = NasCorrelator::with_context_manager(manager.clone());
        let mut msg = attach_request("310260123456789");
        msg.imei = Some("49015420323751".to_string());
        correlator.add_message(NasTransport::new(msg));
        correlator.finalize();

        let ctx = manager.find_by_imsi("310260123456789").unwrap();
        assert!(ctx.lock().unwrap().has_imei());
    }
}
