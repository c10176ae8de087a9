//! S1AP UE context.

use crate::message::MessageKind;
use crate::nas::ies::Tai;
use crate::nas::message::NasMessage;
use crate::s1ap::message::{Ecgi, S1apCauseType, S1apMessage};
use crate::types::{Teid, Timestamp};
use serde::Serialize;

/// Lifecycle state of an S1 signalling connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum S1apContextState {
    Initial,
    ContextSetup,
    Active,
    ReleasePending,
    Released,
}

/// Per-bearer radio state tracked from E-RAB lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErabState {
    pub erab_id: u8,
    pub active: bool,
    pub qci: Option<u8>,
    pub transport_address: Option<String>,
    pub gtp_teid: Option<Teid>,
    pub setup_time: Timestamp,
    pub release_time: Option<Timestamp>,
}

/// S1AP signalling connection for one UE, identified by the
/// (MME-UE-S1AP-ID, eNB-UE-S1AP-ID) pair.
#[derive(Debug, Clone)]
pub struct S1apContext {
    /// Zero until the MME assigns its id (Initial UE Message carries only
    /// the eNB side).
    pub mme_ue_s1ap_id: u32,
    pub enb_ue_s1ap_id: u32,
    pub state: S1apContextState,
    pub messages: Vec<S1apMessage>,
    pub erabs: Vec<ErabState>,
    pub current_tai: Option<Tai>,
    pub current_ecgi: Option<Ecgi>,
    pub release_cause: Option<(S1apCauseType, u8)>,

    // Subscriber identifiers lifted from embedded NAS messages.
    pub imsi: Option<String>,
    pub imei: Option<String>,
    pub tmsi: Option<u32>,

    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub start_frame: u32,
    pub end_frame: u32,
}

impl S1apContext {
    pub fn new(mme_ue_s1ap_id: u32, enb_ue_s1ap_id: u32) -> Self {
        S1apContext {
            mme_ue_s1ap_id,
            enb_ue_s1ap_id,
            state: S1apContextState::Initial,
            messages: Vec::new(),
            erabs: Vec::new(),
            current_tai: None,
            current_ecgi: None,
            release_cause: None,
            imsi: None,
            imei: None,
            tmsi: None,
            start_time: Timestamp::default(),
            end_time: Timestamp::default(),
            start_frame: 0,
            end_frame: 0,
        }
    }

    pub fn add_message(&mut self, msg: S1apMessage) {
        self.update_time_window(&msg);
        self.update_state(&msg);
        self.update_erabs(&msg);
        self.update_location(&msg);
        if let Some((_mme_code, m_tmsi)) = msg.s_tmsi {
            if self.tmsi.is_none() {
                self.tmsi = Some(m_tmsi);
            }
        }
        self.messages.push(msg);
    }

    /// Records identifiers decoded from an embedded NAS-PDU.
    pub fn absorb_nas_identifiers(&mut self, nas: &NasMessage) {
        if self.imsi.is_none() {
            self.imsi = nas.imsi.clone();
        }
        if self.imei.is_none() {
            self.imei = nas.imei.clone();
        }
        if self.tmsi.is_none() {
            self.tmsi = nas.tmsi;
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            S1apContextState::Active | S1apContextState::ContextSetup
        )
    }

    fn update_time_window(&mut self, msg: &S1apMessage) {
        if self.start_time.is_unset() || msg.timestamp < self.start_time {
            self.start_time = msg.timestamp;
            self.start_frame = msg.frame_number;
        }
        if msg.timestamp > self.end_time {
            self.end_time = msg.timestamp;
            self.end_frame = msg.frame_number;
        }
    }

    fn update_state(&mut self, msg: &S1apMessage) {
        match msg.kind {
            MessageKind::S1apInitialUeMessage => {
                self.state = S1apContextState::Initial;
            }
            MessageKind::S1apInitialContextSetupRequest => {
                self.state = S1apContextState::ContextSetup;
            }
            MessageKind::S1apInitialContextSetupResponse => {
                self.state = S1apContextState::Active;
            }
            MessageKind::S1apUeContextReleaseRequest | MessageKind::S1apUeContextReleaseCommand => {
                self.state = S1apContextState::ReleasePending;
                if self.release_cause.is_none() {
                    self.release_cause = msg.cause;
                }
            }
            MessageKind::S1apUeContextReleaseComplete => {
                self.state = S1apContextState::Released;
            }
            _ => {}
        }
    }

    fn update_erabs(&mut self, msg: &S1apMessage) {
        for item in &msg.erab_setup {
            match self.erabs.iter_mut().find(|e| e.erab_id == item.erab_id) {
                Some(existing) => {
                    existing.active = true;
                    if existing.qci.is_none() {
                        existing.qci = item.qci;
                    }
                    if existing.transport_address.is_none() {
                        existing.transport_address = item.transport_address.clone();
                    }
                    if existing.gtp_teid.is_none() {
                        existing.gtp_teid = item.gtp_teid;
                    }
                }
                None => self.erabs.push(ErabState {
                    erab_id: item.erab_id,
                    active: true,
                    qci: item.qci,
                    transport_address: item.transport_address.clone(),
                    gtp_teid: item.gtp_teid,
                    setup_time: msg.timestamp,
                    release_time: None,
                }),
            }
        }
        for &erab_id in &msg.erab_release {
            if let Some(erab) = self.erabs.iter_mut().find(|e| e.erab_id == erab_id) {
                erab.active = false;
                erab.release_time = Some(msg.timestamp);
            }
        }
        // A full context release tears down every remaining bearer.
        if msg.kind == MessageKind::S1apUeContextReleaseComplete {
            for erab in &mut self.erabs {
                if erab.active {
                    erab.active = false;
                    erab.release_time = Some(msg.timestamp);
                }
            }
        }
    }

    fn update_location(&mut self, msg: &S1apMessage) {
        if msg.tai.is_some() {
            self.current_tai = msg.tai.clone();
        }
        if msg.ecgi.is_some() {
            self.current_ecgi = msg.ecgi.clone();
        }
    }
}
