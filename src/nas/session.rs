//! NAS session state.

use crate::identity::guti::Guti4g;
use crate::nas::ies::Tai;
use crate::nas::message::NasMessage;
use crate::nas::types::{classify_pdn_from_apn, EmmMessageType, PdnClass};
use crate::types::Timestamp;
use serde::Serialize;

/// Session classification: mobility management or session management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NasSessionType {
    Emm,
    Esm,
    Unknown,
}

/// EMM registration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EmmState {
    Deregistered,
    RegisteredInitiated,
    Registered,
    DeregisteredInitiated,
    TauInitiated,
    ServiceRequestInitiated,
}

/// All NAS messages belonging to one UE signalling connection.
#[derive(Debug, Clone)]
pub struct NasSession {
    pub session_type: NasSessionType,
    pub emm_state: EmmState,
    pub messages: Vec<NasMessage>,

    pub imsi: Option<String>,
    pub imei: Option<String>,
    pub imeisv: Option<String>,
    pub guti: Option<Guti4g>,
    pub tmsi: Option<u32>,

    pub apn: Option<String>,
    pub pdn_address: Option<String>,
    pub eps_bearer_id: Option<u8>,
    pub linked_bearer_id: Option<u8>,
    pub qci: Option<u8>,
    pub pdn_class: PdnClass,
    pub tai: Option<Tai>,

    pub security_activated: bool,

    pub mme_ue_s1ap_id: Option<u32>,
    pub enb_ue_s1ap_id: Option<u32>,

    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub start_frame: u32,
    pub end_frame: u32,
}

impl Default for NasSession {
    fn default() -> Self {
        NasSession {
            session_type: NasSessionType::Unknown,
            emm_state: EmmState::Deregistered,
            messages: Vec::new(),
            imsi: None,
            imei: None,
            imeisv: None,
            guti: None,
            tmsi: None,
            apn: None,
            pdn_address: None,
            eps_bearer_id: None,
            linked_bearer_id: None,
            qci: None,
            pdn_class: PdnClass::Other,
            tai: None,
            security_activated: false,
            mme_ue_s1ap_id: None,
            enb_ue_s1ap_id: None,
            start_time: Timestamp::default(),
            end_time: Timestamp::default(),
            start_frame: 0,
            end_frame: 0,
        }
    }
}

impl NasSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_s1ap_context(&mut self, mme_ue_id: u32, enb_ue_id: u32) {
        self.mme_ue_s1ap_id = Some(mme_ue_id);
        self.enb_ue_s1ap_id = Some(enb_ue_id);
    }

    pub fn add_message(&mut self, msg: NasMessage) {
        self.update_time_window(&msg);
        self.extract_identifiers(&msg);
        self.extract_pdn_info(&msg);
        self.update_emm_state(&msg);
        self.messages.push(msg);
    }

    /// Derives the PDN class and session type. Run once after ingestion.
    pub fn finalize(&mut self) {
        self.pdn_class = self
            .apn
            .as_deref()
            .map(classify_pdn_from_apn)
            .unwrap_or(PdnClass::Other);

        for msg in &self.messages {
            if msg.is_emm() {
                self.session_type = NasSessionType::Emm;
                break;
            } else if msg.is_esm() {
                self.session_type = NasSessionType::Esm;
            }
        }
    }

    pub fn is_ims(&self) -> bool {
        self.pdn_class == PdnClass::Ims
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Stable session key: the S1AP id pair when known, else the strongest
    /// identifier seen.
    pub fn key(&self) -> String {
        if let (Some(mme), Some(enb)) = (self.mme_ue_s1ap_id, self.enb_ue_s1ap_id) {
            return format!("{}:{}", mme, enb);
        }
        if let Some(imsi) = &self.imsi {
            return format!("imsi:{}", imsi);
        }
        if let Some(tmsi) = self.tmsi {
            return format!("tmsi:{:08x}", tmsi);
        }
        "unknown".to_string()
    }

    pub fn frame_numbers(&self) -> Vec<u32> {
        self.messages.iter().map(|m| m.frame_number).collect()
    }

    fn update_time_window(&mut self, msg: &NasMessage) {
        if self.start_time.is_unset() || msg.timestamp < self.start_time {
            self.start_time = msg.timestamp;
            self.start_frame = msg.frame_number;
        }
        if msg.timestamp > self.end_time {
            self.end_time = msg.timestamp;
            self.end_frame = msg.frame_number;
        }
    }

    fn extract_identifiers(&mut self, msg: &NasMessage) {
        if self.imsi.is_none() {
            self.imsi = msg.imsi.clone();
        }
        if self.imei.is_none() {
            self.imei = msg.imei.clone();
        }
        if self.imeisv.is_none() {
            self.imeisv = msg.imeisv.clone();
        }
        if self.guti.is_none() {
            self.guti = msg.guti.clone();
        }
        if self.tmsi.is_none() {
            self.tmsi = msg.tmsi;
        }
        if self.tai.is_none() {
            self.tai = msg.tai.clone();
        }
    }

    fn extract_pdn_info(&mut self, msg: &NasMessage) {
        if self.apn.is_none() {
            self.apn = msg.apn.clone();
        }
        if self.pdn_address.is_none() {
            self.pdn_address = msg.pdn_address.clone();
        }
        if self.eps_bearer_id.is_none() {
            self.eps_bearer_id = msg.eps_bearer_id;
        }
        if self.linked_bearer_id.is_none() {
            self.linked_bearer_id = msg.linked_eps_bearer_id;
        }
        if self.qci.is_none() {
            self.qci = msg.qci;
        }
    }

    fn update_emm_state(&mut self, msg: &NasMessage) {
        let Some(emm_type) = msg.emm_type else {
            return;
        };

        match emm_type {
            EmmMessageType::AttachRequest => self.emm_state = EmmState::RegisteredInitiated,
            EmmMessageType::AttachAccept | EmmMessageType::TauAccept => {
                self.emm_state = EmmState::Registered;
            }
            EmmMessageType::DetachRequest => self.emm_state = EmmState::DeregisteredInitiated,
            EmmMessageType::DetachAccept => self.emm_state = EmmState::Deregistered,
            EmmMessageType::TauRequest => self.emm_state = EmmState::TauInitiated,
            EmmMessageType::ServiceRequest | EmmMessageType::ExtendedServiceRequest => {
                self.emm_state = EmmState::ServiceRequestInitiated;
            }
            EmmMessageType::SecurityModeComplete => self.security_activated = true,
            _ => {}
        }
    }
}
