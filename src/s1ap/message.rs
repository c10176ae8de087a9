//! Parsed S1AP message view.
//!
//! ASN.1 PER decoding is an external concern; the decoder hands over the
//! procedure kind, the UE S1AP id pair, E-RAB lists, location IEs and any
//! embedded NAS-PDU as raw bytes.

use crate::message::MessageKind;
use crate::nas::ies::Tai;
use crate::types::{Teid, Timestamp};
use serde::Serialize;

/// S1AP cause category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum S1apCauseType {
    RadioNetwork,
    Transport,
    Nas,
    Protocol,
    Misc,
}

/// E-UTRAN Cell Global Identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ecgi {
    pub mcc: String,
    pub mnc: String,
    pub cell_id: u32,
}

/// One E-RAB item from a setup or modification list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErabItem {
    pub erab_id: u8,
    pub qci: Option<u8>,
    pub transport_address: Option<String>,
    pub gtp_teid: Option<Teid>,
}

/// One parsed S1AP message as delivered by the decoder.
#[derive(Debug, Clone)]
pub struct S1apMessage {
    pub frame_number: u32,
    pub timestamp: Timestamp,
    pub kind: MessageKind,
    pub mme_ue_s1ap_id: Option<u32>,
    pub enb_ue_s1ap_id: Option<u32>,
    pub erab_setup: Vec<ErabItem>,
    /// E-RAB ids released by this message.
    pub erab_release: Vec<u8>,
    pub nas_pdu: Option<Vec<u8>>,
    pub cause: Option<(S1apCauseType, u8)>,
    pub tai: Option<Tai>,
    pub ecgi: Option<Ecgi>,
    /// S-TMSI: MME code + M-TMSI.
    pub s_tmsi: Option<(u8, u32)>,
    pub rrc_establishment_cause: Option<u8>,
}

impl S1apMessage {
    pub fn new(frame_number: u32, timestamp: Timestamp, kind: MessageKind) -> Self {
        S1apMessage {
            frame_number,
            timestamp,
            kind,
            mme_ue_s1ap_id: None,
            enb_ue_s1ap_id: None,
            erab_setup: Vec::new(),
            erab_release: Vec::new(),
            nas_pdu: None,
            cause: None,
            tai: None,
            ecgi: None,
            s_tmsi: None,
            rrc_establishment_cause: None,
        }
    }

    pub fn with_ue_ids(mut self, mme_ue_id: u32, enb_ue_id: u32) -> Self {
        self.mme_ue_s1ap_id = Some(mme_ue_id);
        self.enb_ue_s1ap_id = Some(enb_ue_id);
        self
    }

    pub fn with_enb_ue_id(mut self, enb_ue_id: u32) -> Self {
        self.enb_ue_s1ap_id = Some(enb_ue_id);
        self
    }

    pub fn with_nas_pdu(mut self, pdu: &[u8]) -> Self {
        self.nas_pdu = Some(pdu.to_vec());
        self
    }

    pub fn has_nas_pdu(&self) -> bool {
        self.nas_pdu.is_some()
    }
}
