//! Diameter session state.

use crate::identity::imsi;
use crate::message::MessageKind;
use crate::types::Timestamp;
use serde::Serialize;

/// 3GPP Diameter interface, derived from the Application-ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiameterInterface {
    /// S-CSCF ↔ HSS
    Cx,
    /// AS ↔ HSS
    Sh,
    /// P-CSCF ↔ PCRF
    Rx,
    /// P-GW ↔ PCRF
    Gx,
    /// MME/SGSN ↔ HSS (SMS)
    S6d,
    /// MME ↔ HSS
    S6a,
    /// MME ↔ EIR
    S13,
    /// PCRF ↔ OCS
    Sy,
    /// Online charging
    Gy,
    Unknown,
}

impl DiameterInterface {
    /// Canonical 3GPP Application-ID table.
    pub fn from_application_id(app_id: u32) -> Self {
        match app_id {
            16777216 => DiameterInterface::Cx,
            16777217 => DiameterInterface::Sh,
            16777236 => DiameterInterface::Rx,
            16777238 => DiameterInterface::Gx,
            16777250 => DiameterInterface::S6d,
            16777251 => DiameterInterface::S6a,
            16777252 => DiameterInterface::S13,
            16777272 => DiameterInterface::Sy,
            4 => DiameterInterface::Gy,
            _ => DiameterInterface::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiameterInterface::Cx => "Cx",
            DiameterInterface::Sh => "Sh",
            DiameterInterface::Rx => "Rx",
            DiameterInterface::Gx => "Gx",
            DiameterInterface::S6d => "S6d",
            DiameterInterface::S6a => "S6a",
            DiameterInterface::S13 => "S13",
            DiameterInterface::Sy => "Sy",
            DiameterInterface::Gy => "Gy",
            DiameterInterface::Unknown => "DIAMETER",
        }
    }
}

/// One parsed Diameter message as delivered by the decoder.
#[derive(Debug, Clone)]
pub struct DiameterMessage {
    pub frame_number: u32,
    pub timestamp: Timestamp,
    pub kind: MessageKind,
    pub session_id: String,
    pub application_id: u32,
    pub hop_by_hop_id: u32,
    pub end_to_end_id: u32,
    pub is_request: bool,
    pub origin_host: Option<String>,
    pub destination_host: Option<String>,
    /// User-Name AVP, typically `IMSI@realm`.
    pub user_name: Option<String>,
    /// 3GPP-MSISDN AVP.
    pub msisdn: Option<String>,
    pub framed_ip: Option<String>,
    pub framed_ipv6_prefix: Option<String>,
    pub result_code: Option<u32>,
    pub src_ip: String,
    pub dst_ip: String,
}

impl DiameterMessage {
    pub fn new(
        frame_number: u32,
        timestamp: Timestamp,
        kind: MessageKind,
        session_id: &str,
        application_id: u32,
    ) -> Self {
        DiameterMessage {
            frame_number,
            timestamp,
            kind,
            session_id: session_id.to_string(),
            application_id,
            hop_by_hop_id: 0,
            end_to_end_id: 0,
            is_request: kind.is_request(),
            origin_host: None,
            destination_host: None,
            user_name: None,
            msisdn: None,
            framed_ip: None,
            framed_ipv6_prefix: None,
            result_code: None,
            src_ip: String::new(),
            dst_ip: String::new(),
        }
    }

    /// True for answers carrying a permanent-failure Result-Code.
    pub fn is_error_answer(&self) -> bool {
        !self.is_request && self.result_code.map_or(false, |code| code >= 3000)
    }
}

/// All messages sharing one Session-ID.
#[derive(Debug, Clone)]
pub struct DiameterSession {
    pub session_id: String,
    /// Intra-correlator id, `<timestamp>_D_<seq>`.
    pub intra_correlator: String,
    pub interface: DiameterInterface,
    pub messages: Vec<DiameterMessage>,

    pub imsi: Option<String>,
    pub msisdn: Option<String>,
    pub framed_ip: Option<String>,
    pub framed_ipv6_prefix: Option<String>,
    pub origin_hosts: Vec<String>,

    pub request_count: usize,
    pub answer_count: usize,
    pub error_answers: usize,
    /// Request/answer pairs linked via Hop-by-Hop-ID.
    pub linked_pairs: usize,

    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub start_frame: u32,
    pub end_frame: u32,
}

impl DiameterSession {
    pub fn new(session_id: &str, intra_correlator: String, interface: DiameterInterface) -> Self {
        DiameterSession {
            session_id: session_id.to_string(),
            intra_correlator,
            interface,
            messages: Vec::new(),
            imsi: None,
            msisdn: None,
            framed_ip: None,
            framed_ipv6_prefix: None,
            origin_hosts: Vec::new(),
            request_count: 0,
            answer_count: 0,
            error_answers: 0,
            linked_pairs: 0,
            start_time: Timestamp::default(),
            end_time: Timestamp::default(),
            start_frame: 0,
            end_frame: 0,
        }
    }

    pub fn add_message(&mut self, msg: DiameterMessage) {
        if self.start_time.is_unset() || msg.timestamp < self.start_time {
            self.start_time = msg.timestamp;
            self.start_frame = msg.frame_number;
        }
        if msg.timestamp > self.end_time {
            self.end_time = msg.timestamp;
            self.end_frame = msg.frame_number;
        }

        if msg.is_request {
            self.request_count += 1;
        } else {
            self.answer_count += 1;
            if msg.is_error_answer() {
                self.error_answers += 1;
            }
        }

        if self.imsi.is_none() {
            self.imsi = msg
                .user_name
                .as_deref()
                .and_then(imsi::from_diameter_username)
                .map(|i| i.digits);
        }
        if self.msisdn.is_none() {
            self.msisdn = msg.msisdn.clone();
        }
        if self.framed_ip.is_none() {
            self.framed_ip = msg.framed_ip.clone();
        }
        if self.framed_ipv6_prefix.is_none() {
            self.framed_ipv6_prefix = msg.framed_ipv6_prefix.clone();
        }
        if let Some(host) = &msg.origin_host {
            if !self.origin_hosts.contains(host) {
                self.origin_hosts.push(host.clone());
            }
        }

        self.messages.push(msg);
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn frame_numbers(&self) -> Vec<u32> {
        self.messages.iter().map(|m| m.frame_number).collect()
    }

    /// True when this session's window overlaps `[start, end]` widened by
    /// `tolerance_ms` on both sides.
    pub fn overlaps_window(&self, start: Timestamp, end: Timestamp, tolerance_ms: i64) -> bool {
        let widened_start = start.offset_millis(-tolerance_ms);
        let widened_end = end.offset_millis(tolerance_ms);
        self.start_time <= widened_end && self.end_time >= widened_start
    }
}
