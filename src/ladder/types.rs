//! Ladder diagram data model.

use crate::message::{MessageKind, Protocol};
use crate::types::Timestamp;
use serde::Serialize;
use std::collections::BTreeMap;

/// Direction of a ladder event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageDirection {
    Request,
    Response,
    Indication,
}

/// Network element role of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ParticipantType {
    Ue,
    Enodeb,
    Gnodeb,
    Mme,
    Amf,
    Sgw,
    Pgw,
    Upf,
    Smf,
    Hss,
    Udm,
    Pcrf,
    Pcf,
    Pcscf,
    Icscf,
    Scscf,
    As,
    Ocs,
    Dns,
    Dhcp,
    Unknown,
}

impl ParticipantType {
    pub fn name(&self) -> &'static str {
        match self {
            ParticipantType::Ue => "UE",
            ParticipantType::Enodeb => "eNodeB",
            ParticipantType::Gnodeb => "gNodeB",
            ParticipantType::Mme => "MME",
            ParticipantType::Amf => "AMF",
            ParticipantType::Sgw => "S-GW",
            ParticipantType::Pgw => "P-GW",
            ParticipantType::Upf => "UPF",
            ParticipantType::Smf => "SMF",
            ParticipantType::Hss => "HSS",
            ParticipantType::Udm => "UDM",
            ParticipantType::Pcrf => "PCRF",
            ParticipantType::Pcf => "PCF",
            ParticipantType::Pcscf => "P-CSCF",
            ParticipantType::Icscf => "I-CSCF",
            ParticipantType::Scscf => "S-CSCF",
            ParticipantType::As => "AS",
            ParticipantType::Ocs => "OCS",
            ParticipantType::Dns => "DNS",
            ParticipantType::Dhcp => "DHCP",
            ParticipantType::Unknown => "UNKNOWN",
        }
    }
}

/// One detected participant (network element or UE).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantInfo {
    /// Stable id, e.g. `MME-01` or `eNodeB-10.0.1.50`.
    pub id: String,
    pub participant_type: ParticipantType,
    pub ip_address: String,
    pub friendly_name: Option<String>,
    pub port: Option<u16>,
}

/// One message rendered into the ladder.
#[derive(Debug, Clone, Serialize)]
pub struct LadderEvent {
    pub event_id: String,
    pub timestamp: Timestamp,
    pub timestamp_us: i64,
    pub from_participant: String,
    pub to_participant: String,
    /// 3GPP interface tag, e.g. `S1-MME`, `S11`, `Gx`.
    pub interface: String,
    pub protocol: Protocol,
    pub protocol_name: String,
    pub message_kind: MessageKind,
    pub message: String,
    pub direction: MessageDirection,
    pub procedure_id: Option<String>,
    pub correlation_id: Option<String>,
    /// Request-to-response latency in microseconds, on the request event.
    pub latency_us: Option<i64>,
    pub frame_number: u32,
}

/// Events grouped under one detected procedure.
#[derive(Debug, Clone, Serialize)]
pub struct ProcedureGroup {
    pub procedure_id: String,
    pub event_ids: Vec<String>,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub duration_ms: i64,
}

/// Summary metrics over one diagram.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LadderMetrics {
    pub total_events: usize,
    pub total_duration_ms: i64,
    pub average_inter_event_ms: f64,
    /// Named request/response latencies in microseconds.
    pub latencies_us: BTreeMap<String, i64>,
}

/// A complete, immutable ladder diagram.
#[derive(Debug, Clone, Serialize)]
pub struct LadderDiagram {
    pub diagram_type: &'static str,
    pub title: String,
    pub participants: Vec<ParticipantInfo>,
    pub events: Vec<LadderEvent>,
    pub procedures: Vec<ProcedureGroup>,
    pub metrics: LadderMetrics,
}
