//! Ladder diagram assembly.
//!
//! Takes a set of messages (typically one correlated flow), detects the
//! participants at each end, identifies the 3GPP interface per message,
//! pairs requests with their responses for latency, groups events by the
//! procedure ids the detector stamped, and emits an immutable
//! [`LadderDiagram`].

use crate::ladder::participant::ParticipantDetector;
use crate::ladder::types::{
    LadderDiagram, LadderEvent, LadderMetrics, MessageDirection, ParticipantInfo, ParticipantType,
    ProcedureGroup,
};
use crate::message::{MessageKind, ParsedMessage, Protocol};
use std::collections::BTreeMap;

/// Builds ladder diagrams from parsed messages.
#[derive(Default)]
pub struct LadderDiagramGenerator {
    detector: ParticipantDetector,
    event_counter: u64,
}

impl LadderDiagramGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user-provided ip → (name, type) mapping that overrides
    /// participant detection.
    pub fn add_participant_mapping(&mut self, ip: &str, name: &str, kind: ParticipantType) {
        self.detector.add_explicit_mapping(ip, name, kind);
    }

    /// Assembles a diagram from the given messages.
    ///
    /// Events are strictly ordered by timestamp (µs resolution), stable by
    /// input order on ties.
    pub fn generate(&mut self, title: &str, messages: &[ParsedMessage]) -> LadderDiagram {
        let mut ordered: Vec<&ParsedMessage> = messages.iter().collect();
        ordered.sort_by_key(|m| m.timestamp);

        let mut events: Vec<LadderEvent> = Vec::with_capacity(ordered.len());
        for msg in &ordered {
            let from = self.detector.detect(msg, true);
            let to = self.detector.detect(msg, false);
            events.push(self.create_event(msg, &from, &to));
        }

        pair_request_responses(&mut events);
        let procedures = group_by_procedure(&events);
        let metrics = compute_metrics(&events);
        let participants = self.detector.all_participants();

        LadderDiagram {
            diagram_type: "ladder",
            title: title.to_string(),
            participants,
            events,
            procedures,
            metrics,
        }
    }

    fn create_event(
        &mut self,
        msg: &ParsedMessage,
        from: &ParticipantInfo,
        to: &ParticipantInfo,
    ) -> LadderEvent {
        self.event_counter += 1;

        let direction = if msg.kind.is_request() {
            MessageDirection::Request
        } else if msg.kind.is_response() {
            MessageDirection::Response
        } else {
            MessageDirection::Indication
        };

        let correlation_id = msg
            .hints
            .imsi
            .clone()
            .or_else(|| msg.hints.sip_call_id.clone());

        LadderEvent {
            event_id: format!("evt_{}", self.event_counter),
            timestamp: msg.timestamp,
            timestamp_us: msg.timestamp.micros(),
            from_participant: from.id.clone(),
            to_participant: to.id.clone(),
            interface: identify_interface(msg, from.participant_type, to.participant_type)
                .to_string(),
            protocol: msg.protocol,
            protocol_name: msg.protocol.name().to_string(),
            message_kind: msg.kind,
            message: msg.kind.name().to_string(),
            direction,
            procedure_id: msg.procedure_id.clone(),
            correlation_id,
            latency_us: None,
            frame_number: msg.frame_number,
        }
    }
}

/// Identifies the 3GPP interface of a message from its protocol and the
/// participant types at both ends.
pub fn identify_interface(
    msg: &ParsedMessage,
    src_type: ParticipantType,
    dst_type: ParticipantType,
) -> &'static str {
    let involves = |t: ParticipantType| src_type == t || dst_type == t;

    match msg.protocol {
        Protocol::S1ap => "S1-MME",
        Protocol::X2ap => "X2",
        Protocol::Ngap => "N2",
        Protocol::Pfcp => "N4",
        Protocol::GtpU => {
            if involves(ParticipantType::Enodeb) {
                "S1-U"
            } else if involves(ParticipantType::Gnodeb) || involves(ParticipantType::Upf) {
                "N3"
            } else {
                "GTP-U"
            }
        }
        Protocol::GtpC => {
            if involves(ParticipantType::Mme) && involves(ParticipantType::Sgw) {
                "S11"
            } else if involves(ParticipantType::Sgw) && involves(ParticipantType::Pgw) {
                "S5/S8"
            } else {
                "GTP-C"
            }
        }
        Protocol::Diameter => match msg.field_u32("application_id") {
            Some(16777251) => "S6a",
            Some(16777250) => "S6d",
            Some(16777238) => "Gx",
            Some(16777236) => "Rx",
            Some(16777217) => "Sh",
            Some(16777216) => "Cx",
            Some(16777252) => "S13",
            Some(16777272) => "Sy",
            Some(4) => "Gy",
            _ => "DIAMETER",
        },
        Protocol::Sip | Protocol::Rtp | Protocol::Rtcp => "IMS",
        Protocol::Http2 => "SBI",
        Protocol::Dns => "DNS",
        Protocol::Dhcp => "DHCP",
        _ => "UNKNOWN",
    }
}

/// Pairs each request with the next matching response and stores the
/// latency on the request event.
fn pair_request_responses(events: &mut [LadderEvent]) {
    for i in 0..events.len() {
        if events[i].direction != MessageDirection::Request {
            continue;
        }
        let Some(expected) = events[i].message_kind.response_kind() else {
            continue;
        };

        let request_correlation = events[i].correlation_id.clone();
        let request_ts = events[i].timestamp;
        let latency = events[i + 1..]
            .iter()
            .find(|candidate| {
                candidate.message_kind == expected
                    && (request_correlation.is_none()
                        || candidate.correlation_id.is_none()
                        || candidate.correlation_id == request_correlation)
            })
            .map(|response| response.timestamp.micros_since(request_ts));
        events[i].latency_us = latency;
    }
}

fn group_by_procedure(events: &[LadderEvent]) -> Vec<ProcedureGroup> {
    let mut groups: BTreeMap<String, Vec<&LadderEvent>> = BTreeMap::new();
    for event in events {
        if let Some(proc_id) = &event.procedure_id {
            groups.entry(proc_id.clone()).or_default().push(event);
        }
    }

    groups
        .into_iter()
        .map(|(procedure_id, members)| {
            let start_time = members
                .iter()
                .map(|e| e.timestamp)
                .min()
                .unwrap_or_default();
            let end_time = members
                .iter()
                .map(|e| e.timestamp)
                .max()
                .unwrap_or_default();
            ProcedureGroup {
                procedure_id,
                event_ids: members.iter().map(|e| e.event_id.clone()).collect(),
                start_time,
                end_time,
                duration_ms: end_time.millis_since(start_time),
            }
        })
        .collect()
}

fn compute_metrics(events: &[LadderEvent]) -> LadderMetrics {
    let mut metrics = LadderMetrics {
        total_events: events.len(),
        ..Default::default()
    };

    if let (Some(first), Some(last)) = (events.first(), events.last()) {
        metrics.total_duration_ms = last.timestamp.millis_since(first.timestamp);
        if events.len() > 1 {
            metrics.average_inter_event_ms =
                metrics.total_duration_ms as f64 / (events.len() - 1) as f64;
        }
    }

    for event in events {
        if let Some(latency) = event.latency_us {
            metrics
                .latencies_us
                .entry(event.message.clone())
                .or_insert(latency);
        }
    }

    metrics
}
