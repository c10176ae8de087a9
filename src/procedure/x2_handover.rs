//! X2 handover procedure state machine.
//!
//! X2-based handover prepares directly between the eNodeBs, then switches
//! the S1 path at the MME:
//!
//! 1. X2AP Handover Request / Acknowledge
//! 2. X2AP SN Status Transfer (optional)
//! 3. S1AP Path Switch Request
//! 4. GTPv2-C Modify Bearer Request / Response
//! 5. S1AP Path Switch Request Acknowledge
//! 6. X2AP UE Context Release

use crate::message::{MessageKind, ParsedMessage};
use crate::procedure::{record_step, ProcedureKind, ProcedureMachine, ProcedureStep};
use crate::types::{Teid, Timestamp};
use serde_json::{json, Value};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum X2HandoverState {
    Idle,
    HandoverRequested,
    HandoverPrepared,
    SnStatusTransferred,
    PathSwitchRequested,
    BearerModified,
    PathSwitchAcknowledged,
    ContextReleased,
    Failed,
}

/// Timing and identity metrics for one X2 handover.
#[derive(Debug, Clone, Default)]
pub struct X2HandoverMetrics {
    pub handover_request_to_ack_ms: i64,
    pub path_switch_to_bearer_modify_ms: i64,
    pub bearer_modify_latency_ms: i64,
    pub handover_preparation_time_ms: i64,
    /// Acknowledge to context release.
    pub handover_execution_time_ms: i64,
    pub total_handover_time_ms: i64,
    /// True when execution stayed under the 3GPP intra-frequency target.
    pub interruption_time_met: bool,

    pub imsi: Option<String>,
    pub mme_ue_s1ap_id: Option<u32>,
    pub old_enb_ue_s1ap_id: Option<u32>,
    pub new_enb_ue_s1ap_id: Option<u32>,
    pub old_teid_s1u: Option<Teid>,
    pub new_teid_s1u: Option<Teid>,
    pub source_enb_id: Option<String>,
    pub target_enb_id: Option<String>,
}

impl X2HandoverMetrics {
    fn to_json(&self) -> Value {
        let mut j = json!({
            "timings": {
                "handover_request_to_ack_ms": self.handover_request_to_ack_ms,
                "path_switch_to_bearer_modify_ms": self.path_switch_to_bearer_modify_ms,
                "bearer_modify_latency_ms": self.bearer_modify_latency_ms,
                "handover_preparation_time_ms": self.handover_preparation_time_ms,
                "handover_execution_time_ms": self.handover_execution_time_ms,
                "total_handover_time_ms": self.total_handover_time_ms,
            },
            "performance": {
                "interruption_time_met": self.interruption_time_met,
                "total_within_target": self.total_handover_time_ms < 500,
            },
        });
        if let Some(imsi) = &self.imsi {
            j["imsi"] = json!(imsi);
        }
        if let Some(id) = self.mme_ue_s1ap_id {
            j["mme_ue_s1ap_id"] = json!(id);
        }
        if let Some(id) = self.old_enb_ue_s1ap_id {
            j["old_enb_ue_s1ap_id"] = json!(id);
        }
        if let Some(id) = self.new_enb_ue_s1ap_id {
            j["new_enb_ue_s1ap_id"] = json!(id);
        }
        if let Some(teid) = self.old_teid_s1u {
            j["old_teid_s1u"] = json!(teid.value());
        }
        if let Some(teid) = self.new_teid_s1u {
            j["new_teid_s1u"] = json!(teid.value());
        }
        if let Some(id) = &self.source_enb_id {
            j["source_enb_id"] = json!(id);
        }
        if let Some(id) = &self.target_enb_id {
            j["target_enb_id"] = json!(id);
        }
        j
    }
}

/// State machine for the X2 handover procedure.
pub struct X2HandoverMachine {
    state: X2HandoverState,
    metrics: X2HandoverMetrics,
    steps: Vec<ProcedureStep>,
    start_time: Timestamp,
    end_time: Timestamp,

    handover_request_time: Timestamp,
    handover_ack_time: Timestamp,
    path_switch_time: Timestamp,
    bearer_modify_req_time: Timestamp,
}

impl X2HandoverMachine {
    pub fn new() -> Self {
        X2HandoverMachine {
            state: X2HandoverState::Idle,
            metrics: X2HandoverMetrics::default(),
            steps: Vec::new(),
            start_time: Timestamp::default(),
            end_time: Timestamp::default(),
            handover_request_time: Timestamp::default(),
            handover_ack_time: Timestamp::default(),
            path_switch_time: Timestamp::default(),
            bearer_modify_req_time: Timestamp::default(),
        }
    }

    pub fn state(&self) -> X2HandoverState {
        self.state
    }

    pub fn metrics(&self) -> &X2HandoverMetrics {
        &self.metrics
    }

    fn transition(&mut self, new_state: X2HandoverState) {
        debug!(from = self.state_name(), to = state_name(new_state), "x2 handover transition");
        self.state = new_state;
    }

    fn on_path_switch_request(&mut self, msg: &ParsedMessage) {
        self.path_switch_time = msg.timestamp;
        self.metrics.new_enb_ue_s1ap_id = msg.hints.enb_ue_s1ap_id;
        record_step(&mut self.steps, "Path Switch Request", msg, true);
        self.transition(X2HandoverState::PathSwitchRequested);
    }
}

impl Default for X2HandoverMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn state_name(state: X2HandoverState) -> &'static str {
    match state {
        X2HandoverState::Idle => "IDLE",
        X2HandoverState::HandoverRequested => "HANDOVER_REQUESTED",
        X2HandoverState::HandoverPrepared => "HANDOVER_PREPARED",
        X2HandoverState::SnStatusTransferred => "SN_STATUS_TRANSFERRED",
        X2HandoverState::PathSwitchRequested => "PATH_SWITCH_REQUESTED",
        X2HandoverState::BearerModified => "BEARER_MODIFIED",
        X2HandoverState::PathSwitchAcknowledged => "PATH_SWITCH_ACKNOWLEDGED",
        X2HandoverState::ContextReleased => "CONTEXT_RELEASED",
        X2HandoverState::Failed => "FAILED",
    }
}

impl ProcedureMachine for X2HandoverMachine {
    fn process_message(&mut self, msg: &ParsedMessage) -> bool {
        match self.state {
            X2HandoverState::Idle => {
                if msg.kind == MessageKind::X2apHandoverRequest {
                    self.start_time = msg.timestamp;
                    self.handover_request_time = msg.timestamp;
                    self.metrics.imsi = msg.hints.imsi.clone();
                    self.metrics.mme_ue_s1ap_id = msg.hints.mme_ue_s1ap_id;
                    self.metrics.old_enb_ue_s1ap_id = msg.hints.enb_ue_s1ap_id;
                    self.metrics.source_enb_id =
                        msg.field_str("source_enb_id").map(str::to_string);

                    record_step(&mut self.steps, "X2 Handover Request", msg, true);
                    self.transition(X2HandoverState::HandoverRequested);
                    return true;
                }
            }

            X2HandoverState::HandoverRequested => {
                if msg.kind == MessageKind::X2apHandoverRequestAck {
                    self.handover_ack_time = msg.timestamp;
                    let prep = msg.timestamp.millis_since(self.handover_request_time);
                    self.metrics.handover_request_to_ack_ms = prep;
                    self.metrics.handover_preparation_time_ms = prep;
                    self.metrics.target_enb_id =
                        msg.field_str("target_enb_id").map(str::to_string);

                    record_step(&mut self.steps, "X2 Handover Request Acknowledge", msg, true);
                    self.transition(X2HandoverState::HandoverPrepared);
                    return true;
                }
                if msg.kind == MessageKind::X2apHandoverCancel {
                    record_step(&mut self.steps, "X2 Handover Cancel", msg, false);
                    self.transition(X2HandoverState::Failed);
                    return true;
                }
            }

            X2HandoverState::HandoverPrepared => {
                if msg.kind == MessageKind::X2apSnStatusTransfer {
                    record_step(&mut self.steps, "SN Status Transfer", msg, true);
                    self.transition(X2HandoverState::SnStatusTransferred);
                    return true;
                }
                // Some deployments go straight to the path switch.
                if msg.kind == MessageKind::S1apPathSwitchRequest {
                    self.on_path_switch_request(msg);
                    return true;
                }
            }

            X2HandoverState::SnStatusTransferred => {
                if msg.kind == MessageKind::S1apPathSwitchRequest {
                    self.on_path_switch_request(msg);
                    return true;
                }
            }

            X2HandoverState::PathSwitchRequested => {
                if msg.kind == MessageKind::GtpModifyBearerRequest {
                    self.bearer_modify_req_time = msg.timestamp;
                    self.metrics.path_switch_to_bearer_modify_ms =
                        msg.timestamp.millis_since(self.path_switch_time);
                    self.metrics.old_teid_s1u = self
                        .metrics
                        .old_teid_s1u
                        .or(msg.field_u32("old_teid").map(Teid));

                    // Recorded without transition; the response drives it.
                    record_step(&mut self.steps, "Modify Bearer Request", msg, true);
                    return true;
                }
                if msg.kind == MessageKind::GtpModifyBearerResponse {
                    self.metrics.bearer_modify_latency_ms = if self
                        .bearer_modify_req_time
                        .is_unset()
                    {
                        0
                    } else {
                        msg.timestamp.millis_since(self.bearer_modify_req_time)
                    };
                    self.metrics.new_teid_s1u = msg.hints.teid_s1u;

                    record_step(&mut self.steps, "Modify Bearer Response", msg, true);
                    self.transition(X2HandoverState::BearerModified);
                    return true;
                }
            }

            X2HandoverState::BearerModified => {
                if msg.kind == MessageKind::S1apPathSwitchRequestAck {
                    record_step(&mut self.steps, "Path Switch Request Acknowledge", msg, true);
                    self.transition(X2HandoverState::PathSwitchAcknowledged);
                    return true;
                }
            }

            X2HandoverState::PathSwitchAcknowledged => {
                if msg.kind == MessageKind::X2apUeContextRelease {
                    self.end_time = msg.timestamp;
                    self.metrics.total_handover_time_ms =
                        msg.timestamp.millis_since(self.handover_request_time);
                    self.metrics.handover_execution_time_ms =
                        msg.timestamp.millis_since(self.handover_ack_time);
                    self.metrics.interruption_time_met =
                        self.metrics.handover_execution_time_ms < 30;

                    record_step(&mut self.steps, "UE Context Release", msg, true);
                    self.transition(X2HandoverState::ContextReleased);

                    info!(
                        total_ms = self.metrics.total_handover_time_ms,
                        prep_ms = self.metrics.handover_preparation_time_ms,
                        exec_ms = self.metrics.handover_execution_time_ms,
                        "x2 handover completed"
                    );
                    return true;
                }
            }

            X2HandoverState::ContextReleased | X2HandoverState::Failed => {}
        }

        false
    }

    fn is_complete(&self) -> bool {
        self.state == X2HandoverState::ContextReleased
    }

    fn is_failed(&self) -> bool {
        self.state == X2HandoverState::Failed
    }

    fn kind(&self) -> ProcedureKind {
        ProcedureKind::X2Handover
    }

    fn start_time(&self) -> Timestamp {
        self.start_time
    }

    fn end_time(&self) -> Option<Timestamp> {
        (self.state == X2HandoverState::ContextReleased).then_some(self.end_time)
    }

    fn steps(&self) -> &[ProcedureStep] {
        &self.steps
    }

    fn metrics_json(&self) -> Value {
        self.metrics.to_json()
    }

    fn state_name(&self) -> &'static str {
        state_name(self.state)
    }

    fn state_description(&self) -> &'static str {
        match self.state {
            X2HandoverState::Idle => "Waiting for handover request",
            X2HandoverState::HandoverRequested => "Handover requested, waiting for acknowledgment",
            X2HandoverState::HandoverPrepared => {
                "Handover prepared, waiting for SN status or path switch"
            }
            X2HandoverState::SnStatusTransferred => "SN status transferred, waiting for path switch",
            X2HandoverState::PathSwitchRequested => {
                "Path switch requested, waiting for bearer modification"
            }
            X2HandoverState::BearerModified => {
                "Bearer modified, waiting for path switch acknowledgment"
            }
            X2HandoverState::PathSwitchAcknowledged => {
                "Path switch acknowledged, waiting for context release"
            }
            X2HandoverState::ContextReleased => "Context released, handover completed",
            X2HandoverState::Failed => "Handover failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Protocol;

    fn msg(protocol: Protocol, kind: MessageKind, millis: i64) -> ParsedMessage {
        ParsedMessage::new(1, Timestamp::from_millis(millis), protocol, kind)
    }

    fn run_complete_handover(with_sn_status: bool) -> X2HandoverMachine {
        let mut machine = X2HandoverMachine::new();
        assert!(machine.process_message(
            &msg(Protocol::X2ap, MessageKind::X2apHandoverRequest, 0).with_imsi("001010123456789")
        ));
        assert!(machine.process_message(&msg(
            Protocol::X2ap,
            MessageKind::X2apHandoverRequestAck,
            20
        )));
        if with_sn_status {
            assert!(machine.process_message(&msg(
                Protocol::X2ap,
                MessageKind::X2apSnStatusTransfer,
                25
            )));
        }
        assert!(machine.process_message(&msg(
            Protocol::S1ap,
            MessageKind::S1apPathSwitchRequest,
            30
        )));
        assert!(machine.process_message(&msg(
            Protocol::GtpC,
            MessageKind::GtpModifyBearerRequest,
            32
        )));
        assert!(machine.process_message(
            &msg(Protocol::GtpC, MessageKind::GtpModifyBearerResponse, 38)
                .with_teid(Teid(0x2222))
        ));
        assert!(machine.process_message(&msg(
            Protocol::S1ap,
            MessageKind::S1apPathSwitchRequestAck,
            42
        )));
        assert!(machine.process_message(&msg(
            Protocol::X2ap,
            MessageKind::X2apUeContextRelease,
            45
        )));
        machine
    }

    #[test]
    fn test_complete_handover_with_sn_status() {
        let machine = run_complete_handover(true);
        assert!(machine.is_complete());
        assert_eq!(machine.state(), X2HandoverState::ContextReleased);
        assert_eq!(machine.steps().len(), 8);
    }

    #[test]
    fn test_complete_handover_skipping_sn_status() {
        let machine = run_complete_handover(false);
        assert!(machine.is_complete());
        assert_eq!(machine.steps().len(), 7);
    }

    #[test]
    fn test_handover_metrics() {
        let machine = run_complete_handover(false);
        let m = machine.metrics();
        assert_eq!(m.handover_preparation_time_ms, 20);
        assert_eq!(m.handover_execution_time_ms, 25);
        assert_eq!(m.total_handover_time_ms, 45);
        assert_eq!(m.bearer_modify_latency_ms, 6);
        assert_eq!(m.new_teid_s1u, Some(Teid(0x2222)));
        assert!(m.interruption_time_met);
    }

    #[test]
    fn test_slow_execution_misses_interruption_target() {
        let mut machine = X2HandoverMachine::new();
        machine.process_message(&msg(Protocol::X2ap, MessageKind::X2apHandoverRequest, 0));
        machine.process_message(&msg(Protocol::X2ap, MessageKind::X2apHandoverRequestAck, 20));
        machine.process_message(&msg(Protocol::S1ap, MessageKind::S1apPathSwitchRequest, 30));
        machine.process_message(&msg(Protocol::GtpC, MessageKind::GtpModifyBearerResponse, 40));
        machine.process_message(&msg(
            Protocol::S1ap,
            MessageKind::S1apPathSwitchRequestAck,
            50,
        ));
        machine.process_message(&msg(Protocol::X2ap, MessageKind::X2apUeContextRelease, 80));

        // 60 ms of execution misses the 30 ms target.
        assert!(!machine.metrics().interruption_time_met);
    }

    #[test]
    fn test_handover_cancel_fails() {
        let mut machine = X2HandoverMachine::new();
        machine.process_message(&msg(Protocol::X2ap, MessageKind::X2apHandoverRequest, 0));
        machine.process_message(&msg(Protocol::X2ap, MessageKind::X2apHandoverCancel, 10));

        assert!(machine.is_failed());
        assert!(!machine.steps().last().unwrap().expected);
    }
}
