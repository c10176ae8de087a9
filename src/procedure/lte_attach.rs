//! LTE Attach procedure state machine.
//!
//! Tracks the canonical attach sequence:
//!
//! 1. S1AP Initial UE Message carrying NAS Attach Request
//! 2. Downlink NAS Transport / Authentication Request
//! 3. Uplink NAS Transport / Authentication Response
//! 4. Downlink NAS Transport / Security Mode Command
//! 5. Uplink NAS Transport / Security Mode Complete
//! 6. GTPv2-C Create Session Request
//! 7. GTPv2-C Create Session Response
//! 8. S1AP Initial Context Setup Request (+ Response)
//! 9. Downlink NAS Transport / Attach Accept
//! 10. Uplink NAS Transport / Attach Complete

use crate::message::{MessageKind, ParsedMessage};
use crate::procedure::{record_step, ProcedureKind, ProcedureMachine, ProcedureStep};
use crate::types::{Teid, Timestamp};
use serde_json::{json, Value};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LteAttachState {
    Idle,
    AttachRequested,
    AuthenticationInProgress,
    AuthenticationComplete,
    SecurityModeInProgress,
    SecurityModeComplete,
    GtpSessionCreationInProgress,
    GtpSessionCreated,
    InitialContextSetupInProgress,
    AttachAccepted,
    Attached,
    Failed,
}

/// Timing and identity metrics for one attach.
#[derive(Debug, Clone, Default)]
pub struct LteAttachMetrics {
    pub attach_request_to_auth_request_ms: i64,
    pub auth_request_to_auth_response_ms: i64,
    pub auth_to_security_mode_ms: i64,
    pub security_mode_to_gtp_create_ms: i64,
    pub gtp_create_to_gtp_response_ms: i64,
    pub gtp_response_to_context_setup_ms: i64,
    pub context_setup_to_attach_accept_ms: i64,
    pub attach_accept_to_complete_ms: i64,
    pub total_attach_time_ms: i64,

    pub imsi: Option<String>,
    pub mme_ue_s1ap_id: Option<u32>,
    pub enb_ue_s1ap_id: Option<u32>,
    pub teid_s1u: Option<Teid>,
    pub ue_ip: Option<String>,
    pub apn: Option<String>,
}

impl LteAttachMetrics {
    fn to_json(&self) -> Value {
        let mut j = json!({
            "timings": {
                "attach_to_auth_ms": self.attach_request_to_auth_request_ms,
                "auth_req_to_resp_ms": self.auth_request_to_auth_response_ms,
                "auth_to_security_ms": self.auth_to_security_mode_ms,
                "security_to_gtp_ms": self.security_mode_to_gtp_create_ms,
                "gtp_create_latency_ms": self.gtp_create_to_gtp_response_ms,
                "gtp_to_context_setup_ms": self.gtp_response_to_context_setup_ms,
                "context_to_accept_ms": self.context_setup_to_attach_accept_ms,
                "accept_to_complete_ms": self.attach_accept_to_complete_ms,
                "total_attach_time_ms": self.total_attach_time_ms,
            },
            "performance": {
                "total_within_target": self.total_attach_time_ms < 1000,
                "gtp_within_target": self.gtp_create_to_gtp_response_ms < 200,
                "auth_within_target": self.auth_request_to_auth_response_ms < 100,
            },
        });
        if let Some(imsi) = &self.imsi {
            j["imsi"] = json!(imsi);
        }
        if let Some(id) = self.mme_ue_s1ap_id {
            j["mme_ue_s1ap_id"] = json!(id);
        }
        if let Some(id) = self.enb_ue_s1ap_id {
            j["enb_ue_s1ap_id"] = json!(id);
        }
        if let Some(teid) = self.teid_s1u {
            j["teid_s1u"] = json!(teid.value());
        }
        if let Some(ip) = &self.ue_ip {
            j["ue_ip"] = json!(ip);
        }
        if let Some(apn) = &self.apn {
            j["apn"] = json!(apn);
        }
        j
    }
}

/// State machine for the LTE attach procedure.
pub struct LteAttachMachine {
    state: LteAttachState,
    metrics: LteAttachMetrics,
    steps: Vec<ProcedureStep>,
    start_time: Timestamp,
    end_time: Timestamp,

    attach_request_time: Timestamp,
    auth_request_time: Timestamp,
    auth_response_time: Timestamp,
    security_mode_complete_time: Timestamp,
    gtp_create_time: Timestamp,
    gtp_response_time: Timestamp,
    context_setup_time: Timestamp,
    attach_accept_time: Timestamp,
}

impl LteAttachMachine {
    pub fn new() -> Self {
        LteAttachMachine {
            state: LteAttachState::Idle,
            metrics: LteAttachMetrics::default(),
            steps: Vec::new(),
            start_time: Timestamp::default(),
            end_time: Timestamp::default(),
            attach_request_time: Timestamp::default(),
            auth_request_time: Timestamp::default(),
            auth_response_time: Timestamp::default(),
            security_mode_complete_time: Timestamp::default(),
            gtp_create_time: Timestamp::default(),
            gtp_response_time: Timestamp::default(),
            context_setup_time: Timestamp::default(),
            attach_accept_time: Timestamp::default(),
        }
    }

    pub fn state(&self) -> LteAttachState {
        self.state
    }

    pub fn metrics(&self) -> &LteAttachMetrics {
        &self.metrics
    }

    fn transition(&mut self, new_state: LteAttachState) {
        debug!(from = self.state_name(), to = state_name(new_state), "lte attach transition");
        self.state = new_state;
    }
}

impl Default for LteAttachMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn state_name(state: LteAttachState) -> &'static str {
    match state {
        LteAttachState::Idle => "IDLE",
        LteAttachState::AttachRequested => "ATTACH_REQUESTED",
        LteAttachState::AuthenticationInProgress => "AUTHENTICATION_IN_PROGRESS",
        LteAttachState::AuthenticationComplete => "AUTHENTICATION_COMPLETE",
        LteAttachState::SecurityModeInProgress => "SECURITY_MODE_IN_PROGRESS",
        LteAttachState::SecurityModeComplete => "SECURITY_MODE_COMPLETE",
        LteAttachState::GtpSessionCreationInProgress => "GTP_SESSION_CREATION_IN_PROGRESS",
        LteAttachState::GtpSessionCreated => "GTP_SESSION_CREATED",
        LteAttachState::InitialContextSetupInProgress => "INITIAL_CONTEXT_SETUP_IN_PROGRESS",
        LteAttachState::AttachAccepted => "ATTACH_ACCEPTED",
        LteAttachState::Attached => "ATTACHED",
        LteAttachState::Failed => "FAILED",
    }
}

impl ProcedureMachine for LteAttachMachine {
    fn process_message(&mut self, msg: &ParsedMessage) -> bool {
        match self.state {
            LteAttachState::Idle => {
                if msg.kind == MessageKind::S1apInitialUeMessage
                    && msg.has_nas(MessageKind::NasAttachRequest)
                {
                    self.start_time = msg.timestamp;
                    self.attach_request_time = msg.timestamp;
                    self.metrics.imsi = msg.hints.imsi.clone();
                    self.metrics.mme_ue_s1ap_id = msg.hints.mme_ue_s1ap_id;
                    self.metrics.enb_ue_s1ap_id = msg.hints.enb_ue_s1ap_id;
                    self.metrics.apn = msg.hints.apn.clone();

                    record_step(&mut self.steps, "Attach Request", msg, true);
                    self.transition(LteAttachState::AttachRequested);
                    return true;
                }
            }

            LteAttachState::AttachRequested => {
                if msg.kind == MessageKind::S1apDownlinkNasTransport
                    && msg.has_nas(MessageKind::NasAuthenticationRequest)
                {
                    self.auth_request_time = msg.timestamp;
                    self.metrics.attach_request_to_auth_request_ms =
                        msg.timestamp.millis_since(self.attach_request_time);

                    record_step(&mut self.steps, "Authentication Request", msg, true);
                    self.transition(LteAttachState::AuthenticationInProgress);
                    return true;
                }
            }

            LteAttachState::AuthenticationInProgress => {
                if msg.kind == MessageKind::S1apUplinkNasTransport
                    && msg.has_nas(MessageKind::NasAuthenticationResponse)
                {
                    self.auth_response_time = msg.timestamp;
                    self.metrics.auth_request_to_auth_response_ms =
                        msg.timestamp.millis_since(self.auth_request_time);

                    record_step(&mut self.steps, "Authentication Response", msg, true);
                    self.transition(LteAttachState::AuthenticationComplete);
                    return true;
                }
                if msg.kind == MessageKind::S1apUplinkNasTransport
                    && msg.has_nas(MessageKind::NasAuthenticationFailure)
                {
                    record_step(&mut self.steps, "Authentication Failure", msg, false);
                    self.transition(LteAttachState::Failed);
                    return true;
                }
            }

            LteAttachState::AuthenticationComplete => {
                if msg.kind == MessageKind::S1apDownlinkNasTransport
                    && msg.has_nas(MessageKind::NasSecurityModeCommand)
                {
                    self.metrics.auth_to_security_mode_ms =
                        msg.timestamp.millis_since(self.auth_response_time);

                    record_step(&mut self.steps, "Security Mode Command", msg, true);
                    self.transition(LteAttachState::SecurityModeInProgress);
                    return true;
                }
            }

            LteAttachState::SecurityModeInProgress => {
                if msg.kind == MessageKind::S1apUplinkNasTransport
                    && msg.has_nas(MessageKind::NasSecurityModeComplete)
                {
                    self.security_mode_complete_time = msg.timestamp;

                    record_step(&mut self.steps, "Security Mode Complete", msg, true);
                    self.transition(LteAttachState::SecurityModeComplete);
                    return true;
                }
            }

            LteAttachState::SecurityModeComplete => {
                if msg.kind == MessageKind::GtpCreateSessionRequest {
                    self.gtp_create_time = msg.timestamp;
                    self.metrics.security_mode_to_gtp_create_ms =
                        msg.timestamp.millis_since(self.security_mode_complete_time);
                    if self.metrics.apn.is_none() {
                        self.metrics.apn = msg.hints.apn.clone();
                    }

                    record_step(&mut self.steps, "GTP Create Session Request", msg, true);
                    self.transition(LteAttachState::GtpSessionCreationInProgress);
                    return true;
                }
            }

            LteAttachState::GtpSessionCreationInProgress => {
                if msg.kind == MessageKind::GtpCreateSessionResponse {
                    self.gtp_response_time = msg.timestamp;
                    self.metrics.gtp_create_to_gtp_response_ms =
                        msg.timestamp.millis_since(self.gtp_create_time);
                    self.metrics.teid_s1u = msg.hints.teid_s1u;
                    if self.metrics.ue_ip.is_none() {
                        self.metrics.ue_ip = msg
                            .hints
                            .ue_ipv4
                            .clone()
                            .or_else(|| msg.field_str("ue_ipv4").map(str::to_string));
                    }

                    record_step(&mut self.steps, "GTP Create Session Response", msg, true);
                    self.transition(LteAttachState::GtpSessionCreated);
                    return true;
                }
            }

            LteAttachState::GtpSessionCreated => {
                if msg.kind == MessageKind::S1apInitialContextSetupRequest {
                    self.context_setup_time = msg.timestamp;
                    self.metrics.gtp_response_to_context_setup_ms =
                        msg.timestamp.millis_since(self.gtp_response_time);

                    record_step(&mut self.steps, "Initial Context Setup Request", msg, true);
                    self.transition(LteAttachState::InitialContextSetupInProgress);
                    return true;
                }
            }

            LteAttachState::InitialContextSetupInProgress => {
                if msg.kind == MessageKind::S1apInitialContextSetupResponse {
                    // Acknowledgement only: recorded, no transition.
                    record_step(&mut self.steps, "Initial Context Setup Response", msg, true);
                    return false;
                }
                if msg.kind == MessageKind::S1apDownlinkNasTransport
                    && msg.has_nas(MessageKind::NasAttachAccept)
                {
                    self.attach_accept_time = msg.timestamp;
                    self.metrics.context_setup_to_attach_accept_ms =
                        msg.timestamp.millis_since(self.context_setup_time);

                    record_step(&mut self.steps, "Attach Accept", msg, true);
                    self.transition(LteAttachState::AttachAccepted);
                    return true;
                }
                if msg.kind == MessageKind::S1apDownlinkNasTransport
                    && msg.has_nas(MessageKind::NasAttachReject)
                {
                    record_step(&mut self.steps, "Attach Reject", msg, false);
                    self.transition(LteAttachState::Failed);
                    return true;
                }
            }

            LteAttachState::AttachAccepted => {
                if msg.kind == MessageKind::S1apUplinkNasTransport
                    && msg.has_nas(MessageKind::NasAttachComplete)
                {
                    self.end_time = msg.timestamp;
                    self.metrics.attach_accept_to_complete_ms =
                        msg.timestamp.millis_since(self.attach_accept_time);
                    self.metrics.total_attach_time_ms =
                        msg.timestamp.millis_since(self.attach_request_time);

                    record_step(&mut self.steps, "Attach Complete", msg, true);
                    self.transition(LteAttachState::Attached);

                    info!(
                        imsi = self.metrics.imsi.as_deref().unwrap_or("unknown"),
                        total_ms = self.metrics.total_attach_time_ms,
                        "lte attach completed"
                    );
                    return true;
                }
            }

            LteAttachState::Attached | LteAttachState::Failed => {}
        }

        false
    }

    fn is_complete(&self) -> bool {
        self.state == LteAttachState::Attached
    }

    fn is_failed(&self) -> bool {
        self.state == LteAttachState::Failed
    }

    fn kind(&self) -> ProcedureKind {
        ProcedureKind::LteAttach
    }

    fn start_time(&self) -> Timestamp {
        self.start_time
    }

    fn end_time(&self) -> Option<Timestamp> {
        (self.state == LteAttachState::Attached).then_some(self.end_time)
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
            LteAttachState::Idle => "Waiting for Attach Request",
            LteAttachState::AttachRequested => "Attach requested, waiting for authentication",
            LteAttachState::AuthenticationInProgress => "Authentication in progress",
            LteAttachState::AuthenticationComplete => {
                "Authentication complete, waiting for security mode"
            }
            LteAttachState::SecurityModeInProgress => "Security mode command in progress",
            LteAttachState::SecurityModeComplete => {
                "Security established, waiting for GTP session creation"
            }
            LteAttachState::GtpSessionCreationInProgress => "GTP session being created",
            LteAttachState::GtpSessionCreated => "GTP session created, waiting for context setup",
            LteAttachState::InitialContextSetupInProgress => "Initial context setup in progress",
            LteAttachState::AttachAccepted => "Attach accepted, waiting for completion",
            LteAttachState::Attached => "Attach procedure completed successfully",
            LteAttachState::Failed => "Attach procedure failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Protocol;

    fn s1ap(kind: MessageKind, nas: MessageKind, millis: i64) -> ParsedMessage {
        ParsedMessage::new(1, Timestamp::from_millis(millis), Protocol::S1ap, kind).with_nas(nas)
    }

    fn gtp(kind: MessageKind, millis: i64) -> ParsedMessage {
        ParsedMessage::new(1, Timestamp::from_millis(millis), Protocol::GtpC, kind)
    }

    /// Feeds a minimal complete attach sequence and returns the machine.
    fn run_complete_attach() -> LteAttachMachine {
        let mut machine = LteAttachMachine::new();
        let initial = s1ap(
            MessageKind::S1apInitialUeMessage,
            MessageKind::NasAttachRequest,
            0,
        )
        .with_imsi("310260123456789")
        .with_ue_ids(100, 200);
        assert!(machine.process_message(&initial));

        assert!(machine.process_message(&s1ap(
            MessageKind::S1apDownlinkNasTransport,
            MessageKind::NasAuthenticationRequest,
            50
        )));
        assert!(machine.process_message(&s1ap(
            MessageKind::S1apUplinkNasTransport,
            MessageKind::NasAuthenticationResponse,
            120
        )));
        assert!(machine.process_message(&s1ap(
            MessageKind::S1apDownlinkNasTransport,
            MessageKind::NasSecurityModeCommand,
            180
        )));
        assert!(machine.process_message(&s1ap(
            MessageKind::S1apUplinkNasTransport,
            MessageKind::NasSecurityModeComplete,
            230
        )));
        assert!(machine.process_message(&gtp(MessageKind::GtpCreateSessionRequest, 260)));
        let gtp_resp = gtp(MessageKind::GtpCreateSessionResponse, 380)
            .with_ue_ipv4("10.1.2.3")
            .with_teid(Teid(0x1000));
        assert!(machine.process_message(&gtp_resp));
        assert!(machine.process_message(&ParsedMessage::new(
            1,
            Timestamp::from_millis(400),
            Protocol::S1ap,
            MessageKind::S1apInitialContextSetupRequest,
        )));
        assert!(machine.process_message(&s1ap(
            MessageKind::S1apDownlinkNasTransport,
            MessageKind::NasAttachAccept,
            450
        )));
        assert!(machine.process_message(&s1ap(
            MessageKind::S1apUplinkNasTransport,
            MessageKind::NasAttachComplete,
            510
        )));
        machine
    }

    #[test]
    fn test_minimal_attach_reaches_attached() {
        let machine = run_complete_attach();
        assert!(machine.is_complete());
        assert!(!machine.is_failed());
        assert_eq!(machine.state(), LteAttachState::Attached);
        assert_eq!(machine.state_name(), "ATTACHED");
    }

    #[test]
    fn test_minimal_attach_metrics() {
        let machine = run_complete_attach();
        let m = machine.metrics();
        assert_eq!(m.total_attach_time_ms, 510);
        assert_eq!(m.imsi.as_deref(), Some("310260123456789"));
        assert_eq!(m.ue_ip.as_deref(), Some("10.1.2.3"));
        assert_eq!(m.teid_s1u, Some(Teid(0x1000)));
        assert_eq!(m.attach_request_to_auth_request_ms, 50);
        assert_eq!(m.auth_request_to_auth_response_ms, 70);
        assert_eq!(m.gtp_create_to_gtp_response_ms, 120);
        assert_eq!(machine.duration_ms(), Some(510));
    }

    #[test]
    fn test_minimal_attach_steps() {
        let machine = run_complete_attach();
        let steps = machine.steps();
        assert_eq!(steps.len(), 10);
        assert!(steps.iter().all(|s| s.expected));
        assert_eq!(steps[0].step_name, "Attach Request");
        assert_eq!(steps[9].step_name, "Attach Complete");
        // Latencies are non-negative and absent only on the first step.
        assert!(steps[0].latency_from_previous_ms.is_none());
        assert!(steps[1..]
            .iter()
            .all(|s| s.latency_from_previous_ms.unwrap_or(-1) >= 0));
    }

    #[test]
    fn test_authentication_failure_fails_procedure() {
        let mut machine = LteAttachMachine::new();
        machine.process_message(&s1ap(
            MessageKind::S1apInitialUeMessage,
            MessageKind::NasAttachRequest,
            0,
        ));
        machine.process_message(&s1ap(
            MessageKind::S1apDownlinkNasTransport,
            MessageKind::NasAuthenticationRequest,
            50,
        ));
        machine.process_message(&s1ap(
            MessageKind::S1apUplinkNasTransport,
            MessageKind::NasAuthenticationFailure,
            120,
        ));

        assert!(machine.is_failed());
        assert!(!machine.is_complete());
        let last = machine.steps().last().unwrap();
        assert!(!last.expected);
    }

    #[test]
    fn test_unclaimed_message_no_step() {
        let mut machine = LteAttachMachine::new();
        machine.process_message(&s1ap(
            MessageKind::S1apInitialUeMessage,
            MessageKind::NasAttachRequest,
            0,
        ));
        // A BYE does not belong to an attach: not claimed, no step.
        let claimed = machine.process_message(&ParsedMessage::new(
            2,
            Timestamp::from_millis(10),
            Protocol::Sip,
            MessageKind::SipBye,
        ));
        assert!(!claimed);
        assert_eq!(machine.steps().len(), 1);
    }

    #[test]
    fn test_wrong_trigger_ignored_in_idle() {
        let mut machine = LteAttachMachine::new();
        let tau = s1ap(
            MessageKind::S1apInitialUeMessage,
            MessageKind::NasTauRequest,
            0,
        );
        assert!(!machine.process_message(&tau));
        assert_eq!(machine.state(), LteAttachState::Idle);
    }

    #[test]
    fn test_metrics_json_shape() {
        let machine = run_complete_attach();
        let j = machine.metrics_json();
        assert_eq!(j["timings"]["total_attach_time_ms"], 510);
        assert_eq!(j["performance"]["total_within_target"], true);
        assert_eq!(j["imsi"], "310260123456789");
    }
}
