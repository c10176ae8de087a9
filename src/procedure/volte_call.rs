//! VoLTE call setup procedure state machine.
//!
//! Follows one call across IMS, policy control and the EPC:
//!
//! 1. SIP INVITE / 100 Trying
//! 2. Diameter Rx AAR/AAA (media authorisation)
//! 3. Diameter Gx RAR/RAA (policy installation)
//! 4. GTPv2-C Create Bearer Request/Response (dedicated QCI-1 bearer)
//! 5. SIP 180 Ringing / 200 OK / ACK
//! 6. First RTP packet (media active), BYE (release)

use crate::message::{MessageKind, ParsedMessage, Protocol};
use crate::procedure::{record_step, ProcedureKind, ProcedureMachine, ProcedureStep};
use crate::types::{Ssrc, Teid, Timestamp};
use serde_json::{json, Value};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolteCallState {
    Idle,
    InviteSent,
    TryingReceived,
    MediaAuthorizationInProgress,
    MediaAuthorized,
    PolicyInstallationInProgress,
    PolicyInstalled,
    DedicatedBearerCreationInProgress,
    DedicatedBearerCreated,
    Ringing,
    CallConnected,
    MediaActive,
    CallReleased,
    Failed,
}

/// Timing, identity and QoS metrics for one VoLTE call setup.
#[derive(Debug, Clone, Default)]
pub struct VolteCallMetrics {
    pub invite_to_trying_ms: i64,
    pub media_authorization_time_ms: i64,
    pub policy_installation_time_ms: i64,
    pub dedicated_bearer_setup_time_ms: i64,
    /// INVITE to 180 Ringing.
    pub post_dial_delay_ms: i64,
    /// INVITE to 200 OK.
    pub call_setup_time_ms: i64,
    /// 200 OK to first RTP packet.
    pub answer_to_media_ms: i64,

    pub sip_call_id: Option<String>,
    pub imsi: Option<String>,
    pub calling_number: Option<String>,
    pub called_number: Option<String>,
    pub dedicated_bearer_teid: Option<Teid>,
    /// Should be 1 for conversational voice.
    pub dedicated_bearer_qci: Option<u8>,
    /// P-Charging-Vector ICID for billing correlation.
    pub icid: Option<String>,
    pub rtp_ssrc: Option<Ssrc>,
    pub guaranteed_bitrate_ul_kbps: Option<u32>,
    pub guaranteed_bitrate_dl_kbps: Option<u32>,
}

impl VolteCallMetrics {
    fn to_json(&self) -> Value {
        let mut j = json!({
            "timings": {
                "invite_to_trying_ms": self.invite_to_trying_ms,
                "media_authorization_ms": self.media_authorization_time_ms,
                "policy_installation_ms": self.policy_installation_time_ms,
                "dedicated_bearer_setup_ms": self.dedicated_bearer_setup_time_ms,
                "post_dial_delay_ms": self.post_dial_delay_ms,
                "call_setup_time_ms": self.call_setup_time_ms,
                "answer_to_media_ms": self.answer_to_media_ms,
            },
            "performance": {
                "qci_is_voice": self.dedicated_bearer_qci == Some(1),
            },
        });
        if let Some(call_id) = &self.sip_call_id {
            j["sip_call_id"] = json!(call_id);
        }
        if let Some(imsi) = &self.imsi {
            j["imsi"] = json!(imsi);
        }
        if let Some(n) = &self.calling_number {
            j["calling_number"] = json!(n);
        }
        if let Some(n) = &self.called_number {
            j["called_number"] = json!(n);
        }
        if let Some(teid) = self.dedicated_bearer_teid {
            j["dedicated_bearer_teid"] = json!(teid.value());
        }
        if let Some(qci) = self.dedicated_bearer_qci {
            j["dedicated_bearer_qci"] = json!(qci);
        }
        if let Some(icid) = &self.icid {
            j["icid"] = json!(icid);
        }
        if let Some(ssrc) = self.rtp_ssrc {
            j["rtp_ssrc"] = json!(ssrc.value());
        }
        if let Some(gbr) = self.guaranteed_bitrate_ul_kbps {
            j["gbr_ul_kbps"] = json!(gbr);
        }
        if let Some(gbr) = self.guaranteed_bitrate_dl_kbps {
            j["gbr_dl_kbps"] = json!(gbr);
        }
        j
    }
}

/// State machine for the VoLTE call setup procedure.
pub struct VolteCallMachine {
    state: VolteCallState,
    metrics: VolteCallMetrics,
    steps: Vec<ProcedureStep>,
    start_time: Timestamp,
    end_time: Timestamp,

    invite_time: Timestamp,
    rx_aar_time: Timestamp,
    gx_rar_time: Timestamp,
    bearer_req_time: Timestamp,
    ok_time: Timestamp,
}

impl VolteCallMachine {
    pub fn new() -> Self {
        VolteCallMachine {
            state: VolteCallState::Idle,
            metrics: VolteCallMetrics::default(),
            steps: Vec::new(),
            start_time: Timestamp::default(),
            end_time: Timestamp::default(),
            invite_time: Timestamp::default(),
            rx_aar_time: Timestamp::default(),
            gx_rar_time: Timestamp::default(),
            bearer_req_time: Timestamp::default(),
            ok_time: Timestamp::default(),
        }
    }

    pub fn state(&self) -> VolteCallState {
        self.state
    }

    pub fn metrics(&self) -> &VolteCallMetrics {
        &self.metrics
    }

    fn transition(&mut self, new_state: VolteCallState) {
        debug!(from = self.state_name(), to = state_name(new_state), "volte call transition");
        self.state = new_state;
    }

    fn on_rx_aar(&mut self, msg: &ParsedMessage) {
        self.rx_aar_time = msg.timestamp;
        record_step(&mut self.steps, "Diameter Rx AAR", msg, true);
        self.transition(VolteCallState::MediaAuthorizationInProgress);
    }
}

impl Default for VolteCallMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn state_name(state: VolteCallState) -> &'static str {
    match state {
        VolteCallState::Idle => "IDLE",
        VolteCallState::InviteSent => "INVITE_SENT",
        VolteCallState::TryingReceived => "TRYING_RECEIVED",
        VolteCallState::MediaAuthorizationInProgress => "MEDIA_AUTHORIZATION_IN_PROGRESS",
        VolteCallState::MediaAuthorized => "MEDIA_AUTHORIZED",
        VolteCallState::PolicyInstallationInProgress => "POLICY_INSTALLATION_IN_PROGRESS",
        VolteCallState::PolicyInstalled => "POLICY_INSTALLED",
        VolteCallState::DedicatedBearerCreationInProgress => {
            "DEDICATED_BEARER_CREATION_IN_PROGRESS"
        }
        VolteCallState::DedicatedBearerCreated => "DEDICATED_BEARER_CREATED",
        VolteCallState::Ringing => "RINGING",
        VolteCallState::CallConnected => "CALL_CONNECTED",
        VolteCallState::MediaActive => "MEDIA_ACTIVE",
        VolteCallState::CallReleased => "CALL_RELEASED",
        VolteCallState::Failed => "FAILED",
    }
}

impl ProcedureMachine for VolteCallMachine {
    fn process_message(&mut self, msg: &ParsedMessage) -> bool {
        match self.state {
            VolteCallState::Idle => {
                if msg.kind == MessageKind::SipInvite {
                    self.start_time = msg.timestamp;
                    self.invite_time = msg.timestamp;
                    self.metrics.sip_call_id = msg.hints.sip_call_id.clone();
                    self.metrics.imsi = msg.hints.imsi.clone();
                    self.metrics.calling_number = msg.field_str("from").map(str::to_string);
                    self.metrics.called_number = msg.field_str("to").map(str::to_string);
                    self.metrics.icid = msg
                        .fields
                        .get("p_charging_vector")
                        .and_then(Value::as_object)
                        .and_then(|pcv| pcv.get("icid"))
                        .and_then(Value::as_str)
                        .map(str::to_string);

                    record_step(&mut self.steps, "SIP INVITE", msg, true);
                    self.transition(VolteCallState::InviteSent);
                    return true;
                }
            }

            VolteCallState::InviteSent => {
                if msg.kind == MessageKind::SipTrying {
                    self.metrics.invite_to_trying_ms =
                        msg.timestamp.millis_since(self.invite_time);
                    record_step(&mut self.steps, "SIP 100 Trying", msg, true);
                    self.transition(VolteCallState::TryingReceived);
                    return true;
                }
                // A capture that missed the 100 Trying can still progress.
                if msg.kind == MessageKind::DiameterAar {
                    self.on_rx_aar(msg);
                    return true;
                }
            }

            VolteCallState::TryingReceived => {
                if msg.kind == MessageKind::DiameterAar {
                    self.on_rx_aar(msg);
                    return true;
                }
            }

            VolteCallState::MediaAuthorizationInProgress => {
                if msg.kind == MessageKind::DiameterAaa {
                    self.metrics.media_authorization_time_ms =
                        msg.timestamp.millis_since(self.rx_aar_time);
                    record_step(&mut self.steps, "Diameter Rx AAA", msg, true);
                    self.transition(VolteCallState::MediaAuthorized);
                    return true;
                }
            }

            VolteCallState::MediaAuthorized => {
                if msg.kind == MessageKind::DiameterRar {
                    self.gx_rar_time = msg.timestamp;
                    if let Some(qos) = msg.fields.get("qos").and_then(Value::as_object) {
                        self.metrics.dedicated_bearer_qci = qos
                            .get("qci")
                            .and_then(Value::as_u64)
                            .map(|v| v as u8);
                        self.metrics.guaranteed_bitrate_ul_kbps = qos
                            .get("gbr_ul")
                            .and_then(Value::as_u64)
                            .map(|v| v as u32);
                        self.metrics.guaranteed_bitrate_dl_kbps = qos
                            .get("gbr_dl")
                            .and_then(Value::as_u64)
                            .map(|v| v as u32);
                    }
                    record_step(&mut self.steps, "Diameter Gx RAR", msg, true);
                    self.transition(VolteCallState::PolicyInstallationInProgress);
                    return true;
                }
            }

            VolteCallState::PolicyInstallationInProgress => {
                if msg.kind == MessageKind::DiameterRaa {
                    self.metrics.policy_installation_time_ms =
                        msg.timestamp.millis_since(self.gx_rar_time);
                    record_step(&mut self.steps, "Diameter Gx RAA", msg, true);
                    self.transition(VolteCallState::PolicyInstalled);
                    return true;
                }
            }

            VolteCallState::PolicyInstalled => {
                if msg.kind == MessageKind::GtpCreateBearerRequest {
                    self.bearer_req_time = msg.timestamp;
                    record_step(&mut self.steps, "GTP Create Bearer Request", msg, true);
                    self.transition(VolteCallState::DedicatedBearerCreationInProgress);
                    return true;
                }
            }

            VolteCallState::DedicatedBearerCreationInProgress => {
                if msg.kind == MessageKind::GtpCreateBearerResponse {
                    self.metrics.dedicated_bearer_setup_time_ms =
                        msg.timestamp.millis_since(self.bearer_req_time);
                    self.metrics.dedicated_bearer_teid = msg.hints.teid_s1u;
                    record_step(&mut self.steps, "GTP Create Bearer Response", msg, true);
                    self.transition(VolteCallState::DedicatedBearerCreated);
                    return true;
                }
            }

            VolteCallState::DedicatedBearerCreated => {
                if msg.kind == MessageKind::SipRinging {
                    self.metrics.post_dial_delay_ms =
                        msg.timestamp.millis_since(self.invite_time);
                    record_step(&mut self.steps, "SIP 180 Ringing", msg, true);
                    self.transition(VolteCallState::Ringing);
                    return true;
                }
            }

            VolteCallState::Ringing => {
                if msg.kind == MessageKind::SipOk {
                    self.ok_time = msg.timestamp;
                    self.metrics.call_setup_time_ms =
                        msg.timestamp.millis_since(self.invite_time);
                    record_step(&mut self.steps, "SIP 200 OK", msg, true);
                    self.transition(VolteCallState::CallConnected);
                    return true;
                }
                if msg.kind == MessageKind::SipBye || msg.kind == MessageKind::SipCancel {
                    record_step(&mut self.steps, "Call Rejected/Cancelled", msg, false);
                    self.transition(VolteCallState::Failed);
                    return true;
                }
            }

            VolteCallState::CallConnected => {
                if msg.kind == MessageKind::SipAck {
                    // ACK is recorded without a transition.
                    record_step(&mut self.steps, "SIP ACK", msg, true);
                    return false;
                }
                if msg.protocol == Protocol::Rtp {
                    self.end_time = msg.timestamp;
                    self.metrics.answer_to_media_ms = msg.timestamp.millis_since(self.ok_time);
                    self.metrics.rtp_ssrc = msg.hints.rtp_ssrc;

                    record_step(&mut self.steps, "RTP Media Start", msg, true);
                    self.transition(VolteCallState::MediaActive);

                    info!(
                        call_id = self.metrics.sip_call_id.as_deref().unwrap_or("unknown"),
                        setup_ms = self.metrics.call_setup_time_ms,
                        pdd_ms = self.metrics.post_dial_delay_ms,
                        "volte call setup completed"
                    );
                    return true;
                }
            }

            VolteCallState::MediaActive => {
                if msg.kind == MessageKind::SipBye {
                    record_step(&mut self.steps, "SIP BYE", msg, true);
                    self.transition(VolteCallState::CallReleased);
                    return true;
                }
            }

            VolteCallState::CallReleased | VolteCallState::Failed => {}
        }

        false
    }

    fn is_complete(&self) -> bool {
        matches!(
            self.state,
            VolteCallState::MediaActive | VolteCallState::CallReleased
        )
    }

    fn is_failed(&self) -> bool {
        self.state == VolteCallState::Failed
    }

    fn kind(&self) -> ProcedureKind {
        ProcedureKind::VolteCallSetup
    }

    fn start_time(&self) -> Timestamp {
        self.start_time
    }

    fn end_time(&self) -> Option<Timestamp> {
        self.is_complete().then_some(self.end_time)
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
            VolteCallState::Idle => "Waiting for INVITE",
            VolteCallState::InviteSent => "INVITE sent, waiting for progress",
            VolteCallState::TryingReceived => "Trying received, waiting for media authorisation",
            VolteCallState::MediaAuthorizationInProgress => "Media authorisation in progress",
            VolteCallState::MediaAuthorized => "Media authorised, waiting for policy push",
            VolteCallState::PolicyInstallationInProgress => "Policy installation in progress",
            VolteCallState::PolicyInstalled => "Policy installed, waiting for dedicated bearer",
            VolteCallState::DedicatedBearerCreationInProgress => {
                "Dedicated bearer creation in progress"
            }
            VolteCallState::DedicatedBearerCreated => "Dedicated bearer created, waiting for ring",
            VolteCallState::Ringing => "Ringing",
            VolteCallState::CallConnected => "Call connected, waiting for media",
            VolteCallState::MediaActive => "Media flowing",
            VolteCallState::CallReleased => "Call released",
            VolteCallState::Failed => "Call setup failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(protocol: Protocol, kind: MessageKind, millis: i64) -> ParsedMessage {
        ParsedMessage::new(1, Timestamp::from_millis(millis), protocol, kind)
    }

    fn run_complete_setup() -> VolteCallMachine {
        let mut machine = VolteCallMachine::new();
        let invite = msg(Protocol::Sip, MessageKind::SipInvite, 0)
            .with_call_id("abc@d")
            .with_field("from", serde_json::json!("+14155551234"))
            .with_field("to", serde_json::json!("+14155555678"))
            .with_field(
                "p_charging_vector",
                serde_json::json!({ "icid": "icid-1234" }),
            );
        assert!(machine.process_message(&invite));
        assert!(machine.process_message(&msg(Protocol::Sip, MessageKind::SipTrying, 50)));
        assert!(machine.process_message(&msg(Protocol::Diameter, MessageKind::DiameterAar, 100)));
        assert!(machine.process_message(&msg(Protocol::Diameter, MessageKind::DiameterAaa, 150)));
        let rar = msg(Protocol::Diameter, MessageKind::DiameterRar, 200).with_field(
            "qos",
            serde_json::json!({ "qci": 1, "gbr_ul": 64, "gbr_dl": 64 }),
        );
        assert!(machine.process_message(&rar));
        assert!(machine.process_message(&msg(Protocol::Diameter, MessageKind::DiameterRaa, 250)));
        assert!(machine.process_message(&msg(
            Protocol::GtpC,
            MessageKind::GtpCreateBearerRequest,
            300
        )));
        assert!(machine.process_message(
            &msg(Protocol::GtpC, MessageKind::GtpCreateBearerResponse, 400).with_teid(Teid(0x3000))
        ));
        assert!(machine.process_message(&msg(Protocol::Sip, MessageKind::SipRinging, 2000)));
        assert!(machine.process_message(&msg(Protocol::Sip, MessageKind::SipOk, 3000)));
        // ACK recorded, no transition.
        assert!(!machine.process_message(&msg(Protocol::Sip, MessageKind::SipAck, 3020)));
        assert!(machine.process_message(
            &msg(Protocol::Rtp, MessageKind::RtpPacket, 3100).with_ssrc(Ssrc(0x1234))
        ));
        machine
    }

    #[test]
    fn test_complete_setup_reaches_media_active() {
        let machine = run_complete_setup();
        assert!(machine.is_complete());
        assert_eq!(machine.state(), VolteCallState::MediaActive);
    }

    #[test]
    fn test_setup_metrics() {
        let machine = run_complete_setup();
        let m = machine.metrics();
        assert_eq!(m.invite_to_trying_ms, 50);
        assert_eq!(m.media_authorization_time_ms, 50);
        assert_eq!(m.policy_installation_time_ms, 50);
        assert_eq!(m.dedicated_bearer_setup_time_ms, 100);
        assert_eq!(m.post_dial_delay_ms, 2000);
        assert_eq!(m.call_setup_time_ms, 3000);
        assert_eq!(m.answer_to_media_ms, 100);
        assert_eq!(m.sip_call_id.as_deref(), Some("abc@d"));
        assert_eq!(m.icid.as_deref(), Some("icid-1234"));
        assert_eq!(m.dedicated_bearer_qci, Some(1));
        assert_eq!(m.dedicated_bearer_teid, Some(Teid(0x3000)));
        assert_eq!(m.rtp_ssrc, Some(Ssrc(0x1234)));
        assert_eq!(m.guaranteed_bitrate_ul_kbps, Some(64));
    }

    #[test]
    fn test_ack_recorded_without_transition() {
        let machine = run_complete_setup();
        assert!(machine.steps().iter().any(|s| s.step_name == "SIP ACK"));
    }

    #[test]
    fn test_cancel_before_answer_fails() {
        let mut machine = VolteCallMachine::new();
        machine.process_message(&msg(Protocol::Sip, MessageKind::SipInvite, 0));
        machine.process_message(&msg(Protocol::Sip, MessageKind::SipTrying, 50));
        machine.process_message(&msg(Protocol::Diameter, MessageKind::DiameterAar, 100));
        machine.process_message(&msg(Protocol::Diameter, MessageKind::DiameterAaa, 150));
        machine.process_message(&msg(Protocol::Diameter, MessageKind::DiameterRar, 200));
        machine.process_message(&msg(Protocol::Diameter, MessageKind::DiameterRaa, 250));
        machine.process_message(&msg(Protocol::GtpC, MessageKind::GtpCreateBearerRequest, 300));
        machine.process_message(&msg(Protocol::GtpC, MessageKind::GtpCreateBearerResponse, 400));
        machine.process_message(&msg(Protocol::Sip, MessageKind::SipRinging, 2000));
        machine.process_message(&msg(Protocol::Sip, MessageKind::SipCancel, 2500));

        assert!(machine.is_failed());
    }

    #[test]
    fn test_bye_after_media_releases() {
        let mut machine = run_complete_setup();
        assert!(machine.process_message(&msg(Protocol::Sip, MessageKind::SipBye, 303_000)));
        assert_eq!(machine.state(), VolteCallState::CallReleased);
        assert!(machine.is_complete());
    }

    #[test]
    fn test_missing_trying_skips_to_aar() {
        let mut machine = VolteCallMachine::new();
        machine.process_message(&msg(Protocol::Sip, MessageKind::SipInvite, 0));
        assert!(machine.process_message(&msg(Protocol::Diameter, MessageKind::DiameterAar, 100)));
        assert_eq!(
            machine.state(),
            VolteCallState::MediaAuthorizationInProgress
        );
    }
}
