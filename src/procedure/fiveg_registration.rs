//! 5G registration procedure state machine.
//!
//! The 5G analogue of the LTE attach, minus the GTP leg:
//! NGAP Initial UE Message / Registration Request, authentication,
//! security mode, initial context setup, Registration Accept / Complete.

use crate::message::{MessageKind, ParsedMessage};
use crate::procedure::{record_step, ProcedureKind, ProcedureMachine, ProcedureStep};
use crate::types::Timestamp;
use serde_json::{json, Value};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiveGRegistrationState {
    Idle,
    RegistrationRequested,
    AuthenticationInProgress,
    AuthenticationComplete,
    SecurityModeInProgress,
    SecurityModeComplete,
    InitialContextSetupInProgress,
    RegistrationAccepted,
    Registered,
    Failed,
}

/// Metrics for one 5G registration.
#[derive(Debug, Clone, Default)]
pub struct FiveGRegistrationMetrics {
    pub total_registration_time_ms: i64,
    pub supi: Option<String>,
    pub amf_ue_ngap_id: Option<u64>,
    pub ran_ue_ngap_id: Option<u64>,
}

impl FiveGRegistrationMetrics {
    fn to_json(&self) -> Value {
        let mut j = json!({
            "timings": {
                "total_registration_time_ms": self.total_registration_time_ms,
            },
        });
        if let Some(supi) = &self.supi {
            j["supi"] = json!(supi);
        }
        if let Some(id) = self.amf_ue_ngap_id {
            j["amf_ue_ngap_id"] = json!(id);
        }
        if let Some(id) = self.ran_ue_ngap_id {
            j["ran_ue_ngap_id"] = json!(id);
        }
        j
    }
}

/// State machine for the 5G registration procedure.
pub struct FiveGRegistrationMachine {
    state: FiveGRegistrationState,
    metrics: FiveGRegistrationMetrics,
    steps: Vec<ProcedureStep>,
    start_time: Timestamp,
    end_time: Timestamp,
}

impl FiveGRegistrationMachine {
    pub fn new() -> Self {
        FiveGRegistrationMachine {
            state: FiveGRegistrationState::Idle,
            metrics: FiveGRegistrationMetrics::default(),
            steps: Vec::new(),
            start_time: Timestamp::default(),
            end_time: Timestamp::default(),
        }
    }

    pub fn state(&self) -> FiveGRegistrationState {
        self.state
    }

    pub fn metrics(&self) -> &FiveGRegistrationMetrics {
        &self.metrics
    }

    fn transition(&mut self, new_state: FiveGRegistrationState) {
        debug!(from = self.state_name(), to = state_name(new_state), "5g registration transition");
        self.state = new_state;
    }
}

impl Default for FiveGRegistrationMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn state_name(state: FiveGRegistrationState) -> &'static str {
    match state {
        FiveGRegistrationState::Idle => "IDLE",
        FiveGRegistrationState::RegistrationRequested => "REGISTRATION_REQUESTED",
        FiveGRegistrationState::AuthenticationInProgress => "AUTHENTICATION_IN_PROGRESS",
        FiveGRegistrationState::AuthenticationComplete => "AUTHENTICATION_COMPLETE",
        FiveGRegistrationState::SecurityModeInProgress => "SECURITY_MODE_IN_PROGRESS",
        FiveGRegistrationState::SecurityModeComplete => "SECURITY_MODE_COMPLETE",
        FiveGRegistrationState::InitialContextSetupInProgress => {
            "INITIAL_CONTEXT_SETUP_IN_PROGRESS"
        }
        FiveGRegistrationState::RegistrationAccepted => "REGISTRATION_ACCEPTED",
        FiveGRegistrationState::Registered => "REGISTERED",
        FiveGRegistrationState::Failed => "FAILED",
    }
}

impl ProcedureMachine for FiveGRegistrationMachine {
    fn process_message(&mut self, msg: &ParsedMessage) -> bool {
        match self.state {
            FiveGRegistrationState::Idle => {
                if msg.kind == MessageKind::NgapInitialUeMessage
                    && msg.has_nas(MessageKind::Nas5gRegistrationRequest)
                {
                    self.start_time = msg.timestamp;
                    self.metrics.supi = msg.hints.supi.clone().or_else(|| msg.hints.imsi.clone());
                    self.metrics.amf_ue_ngap_id = msg.hints.amf_ue_ngap_id;
                    self.metrics.ran_ue_ngap_id = msg.hints.ran_ue_ngap_id;

                    record_step(&mut self.steps, "Registration Request", msg, true);
                    self.transition(FiveGRegistrationState::RegistrationRequested);
                    return true;
                }
            }

            FiveGRegistrationState::RegistrationRequested => {
                if msg.kind == MessageKind::NgapDownlinkNasTransport
                    && msg.has_nas(MessageKind::Nas5gAuthenticationRequest)
                {
                    record_step(&mut self.steps, "Authentication Request", msg, true);
                    self.transition(FiveGRegistrationState::AuthenticationInProgress);
                    return true;
                }
            }

            FiveGRegistrationState::AuthenticationInProgress => {
                if msg.kind == MessageKind::NgapUplinkNasTransport
                    && msg.has_nas(MessageKind::Nas5gAuthenticationResponse)
                {
                    record_step(&mut self.steps, "Authentication Response", msg, true);
                    self.transition(FiveGRegistrationState::AuthenticationComplete);
                    return true;
                }
            }

            FiveGRegistrationState::AuthenticationComplete => {
                if msg.kind == MessageKind::NgapDownlinkNasTransport
                    && msg.has_nas(MessageKind::Nas5gSecurityModeCommand)
                {
                    record_step(&mut self.steps, "Security Mode Command", msg, true);
                    self.transition(FiveGRegistrationState::SecurityModeInProgress);
                    return true;
                }
            }

            FiveGRegistrationState::SecurityModeInProgress => {
                if msg.kind == MessageKind::NgapUplinkNasTransport
                    && msg.has_nas(MessageKind::Nas5gSecurityModeComplete)
                {
                    record_step(&mut self.steps, "Security Mode Complete", msg, true);
                    self.transition(FiveGRegistrationState::SecurityModeComplete);
                    return true;
                }
            }

            FiveGRegistrationState::SecurityModeComplete => {
                if msg.kind == MessageKind::NgapInitialContextSetupRequest {
                    record_step(&mut self.steps, "Initial Context Setup Request", msg, true);
                    self.transition(FiveGRegistrationState::InitialContextSetupInProgress);
                    return true;
                }
            }

            FiveGRegistrationState::InitialContextSetupInProgress => {
                if msg.kind == MessageKind::NgapInitialContextSetupResponse {
                    record_step(&mut self.steps, "Initial Context Setup Response", msg, true);
                    return false;
                }
                if msg.kind == MessageKind::NgapDownlinkNasTransport
                    && msg.has_nas(MessageKind::Nas5gRegistrationAccept)
                {
                    record_step(&mut self.steps, "Registration Accept", msg, true);
                    self.transition(FiveGRegistrationState::RegistrationAccepted);
                    return true;
                }
                if msg.kind == MessageKind::NgapDownlinkNasTransport
                    && msg.has_nas(MessageKind::Nas5gRegistrationReject)
                {
                    record_step(&mut self.steps, "Registration Reject", msg, false);
                    self.transition(FiveGRegistrationState::Failed);
                    return true;
                }
            }

            FiveGRegistrationState::RegistrationAccepted => {
                if msg.kind == MessageKind::NgapUplinkNasTransport
                    && msg.has_nas(MessageKind::Nas5gRegistrationComplete)
                {
                    self.end_time = msg.timestamp;
                    self.metrics.total_registration_time_ms =
                        msg.timestamp.millis_since(self.start_time);

                    record_step(&mut self.steps, "Registration Complete", msg, true);
                    self.transition(FiveGRegistrationState::Registered);

                    info!(
                        supi = self.metrics.supi.as_deref().unwrap_or("unknown"),
                        total_ms = self.metrics.total_registration_time_ms,
                        "5g registration completed"
                    );
                    return true;
                }
            }

            FiveGRegistrationState::Registered | FiveGRegistrationState::Failed => {}
        }

        false
    }

    fn is_complete(&self) -> bool {
        self.state == FiveGRegistrationState::Registered
    }

    fn is_failed(&self) -> bool {
        self.state == FiveGRegistrationState::Failed
    }

    fn kind(&self) -> ProcedureKind {
        ProcedureKind::FiveGRegistration
    }

    fn start_time(&self) -> Timestamp {
        self.start_time
    }

    fn end_time(&self) -> Option<Timestamp> {
        (self.state == FiveGRegistrationState::Registered).then_some(self.end_time)
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
            FiveGRegistrationState::Idle => "Waiting for Registration Request",
            FiveGRegistrationState::RegistrationRequested => {
                "Registration requested, waiting for authentication"
            }
            FiveGRegistrationState::AuthenticationInProgress => "Authentication in progress",
            FiveGRegistrationState::AuthenticationComplete => {
                "Authentication complete, waiting for security mode"
            }
            FiveGRegistrationState::SecurityModeInProgress => "Security mode command in progress",
            FiveGRegistrationState::SecurityModeComplete => {
                "Security established, waiting for context setup"
            }
            FiveGRegistrationState::InitialContextSetupInProgress => {
                "Initial context setup in progress"
            }
            FiveGRegistrationState::RegistrationAccepted => {
                "Registration accepted, waiting for completion"
            }
            FiveGRegistrationState::Registered => "Registration completed successfully",
            FiveGRegistrationState::Failed => "Registration failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Protocol;

    fn ngap(kind: MessageKind, nas: MessageKind, millis: i64) -> ParsedMessage {
        ParsedMessage::new(1, Timestamp::from_millis(millis), Protocol::Ngap, kind).with_nas(nas)
    }

    fn run_complete_registration() -> FiveGRegistrationMachine {
        let mut machine = FiveGRegistrationMachine::new();
        let mut initial = ngap(
            MessageKind::NgapInitialUeMessage,
            MessageKind::Nas5gRegistrationRequest,
            0,
        )
        .with_supi("imsi-310260123456789");
        initial.hints.amf_ue_ngap_id = Some(77);
        initial.hints.ran_ue_ngap_id = Some(88);
        assert!(machine.process_message(&initial));

        assert!(machine.process_message(&ngap(
            MessageKind::NgapDownlinkNasTransport,
            MessageKind::Nas5gAuthenticationRequest,
            40
        )));
        assert!(machine.process_message(&ngap(
            MessageKind::NgapUplinkNasTransport,
            MessageKind::Nas5gAuthenticationResponse,
            90
        )));
        assert!(machine.process_message(&ngap(
            MessageKind::NgapDownlinkNasTransport,
            MessageKind::Nas5gSecurityModeCommand,
            130
        )));
        assert!(machine.process_message(&ngap(
            MessageKind::NgapUplinkNasTransport,
            MessageKind::Nas5gSecurityModeComplete,
            170
        )));
        assert!(machine.process_message(&ParsedMessage::new(
            1,
            Timestamp::from_millis(210),
            Protocol::Ngap,
            MessageKind::NgapInitialContextSetupRequest,
        )));
        assert!(machine.process_message(&ngap(
            MessageKind::NgapDownlinkNasTransport,
            MessageKind::Nas5gRegistrationAccept,
            260
        )));
        assert!(machine.process_message(&ngap(
            MessageKind::NgapUplinkNasTransport,
            MessageKind::Nas5gRegistrationComplete,
            320
        )));
        machine
    }

    #[test]
    fn test_complete_registration() {
        let machine = run_complete_registration();
        assert!(machine.is_complete());
        assert_eq!(machine.state(), FiveGRegistrationState::Registered);
        let m = machine.metrics();
        assert_eq!(m.total_registration_time_ms, 320);
        assert_eq!(m.supi.as_deref(), Some("imsi-310260123456789"));
        assert_eq!(m.amf_ue_ngap_id, Some(77));
        assert_eq!(m.ran_ue_ngap_id, Some(88));
        assert_eq!(machine.steps().len(), 8);
    }

    #[test]
    fn test_registration_reject_fails() {
        let mut machine = FiveGRegistrationMachine::new();
        machine.process_message(&ngap(
            MessageKind::NgapInitialUeMessage,
            MessageKind::Nas5gRegistrationRequest,
            0,
        ));
        machine.process_message(&ngap(
            MessageKind::NgapDownlinkNasTransport,
            MessageKind::Nas5gAuthenticationRequest,
            40,
        ));
        machine.process_message(&ngap(
            MessageKind::NgapUplinkNasTransport,
            MessageKind::Nas5gAuthenticationResponse,
            90,
        ));
        machine.process_message(&ngap(
            MessageKind::NgapDownlinkNasTransport,
            MessageKind::Nas5gSecurityModeCommand,
            130,
        ));
        machine.process_message(&ngap(
            MessageKind::NgapUplinkNasTransport,
            MessageKind::Nas5gSecurityModeComplete,
            170,
        ));
        machine.process_message(&ParsedMessage::new(
            1,
            Timestamp::from_millis(210),
            Protocol::Ngap,
            MessageKind::NgapInitialContextSetupRequest,
        ));
        machine.process_message(&ngap(
            MessageKind::NgapDownlinkNasTransport,
            MessageKind::Nas5gRegistrationReject,
            260,
        ));

        assert!(machine.is_failed());
    }
}
