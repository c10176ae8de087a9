//! Procedure state machines: typed recognisers for standard 3GPP
//! procedures, plus the detector that routes messages to them.

pub mod detector;
pub mod fiveg_registration;
pub mod lte_attach;
pub mod volte_call;
pub mod x2_handover;

pub use detector::{ProcedureDetector, ProcedureHandle};
pub use fiveg_registration::FiveGRegistrationMachine;
pub use lte_attach::LteAttachMachine;
pub use volte_call::VolteCallMachine;
pub use x2_handover::X2HandoverMachine;

use crate::message::{MessageKind, ParsedMessage};
use crate::types::Timestamp;
use serde::Serialize;
use serde_json::{json, Value};

/// Procedure family a state machine recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProcedureKind {
    LteAttach,
    X2Handover,
    VolteCallSetup,
    FiveGRegistration,
}

impl ProcedureKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProcedureKind::LteAttach => "LTE_ATTACH",
            ProcedureKind::X2Handover => "X2_HANDOVER",
            ProcedureKind::VolteCallSetup => "VOLTE_CALL_SETUP",
            ProcedureKind::FiveGRegistration => "5G_REGISTRATION",
        }
    }
}

/// One accepted message in a procedure's trace.
#[derive(Debug, Clone, Serialize)]
pub struct ProcedureStep {
    pub step_name: String,
    pub message_kind: MessageKind,
    pub frame_number: u32,
    pub timestamp: Timestamp,
    pub latency_from_previous_ms: Option<i64>,
    /// False when the step was a reject/failure deviation from the
    /// canonical sequence.
    pub expected: bool,
}

/// Common contract of all procedure state machines.
///
/// A machine that cannot accept a message in its current state simply does
/// not claim it: no transition, no step recorded, `process_message` returns
/// false. The procedure detector then decides whether the message starts a
/// new procedure instead.
pub trait ProcedureMachine: Send {
    /// Feeds one message; returns true when the state changed.
    fn process_message(&mut self, msg: &ParsedMessage) -> bool;

    fn is_complete(&self) -> bool;

    fn is_failed(&self) -> bool;

    fn kind(&self) -> ProcedureKind;

    fn start_time(&self) -> Timestamp;

    /// Completion time; `None` until the procedure reaches its end state.
    fn end_time(&self) -> Option<Timestamp>;

    fn duration_ms(&self) -> Option<i64> {
        self.end_time().map(|end| end.millis_since(self.start_time()))
    }

    fn steps(&self) -> &[ProcedureStep];

    /// Typed metrics block as JSON.
    fn metrics_json(&self) -> Value;

    /// Stable textual state name.
    fn state_name(&self) -> &'static str;

    /// Human-readable state description.
    fn state_description(&self) -> &'static str;

    /// Full procedure dump: state, metrics and the step trace.
    fn to_json(&self) -> Value {
        json!({
            "procedure": self.kind().name(),
            "state": self.state_name(),
            "state_description": self.state_description(),
            "complete": self.is_complete(),
            "failed": self.is_failed(),
            "metrics": self.metrics_json(),
            "steps": self.steps(),
        })
    }
}

/// Records a step with the latency from the previous step.
pub(crate) fn record_step(
    steps: &mut Vec<ProcedureStep>,
    step_name: &str,
    msg: &ParsedMessage,
    expected: bool,
) {
    let latency = steps
        .last()
        .map(|prev| msg.timestamp.millis_since(prev.timestamp));
    steps.push(ProcedureStep {
        step_name: step_name.to_string(),
        message_kind: msg.kind,
        frame_number: msg.frame_number,
        timestamp: msg.timestamp,
        latency_from_previous_ms: latency,
        expected,
    });
}
