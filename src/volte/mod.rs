//! VoLTE inter-protocol correlation: the six-phase pipeline joining SIP,
//! Diameter, GTPv2, NAS and RTP sessions into call flows.

pub mod correlator;
pub mod json;
pub mod types;

pub use correlator::{VolteCorrelator, VolteStats, DEFAULT_TIME_TOLERANCE_MS};
pub use json::{call_flow_to_json, call_flows_to_json};
pub use types::{VolteCallFlow, VolteFlowStats, VolteFlowType, VolteParty};
