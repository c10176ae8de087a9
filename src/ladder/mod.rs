//! Ladder diagram assembly: participant detection, interface
//! identification and time-ordered event construction.

pub mod generator;
pub mod participant;
pub mod types;

pub use generator::{identify_interface, LadderDiagramGenerator};
pub use participant::ParticipantDetector;
pub use types::{
    LadderDiagram, LadderEvent, LadderMetrics, MessageDirection, ParticipantInfo, ParticipantType,
    ProcedureGroup,
};
