//! S1AP correlation: per-UE signalling contexts with E-RAB tracking and
//! embedded NAS-PDU extraction.

pub mod context;
pub mod correlator;
pub mod message;

pub use context::{ErabState, S1apContext, S1apContextState};
pub use correlator::{S1apCorrelator, S1apStats};
pub use message::{Ecgi, ErabItem, S1apCauseType, S1apMessage};
