//! Diameter intra-protocol correlation: sessions keyed by Session-ID,
//! interface detection from the Application-ID.

pub mod correlator;
pub mod session;

pub use correlator::{DiameterCorrelator, DiameterStats};
pub use session::{DiameterInterface, DiameterMessage, DiameterSession};
