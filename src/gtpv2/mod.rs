//! GTPv2-C correlation: control-plane sessions keyed by the TEID pair,
//! feeding the tunnel manager on every state-changing message.

pub mod correlator;
pub mod session;

pub use correlator::{Gtpv2Correlator, Gtpv2Stats};
pub use session::{BearerContext, Gtpv2Session};
