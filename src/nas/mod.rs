//! NAS (EMM/ESM) correlation: header and IE parsing, per-UE sessions with
//! EMM state tracking, and IMS PDN detection.

pub mod correlator;
pub mod ies;
pub mod message;
pub mod session;
pub mod types;

pub use correlator::{NasCorrelator, NasStats, NasTransport};
pub use ies::{MobileIdentity, Tai};
pub use message::{NasDirection, NasMessage};
pub use session::{EmmState, NasSession, NasSessionType};
pub use types::{
    classify_pdn_from_apn, EmmCause, EmmMessageType, EsmCause, EsmMessageType, MobileIdentityType,
    NasPdnType, NasProtocolDiscriminator, NasSecurityHeader, PdnClass,
};
