//! # rs-callflow
//!
//! A multi-protocol correlation engine that reconstructs end-to-end
//! mobile-network call flows from parsed signalling traffic.
//!
//! Given streams of parsed SIP, Diameter, GTPv2-C, NAS (EMM/ESM), S1AP and
//! RTP messages, the engine produces a correlated view: which subscriber
//! did what, on which bearers, over which interfaces, with what timing and
//! quality. Wire capture and per-protocol ASN.1/binary decoding are
//! external concerns; messages arrive with their fields already extracted.
//!
//! ## Architecture
//!
//! - [`identity`] - identifier normalisers (MSISDN, IMSI, IMEI, GUTI), the
//!   merged per-subscriber context graph, and tiered identity matching
//! - [`sip`], [`diameter`], [`nas`], [`s1ap`], [`rtp`], [`gtpv2`] -
//!   per-protocol correlators, each grouping messages into sessions with
//!   typed queries
//! - [`tunnel`] - GTP bearer lifecycle tracking with handover detection
//! - [`procedure`] - state machines recognising LTE Attach, X2 Handover,
//!   VoLTE Call Setup and 5G Registration, plus the detector that routes
//!   messages to them
//! - [`volte`] - the six-phase inter-protocol pipeline joining everything
//!   into call flows
//! - [`ladder`] - participant detection and time-ordered ladder diagram
//!   assembly
//!
//! ## Quick Start
//!
//! ```rust
//! use rs_callflow::correlator::Correlator;
//! use rs_callflow::identity::SubscriberContextManager;
//! use rs_callflow::message::MessageKind;
//! use rs_callflow::sip::{SipCorrelator, SipMessage};
//! use rs_callflow::types::Timestamp;
//! use std::sync::Arc;
//!
//! let subscribers = Arc::new(SubscriberContextManager::new());
//! let sip = SipCorrelator::with_context_manager(subscribers.clone());
//!
//! let mut invite = SipMessage::new(
//!     1,
//!     Timestamp::from_secs_f64(100.0),
//!     MessageKind::SipInvite,
//!     "abc@ims.example.com",
//! );
//! invite.from_uri = "sip:+14155551234@ims.example.com".to_string();
//! invite.to_uri = "sip:+14155555678@ims.example.com".to_string();
//! sip.add_message(invite);
//! sip.finalize();
//!
//! let session = sip.find_by_call_id("abc@ims.example.com").unwrap();
//! assert_eq!(session.caller_msisdn.international, "14155551234");
//! ```

pub mod correlator;
pub mod diameter;
pub mod error;
pub mod gtpv2;
pub mod identity;
pub mod ladder;
pub mod message;
pub mod nas;
pub mod procedure;
pub mod rtp;
pub mod s1ap;
pub mod sip;
pub mod tunnel;
pub mod types;
pub mod volte;
