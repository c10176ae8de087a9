//! Subscriber identity handling: normalisers for the identifier formats
//! seen on the wire, the merged per-subscriber context graph, and tiered
//! identity matching.

pub mod guti;
pub mod imei;
pub mod imsi;
pub mod manager;
pub mod matcher;
pub mod msisdn;
pub mod subscriber;

pub use guti::{Guti4g, Guti5g};
pub use imei::NormalizedImei;
pub use imsi::NormalizedImsi;
pub use manager::{ContextHandle, ManagerStats, SubscriberContextBuilder, SubscriberContextManager};
pub use matcher::{MatchConfidence, MatchResult};
pub use msisdn::NormalizedMsisdn;
pub use subscriber::{NetworkEndpoint, SubscriberIdentity};
