//! GTP tunnel lifecycle tracking and handover detection.

pub mod manager;

pub use manager::{
    HandoverEvent, Tunnel, TunnelEvent, TunnelEventKind, TunnelManager, TunnelManagerConfig,
    TunnelState, TunnelStatistics,
};
