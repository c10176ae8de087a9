//! RTP correlation: per-SSRC streams with RFC 3550 jitter, loss accounting
//! and E-Model MOS estimation.

pub mod correlator;
pub mod stream;

pub use correlator::{RtpCorrelator, RtpStats};
pub use stream::{
    clock_rate, codec_name, estimate_mos, RtpDirection, RtpFlags, RtpPacket, RtpQualityMetrics,
    RtpStream,
};
