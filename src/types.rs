//! Type-safe wrappers for identifiers and time values shared across the
//! correlation engine.
//!
//! Decoders deliver capture timestamps as floating-point seconds; everything
//! downstream (session windows, procedure latencies, ladder ordering) works
//! on [`Timestamp`], an integer microsecond wall-clock value, and derives
//! durations as integer milliseconds. This keeps inter-event arithmetic
//! exact and comparable.
//!
//! # Examples
//!
//! ```rust
//! use rs_callflow::types::{Ssrc, Teid, Timestamp};
//!
//! let t0 = Timestamp::from_secs_f64(100.000);
//! let t1 = Timestamp::from_secs_f64(100.510);
//! assert_eq!(t1.millis_since(t0), 510);
//!
//! let teid = Teid(0x12345678);
//! assert_eq!(format!("{}", teid), "0x12345678");
//!
//! let ssrc: Ssrc = 0x1234u32.into();
//! assert_eq!(*ssrc, 0x1234);
//! ```

use serde::Serialize;
use std::fmt;
use std::ops::Deref;

// ============================================================================
// Timestamp - wall-clock capture time
// ============================================================================

/// Absolute capture timestamp, microseconds since the Unix epoch.
///
/// Constructed from the decoders' `f64` seconds. Durations between two
/// timestamps are exposed as integer milliseconds or microseconds; the
/// engine never does timing arithmetic in floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Creates a timestamp from raw microseconds since the epoch.
    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Creates a timestamp from a decoder's seconds-since-epoch value.
    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000.0).round() as i64)
    }

    /// Creates a timestamp from milliseconds since the epoch.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1000)
    }

    /// Returns the raw microsecond value.
    #[inline]
    pub const fn micros(&self) -> i64 {
        self.0
    }

    /// Returns whole milliseconds since the epoch.
    #[inline]
    pub const fn millis(&self) -> i64 {
        self.0 / 1000
    }

    /// Returns seconds since the epoch as `f64`, for display only.
    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Elapsed milliseconds since `earlier`. Negative if `earlier` is later.
    #[inline]
    pub const fn millis_since(&self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0) / 1000
    }

    /// Elapsed microseconds since `earlier`.
    #[inline]
    pub const fn micros_since(&self, earlier: Timestamp) -> i64 {
        self.0 - earlier.0
    }

    /// Timestamp shifted by the given number of milliseconds.
    #[inline]
    pub const fn offset_millis(&self, millis: i64) -> Self {
        Self(self.0 + millis * 1000)
    }

    /// True when the timestamp still holds its default zero value, i.e. no
    /// message has been observed yet.
    #[inline]
    pub const fn is_unset(&self) -> bool {
        self.0 == 0
    }
}

impl From<f64> for Timestamp {
    #[inline]
    fn from(secs: f64) -> Self {
        Self::from_secs_f64(secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.as_secs_f64())
    }
}

// ============================================================================
// Teid - GTP Tunnel Endpoint Identifier
// ============================================================================

/// GTP Tunnel Endpoint Identifier - 32-bit identifier.
///
/// Identifies one endpoint of a GTP tunnel. Used as the primary key of the
/// tunnel manager and as a correlation hint on GTPv2-C messages.
///
/// # Examples
///
/// ```rust
/// use rs_callflow::types::Teid;
///
/// let teid = Teid(0x12345678);
/// assert_eq!(*teid, 0x12345678);
/// assert_eq!(format!("{}", teid), "0x12345678");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Teid(pub u32);

impl Teid {
    /// Creates a new TEID with the given value.
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the inner u32 value.
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Teid {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Teid> for u32 {
    #[inline]
    fn from(teid: Teid) -> Self {
        teid.0
    }
}

impl Deref for Teid {
    type Target = u32;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Teid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl fmt::LowerHex for Teid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

// ============================================================================
// Ssrc - RTP synchronisation source
// ============================================================================

/// RTP synchronisation source identifier - 32-bit, keys one media stream.
///
/// # Examples
///
/// ```rust
/// use rs_callflow::types::Ssrc;
///
/// let ssrc = Ssrc(0xDEADBEEF);
/// assert_eq!(format!("{}", ssrc), "0xDEADBEEF");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Ssrc(pub u32);

impl Ssrc {
    /// Creates a new SSRC with the given value.
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the inner u32 value.
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Ssrc {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Ssrc> for u32 {
    #[inline]
    fn from(ssrc: Ssrc) -> Self {
        ssrc.0
    }
}

impl Deref for Ssrc {
    type Target = u32;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Ssrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod timestamp_tests {
        use super::*;

        #[test]
        fn test_timestamp_from_secs_f64() {
            let ts = Timestamp::from_secs_f64(1702396800.123456);
            assert_eq!(ts.micros(), 1702396800123456);
        }

        #[test]
        fn test_timestamp_millis_since() {
            let t0 = Timestamp::from_secs_f64(10.0);
            let t1 = Timestamp::from_secs_f64(10.51);
            assert_eq!(t1.millis_since(t0), 510);
            assert_eq!(t0.millis_since(t1), -510);
        }

        #[test]
        fn test_timestamp_micros_since() {
            let t0 = Timestamp::from_micros(1_000_000);
            let t1 = Timestamp::from_micros(1_000_750);
            assert_eq!(t1.micros_since(t0), 750);
        }

        #[test]
        fn test_timestamp_offset_millis() {
            let t0 = Timestamp::from_millis(1000);
            assert_eq!(t0.offset_millis(500), Timestamp::from_millis(1500));
            assert_eq!(t0.offset_millis(-250), Timestamp::from_millis(750));
        }

        #[test]
        fn test_timestamp_ordering() {
            let t0 = Timestamp::from_secs_f64(1.0);
            let t1 = Timestamp::from_secs_f64(2.0);
            assert!(t0 < t1);
        }

        #[test]
        fn test_timestamp_unset() {
            assert!(Timestamp::default().is_unset());
            assert!(!Timestamp::from_millis(1).is_unset());
        }

        #[test]
        fn test_timestamp_roundtrip_secs() {
            let ts = Timestamp::from_secs_f64(1702396800.5);
            assert!((ts.as_secs_f64() - 1702396800.5).abs() < 1e-6);
        }
    }

    mod teid_tests {
        use super::*;

        #[test]
        fn test_teid_new() {
            let teid = Teid::new(0x12345678);
            assert_eq!(teid.value(), 0x12345678);
        }

        #[test]
        fn test_teid_display() {
            let teid = Teid(0x1000);
            assert_eq!(format!("{}", teid), "0x00001000");
        }

        #[test]
        fn test_teid_conversions() {
            let teid: Teid = 42u32.into();
            let value: u32 = teid.into();
            assert_eq!(value, 42);
        }

        #[test]
        fn test_teid_hash() {
            use std::collections::HashSet;
            let mut set = HashSet::new();
            set.insert(Teid(1));
            set.insert(Teid(2));
            set.insert(Teid(1));
            assert_eq!(set.len(), 2);
        }
    }

    mod ssrc_tests {
        use super::*;

        #[test]
        fn test_ssrc_display() {
            let ssrc = Ssrc(0x1234);
            assert_eq!(format!("{}", ssrc), "0x00001234");
        }

        #[test]
        fn test_ssrc_conversions() {
            let ssrc: Ssrc = 7u32.into();
            assert_eq!(*ssrc, 7);
            let value: u32 = ssrc.into();
            assert_eq!(value, 7);
        }
    }
}
