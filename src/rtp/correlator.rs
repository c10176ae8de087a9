//! RTP intra-protocol correlator.
//!
//! Groups packets into streams by SSRC. Streams stay direction-less until
//! the VoLTE correlator binds the UE media endpoint negotiated in SDP.

use crate::correlator::Correlator;
use crate::rtp::stream::{RtpDirection, RtpPacket, RtpQualityMetrics, RtpStream};
use crate::types::{Ssrc, Timestamp};
use std::collections::HashMap;
use std::sync::Mutex;

/// RTP correlation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpStats {
    pub total_packets: usize,
    pub total_streams: usize,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<Ssrc, RtpStream>,
    order: Vec<Ssrc>,
    stats: RtpStats,
}

/// Groups RTP packets into per-SSRC streams.
pub struct RtpCorrelator {
    inner: Mutex<Inner>,
}

impl RtpCorrelator {
    pub fn new() -> Self {
        RtpCorrelator {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// All streams in first-seen order.
    pub fn streams(&self) -> Vec<RtpStream> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|ssrc| inner.streams.get(ssrc).cloned())
            .collect()
    }

    pub fn find_by_ssrc(&self, ssrc: Ssrc) -> Option<RtpStream> {
        self.inner.lock().unwrap().streams.get(&ssrc).cloned()
    }

    pub fn metrics_for(&self, ssrc: Ssrc) -> Option<RtpQualityMetrics> {
        self.inner
            .lock()
            .unwrap()
            .streams
            .get(&ssrc)
            .map(|s| s.calculate_metrics())
    }

    /// Binds the UE media endpoint negotiated in SDP to matching streams.
    ///
    /// A stream matches when either endpoint equals `(ue_ip, ue_port)`; its
    /// direction becomes UPLINK when the UE is the source. Matched streams
    /// additionally have to touch `remote_ip` when one is given. Returns the
    /// SSRCs bound, in first-seen order.
    pub fn bind_media_endpoint(
        &self,
        ue_ip: &str,
        ue_port: u16,
        remote_ip: Option<&str>,
    ) -> Vec<Ssrc> {
        let mut inner = self.inner.lock().unwrap();
        let order = inner.order.clone();
        let mut bound = Vec::new();

        for ssrc in order {
            let Some(stream) = inner.streams.get_mut(&ssrc) else {
                continue;
            };

            let ue_is_src = stream.src_ip == ue_ip && (ue_port == 0 || stream.src_port == ue_port);
            let ue_is_dst = stream.dst_ip == ue_ip && (ue_port == 0 || stream.dst_port == ue_port);
            if !ue_is_src && !ue_is_dst {
                continue;
            }
            if let Some(remote) = remote_ip {
                if stream.src_ip != remote && stream.dst_ip != remote {
                    continue;
                }
            }

            stream.set_ue_ip(ue_ip);
            stream.direction = if ue_is_src {
                RtpDirection::Uplink
            } else {
                RtpDirection::Downlink
            };
            bound.push(ssrc);
        }

        bound
    }

    /// Streams whose time window overlaps `[start, end]`.
    pub fn find_in_window(&self, start: Timestamp, end: Timestamp) -> Vec<RtpStream> {
        self.streams()
            .into_iter()
            .filter(|s| s.start_time <= end && s.end_time >= start)
            .collect()
    }

    pub fn stats(&self) -> RtpStats {
        let inner = self.inner.lock().unwrap();
        RtpStats {
            total_packets: inner.stats.total_packets,
            total_streams: inner.streams.len(),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.inner.lock().unwrap().streams.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
    }
}

impl Default for RtpCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator for RtpCorrelator {
    type Message = RtpPacket;

    fn add_message(&self, packet: RtpPacket) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.total_packets += 1;

        let ssrc = packet.ssrc;
        match inner.streams.get_mut(&ssrc) {
            Some(stream) => stream.add_packet(packet),
            None => {
                inner.order.push(ssrc);
                inner.streams.insert(ssrc, RtpStream::new(packet));
            }
        }
    }

    fn finalize(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.total_streams = inner.streams.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::stream::RtpFlags;

    fn packet(ssrc: u32, seq: u16, millis: i64, src: &str, dst: &str) -> RtpPacket {
        RtpPacket {
            frame_number: seq as u32,
            timestamp: Timestamp::from_millis(millis),
            src_ip: src.to_string(),
            src_port: 49170,
            dst_ip: dst.to_string(),
            dst_port: 49170,
            flags: RtpFlags::MARKER,
            payload_type: 96,
            sequence_number: seq,
            rtp_timestamp: seq as u32 * 160,
            ssrc: Ssrc(ssrc),
            payload_size: 160,
        }
    }

    #[test]
    fn test_groups_by_ssrc() {
        let correlator = RtpCorrelator::new();
        correlator.add_message(packet(0x1234, 0, 0, "10.100.1.50", "10.200.1.1"));
        correlator.add_message(packet(0x1234, 1, 20, "10.100.1.50", "10.200.1.1"));
        correlator.add_message(packet(0x5678, 0, 0, "10.200.1.1", "10.100.1.50"));
        correlator.finalize();

        assert_eq!(correlator.stream_count(), 2);
        assert_eq!(
            correlator.find_by_ssrc(Ssrc(0x1234)).unwrap().packet_count(),
            2
        );
        assert_eq!(correlator.stats().total_packets, 3);
    }

    #[test]
    fn test_bind_media_endpoint_sets_direction() {
        let correlator = RtpCorrelator::new();
        correlator.add_message(packet(0x1234, 0, 0, "10.100.1.50", "10.200.1.1"));
        correlator.add_message(packet(0x5678, 0, 0, "10.200.1.1", "10.100.1.50"));

        let bound = correlator.bind_media_endpoint("10.100.1.50", 49170, None);
        assert_eq!(bound, vec![Ssrc(0x1234), Ssrc(0x5678)]);

        assert_eq!(
            correlator.find_by_ssrc(Ssrc(0x1234)).unwrap().direction,
            RtpDirection::Uplink
        );
        assert_eq!(
            correlator.find_by_ssrc(Ssrc(0x5678)).unwrap().direction,
            RtpDirection::Downlink
        );
    }

    #[test]
    fn test_bind_media_endpoint_filters_by_remote() {
        let correlator = RtpCorrelator::new();
        correlator.add_message(packet(0x1234, 0, 0, "10.100.1.50", "10.200.1.1"));
        correlator.add_message(packet(0x9999, 0, 0, "10.100.1.50", "10.9.9.9"));

        let bound = correlator.bind_media_endpoint("10.100.1.50", 49170, Some("10.200.1.1"));
        assert_eq!(bound, vec![Ssrc(0x1234)]);
    }

    #[test]
    fn test_bind_media_endpoint_port_mismatch() {
        let correlator = RtpCorrelator::new();
        correlator.add_message(packet(0x1234, 0, 0, "10.100.1.50", "10.200.1.1"));
        assert!(correlator
            .bind_media_endpoint("10.100.1.50", 40000, None)
            .is_empty());
    }

    #[test]
    fn test_find_in_window() {
        let correlator = RtpCorrelator::new();
        correlator.add_message(packet(0x1234, 0, 1000, "a", "b"));
        correlator.add_message(packet(0x1234, 1, 2000, "a", "b"));

        assert_eq!(
            correlator
                .find_in_window(Timestamp::from_millis(1500), Timestamp::from_millis(3000))
                .len(),
            1
        );
        assert!(correlator
            .find_in_window(Timestamp::from_millis(3000), Timestamp::from_millis(4000))
            .is_empty());
    }
}
