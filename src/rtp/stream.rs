//! RTP stream tracking and voice-quality estimation.
//!
//! One [`RtpStream`] is a unidirectional media stream keyed by SSRC. Jitter
//! follows RFC 3550 Appendix A.8, loss accounting handles 16-bit sequence
//! wraparound, and the MOS estimate is a simplified ITU-T G.107 E-Model
//! driven by codec, loss and jitter.

use crate::types::{Ssrc, Timestamp};
use bitflags::bitflags;
use serde::Serialize;
use std::collections::HashSet;

bitflags! {
    /// RTP header bits carried per packet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RtpFlags: u8 {
        const PADDING = 0b0000_0001;
        const EXTENSION = 0b0000_0010;
        const MARKER = 0b0000_0100;
    }
}

/// One RTP packet as delivered by the decoder.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub frame_number: u32,
    pub timestamp: Timestamp,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub flags: RtpFlags,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub rtp_timestamp: u32,
    pub ssrc: Ssrc,
    pub payload_size: usize,
}

/// Media direction relative to the UE, bound during VoLTE correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RtpDirection {
    Uplink,
    Downlink,
    Unknown,
}

/// Derived per-stream quality metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RtpQualityMetrics {
    pub packets_received: u32,
    pub packets_lost: u32,
    pub packets_out_of_order: u32,
    pub packets_duplicated: u32,
    /// 0.0 - 1.0.
    pub packet_loss_rate: f32,
    pub jitter_ms: f64,
    pub max_jitter_ms: f64,
    /// 1.0 - 4.5 when computable.
    pub estimated_mos: Option<f64>,
    pub payload_type: u8,
    pub codec_name: String,
    pub clock_rate: u32,
    pub first_seq: u16,
    pub last_seq: u16,
    /// Sequence-number wraparounds observed.
    pub seq_cycles: u32,
}

/// A unidirectional RTP stream identified by SSRC.
#[derive(Debug, Clone)]
pub struct RtpStream {
    pub ssrc: Ssrc,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub payload_type: u8,
    pub codec_name: &'static str,
    pub clock_rate: u32,
    pub direction: RtpDirection,
    pub ue_ip: Option<String>,
    pub packets: Vec<RtpPacket>,

    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub start_frame: u32,
    pub end_frame: u32,

    // RFC 3550 A.8 running jitter state, in RTP timestamp units.
    jitter_estimate: f64,
    last_arrival: Timestamp,
    last_rtp_timestamp: u32,
    jitter_initialized: bool,
}

impl RtpStream {
    /// Opens a stream from its first packet.
    pub fn new(first_packet: RtpPacket) -> Self {
        let mut stream = RtpStream {
            ssrc: first_packet.ssrc,
            src_ip: first_packet.src_ip.clone(),
            src_port: first_packet.src_port,
            dst_ip: first_packet.dst_ip.clone(),
            dst_port: first_packet.dst_port,
            payload_type: first_packet.payload_type,
            codec_name: codec_name(first_packet.payload_type),
            clock_rate: clock_rate(first_packet.payload_type),
            direction: RtpDirection::Unknown,
            ue_ip: None,
            packets: Vec::with_capacity(1000),
            start_time: first_packet.timestamp,
            end_time: first_packet.timestamp,
            start_frame: first_packet.frame_number,
            end_frame: first_packet.frame_number,
            jitter_estimate: 0.0,
            last_arrival: Timestamp::default(),
            last_rtp_timestamp: 0,
            jitter_initialized: false,
        };
        stream.add_packet(first_packet);
        stream
    }

    /// Appends a packet. Jitter is order-sensitive: feed packets in capture
    /// order.
    pub fn add_packet(&mut self, packet: RtpPacket) {
        if packet.timestamp < self.start_time {
            self.start_time = packet.timestamp;
            self.start_frame = packet.frame_number;
        }
        if packet.timestamp > self.end_time {
            self.end_time = packet.timestamp;
            self.end_frame = packet.frame_number;
        }

        self.update_jitter(&packet);
        self.packets.push(packet);
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_time.millis_since(self.start_time)
    }

    pub fn set_ue_ip(&mut self, ip: &str) {
        self.ue_ip = Some(ip.to_string());
    }

    /// True when the given IP is one of the stream's endpoints and the UE
    /// binding has been established.
    pub fn is_ue_endpoint(&self, ip: &str) -> bool {
        if self.ue_ip.is_none() {
            return false;
        }
        self.src_ip == ip || self.dst_ip == ip
    }

    /// Computes the derived quality metrics over all packets seen so far.
    pub fn calculate_metrics(&self) -> RtpQualityMetrics {
        let mut metrics = RtpQualityMetrics {
            payload_type: self.payload_type,
            codec_name: self.codec_name.to_string(),
            clock_rate: self.clock_rate,
            ..Default::default()
        };

        if self.packets.is_empty() {
            return metrics;
        }

        metrics.packets_received = self.packets.len() as u32;

        let sequences: Vec<u16> = self.packets.iter().map(|p| p.sequence_number).collect();
        metrics.first_seq = sequences[0];
        metrics.last_seq = sequences[sequences.len() - 1];

        let mut seen = HashSet::new();
        for &seq in &sequences {
            if !seen.insert(seq) {
                metrics.packets_duplicated += 1;
            }
        }

        // Expected packet count from the per-step sequence increments, with
        // 16-bit wraparound handling.
        let mut expected: u32 = 0;
        let mut prev = sequences[0];
        for &curr in &sequences[1..] {
            if curr < prev {
                if prev > 60000 && curr < 5000 {
                    metrics.seq_cycles += 1;
                    expected += (65536 - prev as u32) + curr as u32;
                } else {
                    metrics.packets_out_of_order += 1;
                }
            } else {
                expected += (curr - prev) as u32;
            }
            prev = curr;
        }

        let lost = expected as i64 - seen.len() as i64;
        if lost > 0 {
            metrics.packets_lost = lost as u32;
        }

        let total = metrics.packets_received + metrics.packets_lost;
        if total > 0 {
            metrics.packet_loss_rate = metrics.packets_lost as f32 / total as f32;
        }

        if self.clock_rate > 0 {
            metrics.jitter_ms = self.jitter_estimate / self.clock_rate as f64 * 1000.0;
        }
        metrics.max_jitter_ms = self.max_pairwise_jitter_ms();

        metrics.estimated_mos = Some(estimate_mos(
            self.codec_name,
            metrics.packet_loss_rate,
            metrics.jitter_ms,
        ));

        metrics
    }

    fn update_jitter(&mut self, packet: &RtpPacket) {
        if !self.jitter_initialized {
            self.last_arrival = packet.timestamp;
            self.last_rtp_timestamp = packet.rtp_timestamp;
            self.jitter_initialized = true;
            return;
        }

        // RFC 3550 A.8: D = (Rj - Sj) - (Ri - Si) with arrival converted to
        // RTP timestamp units; J += (|D| - J) / 16.
        let rate = self.clock_rate as f64;
        let transit = packet.timestamp.as_secs_f64() * rate - packet.rtp_timestamp as f64;
        let last_transit =
            self.last_arrival.as_secs_f64() * rate - self.last_rtp_timestamp as f64;
        let d = (transit - last_transit).abs();
        self.jitter_estimate += (d - self.jitter_estimate) / 16.0;

        self.last_arrival = packet.timestamp;
        self.last_rtp_timestamp = packet.rtp_timestamp;
    }

    fn max_pairwise_jitter_ms(&self) -> f64 {
        let mut max_jitter: f64 = 0.0;
        if self.clock_rate == 0 {
            return 0.0;
        }
        for pair in self.packets.windows(2) {
            let arrival_diff =
                pair[1].timestamp.as_secs_f64() - pair[0].timestamp.as_secs_f64();
            let rtp_diff = pair[1].rtp_timestamp.wrapping_sub(pair[0].rtp_timestamp) as f64
                / self.clock_rate as f64;
            let jitter = (arrival_diff - rtp_diff).abs() * 1000.0;
            max_jitter = max_jitter.max(jitter);
        }
        max_jitter
    }
}

/// Codec name by payload type: RFC 3551 static assignments plus the dynamic
/// values commonly seen in VoLTE captures.
pub fn codec_name(payload_type: u8) -> &'static str {
    match payload_type {
        0 => "PCMU",
        3 => "GSM",
        4 => "G723",
        5 => "DVI4-8000",
        6 => "DVI4-16000",
        7 => "LPC",
        8 => "PCMA",
        9 => "G722",
        10 => "L16-2",
        11 => "L16",
        12 => "QCELP",
        13 => "CN",
        14 => "MPA",
        15 => "G728",
        16 => "DVI4-11025",
        17 => "DVI4-22050",
        18 => "G729",
        25 => "CelB",
        26 => "JPEG",
        28 => "nv",
        31 => "H261",
        32 => "MPV",
        33 => "MP2T",
        34 => "H263",
        96 => "AMR",
        97 => "AMR-WB",
        98 => "AMR-WB",
        99 => "H264",
        100 => "VP8",
        101 => "telephone-event",
        102 => "H264",
        103 => "H265",
        pt if (96..=127).contains(&pt) => "dynamic",
        _ => "unknown",
    }
}

/// RTP clock rate by payload type; dynamic types get conservative defaults.
pub fn clock_rate(payload_type: u8) -> u32 {
    match payload_type {
        0 | 3 | 4 | 5 | 7 | 8 | 12 | 13 | 15 | 18 => 8000,
        6 => 16000,
        9 => 8000,
        10 | 11 => 44100,
        14 => 90000,
        16 => 11025,
        17 => 22050,
        25 | 26 | 28 | 31 | 32 | 33 | 34 => 90000,
        96 => 8000,
        97 | 98 => 16000,
        99 | 100 | 102 | 103 => 90000,
        101 => 8000,
        _ => 8000,
    }
}

/// Simplified E-Model (ITU-T G.107): R = 93.2 - Id(jitter) - Ie(codec,
/// loss), mapped to MOS and clamped to [1.0, 4.5].
pub fn estimate_mos(codec: &str, packet_loss_rate: f32, jitter_ms: f64) -> f64 {
    let id = if jitter_ms > 20.0 { 0.024 * jitter_ms } else { 0.0 };

    let ie_codec = match codec {
        "PCMU" | "PCMA" => 0.0,
        "G729" => 11.0,
        "G723" => 15.0,
        "AMR" => 5.0,
        "AMR-WB" => 2.0,
        _ => 5.0,
    };

    let loss_percent = packet_loss_rate as f64 * 100.0;
    let ie_loss = if loss_percent <= 0.0 {
        0.0
    } else if loss_percent < 5.0 {
        2.5 * loss_percent
    } else {
        10.0 + (loss_percent - 5.0) * 5.0
    };

    let r = (93.2 - id - ie_codec - ie_loss).clamp(0.0, 100.0);
    let mos = 1.0 + 0.035 * r + r * (r - 60.0) * (100.0 - r) * 7.0e-6;
    mos.clamp(1.0, 4.5)
}
