//! VoLTE call-flow model.

use crate::types::{Ssrc, Timestamp};
use serde::Serialize;

/// Classified type of a correlated flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VolteFlowType {
    MoVoiceCall,
    MtVoiceCall,
    MoVideoCall,
    MtVideoCall,
    VoiceCallForwarding,
    ConferenceCall,
    MoSms,
    MtSms,
    ImsRegistration,
    SupplementaryService,
    /// Correlated bearer/policy activity without a SIP parent.
    DataSession,
    Unknown,
}

impl VolteFlowType {
    pub fn name(&self) -> &'static str {
        match self {
            VolteFlowType::MoVoiceCall => "MO_VOICE_CALL",
            VolteFlowType::MtVoiceCall => "MT_VOICE_CALL",
            VolteFlowType::MoVideoCall => "MO_VIDEO_CALL",
            VolteFlowType::MtVideoCall => "MT_VIDEO_CALL",
            VolteFlowType::VoiceCallForwarding => "VOICE_CALL_FORWARDING",
            VolteFlowType::ConferenceCall => "CONFERENCE_CALL",
            VolteFlowType::MoSms => "MO_SMS",
            VolteFlowType::MtSms => "MT_SMS",
            VolteFlowType::ImsRegistration => "IMS_REGISTRATION",
            VolteFlowType::SupplementaryService => "SUPPLEMENTARY_SERVICE",
            VolteFlowType::DataSession => "DATA_SESSION",
            VolteFlowType::Unknown => "UNKNOWN",
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self,
            VolteFlowType::MoVoiceCall
                | VolteFlowType::MtVoiceCall
                | VolteFlowType::MoVideoCall
                | VolteFlowType::MtVideoCall
                | VolteFlowType::VoiceCallForwarding
                | VolteFlowType::ConferenceCall
        )
    }
}

/// One call party (UEa = caller, UEb = callee, UEc = forward target).
#[derive(Debug, Clone, Default, Serialize)]
pub struct VolteParty {
    pub msisdn: String,
    pub imsi: Option<String>,
    pub imei: Option<String>,
    pub ip_v4: String,
    pub ip_v6_prefix: String,
    pub role: String,
}

impl VolteParty {
    pub fn with_role(role: &str) -> Self {
        VolteParty {
            role: role.to_string(),
            ..Default::default()
        }
    }
}

/// Per-flow aggregated counters and quality metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VolteFlowStats {
    pub sip_messages: u32,
    pub diameter_messages: u32,
    pub gtp_messages: u32,
    pub nas_messages: u32,
    pub rtp_packets: u32,

    pub setup_time_ms: Option<i64>,
    pub ring_time_ms: Option<i64>,
    pub call_duration_ms: Option<i64>,

    pub rtp_jitter_ms: Option<f64>,
    pub rtp_packet_loss: Option<f64>,
    pub estimated_mos: Option<f64>,
}

/// A correlated multi-protocol view of one subscriber activity.
#[derive(Debug, Clone)]
pub struct VolteCallFlow {
    pub flow_id: String,
    pub flow_type: VolteFlowType,

    pub caller: VolteParty,
    pub callee: VolteParty,
    pub forward_target: Option<VolteParty>,

    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub start_frame: u32,
    pub end_frame: u32,

    /// SIP Call-IDs.
    pub sip_sessions: Vec<String>,
    /// Diameter Session-IDs, tagged with their interface for the JSON split.
    pub diameter_sessions: Vec<(String, crate::diameter::DiameterInterface)>,
    /// GTPv2 session keys.
    pub gtpv2_sessions: Vec<String>,
    /// NAS session keys.
    pub nas_sessions: Vec<String>,
    pub rtp_ssrcs: Vec<Ssrc>,

    pub frame_numbers: Vec<u32>,
    pub stats: VolteFlowStats,
    /// Network elements traversed, in signalling order.
    pub network_path: Vec<String>,
}

impl VolteCallFlow {
    pub fn new(flow_id: String, flow_type: VolteFlowType) -> Self {
        VolteCallFlow {
            flow_id,
            flow_type,
            caller: VolteParty::with_role("UEa"),
            callee: VolteParty::with_role("UEb"),
            forward_target: None,
            start_time: Timestamp::default(),
            end_time: Timestamp::default(),
            start_frame: 0,
            end_frame: 0,
            sip_sessions: Vec::new(),
            diameter_sessions: Vec::new(),
            gtpv2_sessions: Vec::new(),
            nas_sessions: Vec::new(),
            rtp_ssrcs: Vec::new(),
            frame_numbers: Vec::new(),
            stats: VolteFlowStats::default(),
            network_path: Vec::new(),
        }
    }

    pub fn total_frames(&self) -> usize {
        self.frame_numbers.len()
    }

    pub fn involves_msisdn(&self, normalized: &crate::identity::NormalizedMsisdn) -> bool {
        let check = |raw: &str| {
            !raw.is_empty() && crate::identity::msisdn::normalize(raw).matches(normalized)
        };
        check(&self.caller.msisdn)
            || check(&self.callee.msisdn)
            || self
                .forward_target
                .as_ref()
                .map_or(false, |p| check(&p.msisdn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_type_names() {
        assert_eq!(VolteFlowType::MoVoiceCall.name(), "MO_VOICE_CALL");
        assert_eq!(VolteFlowType::DataSession.name(), "DATA_SESSION");
        assert!(VolteFlowType::MoVoiceCall.is_call());
        assert!(!VolteFlowType::MoSms.is_call());
    }

    #[test]
    fn test_default_party_roles() {
        let flow = VolteCallFlow::new("x".to_string(), VolteFlowType::MoVoiceCall);
        assert_eq!(flow.caller.role, "UEa");
        assert_eq!(flow.callee.role, "UEb");
        assert!(flow.forward_target.is_none());
    }

    #[test]
    fn test_involves_msisdn_fuzzy() {
        let mut flow = VolteCallFlow::new("x".to_string(), VolteFlowType::MoVoiceCall);
        flow.caller.msisdn = "+14155551234".to_string();
        let needle = crate::identity::msisdn::normalize("4155551234");
        assert!(flow.involves_msisdn(&needle));
        let other = crate::identity::msisdn::normalize("+4930777888");
        assert!(!flow.involves_msisdn(&other));
    }
}
