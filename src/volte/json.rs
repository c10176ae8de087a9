//! JSON shape of correlated call flows.
//!
//! The engine emits in-memory values; this module renders them in the shape
//! downstream consumers (the diagram renderer, exports) expect.

use crate::diameter::DiameterInterface;
use crate::volte::types::{VolteCallFlow, VolteParty};
use serde_json::{json, Map, Value};

fn party_to_json(party: &VolteParty) -> Value {
    let mut j = Map::new();
    j.insert("role".to_string(), json!(party.role));
    if !party.msisdn.is_empty() {
        j.insert("msisdn".to_string(), json!(party.msisdn));
    }
    if let Some(imsi) = &party.imsi {
        j.insert("imsi".to_string(), json!(imsi));
    }
    if let Some(imei) = &party.imei {
        j.insert("imei".to_string(), json!(imei));
    }
    if !party.ip_v4.is_empty() {
        j.insert("ip_v4".to_string(), json!(party.ip_v4));
    }
    if !party.ip_v6_prefix.is_empty() {
        j.insert("ip_v6_prefix".to_string(), json!(party.ip_v6_prefix));
    }
    Value::Object(j)
}

/// Renders one call flow.
pub fn call_flow_to_json(flow: &VolteCallFlow) -> Value {
    let mut parties = Map::new();
    parties.insert("caller".to_string(), party_to_json(&flow.caller));
    parties.insert("callee".to_string(), party_to_json(&flow.callee));
    if let Some(target) = &flow.forward_target {
        parties.insert("forward_target".to_string(), party_to_json(target));
    }

    let mut protocol_sessions = Map::new();
    if !flow.sip_sessions.is_empty() {
        protocol_sessions.insert("sip".to_string(), json!(flow.sip_sessions));
    }
    if !flow.diameter_sessions.is_empty() {
        let mut diameter = Map::new();
        for (session_id, interface) in &flow.diameter_sessions {
            let key = match interface {
                DiameterInterface::Gx => "gx",
                DiameterInterface::Rx => "rx",
                DiameterInterface::Cx => "cx",
                DiameterInterface::Sh => "sh",
                _ => "other",
            };
            if let Some(arr) = diameter
                .entry(key.to_string())
                .or_insert_with(|| Value::Array(Vec::new()))
                .as_array_mut()
            {
                arr.push(json!(session_id));
            }
        }
        protocol_sessions.insert("diameter".to_string(), Value::Object(diameter));
    }
    if !flow.gtpv2_sessions.is_empty() {
        protocol_sessions.insert("gtpv2".to_string(), json!(flow.gtpv2_sessions));
    }
    if !flow.nas_sessions.is_empty() {
        protocol_sessions.insert("nas".to_string(), json!(flow.nas_sessions));
    }
    if !flow.rtp_ssrcs.is_empty() {
        let ssrcs: Vec<u32> = flow.rtp_ssrcs.iter().map(|s| s.value()).collect();
        protocol_sessions.insert("rtp_ssrcs".to_string(), json!(ssrcs));
    }

    let mut timing = Map::new();
    if let Some(ms) = flow.stats.setup_time_ms {
        timing.insert("setup_time_ms".to_string(), json!(ms));
    }
    if let Some(ms) = flow.stats.ring_time_ms {
        timing.insert("ring_time_ms".to_string(), json!(ms));
    }
    if let Some(ms) = flow.stats.call_duration_ms {
        timing.insert("call_duration_ms".to_string(), json!(ms));
    }

    let mut quality = Map::new();
    if let Some(jitter) = flow.stats.rtp_jitter_ms {
        quality.insert("rtp_jitter_ms".to_string(), json!(jitter));
    }
    if let Some(loss) = flow.stats.rtp_packet_loss {
        quality.insert("rtp_packet_loss".to_string(), json!(loss));
    }
    if let Some(mos) = flow.stats.estimated_mos {
        quality.insert("estimated_mos".to_string(), json!(mos));
    }

    json!({
        "flow_id": flow.flow_id,
        "type": flow.flow_type.name(),
        "parties": parties,
        "time_window": {
            "start_time": flow.start_time.as_secs_f64(),
            "end_time": flow.end_time.as_secs_f64(),
            "start_frame": flow.start_frame,
            "end_frame": flow.end_frame,
        },
        "protocol_sessions": protocol_sessions,
        "statistics": {
            "message_counts": {
                "sip": flow.stats.sip_messages,
                "diameter": flow.stats.diameter_messages,
                "gtp": flow.stats.gtp_messages,
                "nas": flow.stats.nas_messages,
                "rtp": flow.stats.rtp_packets,
            },
            "timing": timing,
            "quality": quality,
        },
        "network_path": flow.network_path,
        "total_frames": flow.total_frames(),
    })
}

/// Renders a set of flows as a JSON array.
pub fn call_flows_to_json(flows: &[VolteCallFlow]) -> Value {
    Value::Array(flows.iter().map(call_flow_to_json).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ssrc, Timestamp};
    use crate::volte::types::VolteFlowType;

    fn sample_flow() -> VolteCallFlow {
        let mut flow = VolteCallFlow::new("abc123_0".to_string(), VolteFlowType::MoVoiceCall);
        flow.caller.msisdn = "+14155551234".to_string();
        flow.caller.imsi = Some("310260123456789".to_string());
        flow.caller.ip_v4 = "10.100.1.50".to_string();
        flow.callee.msisdn = "+14155555678".to_string();
        flow.start_time = Timestamp::from_millis(0);
        flow.end_time = Timestamp::from_millis(304_000);
        flow.sip_sessions.push("abc@d".to_string());
        flow.diameter_sessions
            .push(("gx;1".to_string(), DiameterInterface::Gx));
        flow.diameter_sessions
            .push(("rx;1".to_string(), DiameterInterface::Rx));
        flow.rtp_ssrcs.push(Ssrc(0x1234));
        flow.stats.setup_time_ms = Some(3000);
        flow.stats.ring_time_ms = Some(2000);
        flow.stats.call_duration_ms = Some(300_000);
        flow.network_path = vec!["UEa".to_string(), "pcscf.ims.example".to_string()];
        flow.frame_numbers = vec![1, 2, 3];
        flow
    }

    #[test]
    fn test_call_flow_json_shape() {
        let j = call_flow_to_json(&sample_flow());
        assert_eq!(j["flow_id"], "abc123_0");
        assert_eq!(j["type"], "MO_VOICE_CALL");
        assert_eq!(j["parties"]["caller"]["msisdn"], "+14155551234");
        assert_eq!(j["parties"]["caller"]["role"], "UEa");
        assert_eq!(j["parties"]["callee"]["role"], "UEb");
        assert_eq!(j["protocol_sessions"]["sip"][0], "abc@d");
        assert_eq!(j["protocol_sessions"]["diameter"]["gx"][0], "gx;1");
        assert_eq!(j["protocol_sessions"]["diameter"]["rx"][0], "rx;1");
        assert_eq!(j["protocol_sessions"]["rtp_ssrcs"][0], 0x1234);
        assert_eq!(j["statistics"]["timing"]["setup_time_ms"], 3000);
        assert_eq!(j["statistics"]["timing"]["ring_time_ms"], 2000);
        assert_eq!(j["network_path"][0], "UEa");
        assert_eq!(j["total_frames"], 3);
    }

    #[test]
    fn test_empty_fields_omitted() {
        let flow = VolteCallFlow::new("x_0".to_string(), VolteFlowType::DataSession);
        let j = call_flow_to_json(&flow);
        assert!(j["parties"]["caller"].get("msisdn").is_none());
        assert!(j["protocol_sessions"].get("sip").is_none());
        assert!(j["statistics"]["timing"].get("setup_time_ms").is_none());
    }
}
