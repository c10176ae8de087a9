//! End-to-end VoLTE correlation: SIP, Diameter and RTP traffic for one call
//! must come out as exactly one MO voice-call flow with linked sessions and
//! derived timing statistics.

use rs_callflow::correlator::Correlator;
use rs_callflow::diameter::{DiameterCorrelator, DiameterInterface, DiameterMessage};
use rs_callflow::gtpv2::Gtpv2Correlator;
use rs_callflow::identity::SubscriberContextManager;
use rs_callflow::message::MessageKind;
use rs_callflow::nas::NasCorrelator;
use rs_callflow::rtp::{RtpCorrelator, RtpFlags, RtpPacket};
use rs_callflow::sip::{SdpMedia, SipCorrelator, SipMessage};
use rs_callflow::types::{Ssrc, Timestamp};
use rs_callflow::volte::{call_flow_to_json, VolteCorrelator, VolteFlowType};
use std::sync::Arc;

const CALL_ID: &str = "abc@d";
const CALLER: &str = "sip:+14155551234@ims.example.com";
const CALLEE: &str = "sip:+14155555678@ims.example.com";
const UE_IP: &str = "10.100.1.50";

fn sip_request(frame: u32, millis: i64, kind: MessageKind) -> SipMessage {
    let mut msg = SipMessage::new(frame, Timestamp::from_millis(millis), kind, CALL_ID);
    msg.from_uri = CALLER.to_string();
    msg.to_uri = CALLEE.to_string();
    msg.via_ip = Some(UE_IP.to_string());
    msg
}

fn sip_response(frame: u32, millis: i64, kind: MessageKind, code: u16) -> SipMessage {
    let mut msg = SipMessage::new(frame, Timestamp::from_millis(millis), kind, CALL_ID);
    msg.status_code = Some(code);
    msg.from_uri = CALLER.to_string();
    msg.to_uri = CALLEE.to_string();
    msg
}

fn diameter_msg(
    frame: u32,
    millis: i64,
    session_id: &str,
    app_id: u32,
    hop: u32,
) -> DiameterMessage {
    let mut msg = DiameterMessage::new(
        frame,
        Timestamp::from_millis(millis),
        MessageKind::DiameterAar,
        session_id,
        app_id,
    );
    msg.hop_by_hop_id = hop;
    msg.is_request = true;
    msg
}

fn rtp_packet(frame: u32, millis: i64, seq: u16) -> RtpPacket {
    RtpPacket {
        frame_number: frame,
        timestamp: Timestamp::from_millis(millis),
        src_ip: UE_IP.to_string(),
        src_port: 49170,
        dst_ip: "10.200.1.1".to_string(),
        dst_port: 49170,
        flags: RtpFlags::empty(),
        payload_type: 96,
        sequence_number: seq,
        rtp_timestamp: seq as u32 * 160,
        ssrc: Ssrc(0x1234),
        payload_size: 160,
    }
}

struct Pipeline {
    sip: Arc<SipCorrelator>,
    diameter: Arc<DiameterCorrelator>,
    gtpv2: Arc<Gtpv2Correlator>,
    nas: Arc<NasCorrelator>,
    rtp: Arc<RtpCorrelator>,
    volte: VolteCorrelator,
}

fn build_pipeline() -> Pipeline {
    let subscribers = Arc::new(SubscriberContextManager::new());
    let sip = Arc::new(SipCorrelator::with_context_manager(subscribers.clone()));
    let diameter = Arc::new(DiameterCorrelator::with_context_manager(subscribers.clone()));
    let gtpv2 = Arc::new(Gtpv2Correlator::new());
    let nas = Arc::new(NasCorrelator::new());
    let rtp = Arc::new(RtpCorrelator::new());
    let volte = VolteCorrelator::new(
        sip.clone(),
        diameter.clone(),
        gtpv2.clone(),
        nas.clone(),
        rtp.clone(),
        subscribers,
    );
    Pipeline {
        sip,
        diameter,
        gtpv2,
        nas,
        rtp,
        volte,
    }
}

fn ingest_call(p: &Pipeline) {
    // SIP dialog: INVITE, 100, 180, 200, ACK, BYE.
    let mut invite = sip_request(1, 0, MessageKind::SipInvite);
    invite.sdp_media.push(SdpMedia {
        kind: "audio".to_string(),
        connection_ip: UE_IP.to_string(),
        port: 49170,
    });
    p.sip.add_message(invite);
    p.sip.add_message(sip_response(2, 50, MessageKind::SipTrying, 100));
    p.sip.add_message(sip_response(3, 2000, MessageKind::SipRinging, 180));
    p.sip.add_message(sip_response(4, 3000, MessageKind::SipOk, 200));
    p.sip.add_message(sip_request(5, 3020, MessageKind::SipAck));
    p.sip.add_message(sip_request(6, 303_000, MessageKind::SipBye));

    // Gx session bound to the UE IP, covering the call window.
    let mut gx_start = diameter_msg(10, 0, "pcrf;gx;1", 16777238, 1);
    gx_start.framed_ip = Some(UE_IP.to_string());
    gx_start.user_name = Some("310260123456789@epc.example".to_string());
    p.diameter.add_message(gx_start);
    let mut gx_end = diameter_msg(11, 304_000, "pcrf;gx;1", 16777238, 2);
    gx_end.framed_ip = Some(UE_IP.to_string());
    p.diameter.add_message(gx_end);

    // Rx session named by the caller MSISDN.
    let mut rx = diameter_msg(12, 100, "pcscf;rx;1", 16777236, 3);
    rx.msisdn = Some("+14155551234".to_string());
    p.diameter.add_message(rx);
    let mut rx_end = diameter_msg(13, 5000, "pcscf;rx;1", 16777236, 4);
    rx_end.msisdn = Some("+14155551234".to_string());
    p.diameter.add_message(rx_end);

    // Media from the UE starting just after the answer.
    for i in 0..10u16 {
        p.rtp.add_message(rtp_packet(20 + i as u32, 3100 + i as i64 * 20, i));
    }

    p.sip.finalize();
    p.diameter.finalize();
    p.gtpv2.finalize();
    p.nas.finalize();
    p.rtp.finalize();
}

#[test]
fn test_volte_call_flow_end_to_end() {
    let p = build_pipeline();
    ingest_call(&p);
    p.volte.correlate();

    let flows = p.volte.voice_calls();
    assert_eq!(flows.len(), 1, "exactly one voice call flow");
    let flow = &flows[0];

    assert_eq!(flow.flow_type, VolteFlowType::MoVoiceCall);
    assert_eq!(flow.caller.msisdn, "+14155551234");
    assert_eq!(flow.callee.msisdn, "+14155555678");
    assert_eq!(flow.caller.ip_v4, UE_IP);
    assert_eq!(flow.sip_sessions, vec![CALL_ID.to_string()]);

    let diameter_ids: Vec<&str> = flow
        .diameter_sessions
        .iter()
        .map(|(id, _)| id.as_str())
        .collect();
    assert!(diameter_ids.contains(&"pcrf;gx;1"), "gx attached: {:?}", diameter_ids);
    assert!(diameter_ids.contains(&"pcscf;rx;1"), "rx attached: {:?}", diameter_ids);
    assert!(flow
        .diameter_sessions
        .iter()
        .any(|(_, i)| *i == DiameterInterface::Gx));

    assert_eq!(flow.rtp_ssrcs, vec![Ssrc(0x1234)]);

    assert_eq!(flow.stats.setup_time_ms, Some(3000));
    assert_eq!(flow.stats.ring_time_ms, Some(2000));
    assert_eq!(flow.stats.call_duration_ms, Some(300_000));
    assert_eq!(flow.stats.sip_messages, 6);
    assert!(flow.stats.estimated_mos.is_some());
}

#[test]
fn test_correlation_is_idempotent() {
    let p = build_pipeline();
    ingest_call(&p);

    p.volte.correlate();
    let first: Vec<_> = p
        .volte
        .call_flows()
        .into_iter()
        .map(|f| {
            (
                f.flow_id.clone(),
                f.sip_sessions.clone(),
                f.diameter_sessions.clone(),
                f.rtp_ssrcs.clone(),
            )
        })
        .collect();

    p.volte.correlate();
    let second: Vec<_> = p
        .volte
        .call_flows()
        .into_iter()
        .map(|f| {
            (
                f.flow_id.clone(),
                f.sip_sessions.clone(),
                f.diameter_sessions.clone(),
                f.rtp_ssrcs.clone(),
            )
        })
        .collect();

    assert_eq!(first, second);
}

#[test]
fn test_flow_lookup_by_msisdn_and_frame() {
    let p = build_pipeline();
    ingest_call(&p);
    p.volte.correlate();

    assert_eq!(p.volte.find_by_msisdn("4155551234").len(), 1);
    assert_eq!(p.volte.find_by_msisdn("+14155555678").len(), 1);
    assert!(p.volte.find_by_msisdn("+4930999000").is_empty());

    // Frame 3 is the 180 Ringing.
    let flow = p.volte.find_by_frame(3).expect("flow by frame");
    assert_eq!(flow.flow_type, VolteFlowType::MoVoiceCall);
}

#[test]
fn test_flow_json_shape() {
    let p = build_pipeline();
    ingest_call(&p);
    p.volte.correlate();

    let flow = &p.volte.voice_calls()[0];
    let j = call_flow_to_json(flow);

    assert_eq!(j["type"], "MO_VOICE_CALL");
    assert_eq!(j["parties"]["caller"]["msisdn"], "+14155551234");
    assert_eq!(j["parties"]["caller"]["role"], "UEa");
    assert_eq!(j["protocol_sessions"]["sip"][0], CALL_ID);
    assert_eq!(j["protocol_sessions"]["diameter"]["gx"][0], "pcrf;gx;1");
    assert_eq!(j["protocol_sessions"]["diameter"]["rx"][0], "pcscf;rx;1");
    assert_eq!(j["protocol_sessions"]["rtp_ssrcs"][0], 0x1234);
    assert_eq!(j["statistics"]["timing"]["setup_time_ms"], 3000);
    assert_eq!(j["statistics"]["message_counts"]["sip"], 6);
}

#[test]
fn test_rtp_direction_bound_during_correlation() {
    let p = build_pipeline();
    ingest_call(&p);
    p.volte.correlate();

    let stream = p.rtp.find_by_ssrc(Ssrc(0x1234)).unwrap();
    assert_eq!(stream.direction, rs_callflow::rtp::RtpDirection::Uplink);
    assert!(stream.is_ue_endpoint(UE_IP));
}

#[test]
fn test_sms_and_registration_become_residual_flows() {
    let p = build_pipeline();

    let mut sms = SipMessage::new(
        1,
        Timestamp::from_millis(0),
        MessageKind::SipMessage,
        "sms-call-id",
    );
    sms.from_uri = CALLER.to_string();
    sms.to_uri = CALLEE.to_string();
    p.sip.add_message(sms);

    let mut register = SipMessage::new(
        2,
        Timestamp::from_millis(100),
        MessageKind::SipRegister,
        "reg-call-id",
    );
    register.from_uri = CALLER.to_string();
    register.to_uri = CALLER.to_string();
    register.expires = Some(3600);
    p.sip.add_message(register);

    p.sip.finalize();
    p.diameter.finalize();
    p.gtpv2.finalize();
    p.nas.finalize();
    p.rtp.finalize();
    p.volte.correlate();

    assert_eq!(p.volte.flows_by_type(VolteFlowType::MoSms).len(), 1);
    assert_eq!(
        p.volte.flows_by_type(VolteFlowType::ImsRegistration).len(),
        1
    );
    let stats = p.volte.stats();
    assert_eq!(stats.sms_sessions, 1);
    assert_eq!(stats.registrations, 1);
}

#[test]
fn test_uncorrelated_diameter_becomes_data_session() {
    let p = build_pipeline();

    // A Gx session with an IMSI but no SIP call anywhere near it.
    let mut gx = diameter_msg(1, 0, "pcrf;gx;data", 16777238, 1);
    gx.user_name = Some("310260123456789@epc.example".to_string());
    p.diameter.add_message(gx);

    p.sip.finalize();
    p.diameter.finalize();
    p.gtpv2.finalize();
    p.nas.finalize();
    p.rtp.finalize();
    p.volte.correlate();

    let data_flows = p.volte.flows_by_type(VolteFlowType::DataSession);
    assert_eq!(data_flows.len(), 1);
    assert_eq!(
        data_flows[0].caller.imsi.as_deref(),
        Some("310260123456789")
    );
    assert_eq!(p.volte.stats().data_sessions, 1);
}
