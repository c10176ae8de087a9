//! The minimal LTE attach scenario driven through the procedure detector:
//! ten messages in order, ATTACHED at the end, 510 ms total.

use rs_callflow::message::{MessageKind, ParsedMessage, Protocol};
use rs_callflow::procedure::ProcedureDetector;
use rs_callflow::types::{Teid, Timestamp};

const IMSI: &str = "310260123456789";

fn s1ap_nas(frame: u32, millis: i64, kind: MessageKind, nas: MessageKind) -> ParsedMessage {
    ParsedMessage::new(frame, Timestamp::from_millis(millis), Protocol::S1ap, kind)
        .with_nas(nas)
        .with_imsi(IMSI)
        .with_ue_ids(100, 200)
}

fn attach_sequence() -> Vec<ParsedMessage> {
    vec![
        s1ap_nas(
            1,
            0,
            MessageKind::S1apInitialUeMessage,
            MessageKind::NasAttachRequest,
        ),
        s1ap_nas(
            2,
            50,
            MessageKind::S1apDownlinkNasTransport,
            MessageKind::NasAuthenticationRequest,
        ),
        s1ap_nas(
            3,
            120,
            MessageKind::S1apUplinkNasTransport,
            MessageKind::NasAuthenticationResponse,
        ),
        s1ap_nas(
            4,
            180,
            MessageKind::S1apDownlinkNasTransport,
            MessageKind::NasSecurityModeCommand,
        ),
        s1ap_nas(
            5,
            230,
            MessageKind::S1apUplinkNasTransport,
            MessageKind::NasSecurityModeComplete,
        ),
        ParsedMessage::new(
            6,
            Timestamp::from_millis(260),
            Protocol::GtpC,
            MessageKind::GtpCreateSessionRequest,
        )
        .with_imsi(IMSI),
        ParsedMessage::new(
            7,
            Timestamp::from_millis(380),
            Protocol::GtpC,
            MessageKind::GtpCreateSessionResponse,
        )
        .with_imsi(IMSI)
        .with_ue_ipv4("10.1.2.3")
        .with_teid(Teid(0x1000)),
        ParsedMessage::new(
            8,
            Timestamp::from_millis(400),
            Protocol::S1ap,
            MessageKind::S1apInitialContextSetupRequest,
        )
        .with_imsi(IMSI)
        .with_ue_ids(100, 200),
        s1ap_nas(
            9,
            450,
            MessageKind::S1apDownlinkNasTransport,
            MessageKind::NasAttachAccept,
        ),
        s1ap_nas(
            10,
            510,
            MessageKind::S1apUplinkNasTransport,
            MessageKind::NasAttachComplete,
        ),
    ]
}

#[test]
fn test_minimal_lte_attach_through_detector() {
    let mut detector = ProcedureDetector::new();
    for mut msg in attach_sequence() {
        detector.process_message(&mut msg);
    }

    assert_eq!(detector.procedure_count(), 1);
    let completed = detector.completed_procedure_ids();
    assert_eq!(completed.len(), 1);

    let machine = detector.procedure(&completed[0]).expect("completed attach");
    assert!(machine.is_complete());
    assert!(!machine.is_failed());
    assert_eq!(machine.state_name(), "ATTACHED");
    assert_eq!(machine.duration_ms(), Some(510));

    // Ten steps, all expected.
    let steps = machine.steps();
    assert_eq!(steps.len(), 10);
    assert!(steps.iter().all(|s| s.expected));

    let metrics = machine.metrics_json();
    assert_eq!(metrics["timings"]["total_attach_time_ms"], 510);
    assert_eq!(metrics["imsi"], IMSI);
    assert_eq!(metrics["ue_ip"], "10.1.2.3");
    assert_eq!(metrics["teid_s1u"], 0x1000);
    assert_eq!(metrics["mme_ue_s1ap_id"], 100);
    assert_eq!(metrics["enb_ue_s1ap_id"], 200);
}

#[test]
fn test_messages_stamped_with_procedure_id() {
    let mut detector = ProcedureDetector::new();
    let mut stamped = Vec::new();
    for mut msg in attach_sequence() {
        detector.process_message(&mut msg);
        stamped.push(msg.procedure_id.clone());
    }

    let proc_id = stamped[0].clone().expect("trigger stamped");
    // Every state-changing message carries the procedure id; only the
    // Initial Context Setup Response (not in this minimal sequence) would
    // be recorded without a transition.
    assert!(stamped.iter().all(|id| id.as_deref() == Some(proc_id.as_str())));
}

#[test]
fn test_two_subscribers_two_procedures() {
    let mut detector = ProcedureDetector::new();
    for mut msg in attach_sequence() {
        detector.process_message(&mut msg);
    }

    // The same sequence for a different IMSI and UE ids.
    for mut msg in attach_sequence() {
        msg.hints.imsi = Some("310260999999999".to_string());
        msg.hints.mme_ue_s1ap_id = msg.hints.mme_ue_s1ap_id.map(|_| 101);
        msg.hints.enb_ue_s1ap_id = msg.hints.enb_ue_s1ap_id.map(|_| 201);
        detector.process_message(&mut msg);
    }

    assert_eq!(detector.procedure_count(), 2);
    assert_eq!(detector.completed_procedure_ids().len(), 2);
    let stats = detector.statistics();
    assert_eq!(stats["by_type"]["LTE_ATTACH"], 2);
    assert_eq!(stats["procedures_completed"], 2);
}
