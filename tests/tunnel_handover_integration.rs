//! Tunnel lifecycle and handover detection: a Modify Bearer Response with a
//! fresh TEID for an IMSI that already owns an active tunnel must produce a
//! handover event and a second, inheriting tunnel.

use rs_callflow::message::{MessageKind, ParsedMessage, Protocol};
use rs_callflow::tunnel::{TunnelManager, TunnelState};
use rs_callflow::types::{Teid, Timestamp};
use serde_json::json;

const IMSI: &str = "001010123456789";

fn create_session_request(teid: u32, millis: i64) -> ParsedMessage {
    ParsedMessage::new(
        1,
        Timestamp::from_millis(millis),
        Protocol::GtpC,
        MessageKind::GtpCreateSessionRequest,
    )
    .with_teid(Teid(teid))
    .with_imsi(IMSI)
    .with_apn("internet")
    .with_field("bearer_contexts", json!([{ "eps_bearer_id": 5, "qci": 9 }]))
}

fn create_session_response(teid: u32, millis: i64) -> ParsedMessage {
    ParsedMessage::new(
        2,
        Timestamp::from_millis(millis),
        Protocol::GtpC,
        MessageKind::GtpCreateSessionResponse,
    )
    .with_teid(Teid(teid))
    .with_imsi(IMSI)
    .with_ue_ipv4("10.0.0.100")
    .with_field(
        "bearer_contexts",
        json!([{
            "s1u_enb_fteid": { "teid": teid, "ipv4": "192.168.1.10" },
            "s1u_sgw_fteid": { "teid": 0x87654321u32, "ipv4": "192.168.2.10" },
        }]),
    )
}

fn modify_bearer_response(new_teid: u32, millis: i64) -> ParsedMessage {
    ParsedMessage::new(
        3,
        Timestamp::from_millis(millis),
        Protocol::GtpC,
        MessageKind::GtpModifyBearerResponse,
    )
    .with_teid(Teid(new_teid))
    .with_imsi(IMSI)
    .with_field(
        "bearer_contexts",
        json!([{
            "s1u_enb_fteid": { "teid": new_teid, "ipv4": "192.168.1.20" },
            "s1u_sgw_fteid": { "teid": 0x87654321u32, "ipv4": "192.168.2.10" },
        }]),
    )
}

#[test]
fn test_x2_handover_detected_via_tunnel_manager() {
    let manager = TunnelManager::new();

    // Create and activate tunnel A.
    manager.process_message(&create_session_request(0x11111111, 0));
    manager.process_message(&create_session_response(0x11111111, 120));
    assert_eq!(
        manager.get_tunnel(Teid(0x11111111)).unwrap().state,
        TunnelState::Active
    );

    // Modify Bearer Response with a new TEID for the same IMSI.
    manager.process_message(&modify_bearer_response(0x22222222, 500));

    // Two tunnels for the IMSI.
    let tunnels = manager.get_tunnels_by_imsi(IMSI);
    assert_eq!(tunnels.len(), 2);

    // The old tunnel carries exactly one handover event.
    let old = manager.get_tunnel(Teid(0x11111111)).unwrap();
    assert_eq!(old.handovers.len(), 1);
    let event = &old.handovers[0];
    assert_eq!(event.old_teid, Teid(0x11111111));
    assert_eq!(event.new_teid, Teid(0x22222222));
    assert_eq!(event.old_peer_ip.as_deref(), Some("192.168.1.10"));
    assert_eq!(event.new_peer_ip.as_deref(), Some("192.168.1.20"));
    assert_eq!(event.handover_type, "X2");

    // The new tunnel is active and inherited the subscriber state.
    let new = manager.get_tunnel(Teid(0x22222222)).unwrap();
    assert_eq!(new.state, TunnelState::Active);
    assert_eq!(new.imsi.as_deref(), Some(IMSI));
    assert_eq!(new.ue_ipv4.as_deref(), Some("10.0.0.100"));
    assert_eq!(new.apn.as_deref(), Some("internet"));

    assert_eq!(manager.get_statistics().handovers_detected, 1);
}

#[test]
fn test_full_lifecycle_counters() {
    let manager = TunnelManager::new();

    manager.process_message(&create_session_request(0x1000, 0));
    manager.process_message(&create_session_response(0x1000, 100));

    manager.handle_user_data(Teid(0x1000), true, 1500, Timestamp::from_millis(200));
    manager.handle_user_data(Teid(0x1000), false, 6000, Timestamp::from_millis(210));

    let delete_req = ParsedMessage::new(
        4,
        Timestamp::from_millis(100_000),
        Protocol::GtpC,
        MessageKind::GtpDeleteSessionRequest,
    )
    .with_teid(Teid(0x1000));
    manager.process_message(&delete_req);

    let delete_resp = ParsedMessage::new(
        5,
        Timestamp::from_millis(100_050),
        Protocol::GtpC,
        MessageKind::GtpDeleteSessionResponse,
    )
    .with_teid(Teid(0x1000));
    manager.process_message(&delete_resp);

    let tunnel = manager.get_tunnel(Teid(0x1000)).unwrap();
    assert_eq!(tunnel.state, TunnelState::Deleted);
    assert_eq!(tunnel.uplink_bytes, 1500);
    assert_eq!(tunnel.downlink_bytes, 6000);
    assert!(tunnel.duration_hours() > 0.0);

    let stats = manager.get_statistics();
    assert_eq!(stats.total_tunnels, 1);
    assert_eq!(stats.deleted_tunnels, 1);
    assert_eq!(stats.handovers_detected, 0);
}

#[test]
fn test_handover_interruption_window() {
    let manager = TunnelManager::new();
    manager.process_message(&create_session_request(0x1000, 0));
    manager.process_message(&create_session_response(0x1000, 100));

    manager.handle_user_data(Teid(0x1000), true, 1500, Timestamp::from_millis(450));
    manager.process_message(&modify_bearer_response(0x2000, 500));
    manager.handle_user_data(Teid(0x2000), true, 1500, Timestamp::from_millis(478));

    let old = manager.get_tunnel(Teid(0x1000)).unwrap();
    assert_eq!(old.handovers[0].interruption_time_ms, Some(28));
    // Preparation time spans request to activation of the old tunnel.
    assert_eq!(old.handovers[0].preparation_time_ms, Some(100));
}
