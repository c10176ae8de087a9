//! Identity-layer scenarios: URI normalisation equivalence, BCD round
//! trips, GUTI parsing and the subscriber-graph invariants.

use rs_callflow::identity::guti::Guti4g;
use rs_callflow::identity::matcher::{self, MatchConfidence};
use rs_callflow::identity::subscriber::SubscriberIdentity;
use rs_callflow::identity::{imei, imsi, msisdn, SubscriberContextManager};
use std::sync::Arc;

#[test]
fn test_sip_uri_and_tel_uri_normalise_identically() {
    let from_sip = msisdn::normalize("sip:+14155551234@ims.example.com;user=phone");
    let from_tel = msisdn::normalize("tel:+1-415-555-1234");

    for m in [&from_sip, &from_tel] {
        assert_eq!(m.digits_only, "14155551234");
        assert_eq!(m.country_code, "1");
        assert_eq!(m.national, "4155551234");
        assert_eq!(m.international, "14155551234");
    }
    assert!(from_sip.matches(&from_tel));
}

#[test]
fn test_imsi_bcd_round_trip() {
    // 310260123456789 in TBCD, little nibble first, 0xF filler.
    let bcd = [0x13, 0x20, 0x06, 0x21, 0x43, 0x65, 0x87, 0xF9];
    let parsed = imsi::from_bcd(&bcd).expect("valid IMSI BCD");
    assert_eq!(parsed.digits, "310260123456789");
    assert_eq!(parsed.mcc, "310");
    // MCC 310 uses 3-digit MNCs.
    assert_eq!(parsed.mnc, "260");
    assert_eq!(parsed.msin, "123456789");

    // Normalising the canonical digits again is a fixed point.
    let again = imsi::normalize(&parsed.digits).unwrap();
    assert_eq!(again, parsed);
}

#[test]
fn test_guti_4g_parse_and_encode() {
    let guti = Guti4g {
        mcc: "310".to_string(),
        mnc: "260".to_string(),
        mme_group_id: 1,
        mme_code: 2,
        m_tmsi: 0x12345678,
    };
    let encoded = guti.marshal();
    let decoded = Guti4g::unmarshal(&encoded).expect("well-formed GUTI");
    assert_eq!(decoded, guti);
    assert_eq!(decoded.mme_group_id, 1);
    assert_eq!(decoded.mme_code, 2);
    assert_eq!(decoded.m_tmsi, 0x12345678);
}

#[test]
fn test_imei_luhn_round_trip() {
    for body in ["49015420323751", "35875507001234"] {
        let check = imei::calculate_check_digit(body).unwrap();
        let full = format!("{}{}", body, check);
        assert!(imei::verify_check_digit(&full));
        let normalized = imei::normalize(&full).unwrap();
        assert_eq!(normalized.imei, body);
        assert!(normalized.check_digit_ok);
    }
}

#[test]
fn test_subscriber_graph_invariants_after_links() {
    let manager = Arc::new(SubscriberContextManager::new());

    // A busy sequence of get-or-create and link operations.
    manager.get_or_create_by_imsi("310260123456789");
    manager.get_or_create_by_msisdn("+14155551234");
    manager.get_or_create_by_ue_ip("10.100.1.50");
    manager.link_imsi_msisdn("310260123456789", "+14155551234");
    manager.link_imsi_ue_ip("310260123456789", "10.100.1.50");
    manager.link_imsi_imei("310260123456789", "49015420323751");
    manager.link_imsi_tmsi("310260123456789", 0xCAFE);
    // A second subscriber.
    manager.link_imsi_msisdn("310260999999999", "+14155559999");

    // No two distinct contexts share an indexed identifier: all lookups for
    // subscriber 1 resolve to the same context.
    let a = manager.find_by_imsi("310260123456789").unwrap();
    let b = manager.find_by_msisdn("+14155551234").unwrap();
    let c = manager.find_by_ue_ip("10.100.1.50").unwrap();
    let d = manager.find_by_imei("49015420323751").unwrap();
    let e = manager.find_by_tmsi(0xCAFE).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &c));
    assert!(Arc::ptr_eq(&a, &d));
    assert!(Arc::ptr_eq(&a, &e));

    let other = manager.find_by_imsi("310260999999999").unwrap();
    assert!(!Arc::ptr_eq(&a, &other));

    let stats = manager.stats();
    assert_eq!(stats.total_contexts, 2);

    // Every context has an ordered seen-window.
    for ctx in manager.all_contexts() {
        let guard = ctx.lock().unwrap();
        assert!(guard.first_seen <= guard.last_seen);
    }
}

#[test]
fn test_matcher_symmetry_and_self_match() {
    let a = SubscriberIdentity {
        imsi: imsi::normalize("310260123456789"),
        msisdn: Some(msisdn::normalize("+14155551234")),
        ..Default::default()
    };
    let b = SubscriberIdentity {
        msisdn: Some(msisdn::normalize("4155551234")),
        ..Default::default()
    };

    let ab = matcher::match_identities(&a, &b);
    let ba = matcher::match_identities(&b, &a);
    assert_eq!(ab.confidence, ba.confidence);
    assert_eq!(ab.score, ba.score);

    let self_match = matcher::match_identities(&a, &a);
    assert_eq!(self_match.confidence, MatchConfidence::Exact);
    assert_eq!(self_match.score, 1.0);
}
