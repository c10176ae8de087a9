use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rs_callflow::correlator::Correlator;
use rs_callflow::diameter::{DiameterCorrelator, DiameterMessage};
use rs_callflow::gtpv2::Gtpv2Correlator;
use rs_callflow::identity::{msisdn, SubscriberContextManager};
use rs_callflow::message::MessageKind;
use rs_callflow::nas::NasCorrelator;
use rs_callflow::rtp::{RtpCorrelator, RtpFlags, RtpPacket};
use rs_callflow::sip::{SdpMedia, SipCorrelator, SipMessage};
use rs_callflow::types::{Ssrc, Timestamp};
use rs_callflow::volte::VolteCorrelator;
use std::sync::Arc;

const CALLS: usize = 50;

fn synthetic_call(sip: &SipCorrelator, diameter: &DiameterCorrelator, rtp: &RtpCorrelator, n: usize) {
    let base = n as i64 * 400_000;
    let call_id = format!("call-{}@ims.example.com", n);
    let caller = format!("sip:+1415555{:04}@ims.example.com", n);
    let callee = format!("sip:+1415666{:04}@ims.example.com", n);
    let ue_ip = format!("10.100.{}.{}", n / 250 + 1, n % 250 + 1);

    let mut invite = SipMessage::new(
        (n * 20) as u32,
        Timestamp::from_millis(base),
        MessageKind::SipInvite,
        &call_id,
    );
    invite.from_uri = caller.clone();
    invite.to_uri = callee;
    invite.via_ip = Some(ue_ip.clone());
    invite.sdp_media.push(SdpMedia {
        kind: "audio".to_string(),
        connection_ip: ue_ip.clone(),
        port: 49170,
    });
    sip.add_message(invite);

    for (offset, kind, code) in [
        (50, MessageKind::SipTrying, 100u16),
        (2000, MessageKind::SipRinging, 180),
        (3000, MessageKind::SipOk, 200),
    ] {
        let mut msg = SipMessage::new(
            (n * 20 + offset as usize / 50) as u32,
            Timestamp::from_millis(base + offset),
            kind,
            &call_id,
        );
        msg.status_code = Some(code);
        sip.add_message(msg);
    }

    let mut gx = DiameterMessage::new(
        (n * 20 + 10) as u32,
        Timestamp::from_millis(base),
        MessageKind::DiameterCcr,
        &format!("pcrf;gx;{}", n),
        16777238,
    );
    gx.hop_by_hop_id = n as u32;
    gx.is_request = true;
    gx.framed_ip = Some(ue_ip.clone());
    diameter.add_message(gx);

    for seq in 0..50u16 {
        rtp.add_message(RtpPacket {
            frame_number: (n * 20 + 11 + seq as usize) as u32,
            timestamp: Timestamp::from_millis(base + 3100 + seq as i64 * 20),
            src_ip: ue_ip.clone(),
            src_port: 49170,
            dst_ip: "10.200.1.1".to_string(),
            dst_port: 49170,
            flags: RtpFlags::empty(),
            payload_type: 96,
            sequence_number: seq,
            rtp_timestamp: seq as u32 * 160,
            ssrc: Ssrc(0x1000 + n as u32),
            payload_size: 160,
        });
    }
}

fn bench_ingest_and_correlate(c: &mut Criterion) {
    c.bench_function("ingest_and_correlate_50_calls", |b| {
        b.iter(|| {
            let subscribers = Arc::new(SubscriberContextManager::new());
            let sip = Arc::new(SipCorrelator::with_context_manager(subscribers.clone()));
            let diameter = Arc::new(DiameterCorrelator::with_context_manager(subscribers.clone()));
            let gtpv2 = Arc::new(Gtpv2Correlator::new());
            let nas = Arc::new(NasCorrelator::new());
            let rtp = Arc::new(RtpCorrelator::new());

            for n in 0..CALLS {
                synthetic_call(&sip, &diameter, &rtp, n);
            }
            sip.finalize();
            diameter.finalize();
            gtpv2.finalize();
            nas.finalize();
            rtp.finalize();

            let volte = VolteCorrelator::new(
                sip.clone(),
                diameter.clone(),
                gtpv2.clone(),
                nas.clone(),
                rtp.clone(),
                subscribers,
            );
            volte.correlate();
            black_box(volte.call_flows().len())
        })
    });
}

fn bench_msisdn_normalization(c: &mut Criterion) {
    c.bench_function("msisdn_normalize_sip_uri", |b| {
        b.iter(|| {
            black_box(msisdn::normalize(black_box(
                "sip:+14155551234@ims.mnc260.mcc310.3gppnetwork.org;user=phone",
            )))
        })
    });
}

criterion_group!(benches, bench_ingest_and_correlate, bench_msisdn_normalization);
criterion_main!(benches);
