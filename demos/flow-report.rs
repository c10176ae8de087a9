//! flow-report: build a synthetic VoLTE capture, run the full correlation
//! pipeline and print the resulting call flows.
//!
//! ```text
//! cargo run --example flow-report -- --format yaml --calls 3
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use rs_callflow::correlator::Correlator;
use rs_callflow::diameter::{DiameterCorrelator, DiameterMessage};
use rs_callflow::gtpv2::Gtpv2Correlator;
use rs_callflow::identity::SubscriberContextManager;
use rs_callflow::ladder::LadderDiagramGenerator;
use rs_callflow::message::{MessageKind, ParsedMessage, Protocol};
use rs_callflow::nas::NasCorrelator;
use rs_callflow::procedure::ProcedureDetector;
use rs_callflow::rtp::{RtpCorrelator, RtpFlags, RtpPacket};
use rs_callflow::sip::{SdpMedia, SipCorrelator, SipMessage};
use rs_callflow::types::{Ssrc, Teid, Timestamp};
use rs_callflow::volte::{call_flows_to_json, VolteCorrelator};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "flow-report")]
#[command(about = "Correlate a synthetic VoLTE capture and print the call flows")]
struct Args {
    /// Output format: json or yaml.
    #[arg(long, default_value = "json")]
    format: String,

    /// Number of synthetic calls to generate.
    #[arg(long, default_value_t = 1)]
    calls: usize,

    /// Also print the ladder diagram of the attach procedure.
    #[arg(long, default_value_t = false)]
    ladder: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let subscribers = Arc::new(SubscriberContextManager::new());
    let sip = Arc::new(SipCorrelator::with_context_manager(subscribers.clone()));
    let diameter = Arc::new(DiameterCorrelator::with_context_manager(subscribers.clone()));
    let gtpv2 = Arc::new(Gtpv2Correlator::new());
    let nas = Arc::new(NasCorrelator::new());
    let rtp = Arc::new(RtpCorrelator::new());
    let mut detector = ProcedureDetector::new();

    let mut attach_messages = Vec::new();
    for n in 0..args.calls {
        ingest_attach(&mut detector, &mut attach_messages, n);
        ingest_call(&sip, &diameter, &rtp, n);
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

    let flows = volte.call_flows();
    let mut report = serde_json::json!({
        "call_flows": call_flows_to_json(&flows),
        "procedures": detector.statistics(),
    });

    if args.ladder {
        let mut generator = LadderDiagramGenerator::new();
        let diagram = generator.generate("LTE Attach", &attach_messages);
        report["ladder"] = serde_json::to_value(&diagram)?;
    }

    match args.format.as_str() {
        "yaml" => print!(
            "{}",
            serde_yaml_ng::to_string(&report).context("yaml rendering failed")?
        ),
        _ => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}

fn ingest_attach(
    detector: &mut ProcedureDetector,
    sink: &mut Vec<ParsedMessage>,
    n: usize,
) {
    let imsi = format!("3102601234{:05}", n);
    let base = n as i64 * 400_000;
    let enb = ("10.0.1.50", 50000u16);
    let mme = ("10.0.2.1", 36412u16);

    let sequence: Vec<(i64, MessageKind, MessageKind, bool)> = vec![
        (0, MessageKind::S1apInitialUeMessage, MessageKind::NasAttachRequest, true),
        (50, MessageKind::S1apDownlinkNasTransport, MessageKind::NasAuthenticationRequest, false),
        (120, MessageKind::S1apUplinkNasTransport, MessageKind::NasAuthenticationResponse, true),
        (180, MessageKind::S1apDownlinkNasTransport, MessageKind::NasSecurityModeCommand, false),
        (230, MessageKind::S1apUplinkNasTransport, MessageKind::NasSecurityModeComplete, true),
        (450, MessageKind::S1apDownlinkNasTransport, MessageKind::NasAttachAccept, false),
        (510, MessageKind::S1apUplinkNasTransport, MessageKind::NasAttachComplete, true),
    ];

    for (i, (offset, kind, nas_kind, uplink)) in sequence.into_iter().enumerate() {
        let (src, dst) = if uplink { (enb, mme) } else { (mme, enb) };
        let mut msg = ParsedMessage::new(
            (n * 100 + i) as u32,
            Timestamp::from_millis(base + offset),
            Protocol::S1ap,
            kind,
        )
        .with_nas(nas_kind)
        .with_imsi(&imsi)
        .with_ue_ids(100 + n as u32, 200 + n as u32)
        .with_endpoints(src.0, src.1, dst.0, dst.1);

        // Insert the GTP leg between security mode and attach accept.
        if i == 5 {
            for (gtp_offset, gtp_kind) in [
                (260, MessageKind::GtpCreateSessionRequest),
                (380, MessageKind::GtpCreateSessionResponse),
            ] {
                let mut gtp = ParsedMessage::new(
                    (n * 100 + 50 + gtp_offset as usize / 100) as u32,
                    Timestamp::from_millis(base + gtp_offset),
                    Protocol::GtpC,
                    gtp_kind,
                )
                .with_imsi(&imsi)
                .with_teid(Teid(0x1000 + n as u32))
                .with_endpoints("10.0.2.1", 2123, "10.0.3.1", 2123);
                if gtp_kind == MessageKind::GtpCreateSessionResponse {
                    gtp = gtp.with_ue_ipv4(&format!("10.100.1.{}", n % 250 + 1));
                }
                detector.process_message(&mut gtp);
                sink.push(gtp);
            }
            let mut setup = ParsedMessage::new(
                (n * 100 + 60) as u32,
                Timestamp::from_millis(base + 400),
                Protocol::S1ap,
                MessageKind::S1apInitialContextSetupRequest,
            )
            .with_imsi(&imsi)
            .with_ue_ids(100 + n as u32, 200 + n as u32)
            .with_endpoints(mme.0, mme.1, enb.0, enb.1);
            detector.process_message(&mut setup);
            sink.push(setup);
        }

        detector.process_message(&mut msg);
        sink.push(msg);
    }
}

fn ingest_call(sip: &SipCorrelator, diameter: &DiameterCorrelator, rtp: &RtpCorrelator, n: usize) {
    let base = n as i64 * 400_000 + 10_000;
    let call_id = format!("call-{}@ims.example.com", n);
    let caller = format!("sip:+1415555{:04}@ims.example.com", n);
    let callee = format!("sip:+1415666{:04}@ims.example.com", n);
    let ue_ip = format!("10.100.1.{}", n % 250 + 1);

    let mut invite = SipMessage::new(
        (n * 100 + 70) as u32,
        Timestamp::from_millis(base),
        MessageKind::SipInvite,
        &call_id,
    );
    invite.from_uri = caller;
    invite.to_uri = callee;
    invite.via_ip = Some(ue_ip.clone());
    invite.sdp_media.push(SdpMedia {
        kind: "audio".to_string(),
        connection_ip: ue_ip.clone(),
        port: 49170,
    });
    sip.add_message(invite);

    for (i, (offset, kind, code)) in [
        (50i64, MessageKind::SipTrying, 100u16),
        (2000, MessageKind::SipRinging, 180),
        (3000, MessageKind::SipOk, 200),
        (300_000, MessageKind::SipBye, 0),
    ]
    .into_iter()
    .enumerate()
    {
        let mut msg = SipMessage::new(
            (n * 100 + 71 + i) as u32,
            Timestamp::from_millis(base + offset),
            kind,
            &call_id,
        );
        if code > 0 {
            msg.status_code = Some(code);
        }
        sip.add_message(msg);
    }

    let mut gx = DiameterMessage::new(
        (n * 100 + 80) as u32,
        Timestamp::from_millis(base),
        MessageKind::DiameterCcr,
        &format!("pcrf.example;gx;{}", n),
        16777238,
    );
    gx.hop_by_hop_id = n as u32;
    gx.is_request = true;
    gx.framed_ip = Some(ue_ip.clone());
    gx.origin_host = Some("pcrf.ims.example".to_string());
    diameter.add_message(gx);

    for seq in 0..20u16 {
        rtp.add_message(RtpPacket {
            frame_number: (n * 100 + 81 + seq as usize) as u32,
            timestamp: Timestamp::from_millis(base + 3100 + seq as i64 * 20),
            src_ip: ue_ip.clone(),
            src_port: 49170,
            dst_ip: "10.200.1.1".to_string(),
            dst_port: 49170,
            flags: if seq == 0 { RtpFlags::MARKER } else { RtpFlags::empty() },
            payload_type: 96,
            sequence_number: seq,
            rtp_timestamp: seq as u32 * 160,
            ssrc: Ssrc(0x1000 + n as u32),
            payload_size: 160,
        });
    }
}
