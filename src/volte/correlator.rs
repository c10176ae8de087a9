//! VoLTE inter-protocol correlator.
//!
//! Joins the finalized per-protocol sessions into coherent call flows with
//! a six-phase pipeline:
//!
//! 1. link subscriber identities discovered by every correlator
//! 2. detect SIP voice/video calls and seed one flow per call
//! 3. correlate Diameter/GTP/NAS/RTP sessions into each call window
//! 4. group the leftovers into synthetic flows (data, SMS, registration)
//! 5. resolve party roles and the network path
//! 6. compute per-flow statistics
//!
//! The pipeline only reads from the per-protocol correlators (plus the RTP
//! direction binding) and is re-runnable: correlating twice over the same
//! inputs yields the same flows.

use crate::diameter::{DiameterCorrelator, DiameterInterface, DiameterSession};
use crate::gtpv2::Gtpv2Correlator;
use crate::identity::manager::SubscriberContextBuilder;
use crate::identity::{msisdn, NormalizedMsisdn, SubscriberContextManager};
use crate::nas::{NasCorrelator, NasSession};
use crate::rtp::RtpCorrelator;
use crate::sip::{SipCorrelator, SipSession, SipSessionType};
use crate::types::Timestamp;
use crate::volte::types::{VolteCallFlow, VolteFlowType, VolteParty};
use crate::message::MessageKind;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Default phase-3 time-window tolerance in milliseconds.
pub const DEFAULT_TIME_TOLERANCE_MS: i64 = 1000;

/// Looser tolerance for the long-lived Cx/Sh sessions.
const CX_SH_TOLERANCE_MS: i64 = 30_000;

/// VoLTE correlation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolteStats {
    pub total_call_flows: usize,
    pub voice_calls: usize,
    pub video_calls: usize,
    pub sms_sessions: usize,
    pub registrations: usize,
    pub data_sessions: usize,
    pub uncorrelated_sip_sessions: usize,
    pub uncorrelated_diameter_sessions: usize,
    pub uncorrelated_gtp_sessions: usize,
    pub uncorrelated_nas_sessions: usize,
    pub uncorrelated_rtp_streams: usize,
}

#[derive(Default)]
struct Inner {
    flows: Vec<VolteCallFlow>,
    flow_id_index: HashMap<String, usize>,
    frame_index: HashMap<u32, usize>,
    stats: VolteStats,

    correlated_diameter: HashSet<String>,
    correlated_gtp: HashSet<String>,
    correlated_nas: HashSet<String>,
    correlated_rtp: HashSet<u32>,
}

/// Joins finalized per-protocol sessions into VoLTE call flows.
pub struct VolteCorrelator {
    sip: Arc<SipCorrelator>,
    diameter: Arc<DiameterCorrelator>,
    gtpv2: Arc<Gtpv2Correlator>,
    nas: Arc<NasCorrelator>,
    rtp: Arc<RtpCorrelator>,
    subscribers: Arc<SubscriberContextManager>,
    tolerance_ms: i64,
    inner: Mutex<Inner>,
}

impl VolteCorrelator {
    pub fn new(
        sip: Arc<SipCorrelator>,
        diameter: Arc<DiameterCorrelator>,
        gtpv2: Arc<Gtpv2Correlator>,
        nas: Arc<NasCorrelator>,
        rtp: Arc<RtpCorrelator>,
        subscribers: Arc<SubscriberContextManager>,
    ) -> Self {
        Self::with_tolerance(
            sip,
            diameter,
            gtpv2,
            nas,
            rtp,
            subscribers,
            DEFAULT_TIME_TOLERANCE_MS,
        )
    }

    /// Correlator with a custom phase-3 time tolerance.
    pub fn with_tolerance(
        sip: Arc<SipCorrelator>,
        diameter: Arc<DiameterCorrelator>,
        gtpv2: Arc<Gtpv2Correlator>,
        nas: Arc<NasCorrelator>,
        rtp: Arc<RtpCorrelator>,
        subscribers: Arc<SubscriberContextManager>,
        tolerance_ms: i64,
    ) -> Self {
        VolteCorrelator {
            sip,
            diameter,
            gtpv2,
            nas,
            rtp,
            subscribers,
            tolerance_ms,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Runs all six phases. Must be called after every per-protocol
    /// correlator has been finalized. Re-running over the same inputs
    /// replaces the previous result with an identical one.
    pub fn correlate(&self) {
        let mut inner = Inner::default();

        self.phase1_link_subscriber_identities();
        self.phase2_detect_sip_calls(&mut inner);
        self.phase3_correlate_within_call_window(&mut inner);
        self.phase4_link_residual_sessions(&mut inner);
        self.phase5_resolve_network_elements(&mut inner);
        self.phase6_calculate_statistics(&mut inner);

        rebuild_indices(&mut inner);
        info!(flows = inner.flows.len(), "volte correlation finished");
        *self.inner.lock().unwrap() = inner;
    }

    // ========================================================================
    // Flow access
    // ========================================================================

    pub fn call_flows(&self) -> Vec<VolteCallFlow> {
        self.inner.lock().unwrap().flows.clone()
    }

    pub fn flows_by_type(&self, flow_type: VolteFlowType) -> Vec<VolteCallFlow> {
        self.call_flows()
            .into_iter()
            .filter(|f| f.flow_type == flow_type)
            .collect()
    }

    pub fn voice_calls(&self) -> Vec<VolteCallFlow> {
        self.call_flows()
            .into_iter()
            .filter(|f| f.flow_type.is_call())
            .collect()
    }

    pub fn find_by_flow_id(&self, flow_id: &str) -> Option<VolteCallFlow> {
        let inner = self.inner.lock().unwrap();
        inner
            .flow_id_index
            .get(flow_id)
            .and_then(|&i| inner.flows.get(i))
            .cloned()
    }

    pub fn find_by_msisdn(&self, raw: &str) -> Vec<VolteCallFlow> {
        let needle = msisdn::normalize(raw);
        if needle.is_empty() {
            return Vec::new();
        }
        self.call_flows()
            .into_iter()
            .filter(|f| f.involves_msisdn(&needle))
            .collect()
    }

    pub fn find_by_imsi(&self, imsi: &str) -> Vec<VolteCallFlow> {
        self.call_flows()
            .into_iter()
            .filter(|f| {
                f.caller.imsi.as_deref() == Some(imsi) || f.callee.imsi.as_deref() == Some(imsi)
            })
            .collect()
    }

    pub fn find_by_frame(&self, frame_number: u32) -> Option<VolteCallFlow> {
        let inner = self.inner.lock().unwrap();
        inner
            .frame_index
            .get(&frame_number)
            .and_then(|&i| inner.flows.get(i))
            .cloned()
    }

    pub fn stats(&self) -> VolteStats {
        self.inner.lock().unwrap().stats.clone()
    }

    pub fn clear(&self) {
        *self.inner.lock().unwrap() = Inner::default();
    }

    // ========================================================================
    // Phase 1
    // ========================================================================

    fn phase1_link_subscriber_identities(&self) {
        for session in self.sip.sessions() {
            SubscriberContextBuilder::new(&self.subscribers)
                .from_sip_from(&session.caller_uri)
                .from_sip_contact(&session.caller_uri, &session.caller_ip)
                .build();
            SubscriberContextBuilder::new(&self.subscribers)
                .from_sip_to(&session.callee_uri)
                .build();
        }

        for session in self.diameter.sessions() {
            let mut builder = SubscriberContextBuilder::new(&self.subscribers);
            if let Some(imsi) = &session.imsi {
                builder = builder.from_diameter_imsi(imsi);
            }
            if let Some(msisdn) = &session.msisdn {
                builder = builder.from_diameter_msisdn(msisdn);
            }
            if let Some(ip) = &session.framed_ip {
                builder = builder.from_diameter_framed_ip(ip);
            }
            builder.build();
        }

        for session in self.gtpv2.sessions() {
            let mut builder = SubscriberContextBuilder::new(&self.subscribers);
            if let Some(imsi) = &session.imsi {
                builder = builder.from_gtp_imsi(imsi);
            }
            if let Some(msisdn) = &session.msisdn {
                builder = builder.from_gtp_msisdn(msisdn);
            }
            if let Some(ip) = &session.ue_ipv4 {
                builder = builder.from_gtp_pdn_address(ip);
            }
            if let Some(apn) = &session.apn {
                builder = builder.from_gtp_apn(apn);
            }
            builder.build();
        }

        for session in self.nas.sessions() {
            let mut builder = SubscriberContextBuilder::new(&self.subscribers);
            if let Some(imsi) = &session.imsi {
                builder = builder.from_nas_imsi(imsi);
            }
            if let Some(imei) = &session.imei {
                builder = builder.from_nas_imei(imei);
            }
            if let Some(guti) = &session.guti {
                builder = builder.from_nas_guti(guti.clone());
            }
            if let Some(tmsi) = session.tmsi {
                builder = builder.from_nas_tmsi(tmsi);
            }
            builder.build();
        }

        self.subscribers.propagate_identities();
    }

    // ========================================================================
    // Phase 2
    // ========================================================================

    fn phase2_detect_sip_calls(&self, inner: &mut Inner) {
        for session in self.sip.call_sessions() {
            let flow_type = match session.session_type {
                SipSessionType::VideoCall => VolteFlowType::MoVideoCall,
                SipSessionType::CallForwarding => VolteFlowType::VoiceCallForwarding,
                _ => VolteFlowType::MoVoiceCall,
            };

            let flow_id = flow_id_for_call(&session.call_id, session.start_time);
            let mut flow = VolteCallFlow::new(flow_id, flow_type);

            flow.caller.msisdn = display_msisdn(&session.caller_msisdn);
            flow.callee.msisdn = display_msisdn(&session.callee_msisdn);
            flow.caller.ip_v4 = session.caller_ip.clone();
            flow.callee.ip_v4 = session.callee_ip.clone();
            self.fill_party_identity(&mut flow.caller, &session.caller_uri);
            self.fill_party_identity(&mut flow.callee, &session.callee_uri);

            flow.start_time = session.start_time;
            flow.end_time = session.end_time;
            flow.start_frame = session.start_frame;
            flow.end_frame = session.end_frame;
            flow.frame_numbers = session.frame_numbers();
            flow.sip_sessions.push(session.call_id.clone());

            debug!(flow_id = flow.flow_id.as_str(), "sip call flow seeded");
            inner.flows.push(flow);
        }
    }

    fn fill_party_identity(&self, party: &mut VolteParty, uri: &str) {
        let Some(ctx) = self.subscribers.find_by_msisdn(uri) else {
            return;
        };
        let guard = ctx.lock().unwrap();
        if party.imsi.is_none() {
            party.imsi = guard.imsi.as_ref().map(|i| i.digits.clone());
        }
        if party.imei.is_none() {
            party.imei = guard.imei.as_ref().map(|i| i.imei.clone());
        }
        if party.ip_v4.is_empty() {
            if let Some(ep) = guard.endpoints.iter().find(|ep| ep.has_ipv4()) {
                party.ip_v4 = ep.ipv4.clone();
            }
        }
        if party.ip_v6_prefix.is_empty() {
            if let Some(ep) = guard.endpoints.iter().find(|ep| ep.has_ipv6()) {
                party.ip_v6_prefix = ep.ipv6_prefix(64);
            }
        }
    }

    // ========================================================================
    // Phase 3
    // ========================================================================

    fn phase3_correlate_within_call_window(&self, inner: &mut Inner) {
        let diameter_sessions = self.diameter.sessions();
        let gtp_sessions = self.gtpv2.sessions();
        let nas_ims_sessions = self.nas.ims_esm_sessions();

        for flow in &mut inner.flows {
            let caller = msisdn::normalize(&flow.caller.msisdn);
            let callee = msisdn::normalize(&flow.callee.msisdn);
            let ue_ip = flow.caller.ip_v4.clone();

            for session in &diameter_sessions {
                let attach = match session.interface {
                    DiameterInterface::Gx => {
                        ip_matches(session.framed_ip.as_deref(), &ue_ip)
                            && session.overlaps_window(
                                flow.start_time,
                                flow.end_time,
                                self.tolerance_ms,
                            )
                    }
                    DiameterInterface::Rx => {
                        session_msisdn_matches(session, &caller, &callee)
                            && session.overlaps_window(
                                flow.start_time,
                                flow.end_time,
                                self.tolerance_ms,
                            )
                    }
                    DiameterInterface::Cx | DiameterInterface::Sh => {
                        (session_msisdn_matches(session, &caller, &callee)
                            || session_imsi_matches(session, flow))
                            && session.overlaps_window(
                                flow.start_time,
                                flow.end_time,
                                CX_SH_TOLERANCE_MS,
                            )
                    }
                    _ => false,
                };

                if attach {
                    flow.diameter_sessions
                        .push((session.session_id.clone(), session.interface));
                    flow.stats.diameter_messages += session.message_count() as u32;
                    flow.frame_numbers.extend(session.frame_numbers());
                    inner.correlated_diameter.insert(session.session_id.clone());
                }
            }

            for session in &gtp_sessions {
                let msisdn_match = session
                    .msisdn
                    .as_deref()
                    .map_or(false, |m| {
                        let normalized = msisdn::normalize(m);
                        (!caller.is_empty() && normalized.matches(&caller))
                            || (!callee.is_empty() && normalized.matches(&callee))
                    });
                let imsi_match = session.imsi.is_some()
                    && (session.imsi == flow.caller.imsi || session.imsi == flow.callee.imsi);
                if (msisdn_match || imsi_match)
                    && session.overlaps_window(flow.start_time, flow.end_time, self.tolerance_ms)
                {
                    flow.gtpv2_sessions.push(session.key.clone());
                    flow.stats.gtp_messages += session.message_count as u32;
                    flow.frame_numbers.extend(session.frames.clone());
                    inner.correlated_gtp.insert(session.key.clone());
                }
            }

            for session in &nas_ims_sessions {
                let imsi_match = session.imsi.is_some()
                    && (session.imsi == flow.caller.imsi || session.imsi == flow.callee.imsi);
                if imsi_match {
                    flow.nas_sessions.push(session.key());
                    flow.stats.nas_messages += session.message_count() as u32;
                    flow.frame_numbers.extend(session.frame_numbers());
                    inner.correlated_nas.insert(session.key());
                }
            }

            self.correlate_rtp(flow, &mut inner.correlated_rtp);
        }
    }

    fn correlate_rtp(&self, flow: &mut VolteCallFlow, correlated: &mut HashSet<u32>) {
        // The UE media endpoint comes from the call's SDP.
        let Some(session) = flow
            .sip_sessions
            .first()
            .and_then(|call_id| self.sip.find_by_call_id(call_id))
        else {
            return;
        };
        let Some(media) = session.sdp_media.first() else {
            return;
        };

        let remote_ip = (!flow.callee.ip_v4.is_empty()).then_some(flow.callee.ip_v4.as_str());
        let bound = self
            .rtp
            .bind_media_endpoint(&media.connection_ip, media.port, remote_ip);
        for ssrc in bound {
            if let Some(stream) = self.rtp.find_by_ssrc(ssrc) {
                if stream.start_time <= flow.end_time.offset_millis(self.tolerance_ms)
                    && stream.end_time >= flow.start_time.offset_millis(-self.tolerance_ms)
                {
                    flow.rtp_ssrcs.push(ssrc);
                    flow.stats.rtp_packets += stream.packet_count() as u32;
                    correlated.insert(ssrc.value());
                }
            }
        }
    }

    // ========================================================================
    // Phase 4
    // ========================================================================

    fn phase4_link_residual_sessions(&self, inner: &mut Inner) {
        // SMS and registration SIP sessions become their own flows.
        for session in self.sip.sessions() {
            match session.session_type {
                SipSessionType::SmsMessage => {
                    let flow = self.residual_sip_flow(&session, VolteFlowType::MoSms);
                    inner.flows.push(flow);
                }
                SipSessionType::Registration | SipSessionType::Deregistration => {
                    let flow = self.residual_sip_flow(&session, VolteFlowType::ImsRegistration);
                    inner.flows.push(flow);
                }
                _ => {}
            }
        }

        // Uncorrelated Diameter/GTP/NAS sessions sharing an IMSI and a time
        // window become DATA_SESSION flows.
        let mut by_imsi: HashMap<String, Vec<ResidualSession>> = HashMap::new();
        for session in self.diameter.sessions() {
            if inner.correlated_diameter.contains(&session.session_id) {
                continue;
            }
            if let Some(imsi) = session.imsi.clone() {
                by_imsi.entry(imsi).or_default().push(ResidualSession::Diameter(session));
            } else {
                inner.stats.uncorrelated_diameter_sessions += 1;
            }
        }
        for session in self.gtpv2.sessions() {
            if inner.correlated_gtp.contains(&session.key) {
                continue;
            }
            if let Some(imsi) = session.imsi.clone() {
                by_imsi.entry(imsi).or_default().push(ResidualSession::Gtp(session));
            } else {
                inner.stats.uncorrelated_gtp_sessions += 1;
            }
        }
        for session in self.nas.sessions() {
            if inner.correlated_nas.contains(&session.key()) {
                continue;
            }
            if let Some(imsi) = session.imsi.clone() {
                by_imsi.entry(imsi).or_default().push(ResidualSession::Nas(session));
            } else {
                inner.stats.uncorrelated_nas_sessions += 1;
            }
        }

        let mut imsis: Vec<String> = by_imsi.keys().cloned().collect();
        imsis.sort();
        for imsi in imsis {
            let Some(group) = by_imsi.remove(&imsi) else {
                continue;
            };
            let start = group
                .iter()
                .map(ResidualSession::start_time)
                .min()
                .unwrap_or_default();
            let mut flow = VolteCallFlow::new(
                format!("data_{}_{}", imsi, start.millis()),
                VolteFlowType::DataSession,
            );
            flow.caller.imsi = Some(imsi);
            flow.start_time = start;
            flow.end_time = group
                .iter()
                .map(ResidualSession::end_time)
                .max()
                .unwrap_or_default();

            for member in group {
                match member {
                    ResidualSession::Diameter(session) => {
                        flow.stats.diameter_messages += session.message_count() as u32;
                        flow.frame_numbers.extend(session.frame_numbers());
                        flow.diameter_sessions
                            .push((session.session_id.clone(), session.interface));
                        inner.correlated_diameter.insert(session.session_id);
                    }
                    ResidualSession::Gtp(session) => {
                        flow.stats.gtp_messages += session.message_count as u32;
                        flow.frame_numbers.extend(session.frames.clone());
                        flow.gtpv2_sessions.push(session.key.clone());
                        inner.correlated_gtp.insert(session.key);
                    }
                    ResidualSession::Nas(session) => {
                        flow.stats.nas_messages += session.message_count() as u32;
                        flow.frame_numbers.extend(session.frame_numbers());
                        flow.nas_sessions.push(session.key());
                        inner.correlated_nas.insert(session.key());
                    }
                }
            }
            inner.flows.push(flow);
        }

        for stream in self.rtp.streams() {
            if !inner.correlated_rtp.contains(&stream.ssrc.value()) {
                inner.stats.uncorrelated_rtp_streams += 1;
            }
        }
    }

    fn residual_sip_flow(&self, session: &SipSession, flow_type: VolteFlowType) -> VolteCallFlow {
        let mut flow = VolteCallFlow::new(
            flow_id_for_call(&session.call_id, session.start_time),
            flow_type,
        );
        flow.caller.msisdn = display_msisdn(&session.caller_msisdn);
        flow.callee.msisdn = display_msisdn(&session.callee_msisdn);
        flow.caller.ip_v4 = session.caller_ip.clone();
        flow.start_time = session.start_time;
        flow.end_time = session.end_time;
        flow.start_frame = session.start_frame;
        flow.end_frame = session.end_frame;
        flow.frame_numbers = session.frame_numbers();
        flow.sip_sessions.push(session.call_id.clone());
        flow
    }

    // ========================================================================
    // Phase 5
    // ========================================================================

    fn phase5_resolve_network_elements(&self, inner: &mut Inner) {
        for flow in &mut inner.flows {
            let Some(session) = flow
                .sip_sessions
                .first()
                .and_then(|call_id| self.sip.find_by_call_id(call_id))
            else {
                continue;
            };

            // Forwarding: surface UEc from the 3xx Contact.
            if flow.flow_type == VolteFlowType::VoiceCallForwarding && flow.forward_target.is_none()
            {
                let target_uri = session
                    .messages
                    .iter()
                    .filter(|m| m.status_code.map_or(false, |c| (300..400).contains(&c)))
                    .find_map(|m| m.contact.clone());
                if let Some(uri) = target_uri {
                    let mut target = VolteParty::with_role("UEc");
                    target.msisdn = display_msisdn(&msisdn::normalize(&uri));
                    self.fill_party_identity(&mut target, &uri);
                    flow.forward_target = Some(target);
                }
            }

            // Network path: UE, the SIP route set, then the Diameter hosts.
            let mut path = vec!["UEa".to_string()];
            for route in &session.record_route {
                if !path.contains(route) {
                    path.push(route.clone());
                }
            }
            for (session_id, _) in &flow.diameter_sessions {
                if let Some(diameter) = self.diameter.find_by_session_id(session_id) {
                    for host in &diameter.origin_hosts {
                        if !path.contains(host) {
                            path.push(host.clone());
                        }
                    }
                }
            }
            if flow.flow_type.is_call() {
                path.push("UEb".to_string());
            }
            flow.network_path = path;
        }
    }

    // ========================================================================
    // Phase 6
    // ========================================================================

    fn phase6_calculate_statistics(&self, inner: &mut Inner) {
        for flow in &mut inner.flows {
            if let Some(session) = flow
                .sip_sessions
                .first()
                .and_then(|call_id| self.sip.find_by_call_id(call_id))
            {
                flow.stats.sip_messages = session.message_count() as u32;

                let invite = session.first_time_of(MessageKind::SipInvite);
                let ringing = session.first_time_of(MessageKind::SipRinging);
                let ok = session.first_time_of(MessageKind::SipOk);
                let bye = session.first_time_of(MessageKind::SipBye);

                if let (Some(invite), Some(ringing)) = (invite, ringing) {
                    flow.stats.ring_time_ms = Some(ringing.millis_since(invite));
                }
                if let (Some(invite), Some(ok)) = (invite, ok) {
                    flow.stats.setup_time_ms = Some(ok.millis_since(invite));
                }
                if let (Some(ok), Some(bye)) = (ok, bye) {
                    flow.stats.call_duration_ms = Some(bye.millis_since(ok));
                }
            }

            // RTP quality, weighted by packet count across all streams.
            let mut total_packets = 0u64;
            let mut jitter_weighted = 0.0;
            let mut loss_weighted = 0.0;
            let mut mos_weighted = 0.0;
            for &ssrc in &flow.rtp_ssrcs {
                let Some(metrics) = self.rtp.metrics_for(ssrc) else {
                    continue;
                };
                let weight = metrics.packets_received as u64;
                total_packets += weight;
                jitter_weighted += metrics.jitter_ms * weight as f64;
                loss_weighted += metrics.packet_loss_rate as f64 * weight as f64;
                if let Some(mos) = metrics.estimated_mos {
                    mos_weighted += mos * weight as f64;
                }
            }
            if total_packets > 0 {
                flow.stats.rtp_jitter_ms = Some(jitter_weighted / total_packets as f64);
                flow.stats.rtp_packet_loss = Some(loss_weighted / total_packets as f64);
                flow.stats.estimated_mos = Some(mos_weighted / total_packets as f64);
            }

            flow.frame_numbers.sort_unstable();
            flow.frame_numbers.dedup();
        }

        // Aggregate counters.
        inner.stats.total_call_flows = inner.flows.len();
        for flow in &inner.flows {
            match flow.flow_type {
                VolteFlowType::MoVoiceCall
                | VolteFlowType::MtVoiceCall
                | VolteFlowType::VoiceCallForwarding
                | VolteFlowType::ConferenceCall => inner.stats.voice_calls += 1,
                VolteFlowType::MoVideoCall | VolteFlowType::MtVideoCall => {
                    inner.stats.video_calls += 1;
                }
                VolteFlowType::MoSms | VolteFlowType::MtSms => inner.stats.sms_sessions += 1,
                VolteFlowType::ImsRegistration => inner.stats.registrations += 1,
                VolteFlowType::DataSession => inner.stats.data_sessions += 1,
                _ => {}
            }
        }
        inner.stats.uncorrelated_sip_sessions = self
            .sip
            .sessions()
            .iter()
            .filter(|s| {
                !inner
                    .flows
                    .iter()
                    .any(|f| f.sip_sessions.contains(&s.call_id))
            })
            .count();
    }
}

enum ResidualSession {
    Diameter(DiameterSession),
    Gtp(crate::gtpv2::Gtpv2Session),
    Nas(NasSession),
}

impl ResidualSession {
    fn start_time(&self) -> Timestamp {
        match self {
            ResidualSession::Diameter(s) => s.start_time,
            ResidualSession::Gtp(s) => s.start_time,
            ResidualSession::Nas(s) => s.start_time,
        }
    }

    fn end_time(&self) -> Timestamp {
        match self {
            ResidualSession::Diameter(s) => s.end_time,
            ResidualSession::Gtp(s) => s.end_time,
            ResidualSession::Nas(s) => s.end_time,
        }
    }
}

fn rebuild_indices(inner: &mut Inner) {
    inner.flow_id_index.clear();
    inner.frame_index.clear();
    for (idx, flow) in inner.flows.iter().enumerate() {
        inner.flow_id_index.insert(flow.flow_id.clone(), idx);
        for &frame in &flow.frame_numbers {
            inner.frame_index.entry(frame).or_insert(idx);
        }
    }
}

/// Flow id: first six hex digits of the Call-ID digest plus the start time.
fn flow_id_for_call(call_id: &str, start_time: Timestamp) -> String {
    // FNV-1a over the Call-ID; stable across runs.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in call_id.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    let digest = format!("{:012x}", hash & 0xFFFF_FFFF_FFFF);
    format!("{}_{}", &digest[..6], start_time.millis())
}

fn display_msisdn(normalized: &NormalizedMsisdn) -> String {
    if normalized.is_empty() {
        String::new()
    } else if normalized.country_code.is_empty() {
        normalized.national.clone()
    } else {
        format!("+{}", normalized.international)
    }
}

fn ip_matches(candidate: Option<&str>, ue_ip: &str) -> bool {
    match candidate {
        Some(ip) if !ue_ip.is_empty() => {
            if ip.contains(':') && ue_ip.contains(':') {
                ipv6_prefix64(ip) == ipv6_prefix64(ue_ip)
            } else {
                ip == ue_ip
            }
        }
        _ => false,
    }
}

fn ipv6_prefix64(ip: &str) -> String {
    ip.split(':').take(4).collect::<Vec<_>>().join(":")
}

fn session_msisdn_matches(
    session: &DiameterSession,
    caller: &NormalizedMsisdn,
    callee: &NormalizedMsisdn,
) -> bool {
    let Some(raw) = session.msisdn.as_deref() else {
        return false;
    };
    let normalized = msisdn::normalize(raw);
    (!caller.is_empty() && normalized.matches(caller))
        || (!callee.is_empty() && normalized.matches(callee))
}

fn session_imsi_matches(session: &DiameterSession, flow: &VolteCallFlow) -> bool {
    session.imsi.is_some()
        && (session.imsi == flow.caller.imsi || session.imsi == flow.callee.imsi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    #[test]
    fn test_flow_id_is_stable_and_shaped() {
        let a = flow_id_for_call("abc@d", Timestamp::from_millis(1000));
        let b = flow_id_for_call("abc@d", Timestamp::from_millis(1000));
        assert_eq!(a, b);
        assert!(a.ends_with("_1000"));
        let hex = a.split('_').next().unwrap();
        assert_eq!(hex.len(), 6);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));

        let other = flow_id_for_call("different@d", Timestamp::from_millis(1000));
        assert_ne!(a, other);
    }

    #[test]
    fn test_ip_matching_rules() {
        assert!(ip_matches(Some("10.1.2.3"), "10.1.2.3"));
        assert!(!ip_matches(Some("10.1.2.3"), "10.1.2.4"));
        assert!(!ip_matches(None, "10.1.2.3"));
        // IPv6 matches on the /64 prefix.
        assert!(ip_matches(
            Some("2001:db8:1:2:aaaa:bbbb:cccc:dddd"),
            "2001:db8:1:2:1:2:3:4"
        ));
        assert!(!ip_matches(
            Some("2001:db8:1:3:aaaa:bbbb:cccc:dddd"),
            "2001:db8:1:2:1:2:3:4"
        ));
    }

    #[test]
    fn test_display_msisdn() {
        assert_eq!(display_msisdn(&msisdn::normalize("+14155551234")), "+14155551234");
        assert_eq!(display_msisdn(&msisdn::normalize("5551234")), "5551234");
        assert_eq!(display_msisdn(&msisdn::normalize("")), "");
    }
}
