//! GTP tunnel manager.
//!
//! Tracks the lifecycle of GTP bearers from Create Session through deletion,
//! keyed by the uplink TEID. A Modify Bearer Response naming a TEID the
//! manager has never seen, for an IMSI that already owns an active tunnel,
//! is a handover: the old tunnel records a [`HandoverEvent`] and a new
//! tunnel inherits the subscriber state.

use crate::message::{MessageKind, ParsedMessage};
use crate::types::{Teid, Timestamp};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Tunnel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TunnelState {
    Creating,
    Active,
    Inactive,
    Deleting,
    Deleted,
    /// Superseded by a new tunnel after a detected handover.
    HandedOver,
}

impl TunnelState {
    pub fn name(&self) -> &'static str {
        match self {
            TunnelState::Creating => "CREATING",
            TunnelState::Active => "ACTIVE",
            TunnelState::Inactive => "INACTIVE",
            TunnelState::Deleting => "DELETING",
            TunnelState::Deleted => "DELETED",
            TunnelState::HandedOver => "HANDED_OVER",
        }
    }
}

/// Chronological tunnel event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TunnelEventKind {
    Created,
    Activated,
    Handover,
    DataBurst,
    MarkedInactive,
    Deleted,
}

/// One entry in a tunnel's chronological event list.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelEvent {
    pub kind: TunnelEventKind,
    pub timestamp: Timestamp,
    pub description: String,
}

/// A detected inter-eNodeB handover on a bearer.
#[derive(Debug, Clone, Serialize)]
pub struct HandoverEvent {
    pub old_teid: Teid,
    pub new_teid: Teid,
    pub old_peer_ip: Option<String>,
    pub new_peer_ip: Option<String>,
    /// X2 / S1 / Xn / N2; currently always tagged "X2" (TEID change alone
    /// cannot distinguish the variants without the surrounding signalling).
    pub handover_type: String,
    pub timestamp: Timestamp,
    /// Create Session Request to Response on the old tunnel.
    pub preparation_time_ms: Option<i64>,
    /// Last uplink data on the old tunnel to first uplink data on the new.
    pub interruption_time_ms: Option<i64>,
}

/// One GTP bearer with its lifecycle state and traffic counters.
#[derive(Debug, Clone, Serialize)]
pub struct Tunnel {
    pub teid_uplink: Teid,
    pub teid_downlink: Option<Teid>,
    pub uplink_peer_ip: Option<String>,
    pub downlink_peer_ip: Option<String>,
    pub imsi: Option<String>,
    pub apn: Option<String>,
    pub ue_ipv4: Option<String>,
    pub ue_ipv6: Option<String>,
    pub eps_bearer_id: Option<u8>,
    pub qci: Option<u8>,
    pub state: TunnelState,

    pub uplink_bytes: u64,
    pub downlink_bytes: u64,
    pub uplink_packets: u64,
    pub downlink_packets: u64,

    pub created: Timestamp,
    pub activated: Option<Timestamp>,
    pub deleted: Option<Timestamp>,
    pub last_activity: Timestamp,
    pub last_uplink_data: Option<Timestamp>,

    pub handovers: Vec<HandoverEvent>,
    pub events: Vec<TunnelEvent>,
}

impl Tunnel {
    fn new(teid_uplink: Teid, created: Timestamp) -> Self {
        Tunnel {
            teid_uplink,
            teid_downlink: None,
            uplink_peer_ip: None,
            downlink_peer_ip: None,
            imsi: None,
            apn: None,
            ue_ipv4: None,
            ue_ipv6: None,
            eps_bearer_id: None,
            qci: None,
            state: TunnelState::Creating,
            uplink_bytes: 0,
            downlink_bytes: 0,
            uplink_packets: 0,
            downlink_packets: 0,
            created,
            activated: None,
            deleted: None,
            last_activity: created,
            last_uplink_data: None,
            handovers: Vec::new(),
            events: Vec::new(),
        }
    }

    fn record_event(&mut self, kind: TunnelEventKind, timestamp: Timestamp, description: String) {
        self.events.push(TunnelEvent {
            kind,
            timestamp,
            description,
        });
    }

    /// Lifetime from creation to deletion (or last activity), in hours.
    pub fn duration_hours(&self) -> f64 {
        let end = self.deleted.unwrap_or(self.last_activity);
        end.millis_since(self.created) as f64 / 3_600_000.0
    }

    /// Visualisation JSON: identity, state and the chronological events.
    pub fn to_json(&self) -> Value {
        json!({
            "teid_uplink": self.teid_uplink.value(),
            "teid_downlink": self.teid_downlink.map(|t| t.value()),
            "imsi": self.imsi,
            "apn": self.apn,
            "ue_ipv4": self.ue_ipv4,
            "state": self.state.name(),
            "eps_bearer_id": self.eps_bearer_id,
            "qci": self.qci,
            "uplink_bytes": self.uplink_bytes,
            "downlink_bytes": self.downlink_bytes,
            "uplink_packets": self.uplink_packets,
            "downlink_packets": self.downlink_packets,
            "handovers": self.handovers,
            "events": self.events,
        })
    }
}

/// Tunnel manager tuning.
#[derive(Debug, Clone)]
pub struct TunnelManagerConfig {
    /// Idle time after which an ACTIVE tunnel is marked INACTIVE.
    pub activity_timeout_secs: i64,
    /// Hard cap on tracked tunnels; creation beyond it is refused silently.
    pub max_tunnels: usize,
}

impl Default for TunnelManagerConfig {
    fn default() -> Self {
        TunnelManagerConfig {
            activity_timeout_secs: 300,
            max_tunnels: 100_000,
        }
    }
}

/// Aggregate tunnel counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelStatistics {
    pub total_tunnels: usize,
    pub active_tunnels: usize,
    pub inactive_tunnels: usize,
    pub deleted_tunnels: usize,
    pub handovers_detected: usize,
}

type HandoverCallback = Box<dyn Fn(&HandoverEvent, &Tunnel) + Send + Sync>;

#[derive(Default)]
struct Inner {
    tunnels: HashMap<Teid, Tunnel>,
    order: Vec<Teid>,
    imsi_index: HashMap<String, Vec<Teid>>,
    ue_ip_index: HashMap<String, Vec<Teid>>,
    /// new uplink TEID -> old uplink TEID, until the interruption gap is
    /// resolved by the first uplink data packet on the new tunnel.
    pending_interruption: HashMap<Teid, Teid>,
    handovers_detected: usize,
}

/// Lifecycle manager for GTP tunnels, keyed by uplink TEID.
pub struct TunnelManager {
    inner: Mutex<Inner>,
    config: TunnelManagerConfig,
    handover_callback: Mutex<Option<HandoverCallback>>,
}

impl TunnelManager {
    pub fn new() -> Self {
        Self::with_config(TunnelManagerConfig::default())
    }

    pub fn with_config(config: TunnelManagerConfig) -> Self {
        TunnelManager {
            inner: Mutex::new(Inner::default()),
            config,
            handover_callback: Mutex::new(None),
        }
    }

    /// Installs a hook invoked with every detected handover and the old
    /// tunnel's state at that moment.
    pub fn on_handover<F>(&self, callback: F)
    where
        F: Fn(&HandoverEvent, &Tunnel) + Send + Sync + 'static,
    {
        *self.handover_callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Drives the tunnel state machine from a GTPv2-C control message.
    pub fn process_message(&self, msg: &ParsedMessage) {
        match msg.kind {
            MessageKind::GtpCreateSessionRequest => self.on_create_session_request(msg),
            MessageKind::GtpCreateSessionResponse => self.on_create_session_response(msg),
            MessageKind::GtpModifyBearerResponse => self.on_modify_bearer_response(msg),
            MessageKind::GtpDeleteSessionRequest => self.on_delete_session(msg, false),
            MessageKind::GtpDeleteSessionResponse => self.on_delete_session(msg, true),
            _ => {}
        }
    }

    /// Accounts one user-plane packet on a tunnel.
    pub fn handle_user_data(&self, teid: Teid, uplink: bool, bytes: u64, timestamp: Timestamp) {
        let mut inner = self.inner.lock().unwrap();

        // First uplink data on a post-handover tunnel closes the
        // interruption window of the handover event on the old tunnel.
        if uplink {
            if let Some(old_teid) = inner.pending_interruption.remove(&teid) {
                let last_uplink = inner
                    .tunnels
                    .get(&old_teid)
                    .and_then(|old| old.last_uplink_data);
                if let Some(old_tunnel) = inner.tunnels.get_mut(&old_teid) {
                    if let Some(event) = old_tunnel
                        .handovers
                        .iter_mut()
                        .find(|h| h.new_teid == teid)
                    {
                        event.interruption_time_ms =
                            last_uplink.map(|t| timestamp.millis_since(t));
                    }
                }
            }
        }

        let Some(tunnel) = inner.tunnels.get_mut(&teid) else {
            debug!(%teid, "user data for unknown tunnel");
            return;
        };

        if uplink {
            tunnel.uplink_packets += 1;
            tunnel.uplink_bytes += bytes;
            tunnel.last_uplink_data = Some(timestamp);
        } else {
            tunnel.downlink_packets += 1;
            tunnel.downlink_bytes += bytes;
        }
        tunnel.last_activity = timestamp;
    }

    /// Marks ACTIVE tunnels idle past the activity timeout as INACTIVE.
    /// Driven by an external periodic tick; `now` is the tick's clock.
    pub fn check_timeouts(&self, now: Timestamp) {
        let timeout_ms = self.config.activity_timeout_secs * 1000;
        let mut inner = self.inner.lock().unwrap();
        for tunnel in inner.tunnels.values_mut() {
            if tunnel.state == TunnelState::Active
                && now.millis_since(tunnel.last_activity) > timeout_ms
            {
                tunnel.state = TunnelState::Inactive;
                tunnel.record_event(
                    TunnelEventKind::MarkedInactive,
                    now,
                    "activity timeout".to_string(),
                );
            }
        }
    }

    pub fn get_tunnel(&self, teid: Teid) -> Option<Tunnel> {
        self.inner.lock().unwrap().tunnels.get(&teid).cloned()
    }

    pub fn get_tunnels_by_imsi(&self, imsi: &str) -> Vec<Tunnel> {
        let inner = self.inner.lock().unwrap();
        inner
            .imsi_index
            .get(imsi)
            .map(|teids| {
                teids
                    .iter()
                    .filter_map(|t| inner.tunnels.get(t).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_tunnels_by_ue_ip(&self, ip: &str) -> Vec<Tunnel> {
        let inner = self.inner.lock().unwrap();
        inner
            .ue_ip_index
            .get(ip)
            .map(|teids| {
                teids
                    .iter()
                    .filter_map(|t| inner.tunnels.get(t).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_active_tunnels(&self) -> Vec<Tunnel> {
        self.get_all_tunnels()
            .into_iter()
            .filter(|t| t.state == TunnelState::Active)
            .collect()
    }

    pub fn get_all_tunnels(&self) -> Vec<Tunnel> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|t| inner.tunnels.get(t).cloned())
            .collect()
    }

    /// Visualisation JSON for one tunnel.
    pub fn get_tunnel_visualization(&self, teid: Teid) -> Option<Value> {
        self.get_tunnel(teid).map(|t| t.to_json())
    }

    /// Visualisation JSON for every tunnel of a subscriber.
    pub fn get_imsi_visualization(&self, imsi: &str) -> Value {
        Value::Array(
            self.get_tunnels_by_imsi(imsi)
                .iter()
                .map(Tunnel::to_json)
                .collect(),
        )
    }

    pub fn get_statistics(&self) -> TunnelStatistics {
        let inner = self.inner.lock().unwrap();
        let mut stats = TunnelStatistics {
            total_tunnels: inner.tunnels.len(),
            handovers_detected: inner.handovers_detected,
            ..Default::default()
        };
        for tunnel in inner.tunnels.values() {
            match tunnel.state {
                TunnelState::Active => stats.active_tunnels += 1,
                TunnelState::Inactive => stats.inactive_tunnels += 1,
                TunnelState::Deleted => stats.deleted_tunnels += 1,
                _ => {}
            }
        }
        stats
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
    }

    // ========================================================================
    // State machine steps
    // ========================================================================

    fn on_create_session_request(&self, msg: &ParsedMessage) {
        let Some(teid) = msg.hints.teid_s1u else {
            return;
        };
        let mut inner = self.inner.lock().unwrap();
        if inner.tunnels.contains_key(&teid) {
            return;
        }
        if inner.tunnels.len() >= self.config.max_tunnels {
            debug!(%teid, cap = self.config.max_tunnels, "tunnel cap reached, creation refused");
            return;
        }

        let mut tunnel = Tunnel::new(teid, msg.timestamp);
        tunnel.imsi = msg
            .hints
            .imsi
            .clone()
            .or_else(|| msg.field_str("imsi").map(str::to_string));
        tunnel.apn = msg
            .hints
            .apn
            .clone()
            .or_else(|| msg.field_str("apn").map(str::to_string));
        if let Some(bearer) = first_bearer_context(msg) {
            tunnel.eps_bearer_id = bearer
                .get("eps_bearer_id")
                .and_then(Value::as_u64)
                .map(|v| v as u8);
            tunnel.qci = bearer.get("qci").and_then(Value::as_u64).map(|v| v as u8);
        }
        tunnel.record_event(
            TunnelEventKind::Created,
            msg.timestamp,
            "Create Session Request".to_string(),
        );

        if let Some(imsi) = tunnel.imsi.clone() {
            inner.imsi_index.entry(imsi).or_default().push(teid);
        }
        inner.order.push(teid);
        inner.tunnels.insert(teid, tunnel);
    }

    fn on_create_session_response(&self, msg: &ParsedMessage) {
        let Some(teid) = msg.hints.teid_s1u else {
            return;
        };
        let mut inner = self.inner.lock().unwrap();

        let ue_ip = msg
            .hints
            .ue_ipv4
            .clone()
            .or_else(|| msg.field_str("ue_ipv4").map(str::to_string));
        let bearer = first_bearer_context(msg);

        let Some(tunnel) = inner.tunnels.get_mut(&teid) else {
            return;
        };
        tunnel.state = TunnelState::Active;
        tunnel.activated = Some(msg.timestamp);
        tunnel.last_activity = msg.timestamp;
        if tunnel.ue_ipv4.is_none() {
            tunnel.ue_ipv4 = ue_ip;
        }
        if let Some(bearer) = bearer {
            tunnel.uplink_peer_ip = fteid_ip(&bearer, "s1u_enb_fteid");
            if let Some(downlink) = fteid_teid(&bearer, "s1u_sgw_fteid") {
                tunnel.teid_downlink = Some(downlink);
            }
            tunnel.downlink_peer_ip = fteid_ip(&bearer, "s1u_sgw_fteid");
        }
        tunnel.record_event(
            TunnelEventKind::Activated,
            msg.timestamp,
            "Create Session Response".to_string(),
        );

        if let Some(ip) = inner.tunnels[&teid].ue_ipv4.clone() {
            let entry = inner.ue_ip_index.entry(ip).or_default();
            if !entry.contains(&teid) {
                entry.push(teid);
            }
        }
    }

    fn on_modify_bearer_response(&self, msg: &ParsedMessage) {
        let Some(new_teid) = msg.hints.teid_s1u else {
            return;
        };

        let callback_payload = {
            let mut inner = self.inner.lock().unwrap();

            // Same TEID: QoS/routing change, not a handover.
            if inner.tunnels.contains_key(&new_teid) {
                if let Some(tunnel) = inner.tunnels.get_mut(&new_teid) {
                    tunnel.last_activity = msg.timestamp;
                }
                return;
            }

            // New TEID for an IMSI that owns an active tunnel: handover.
            let Some(imsi) = msg
                .hints
                .imsi
                .clone()
                .or_else(|| msg.field_str("imsi").map(str::to_string))
            else {
                return;
            };
            let old_teid = inner
                .imsi_index
                .get(&imsi)
                .into_iter()
                .flatten()
                .rev()
                .find(|&&teid| {
                    inner
                        .tunnels
                        .get(&teid)
                        .map_or(false, |t| t.state == TunnelState::Active)
                })
                .copied();
            let Some(old_teid) = old_teid else {
                return;
            };

            if inner.tunnels.len() >= self.config.max_tunnels {
                debug!(%new_teid, "tunnel cap reached, handover target not created");
                return;
            }

            let bearer = first_bearer_context(msg);
            let new_peer_ip = bearer.as_ref().and_then(|b| fteid_ip(b, "s1u_enb_fteid"));

            let Some(old) = inner.tunnels.get_mut(&old_teid) else {
                return;
            };
            let (event, inherited) = {
                let preparation = old
                    .activated
                    .map(|activated| activated.millis_since(old.created));
                let event = HandoverEvent {
                    old_teid,
                    new_teid,
                    old_peer_ip: old.uplink_peer_ip.clone(),
                    new_peer_ip: new_peer_ip.clone(),
                    handover_type: "X2".to_string(),
                    timestamp: msg.timestamp,
                    preparation_time_ms: preparation,
                    interruption_time_ms: None,
                };
                old.handovers.push(event.clone());
                old.record_event(
                    TunnelEventKind::Handover,
                    msg.timestamp,
                    format!("handover to {}", new_teid),
                );
                old.state = TunnelState::HandedOver;
                (event, (old.ue_ipv4.clone(), old.ue_ipv6.clone(), old.apn.clone(), old.eps_bearer_id, old.qci))
            };

            let mut new_tunnel = Tunnel::new(new_teid, msg.timestamp);
            new_tunnel.state = TunnelState::Active;
            new_tunnel.activated = Some(msg.timestamp);
            new_tunnel.imsi = Some(imsi.clone());
            new_tunnel.ue_ipv4 = inherited.0;
            new_tunnel.ue_ipv6 = inherited.1;
            new_tunnel.apn = inherited.2;
            new_tunnel.eps_bearer_id = inherited.3;
            new_tunnel.qci = inherited.4;
            new_tunnel.uplink_peer_ip = new_peer_ip;
            new_tunnel.record_event(
                TunnelEventKind::Created,
                msg.timestamp,
                format!("handover from {}", old_teid),
            );

            if let Some(ip) = new_tunnel.ue_ipv4.clone() {
                let entry = inner.ue_ip_index.entry(ip).or_default();
                if !entry.contains(&new_teid) {
                    entry.push(new_teid);
                }
            }
            inner.imsi_index.entry(imsi).or_default().push(new_teid);
            inner.order.push(new_teid);
            inner.tunnels.insert(new_teid, new_tunnel);
            inner.pending_interruption.insert(new_teid, old_teid);
            inner.handovers_detected += 1;

            info!(
                old = %old_teid,
                new = %new_teid,
                "handover detected"
            );

            inner
                .tunnels
                .get(&old_teid)
                .cloned()
                .map(|old_tunnel| (event, old_tunnel))
        };

        if let Some((event, old_tunnel)) = callback_payload {
            if let Some(callback) = self.handover_callback.lock().unwrap().as_ref() {
                callback(&event, &old_tunnel);
            }
        }
    }

    fn on_delete_session(&self, msg: &ParsedMessage, is_response: bool) {
        let Some(teid) = msg.hints.teid_s1u else {
            return;
        };
        let mut inner = self.inner.lock().unwrap();
        let Some(tunnel) = inner.tunnels.get_mut(&teid) else {
            return;
        };

        if is_response {
            tunnel.state = TunnelState::Deleted;
            tunnel.deleted = Some(msg.timestamp);
            tunnel.record_event(
                TunnelEventKind::Deleted,
                msg.timestamp,
                "Delete Session Response".to_string(),
            );
        } else {
            tunnel.state = TunnelState::Deleting;
        }
    }
}

impl Default for TunnelManager {
    fn default() -> Self {
        Self::new()
    }
}

fn first_bearer_context(msg: &ParsedMessage) -> Option<serde_json::Map<String, Value>> {
    msg.fields
        .get("bearer_contexts")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(Value::as_object)
        .cloned()
}

fn fteid_teid(bearer: &serde_json::Map<String, Value>, key: &str) -> Option<Teid> {
    bearer
        .get(key)
        .and_then(Value::as_object)
        .and_then(|f| f.get("teid"))
        .and_then(Value::as_u64)
        .map(|v| Teid(v as u32))
}

fn fteid_ip(bearer: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    bearer
        .get(key)
        .and_then(Value::as_object)
        .and_then(|f| f.get("ipv4"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
