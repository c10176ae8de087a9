//! Subscriber identity aggregate.
//!
//! One [`SubscriberIdentity`] represents everything the engine has learned
//! about a single real subscriber, gathered piecemeal across protocols.
//! Permanent identifiers (IMSI, MSISDN, IMEI) are set once and never
//! overwritten; temporary identifiers (GUTI, TMSI) always track the most
//! recent observation.

use crate::identity::guti::{Guti4g, Guti5g};
use crate::identity::imei::NormalizedImei;
use crate::identity::imsi::NormalizedImsi;
use crate::identity::msisdn::NormalizedMsisdn;
use crate::types::{Teid, Timestamp};
use serde::Serialize;
use std::collections::HashMap;

/// A network endpoint observed for a subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkEndpoint {
    pub ipv4: String,
    pub ipv6: String,
    pub port: u16,
    /// GTP-U peer, when this endpoint came from an F-TEID.
    pub gtpu_peer_ip: Option<String>,
    pub gtpu_teid: Option<Teid>,
}

impl NetworkEndpoint {
    /// Endpoint with only an IPv4 address.
    pub fn ipv4(ip: &str) -> Self {
        NetworkEndpoint {
            ipv4: ip.to_string(),
            ..Default::default()
        }
    }

    /// Endpoint with only an IPv6 address.
    pub fn ipv6(ip: &str) -> Self {
        NetworkEndpoint {
            ipv6: ip.to_string(),
            ..Default::default()
        }
    }

    pub fn has_ipv4(&self) -> bool {
        !self.ipv4.is_empty()
    }

    pub fn has_ipv6(&self) -> bool {
        !self.ipv6.is_empty()
    }

    /// True when `ip` equals either address family.
    pub fn matches_ip(&self, ip: &str) -> bool {
        !ip.is_empty() && (self.ipv4 == ip || self.ipv6 == ip)
    }

    /// True when this endpoint shares an IP with `other`.
    pub fn same_ip(&self, other: &NetworkEndpoint) -> bool {
        (other.has_ipv4() && self.matches_ip(&other.ipv4))
            || (other.has_ipv6() && self.matches_ip(&other.ipv6))
    }

    /// Textual IPv6 prefix of the given bit length (hextet granularity).
    ///
    /// For `prefix_len` 64 this is the first four hextets. Empty when the
    /// endpoint has no IPv6 address or the length is out of range.
    pub fn ipv6_prefix(&self, prefix_len: usize) -> String {
        if self.ipv6.is_empty() || prefix_len == 0 || prefix_len > 128 {
            return String::new();
        }
        let hextets = prefix_len / 16;
        let parts: Vec<&str> = self.ipv6.split(':').collect();
        if parts.len() < hextets {
            return self.ipv6.clone();
        }
        parts[..hextets].join(":")
    }
}

/// Merged view of one subscriber across every protocol that mentioned it.
#[derive(Debug, Clone, Default)]
pub struct SubscriberIdentity {
    // Permanent identifiers: set once.
    pub imsi: Option<NormalizedImsi>,
    pub msisdn: Option<NormalizedMsisdn>,
    pub imei: Option<NormalizedImei>,

    // Temporary identifiers: latest observation wins.
    pub guti: Option<Guti4g>,
    pub tmsi: Option<u32>,
    pub p_tmsi: Option<u32>,
    pub guti_5g: Option<Guti5g>,
    pub tmsi_5g: Option<u32>,

    pub endpoints: Vec<NetworkEndpoint>,

    pub apn: String,
    /// "ipv4", "ipv6" or "ipv4v6".
    pub pdn_type: String,

    /// Per-field confidence scores in [0, 1].
    pub confidence: HashMap<String, f32>,

    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
}

impl SubscriberIdentity {
    pub fn has_imsi(&self) -> bool {
        self.imsi.is_some()
    }

    pub fn has_msisdn(&self) -> bool {
        self.msisdn.is_some()
    }

    pub fn has_imei(&self) -> bool {
        self.imei.is_some()
    }

    /// Number of populated identity slots, used to pick the merge primary.
    pub fn populated_fields(&self) -> usize {
        let mut count = 0;
        count += self.imsi.is_some() as usize;
        count += self.msisdn.is_some() as usize;
        count += self.imei.is_some() as usize;
        count += self.guti.is_some() as usize;
        count += self.tmsi.is_some() as usize;
        count += self.guti_5g.is_some() as usize;
        count += self.tmsi_5g.is_some() as usize;
        count += (!self.endpoints.is_empty()) as usize;
        count += (!self.apn.is_empty()) as usize;
        count
    }

    /// Records an observation time, widening the first/last-seen window.
    pub fn touch(&mut self, ts: Timestamp) {
        if self.first_seen.is_unset() || ts < self.first_seen {
            self.first_seen = ts;
        }
        if ts > self.last_seen {
            self.last_seen = ts;
        }
    }

    /// Adds an endpoint unless one with the same IP is already present.
    pub fn add_endpoint(&mut self, ep: NetworkEndpoint) {
        if !self.endpoints.iter().any(|existing| existing.same_ip(&ep)) {
            self.endpoints.push(ep);
        }
    }

    /// True when any identifier of `self` matches the same identifier of
    /// `other` (IMSI, fuzzy MSISDN, IMEI body, GUTI tuple, shared IP).
    pub fn matches(&self, other: &SubscriberIdentity) -> bool {
        if let (Some(a), Some(b)) = (&self.imsi, &other.imsi) {
            if a.digits == b.digits {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (&self.msisdn, &other.msisdn) {
            if a.matches(b) {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (&self.imei, &other.imei) {
            if a.imei == b.imei {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (&self.guti, &other.guti) {
            if a.m_tmsi == b.m_tmsi && a.mcc == b.mcc && a.mnc == b.mnc {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (&self.guti_5g, &other.guti_5g) {
            if a.tmsi_5g == b.tmsi_5g && a.mcc == b.mcc && a.mnc == b.mnc {
                return true;
            }
        }
        for ep1 in &self.endpoints {
            for ep2 in &other.endpoints {
                if ep1.same_ip(ep2) {
                    return true;
                }
            }
        }
        false
    }

    /// Absorbs `other` into `self`.
    ///
    /// Permanent identifiers fill gaps only; temporary identifiers are
    /// overwritten by `other`'s values; endpoints are deduplicated by IP;
    /// confidence keeps the higher score per field; the seen window widens.
    pub fn merge(&mut self, other: &SubscriberIdentity) {
        if self.imsi.is_none() {
            self.imsi = other.imsi.clone();
        }
        if self.msisdn.is_none() {
            self.msisdn = other.msisdn.clone();
        }
        if self.imei.is_none() {
            self.imei = other.imei.clone();
        }

        if other.guti.is_some() {
            self.guti = other.guti.clone();
        }
        if other.guti_5g.is_some() {
            self.guti_5g = other.guti_5g.clone();
        }
        if other.tmsi.is_some() {
            self.tmsi = other.tmsi;
        }
        if other.p_tmsi.is_some() {
            self.p_tmsi = other.p_tmsi;
        }
        if other.tmsi_5g.is_some() {
            self.tmsi_5g = other.tmsi_5g;
        }

        for ep in &other.endpoints {
            self.add_endpoint(ep.clone());
        }

        if self.apn.is_empty() && !other.apn.is_empty() {
            self.apn = other.apn.clone();
        }
        if self.pdn_type.is_empty() && !other.pdn_type.is_empty() {
            self.pdn_type = other.pdn_type.clone();
        }

        for (key, value) in &other.confidence {
            let entry = self.confidence.entry(key.clone()).or_insert(0.0);
            if *entry < *value {
                *entry = *value;
            }
        }

        if !other.first_seen.is_unset()
            && (self.first_seen.is_unset() || other.first_seen < self.first_seen)
        {
            self.first_seen = other.first_seen;
        }
        if other.last_seen > self.last_seen {
            self.last_seen = other.last_seen;
        }
    }

    /// Best available identifier, for display and stable keying.
    pub fn primary_key(&self) -> String {
        if let Some(imsi) = &self.imsi {
            return format!("imsi:{}", imsi.digits);
        }
        if let Some(msisdn) = &self.msisdn {
            return format!("msisdn:{}", msisdn.international);
        }
        if let Some(imei) = &self.imei {
            return format!("imei:{}", imei.imei);
        }
        if let Some(guti) = &self.guti {
            return format!("guti:{}", guti.index_key());
        }
        if let Some(guti) = &self.guti_5g {
            return format!("5g-guti:{}{}-{:x}", guti.mcc, guti.mnc, guti.tmsi_5g);
        }
        if let Some(ep) = self.endpoints.first() {
            if ep.has_ipv4() {
                return format!("ip:{}", ep.ipv4);
            }
            if ep.has_ipv6() {
                return format!("ip:{}", ep.ipv6);
            }
        }
        "unknown".to_string()
    }
}
