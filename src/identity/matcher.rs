//! Tiered matching of partial subscriber identities.
//!
//! Pure functions over two [`SubscriberIdentity`] snapshots. Each matcher
//! compares one identifier kind and yields a confidence tier with a score in
//! [0, 1]; the overall [`match_identities`] tries them in decreasing
//! expected strength and [`calculate_match_score`] takes the maximum across
//! all matchers: a single exact identifier match is conclusive on its own,
//! so scores are never summed.

use crate::identity::msisdn;
use crate::identity::subscriber::SubscriberIdentity;
use serde::Serialize;

/// Confidence tier of a match decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MatchConfidence {
    None,
    Low,
    Medium,
    High,
    Exact,
}

impl MatchConfidence {
    /// Canonical score for a tier.
    pub fn score(&self) -> f32 {
        match self {
            MatchConfidence::Exact => 1.0,
            MatchConfidence::High => 0.85,
            MatchConfidence::Medium => 0.65,
            MatchConfidence::Low => 0.4,
            MatchConfidence::None => 0.0,
        }
    }

    /// Tier for a raw score.
    pub fn from_score(score: f32) -> Self {
        if score >= 0.95 {
            MatchConfidence::Exact
        } else if score >= 0.75 {
            MatchConfidence::High
        } else if score >= 0.5 {
            MatchConfidence::Medium
        } else if score >= 0.3 {
            MatchConfidence::Low
        } else {
            MatchConfidence::None
        }
    }
}

/// Outcome of one match attempt.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub confidence: MatchConfidence,
    pub reason: String,
    pub score: f32,
}

impl MatchResult {
    fn new(confidence: MatchConfidence, reason: impl Into<String>, score: f32) -> Self {
        MatchResult {
            confidence,
            reason: reason.into(),
            score,
        }
    }

    fn none(reason: &str) -> Self {
        Self::new(MatchConfidence::None, reason, 0.0)
    }

    pub fn is_match(&self) -> bool {
        self.confidence != MatchConfidence::None
    }

    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= MatchConfidence::High
    }
}

/// Overall match: tries matchers in decreasing expected strength and returns
/// the first hit, with the IP-only comparison last.
pub fn match_identities(id1: &SubscriberIdentity, id2: &SubscriberIdentity) -> MatchResult {
    let by_imsi = match_by_imsi(id1, id2);
    if by_imsi.is_match() {
        return by_imsi;
    }

    let by_imei = match_by_imei(id1, id2);
    if by_imei.is_match() {
        return by_imei;
    }

    let by_guti = match_by_guti(id1, id2);
    if by_guti.is_match() {
        return by_guti;
    }

    let by_msisdn = match_by_msisdn(id1, id2);
    if by_msisdn.is_match() {
        return by_msisdn;
    }

    // IP+APN is only conclusive at high confidence; a bare IP overlap falls
    // through to the weaker matchers below.
    let by_ip_apn = match_by_ip_and_apn(id1, id2);
    if by_ip_apn.is_high_confidence() {
        return by_ip_apn;
    }

    let by_teid = match_by_teid(id1, id2);
    if by_teid.is_match() {
        return by_teid;
    }

    let by_ip = match_by_ip(id1, id2);
    if by_ip.is_match() {
        return by_ip;
    }

    MatchResult::none("No matching identifiers found")
}

/// Maximum score across every matcher.
pub fn calculate_match_score(id1: &SubscriberIdentity, id2: &SubscriberIdentity) -> f32 {
    [
        match_by_imsi(id1, id2).score,
        match_by_imei(id1, id2).score,
        match_by_guti(id1, id2).score,
        match_by_msisdn(id1, id2).score,
        match_by_ip_and_apn(id1, id2).score,
        match_by_teid(id1, id2).score,
        match_by_ip(id1, id2).score,
    ]
    .into_iter()
    .fold(0.0, f32::max)
}

/// IMSI: digits equal is the one conclusive identity comparison.
pub fn match_by_imsi(id1: &SubscriberIdentity, id2: &SubscriberIdentity) -> MatchResult {
    let (Some(a), Some(b)) = (&id1.imsi, &id2.imsi) else {
        return MatchResult::none("IMSI not available");
    };
    if a.digits == b.digits {
        return MatchResult::new(
            MatchConfidence::Exact,
            format!("IMSI exact match: {}", a.digits),
            1.0,
        );
    }
    MatchResult::none("IMSI mismatch")
}

/// MSISDN: international exact, national exact, then 9- and 7-digit suffix.
pub fn match_by_msisdn(id1: &SubscriberIdentity, id2: &SubscriberIdentity) -> MatchResult {
    let (Some(a), Some(b)) = (&id1.msisdn, &id2.msisdn) else {
        return MatchResult::none("MSISDN not available");
    };

    if !a.international.is_empty() && a.international == b.international {
        return MatchResult::new(
            MatchConfidence::Exact,
            format!("MSISDN international exact match: {}", a.international),
            1.0,
        );
    }
    if !a.national.is_empty() && a.national == b.national {
        return MatchResult::new(
            MatchConfidence::High,
            format!("MSISDN national exact match: {}", a.national),
            0.95,
        );
    }
    if msisdn::matches(a, b, 9) {
        return MatchResult::new(MatchConfidence::Medium, "MSISDN suffix match (9 digits)", 0.8);
    }
    if msisdn::matches(a, b, 7) {
        return MatchResult::new(MatchConfidence::Low, "MSISDN suffix match (7 digits)", 0.6);
    }
    MatchResult::none("MSISDN mismatch")
}

/// IMEI: body equal is exact; a shared TAC only says "same device model".
pub fn match_by_imei(id1: &SubscriberIdentity, id2: &SubscriberIdentity) -> MatchResult {
    let (Some(a), Some(b)) = (&id1.imei, &id2.imei) else {
        return MatchResult::none("IMEI not available");
    };
    if a.imei == b.imei {
        return MatchResult::new(
            MatchConfidence::Exact,
            format!("IMEI exact match: {}", a.imei),
            1.0,
        );
    }
    if !a.tac.is_empty() && a.tac == b.tac {
        return MatchResult::new(
            MatchConfidence::Low,
            format!("IMEI TAC match (same device type): {}", a.tac),
            0.3,
        );
    }
    MatchResult::none("IMEI mismatch")
}

/// GUTI / TMSI: exact temporary-id match, weaker pool/set overlap.
pub fn match_by_guti(id1: &SubscriberIdentity, id2: &SubscriberIdentity) -> MatchResult {
    if let (Some(a), Some(b)) = (&id1.guti, &id2.guti) {
        if a.m_tmsi == b.m_tmsi && a.mcc == b.mcc && a.mnc == b.mnc {
            return MatchResult::new(MatchConfidence::Exact, "4G GUTI exact match (M-TMSI)", 1.0);
        }
        if a.same_mme_pool(b) {
            return MatchResult::new(MatchConfidence::Low, "4G GUTI same MME pool", 0.4);
        }
    }

    if let (Some(a), Some(b)) = (&id1.guti_5g, &id2.guti_5g) {
        if a.tmsi_5g == b.tmsi_5g && a.mcc == b.mcc && a.mnc == b.mnc {
            return MatchResult::new(MatchConfidence::Exact, "5G-GUTI exact match (5G-TMSI)", 1.0);
        }
        if a.same_amf_set(b) {
            return MatchResult::new(MatchConfidence::Low, "5G-GUTI same AMF set", 0.4);
        }
    }

    if let (Some(a), Some(b)) = (id1.tmsi, id2.tmsi) {
        if a == b {
            return MatchResult::new(MatchConfidence::Medium, "TMSI match", 0.7);
        }
    }
    if let (Some(a), Some(b)) = (id1.tmsi_5g, id2.tmsi_5g) {
        if a == b {
            return MatchResult::new(MatchConfidence::Medium, "5G-TMSI match", 0.7);
        }
    }

    MatchResult::none("GUTI not available or mismatch")
}

/// IP endpoints: exact address match (either family), /64 prefix fallback.
pub fn match_by_ip(id1: &SubscriberIdentity, id2: &SubscriberIdentity) -> MatchResult {
    if id1.endpoints.is_empty() || id2.endpoints.is_empty() {
        return MatchResult::none("IP endpoints not available");
    }

    for ep1 in &id1.endpoints {
        for ep2 in &id2.endpoints {
            if ep1.has_ipv4() && ep2.has_ipv4() && ep1.ipv4 == ep2.ipv4 {
                return MatchResult::new(
                    MatchConfidence::Medium,
                    format!("IPv4 exact match: {}", ep1.ipv4),
                    0.75,
                );
            }
            if ep1.has_ipv6() && ep2.has_ipv6() {
                if ep1.ipv6 == ep2.ipv6 {
                    return MatchResult::new(
                        MatchConfidence::Medium,
                        format!("IPv6 exact match: {}", ep1.ipv6),
                        0.75,
                    );
                }
                let p1 = ep1.ipv6_prefix(64);
                if !p1.is_empty() && p1 == ep2.ipv6_prefix(64) {
                    return MatchResult::new(
                        MatchConfidence::Low,
                        "IPv6 prefix match (/64)",
                        0.5,
                    );
                }
            }
        }
    }

    MatchResult::none("IP mismatch")
}

/// IP plus APN: an IP overlap backed by an identical APN is close to
/// conclusive for a bearer-level identity.
pub fn match_by_ip_and_apn(id1: &SubscriberIdentity, id2: &SubscriberIdentity) -> MatchResult {
    let ip_match = match_by_ip(id1, id2);
    if !ip_match.is_match() {
        return MatchResult::none("IP not matching");
    }
    if !id1.apn.is_empty() && id1.apn == id2.apn {
        return MatchResult::new(
            MatchConfidence::High,
            format!("IP and APN match: {}", id1.apn),
            0.9,
        );
    }
    ip_match
}

/// GTP-U TEID: two contexts naming the same tunnel endpoint.
pub fn match_by_teid(id1: &SubscriberIdentity, id2: &SubscriberIdentity) -> MatchResult {
    if id1.endpoints.is_empty() || id2.endpoints.is_empty() {
        return MatchResult::none("Endpoints not available");
    }
    for ep1 in &id1.endpoints {
        for ep2 in &id2.endpoints {
            if let (Some(a), Some(b)) = (ep1.gtpu_teid, ep2.gtpu_teid) {
                if a == b {
                    return MatchResult::new(
                        MatchConfidence::High,
                        "GTP-U TEID exact match",
                        0.85,
                    );
                }
            }
        }
    }
    MatchResult::none("TEID not available or mismatch")
}
