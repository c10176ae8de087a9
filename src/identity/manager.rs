//! Subscriber context manager.
//!
//! The single shared mutable graph of the engine: every per-protocol
//! correlator reports the identifiers it sees, and this manager merges them
//! into one [`SubscriberIdentity`] per real subscriber. Contexts are handed
//! out as reference-counted handles; all index mutations happen under the
//! manager's reader-writer lock, and mutation of an individual context is
//! serialised by its own mutex.
//!
//! Merging is the central operation: when a link discovers that two
//! previously separate contexts describe the same subscriber, the context
//! with more populated fields absorbs the other (ties broken by age), every
//! index entry is repointed, and the loser is discarded.

use crate::identity::guti::Guti4g;
use crate::identity::subscriber::{NetworkEndpoint, SubscriberIdentity};
use crate::identity::{imei, imsi, msisdn};
use crate::types::Teid;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Shared handle to one subscriber context.
pub type ContextHandle = Arc<Mutex<SubscriberIdentity>>;

/// Counters describing the managed graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub total_contexts: usize,
    pub contexts_with_imsi: usize,
    pub contexts_with_msisdn: usize,
    pub contexts_with_imei: usize,
    pub contexts_with_ue_ip: usize,
    pub merge_operations: usize,
}

#[derive(Default)]
struct Inner {
    contexts: Vec<ContextHandle>,

    // Index maps for O(1) lookup. Every entry points at a live context; a
    // merge repoints the loser's entries before dropping it.
    imsi_index: HashMap<String, ContextHandle>,
    msisdn_index: HashMap<String, ContextHandle>,
    imei_index: HashMap<String, ContextHandle>,
    ip_index: HashMap<String, ContextHandle>,
    tmsi_index: HashMap<u32, ContextHandle>,
    guti_index: HashMap<String, ContextHandle>,

    merge_operations: usize,
}

/// Concurrent repository of subscriber contexts, indexed by every known
/// identifier kind.
#[derive(Default)]
pub struct SubscriberContextManager {
    inner: RwLock<Inner>,
}

impl SubscriberContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Get-or-create
    // ========================================================================

    /// Looks up or creates the context owning this IMSI.
    ///
    /// Returns `None` when the input does not normalise to a valid IMSI.
    pub fn get_or_create_by_imsi(&self, raw: &str) -> Option<ContextHandle> {
        let normalized = imsi::normalize(raw)?;
        let mut inner = self.inner.write().unwrap();
        if let Some(ctx) = inner.imsi_index.get(&normalized.digits) {
            return Some(ctx.clone());
        }
        let ctx = new_context(&mut inner);
        ctx.lock().unwrap().imsi = Some(normalized.clone());
        inner.imsi_index.insert(normalized.digits, ctx.clone());
        Some(ctx)
    }

    /// Looks up or creates the context owning this MSISDN.
    pub fn get_or_create_by_msisdn(&self, raw: &str) -> Option<ContextHandle> {
        let normalized = msisdn::normalize(raw);
        if normalized.is_empty() {
            return None;
        }
        let key = msisdn_key(&normalized);
        let mut inner = self.inner.write().unwrap();
        if let Some(ctx) = inner.msisdn_index.get(&key) {
            return Some(ctx.clone());
        }
        let ctx = new_context(&mut inner);
        ctx.lock().unwrap().msisdn = Some(normalized);
        inner.msisdn_index.insert(key, ctx.clone());
        Some(ctx)
    }

    /// Looks up or creates the context owning this IMEI.
    pub fn get_or_create_by_imei(&self, raw: &str) -> Option<ContextHandle> {
        let normalized = imei::normalize(raw)?;
        let mut inner = self.inner.write().unwrap();
        if let Some(ctx) = inner.imei_index.get(&normalized.imei) {
            return Some(ctx.clone());
        }
        let ctx = new_context(&mut inner);
        let key = normalized.imei.clone();
        ctx.lock().unwrap().imei = Some(normalized);
        inner.imei_index.insert(key, ctx.clone());
        Some(ctx)
    }

    /// Looks up or creates the context owning this UE IP (either family).
    pub fn get_or_create_by_ue_ip(&self, ip: &str) -> Option<ContextHandle> {
        if ip.is_empty() {
            return None;
        }
        let mut inner = self.inner.write().unwrap();
        if let Some(ctx) = inner.ip_index.get(ip) {
            return Some(ctx.clone());
        }
        let ctx = new_context(&mut inner);
        ctx.lock().unwrap().add_endpoint(endpoint_for_ip(ip));
        inner.ip_index.insert(ip.to_string(), ctx.clone());
        Some(ctx)
    }

    // ========================================================================
    // Find-only
    // ========================================================================

    pub fn find_by_imsi(&self, raw: &str) -> Option<ContextHandle> {
        let normalized = imsi::normalize(raw)?;
        self.inner
            .read()
            .unwrap()
            .imsi_index
            .get(&normalized.digits)
            .cloned()
    }

    pub fn find_by_msisdn(&self, raw: &str) -> Option<ContextHandle> {
        let normalized = msisdn::normalize(raw);
        if normalized.is_empty() {
            return None;
        }
        self.inner
            .read()
            .unwrap()
            .msisdn_index
            .get(&msisdn_key(&normalized))
            .cloned()
    }

    pub fn find_by_imei(&self, raw: &str) -> Option<ContextHandle> {
        let normalized = imei::normalize(raw)?;
        self.inner
            .read()
            .unwrap()
            .imei_index
            .get(&normalized.imei)
            .cloned()
    }

    pub fn find_by_ue_ip(&self, ip: &str) -> Option<ContextHandle> {
        self.inner.read().unwrap().ip_index.get(ip).cloned()
    }

    pub fn find_by_guti(&self, guti: &Guti4g) -> Option<ContextHandle> {
        self.inner
            .read()
            .unwrap()
            .guti_index
            .get(&guti.index_key())
            .cloned()
    }

    pub fn find_by_tmsi(&self, tmsi: u32) -> Option<ContextHandle> {
        self.inner.read().unwrap().tmsi_index.get(&tmsi).cloned()
    }

    // ========================================================================
    // Link operations
    // ========================================================================

    /// Declares that this IMSI and MSISDN belong to the same subscriber.
    ///
    /// Invalid identifiers are silently ignored; callers feed raw wire data.
    pub fn link_imsi_msisdn(&self, raw_imsi: &str, raw_msisdn: &str) {
        let Some(norm_imsi) = imsi::normalize(raw_imsi) else {
            return;
        };
        let norm_msisdn = msisdn::normalize(raw_msisdn);
        if norm_msisdn.is_empty() {
            return;
        }

        let mut inner = self.inner.write().unwrap();
        let imsi_ctx = inner.imsi_index.get(&norm_imsi.digits).cloned();
        let msisdn_ctx = inner.msisdn_index.get(&msisdn_key(&norm_msisdn)).cloned();

        let target = resolve_link(&mut inner, imsi_ctx, msisdn_ctx);
        {
            let mut ctx = target.lock().unwrap();
            if ctx.imsi.is_none() {
                ctx.imsi = Some(norm_imsi.clone());
            }
            if ctx.msisdn.is_none() {
                ctx.msisdn = Some(norm_msisdn.clone());
            }
        }
        inner.imsi_index.insert(norm_imsi.digits, target.clone());
        inner.msisdn_index.insert(msisdn_key(&norm_msisdn), target);
    }

    /// Declares that this IMSI and IMEI belong to the same subscriber.
    pub fn link_imsi_imei(&self, raw_imsi: &str, raw_imei: &str) {
        let Some(norm_imsi) = imsi::normalize(raw_imsi) else {
            return;
        };
        let Some(norm_imei) = imei::normalize(raw_imei) else {
            return;
        };

        let mut inner = self.inner.write().unwrap();
        let imsi_ctx = inner.imsi_index.get(&norm_imsi.digits).cloned();
        let imei_ctx = inner.imei_index.get(&norm_imei.imei).cloned();

        let target = resolve_link(&mut inner, imsi_ctx, imei_ctx);
        {
            let mut ctx = target.lock().unwrap();
            if ctx.imsi.is_none() {
                ctx.imsi = Some(norm_imsi.clone());
            }
            if ctx.imei.is_none() {
                ctx.imei = Some(norm_imei.clone());
            }
        }
        inner.imsi_index.insert(norm_imsi.digits, target.clone());
        inner.imei_index.insert(norm_imei.imei, target);
    }

    /// Declares that this MSISDN currently uses the given UE IP.
    pub fn link_msisdn_ue_ip(&self, raw_msisdn: &str, ip: &str) {
        let norm_msisdn = msisdn::normalize(raw_msisdn);
        if norm_msisdn.is_empty() || ip.is_empty() {
            return;
        }

        let mut inner = self.inner.write().unwrap();
        let msisdn_ctx = inner.msisdn_index.get(&msisdn_key(&norm_msisdn)).cloned();
        let ip_ctx = inner.ip_index.get(ip).cloned();

        let target = resolve_link(&mut inner, msisdn_ctx, ip_ctx);
        {
            let mut ctx = target.lock().unwrap();
            if ctx.msisdn.is_none() {
                ctx.msisdn = Some(norm_msisdn.clone());
            }
            ctx.add_endpoint(endpoint_for_ip(ip));
        }
        inner
            .msisdn_index
            .insert(msisdn_key(&norm_msisdn), target.clone());
        inner.ip_index.insert(ip.to_string(), target);
    }

    /// Declares that this IMSI currently uses the given UE IP.
    pub fn link_imsi_ue_ip(&self, raw_imsi: &str, ip: &str) {
        let Some(norm_imsi) = imsi::normalize(raw_imsi) else {
            return;
        };
        if ip.is_empty() {
            return;
        }

        let mut inner = self.inner.write().unwrap();
        let imsi_ctx = inner.imsi_index.get(&norm_imsi.digits).cloned();
        let ip_ctx = inner.ip_index.get(ip).cloned();

        let target = resolve_link(&mut inner, imsi_ctx, ip_ctx);
        {
            let mut ctx = target.lock().unwrap();
            if ctx.imsi.is_none() {
                ctx.imsi = Some(norm_imsi.clone());
            }
            ctx.add_endpoint(endpoint_for_ip(ip));
        }
        inner.imsi_index.insert(norm_imsi.digits, target.clone());
        inner.ip_index.insert(ip.to_string(), target);
    }

    /// Declares the current 4G GUTI allocation for this IMSI.
    pub fn link_imsi_guti(&self, raw_imsi: &str, guti: &Guti4g) {
        let Some(norm_imsi) = imsi::normalize(raw_imsi) else {
            return;
        };

        let mut inner = self.inner.write().unwrap();
        let imsi_ctx = inner.imsi_index.get(&norm_imsi.digits).cloned();
        let guti_ctx = inner.guti_index.get(&guti.index_key()).cloned();

        let target = resolve_link(&mut inner, imsi_ctx, guti_ctx);
        {
            let mut ctx = target.lock().unwrap();
            if ctx.imsi.is_none() {
                ctx.imsi = Some(norm_imsi.clone());
            }
            ctx.guti = Some(guti.clone());
        }
        inner.imsi_index.insert(norm_imsi.digits, target.clone());
        inner.guti_index.insert(guti.index_key(), target);
    }

    /// Declares the current TMSI allocation for this IMSI.
    pub fn link_imsi_tmsi(&self, raw_imsi: &str, tmsi: u32) {
        let Some(norm_imsi) = imsi::normalize(raw_imsi) else {
            return;
        };

        let mut inner = self.inner.write().unwrap();
        let imsi_ctx = inner.imsi_index.get(&norm_imsi.digits).cloned();
        let tmsi_ctx = inner.tmsi_index.get(&tmsi).cloned();

        let target = resolve_link(&mut inner, imsi_ctx, tmsi_ctx);
        {
            let mut ctx = target.lock().unwrap();
            if ctx.imsi.is_none() {
                ctx.imsi = Some(norm_imsi.clone());
            }
            ctx.tmsi = Some(tmsi);
        }
        inner.imsi_index.insert(norm_imsi.digits, target.clone());
        inner.tmsi_index.insert(tmsi, target);
    }

    /// Attaches a GTP-U tunnel endpoint to the subscriber identified by
    /// IMSI or MSISDN (tried in that order).
    pub fn add_gtpu_tunnel(&self, imsi_or_msisdn: &str, peer_ip: &str, teid: Teid) {
        let ctx = self
            .find_by_imsi(imsi_or_msisdn)
            .or_else(|| self.find_by_msisdn(imsi_or_msisdn));
        let Some(ctx) = ctx else {
            debug!(identifier = imsi_or_msisdn, "gtp-u tunnel for unknown subscriber");
            return;
        };
        ctx.lock().unwrap().add_endpoint(NetworkEndpoint {
            gtpu_peer_ip: Some(peer_ip.to_string()),
            gtpu_teid: Some(teid),
            ..Default::default()
        });
    }

    // ========================================================================
    // Propagation
    // ========================================================================

    /// Offline sweep run after bulk ingestion: merges contexts that share a
    /// UE IP or a GUTI/TMSI allocation. Because a merge copies all missing
    /// identifiers both ways, this implements forward- and backward-fill of
    /// IMSI↔MSISDN across linked contexts.
    pub fn propagate_identities(&self) {
        self.correlate_by(|ctx| {
            ctx.endpoints
                .iter()
                .flat_map(|ep| {
                    [ep.ipv4.clone(), ep.ipv6.clone()]
                        .into_iter()
                        .filter(|ip| !ip.is_empty())
                })
                .collect()
        });
        self.correlate_by(|ctx| {
            let mut keys = Vec::new();
            if let Some(guti) = &ctx.guti {
                keys.push(format!("guti:{}", guti.index_key()));
            }
            if let Some(tmsi) = ctx.tmsi {
                keys.push(format!("tmsi:{:08x}", tmsi));
            }
            keys
        });
    }

    /// Groups contexts by the keys `extract` yields and merges every group
    /// down to one context.
    fn correlate_by<F>(&self, extract: F)
    where
        F: Fn(&SubscriberIdentity) -> Vec<String>,
    {
        let mut inner = self.inner.write().unwrap();

        loop {
            let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
            for (idx, ctx) in inner.contexts.iter().enumerate() {
                for key in extract(&ctx.lock().unwrap()) {
                    groups.entry(key).or_default().push(idx);
                }
            }

            // Merge one pair per pass; indices shift after each merge.
            let pair = groups.values().find_map(|members| {
                let first = members[0];
                members
                    .iter()
                    .copied()
                    .find(|&m| m != first)
                    .map(|second| (first, second))
            });
            match pair {
                Some((a, b)) => {
                    let first = inner.contexts[a].clone();
                    let second = inner.contexts[b].clone();
                    merge_contexts(&mut inner, first, second);
                }
                None => break,
            }
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// All live contexts, in creation order.
    pub fn all_contexts(&self) -> Vec<ContextHandle> {
        self.inner.read().unwrap().contexts.clone()
    }

    pub fn stats(&self) -> ManagerStats {
        let inner = self.inner.read().unwrap();
        let mut stats = ManagerStats {
            total_contexts: inner.contexts.len(),
            merge_operations: inner.merge_operations,
            ..Default::default()
        };
        for ctx in &inner.contexts {
            let ctx = ctx.lock().unwrap();
            stats.contexts_with_imsi += ctx.has_imsi() as usize;
            stats.contexts_with_msisdn += ctx.has_msisdn() as usize;
            stats.contexts_with_imei += ctx.has_imei() as usize;
            stats.contexts_with_ue_ip += (!ctx.endpoints.is_empty()) as usize;
        }
        stats
    }

    /// Drops every context and index entry.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        *inner = Inner::default();
    }
}

fn new_context(inner: &mut Inner) -> ContextHandle {
    let ctx: ContextHandle = Arc::new(Mutex::new(SubscriberIdentity::default()));
    inner.contexts.push(ctx.clone());
    ctx
}

fn endpoint_for_ip(ip: &str) -> NetworkEndpoint {
    if ip.contains(':') {
        NetworkEndpoint::ipv6(ip)
    } else {
        NetworkEndpoint::ipv4(ip)
    }
}

fn msisdn_key(normalized: &msisdn::NormalizedMsisdn) -> String {
    if normalized.international.is_empty() {
        normalized.national.clone()
    } else {
        normalized.international.clone()
    }
}

/// Resolves the target context of a link: reuses what exists, creates when
/// neither side is known, merges when both exist and differ.
fn resolve_link(
    inner: &mut Inner,
    a: Option<ContextHandle>,
    b: Option<ContextHandle>,
) -> ContextHandle {
    match (a, b) {
        (None, None) => new_context(inner),
        (Some(ctx), None) | (None, Some(ctx)) => ctx,
        (Some(a), Some(b)) => {
            if Arc::ptr_eq(&a, &b) {
                a
            } else {
                merge_contexts(inner, a, b)
            }
        }
    }
}

/// Merges two distinct contexts, returning the surviving primary.
///
/// The context with more populated fields wins; ties go to the older
/// `first_seen`. Every index entry pointing at the loser is repointed.
fn merge_contexts(inner: &mut Inner, a: ContextHandle, b: ContextHandle) -> ContextHandle {
    let (primary, secondary) = {
        let ga = a.lock().unwrap();
        let gb = b.lock().unwrap();
        let a_wins = match ga.populated_fields().cmp(&gb.populated_fields()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => ga.first_seen <= gb.first_seen,
        };
        drop(ga);
        drop(gb);
        if a_wins {
            (a, b)
        } else {
            (b, a)
        }
    };

    {
        let secondary_snapshot = secondary.lock().unwrap().clone();
        primary.lock().unwrap().merge(&secondary_snapshot);
    }

    repoint(&mut inner.imsi_index, &secondary, &primary);
    repoint(&mut inner.msisdn_index, &secondary, &primary);
    repoint(&mut inner.imei_index, &secondary, &primary);
    repoint(&mut inner.ip_index, &secondary, &primary);
    repoint(&mut inner.tmsi_index, &secondary, &primary);
    repoint(&mut inner.guti_index, &secondary, &primary);

    inner.contexts.retain(|ctx| !Arc::ptr_eq(ctx, &secondary));
    inner.merge_operations += 1;
    debug!(
        primary = %primary.lock().unwrap().primary_key(),
        merges = inner.merge_operations,
        "merged subscriber contexts"
    );

    primary
}

fn repoint<K: std::hash::Hash + Eq>(
    index: &mut HashMap<K, ContextHandle>,
    from: &ContextHandle,
    to: &ContextHandle,
) {
    for entry in index.values_mut() {
        if Arc::ptr_eq(entry, from) {
            *entry = to.clone();
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Fluent accumulator for the identifiers seen in one parsed message.
///
/// Collects everything first and emits a single link chain on
/// [`SubscriberContextBuilder::build`], avoiding N² pairwise link calls per
/// message.
///
/// # Examples
///
/// ```rust
/// use rs_callflow::identity::manager::{SubscriberContextBuilder, SubscriberContextManager};
///
/// let manager = SubscriberContextManager::new();
/// let ctx = SubscriberContextBuilder::new(&manager)
///     .from_gtp_imsi("310260123456789")
///     .from_gtp_msisdn("+14155551234")
///     .from_gtp_pdn_address("10.1.2.3")
///     .build()
///     .unwrap();
/// assert!(ctx.lock().unwrap().has_imsi());
/// assert!(ctx.lock().unwrap().has_msisdn());
/// ```
pub struct SubscriberContextBuilder<'a> {
    manager: &'a SubscriberContextManager,
    imsi: Option<String>,
    msisdn: Option<String>,
    imei: Option<String>,
    ue_ip: Option<String>,
    guti: Option<Guti4g>,
    tmsi: Option<u32>,
    apn: Option<String>,
    gtp_tunnels: Vec<(String, Teid)>,
}

impl<'a> SubscriberContextBuilder<'a> {
    pub fn new(manager: &'a SubscriberContextManager) -> Self {
        SubscriberContextBuilder {
            manager,
            imsi: None,
            msisdn: None,
            imei: None,
            ue_ip: None,
            guti: None,
            tmsi: None,
            apn: None,
            gtp_tunnels: Vec::new(),
        }
    }

    // SIP headers.
    pub fn from_sip_from(mut self, from_uri: &str) -> Self {
        if self.msisdn.is_none() {
            self.msisdn = Some(from_uri.to_string());
        }
        self
    }

    pub fn from_sip_to(mut self, to_uri: &str) -> Self {
        if self.msisdn.is_none() {
            self.msisdn = Some(to_uri.to_string());
        }
        self
    }

    pub fn from_sip_pai(mut self, pai: &str) -> Self {
        self.msisdn = Some(pai.to_string());
        self
    }

    pub fn from_sip_contact(mut self, contact: &str, ip: &str) -> Self {
        if self.msisdn.is_none() {
            self.msisdn = Some(contact.to_string());
        }
        if !ip.is_empty() {
            self.ue_ip = Some(ip.to_string());
        }
        self
    }

    // Diameter AVPs.
    pub fn from_diameter_imsi(mut self, imsi: &str) -> Self {
        self.imsi = Some(imsi.to_string());
        self
    }

    pub fn from_diameter_msisdn(mut self, msisdn: &str) -> Self {
        self.msisdn = Some(msisdn.to_string());
        self
    }

    pub fn from_diameter_framed_ip(mut self, ip: &str) -> Self {
        self.ue_ip = Some(ip.to_string());
        self
    }

    pub fn from_diameter_public_identity(mut self, public_id: &str) -> Self {
        if self.msisdn.is_none() {
            self.msisdn = Some(public_id.to_string());
        }
        self
    }

    // GTPv2 IEs.
    pub fn from_gtp_imsi(mut self, imsi: &str) -> Self {
        self.imsi = Some(imsi.to_string());
        self
    }

    pub fn from_gtp_msisdn(mut self, msisdn: &str) -> Self {
        self.msisdn = Some(msisdn.to_string());
        self
    }

    pub fn from_gtp_mei(mut self, mei: &str) -> Self {
        self.imei = Some(mei.to_string());
        self
    }

    pub fn from_gtp_pdn_address(mut self, ip: &str) -> Self {
        self.ue_ip = Some(ip.to_string());
        self
    }

    pub fn from_gtp_fteid(mut self, ip: &str, teid: Teid) -> Self {
        self.gtp_tunnels.push((ip.to_string(), teid));
        self
    }

    pub fn from_gtp_apn(mut self, apn: &str) -> Self {
        self.apn = Some(apn.to_string());
        self
    }

    // NAS / S1AP.
    pub fn from_nas_imsi(mut self, imsi: &str) -> Self {
        self.imsi = Some(imsi.to_string());
        self
    }

    pub fn from_nas_imei(mut self, imei: &str) -> Self {
        self.imei = Some(imei.to_string());
        self
    }

    pub fn from_nas_guti(mut self, guti: Guti4g) -> Self {
        self.guti = Some(guti);
        self
    }

    pub fn from_nas_tmsi(mut self, tmsi: u32) -> Self {
        self.tmsi = Some(tmsi);
        self
    }

    /// Emits the accumulated identifiers as one link chain and returns the
    /// unified context, or `None` when nothing usable was collected.
    pub fn build(self) -> Option<ContextHandle> {
        let manager = self.manager;

        if let Some(imsi) = &self.imsi {
            if let Some(msisdn) = &self.msisdn {
                manager.link_imsi_msisdn(imsi, msisdn);
            }
            if let Some(imei) = &self.imei {
                manager.link_imsi_imei(imsi, imei);
            }
            if let Some(ip) = &self.ue_ip {
                manager.link_imsi_ue_ip(imsi, ip);
            }
            if let Some(guti) = &self.guti {
                manager.link_imsi_guti(imsi, guti);
            }
            if let Some(tmsi) = self.tmsi {
                manager.link_imsi_tmsi(imsi, tmsi);
            }
        } else if let (Some(msisdn), Some(ip)) = (&self.msisdn, &self.ue_ip) {
            manager.link_msisdn_ue_ip(msisdn, ip);
        }

        let ctx = self
            .imsi
            .as_deref()
            .and_then(|v| manager.get_or_create_by_imsi(v))
            .or_else(|| {
                self.msisdn
                    .as_deref()
                    .and_then(|v| manager.get_or_create_by_msisdn(v))
            })
            .or_else(|| {
                self.imei
                    .as_deref()
                    .and_then(|v| manager.get_or_create_by_imei(v))
            })
            .or_else(|| {
                self.ue_ip
                    .as_deref()
                    .and_then(|v| manager.get_or_create_by_ue_ip(v))
            })?;

        {
            let mut guard = ctx.lock().unwrap();
            if let Some(apn) = &self.apn {
                if guard.apn.is_empty() {
                    guard.apn = apn.clone();
                }
            }
            for (peer_ip, teid) in &self.gtp_tunnels {
                guard.add_endpoint(NetworkEndpoint {
                    gtpu_peer_ip: Some(peer_ip.clone()),
                    gtpu_teid: Some(*teid),
                    ..Default::default()
                });
            }
        }

        Some(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMSI: &str = "310260123456789";
    const MSISDN: &str = "+14155551234";

    #[test]
    fn test_get_or_create_by_imsi_is_idempotent() {
        let manager = SubscriberContextManager::new();
        let a = manager.get_or_create_by_imsi(IMSI).unwrap();
        let b = manager.get_or_create_by_imsi(IMSI).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.stats().total_contexts, 1);
    }

    #[test]
    fn test_get_or_create_rejects_invalid() {
        let manager = SubscriberContextManager::new();
        assert!(manager.get_or_create_by_imsi("not-an-imsi").is_none());
        assert!(manager.get_or_create_by_msisdn("no-digits").is_none());
        assert!(manager.get_or_create_by_ue_ip("").is_none());
        assert_eq!(manager.stats().total_contexts, 0);
    }

    #[test]
    fn test_link_creates_one_context_when_both_absent() {
        let manager = SubscriberContextManager::new();
        manager.link_imsi_msisdn(IMSI, MSISDN);

        let by_imsi = manager.find_by_imsi(IMSI).unwrap();
        let by_msisdn = manager.find_by_msisdn(MSISDN).unwrap();
        assert!(Arc::ptr_eq(&by_imsi, &by_msisdn));
        assert_eq!(manager.stats().total_contexts, 1);
        assert_eq!(manager.stats().merge_operations, 0);
    }

    #[test]
    fn test_link_fills_missing_identifier() {
        let manager = SubscriberContextManager::new();
        manager.get_or_create_by_imsi(IMSI).unwrap();
        manager.link_imsi_msisdn(IMSI, MSISDN);

        let ctx = manager.find_by_imsi(IMSI).unwrap();
        assert!(ctx.lock().unwrap().has_msisdn());
        assert_eq!(manager.stats().total_contexts, 1);
    }

    #[test]
    fn test_link_merges_two_contexts() {
        let manager = SubscriberContextManager::new();
        manager.get_or_create_by_imsi(IMSI).unwrap();
        manager.get_or_create_by_msisdn(MSISDN).unwrap();
        assert_eq!(manager.stats().total_contexts, 2);

        manager.link_imsi_msisdn(IMSI, MSISDN);

        let stats = manager.stats();
        assert_eq!(stats.total_contexts, 1);
        assert_eq!(stats.merge_operations, 1);

        let ctx = manager.find_by_imsi(IMSI).unwrap();
        let guard = ctx.lock().unwrap();
        assert!(guard.has_imsi());
        assert!(guard.has_msisdn());
    }

    #[test]
    fn test_link_same_context_is_noop() {
        let manager = SubscriberContextManager::new();
        manager.link_imsi_msisdn(IMSI, MSISDN);
        manager.link_imsi_msisdn(IMSI, MSISDN);
        assert_eq!(manager.stats().total_contexts, 1);
        assert_eq!(manager.stats().merge_operations, 0);
    }

    #[test]
    fn test_link_invalid_is_silently_ignored() {
        let manager = SubscriberContextManager::new();
        manager.link_imsi_msisdn("garbage", MSISDN);
        assert_eq!(manager.stats().total_contexts, 0);
    }

    #[test]
    fn test_no_two_contexts_share_an_indexed_identifier() {
        let manager = SubscriberContextManager::new();
        manager.get_or_create_by_imsi(IMSI).unwrap();
        manager.get_or_create_by_msisdn(MSISDN).unwrap();
        manager.get_or_create_by_ue_ip("10.1.2.3").unwrap();
        manager.link_imsi_msisdn(IMSI, MSISDN);
        manager.link_imsi_ue_ip(IMSI, "10.1.2.3");

        // After the link chain every index resolves to the same context.
        let a = manager.find_by_imsi(IMSI).unwrap();
        let b = manager.find_by_msisdn(MSISDN).unwrap();
        let c = manager.find_by_ue_ip("10.1.2.3").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(manager.stats().total_contexts, 1);
    }

    #[test]
    fn test_merge_prefers_more_populated_context() {
        let manager = SubscriberContextManager::new();
        let rich = manager.get_or_create_by_imsi(IMSI).unwrap();
        {
            let mut guard = rich.lock().unwrap();
            guard.apn = "internet".to_string();
            guard.tmsi = Some(0xAA);
        }
        manager.get_or_create_by_msisdn(MSISDN).unwrap();

        manager.link_imsi_msisdn(IMSI, MSISDN);
        let survivor = manager.find_by_msisdn(MSISDN).unwrap();
        assert!(Arc::ptr_eq(&survivor, &rich));
    }

    #[test]
    fn test_link_guti_and_tmsi() {
        let manager = SubscriberContextManager::new();
        let guti = Guti4g {
            mcc: "310".to_string(),
            mnc: "260".to_string(),
            mme_group_id: 1,
            mme_code: 2,
            m_tmsi: 0x12345678,
        };
        manager.link_imsi_guti(IMSI, &guti);
        manager.link_imsi_tmsi(IMSI, 0x12345678);

        assert!(manager.find_by_guti(&guti).is_some());
        assert!(manager.find_by_tmsi(0x12345678).is_some());
        assert_eq!(manager.stats().total_contexts, 1);
    }

    #[test]
    fn test_propagate_identities_merges_by_shared_ip() {
        let manager = SubscriberContextManager::new();
        // Context A knows IMSI + IP, context B knows MSISDN + same IP, but
        // the IP index was fed through A, so B holds only the endpoint.
        manager.link_imsi_ue_ip(IMSI, "10.9.9.9");
        let b = manager.get_or_create_by_msisdn(MSISDN).unwrap();
        b.lock()
            .unwrap()
            .add_endpoint(NetworkEndpoint::ipv4("10.9.9.9"));
        assert_eq!(manager.stats().total_contexts, 2);

        manager.propagate_identities();

        let stats = manager.stats();
        assert_eq!(stats.total_contexts, 1);
        let ctx = manager.find_by_imsi(IMSI).unwrap();
        let guard = ctx.lock().unwrap();
        // Backward fill: the IMSI context inherited the MSISDN.
        assert!(guard.has_msisdn());
    }

    #[test]
    fn test_propagate_identities_is_idempotent() {
        let manager = SubscriberContextManager::new();
        manager.link_imsi_ue_ip(IMSI, "10.9.9.9");
        manager.propagate_identities();
        let before = manager.stats();
        manager.propagate_identities();
        assert_eq!(manager.stats(), before);
    }

    #[test]
    fn test_add_gtpu_tunnel() {
        let manager = SubscriberContextManager::new();
        manager.get_or_create_by_imsi(IMSI).unwrap();
        manager.add_gtpu_tunnel(IMSI, "192.168.2.10", Teid(0x1000));

        let ctx = manager.find_by_imsi(IMSI).unwrap();
        let guard = ctx.lock().unwrap();
        assert!(guard
            .endpoints
            .iter()
            .any(|ep| ep.gtpu_teid == Some(Teid(0x1000))));
    }

    #[test]
    fn test_builder_links_everything_at_once() {
        let manager = SubscriberContextManager::new();
        let ctx = SubscriberContextBuilder::new(&manager)
            .from_gtp_imsi(IMSI)
            .from_gtp_msisdn(MSISDN)
            .from_gtp_pdn_address("10.1.2.3")
            .from_gtp_apn("ims")
            .from_gtp_fteid("192.168.2.10", Teid(0x2000))
            .build()
            .unwrap();

        let guard = ctx.lock().unwrap();
        assert!(guard.has_imsi());
        assert!(guard.has_msisdn());
        assert_eq!(guard.apn, "ims");
        assert_eq!(manager.stats().total_contexts, 1);
    }

    #[test]
    fn test_builder_with_nothing_returns_none() {
        let manager = SubscriberContextManager::new();
        assert!(SubscriberContextBuilder::new(&manager).build().is_none());
    }

    #[test]
    fn test_clear() {
        let manager = SubscriberContextManager::new();
        manager.get_or_create_by_imsi(IMSI).unwrap();
        manager.clear();
        assert_eq!(manager.stats().total_contexts, 0);
        assert!(manager.find_by_imsi(IMSI).is_none());
    }
}
