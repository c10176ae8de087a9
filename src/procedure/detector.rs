//! Procedure detector.
//!
//! Routes every incoming message to the active procedures it may belong to
//! (matched via IMSI/SUPI, SIP Call-ID and MME-UE-S1AP-ID indices) and
//! spawns a new state machine when an unclaimed message is a canonical
//! procedure trigger.

use crate::message::{MessageKind, ParsedMessage};
use crate::procedure::{
    FiveGRegistrationMachine, LteAttachMachine, ProcedureKind, ProcedureMachine, VolteCallMachine,
    X2HandoverMachine,
};
use crate::types::Timestamp;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info};

/// Owned, dynamically typed procedure machine.
pub type ProcedureHandle = Box<dyn ProcedureMachine>;

#[derive(Debug, Clone, Default)]
struct DetectorStats {
    total_procedures_detected: u64,
    procedures_completed: u64,
    procedures_failed: u64,
    by_type: HashMap<ProcedureKind, u64>,
}

/// Detects and tracks 3GPP procedures across a message stream.
#[derive(Default)]
pub struct ProcedureDetector {
    procedures: HashMap<String, ProcedureHandle>,
    /// Procedure ids in creation order, for deterministic iteration.
    order: Vec<String>,

    // Correlation key indices. IMSI and SUPI share one map.
    imsi_index: HashMap<String, Vec<String>>,
    call_id_index: HashMap<String, Vec<String>>,
    mme_ue_id_index: HashMap<u32, Vec<String>>,

    id_counter: u64,
    stats: DetectorStats,
}

impl ProcedureDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one message. Matching active procedures process it first; when
    /// none claims the message, a trigger check may start a new procedure.
    /// The first claiming procedure's id is stamped on the message for the
    /// ladder assembler. Returns the ids of procedures whose state changed.
    pub fn process_message(&mut self, msg: &mut ParsedMessage) -> Vec<String> {
        let mut changed = Vec::new();

        let candidates = self.find_matching_procedures(msg);
        for proc_id in &candidates {
            let Some(machine) = self.procedures.get_mut(proc_id) else {
                continue;
            };
            if machine.process_message(msg) {
                if msg.procedure_id.is_none() {
                    msg.procedure_id = Some(proc_id.clone());
                }
                if machine.is_complete() {
                    self.stats.procedures_completed += 1;
                    debug!(procedure = proc_id.as_str(), "procedure completed");
                } else if machine.is_failed() {
                    self.stats.procedures_failed += 1;
                    debug!(procedure = proc_id.as_str(), "procedure failed");
                }
                changed.push(proc_id.clone());
            }
        }

        if candidates.is_empty() {
            if let Some(proc_id) = self.try_start_procedure(msg) {
                msg.procedure_id = Some(proc_id.clone());
                changed.push(proc_id);
            }
        }

        changed
    }

    /// Ids and kinds of procedures still in flight.
    pub fn active_procedure_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.procedures
                    .get(*id)
                    .map_or(false, |p| !p.is_complete() && !p.is_failed())
            })
            .cloned()
            .collect()
    }

    pub fn completed_procedure_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.procedures.get(*id).map_or(false, |p| p.is_complete()))
            .cloned()
            .collect()
    }

    pub fn failed_procedure_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.procedures.get(*id).map_or(false, |p| p.is_failed()))
            .cloned()
            .collect()
    }

    pub fn procedure(&self, procedure_id: &str) -> Option<&dyn ProcedureMachine> {
        self.procedures.get(procedure_id).map(|machine| &**machine)
    }

    pub fn procedure_count(&self) -> usize {
        self.procedures.len()
    }

    /// Dump of every tracked procedure, in creation order.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.order
                .iter()
                .filter_map(|id| self.procedures.get(id))
                .map(|p| p.to_json())
                .collect(),
        )
    }

    pub fn statistics(&self) -> Value {
        let by_type: HashMap<&'static str, u64> = self
            .stats
            .by_type
            .iter()
            .map(|(kind, count)| (kind.name(), *count))
            .collect();
        json!({
            "total_procedures_detected": self.stats.total_procedures_detected,
            "procedures_completed": self.stats.procedures_completed,
            "procedures_failed": self.stats.procedures_failed,
            "by_type": by_type,
        })
    }

    /// Discards completed/failed procedures whose last activity is older
    /// than the retention threshold, removing their index entries.
    pub fn cleanup(&mut self, retention_seconds: i64, now: Timestamp) {
        let cutoff = now.offset_millis(-retention_seconds * 1000);
        let expired: Vec<String> = self
            .order
            .iter()
            .filter(|id| {
                let Some(machine) = self.procedures.get(*id) else {
                    return true;
                };
                if !machine.is_complete() && !machine.is_failed() {
                    return false;
                }
                let last_activity = machine
                    .steps()
                    .last()
                    .map(|s| s.timestamp)
                    .unwrap_or_else(|| machine.start_time());
                last_activity < cutoff
            })
            .cloned()
            .collect();

        for proc_id in &expired {
            self.procedures.remove(proc_id);
            remove_from_index(&mut self.imsi_index, proc_id);
            remove_from_index(&mut self.call_id_index, proc_id);
            remove_from_index(&mut self.mme_ue_id_index, proc_id);
        }
        self.order.retain(|id| !expired.contains(id));
    }

    fn find_matching_procedures(&self, msg: &ParsedMessage) -> Vec<String> {
        let mut matching: Vec<String> = Vec::new();
        let push_all = |ids: Option<&Vec<String>>, matching: &mut Vec<String>| {
            if let Some(ids) = ids {
                for id in ids {
                    if !matching.contains(id) {
                        matching.push(id.clone());
                    }
                }
            }
        };

        if let Some(imsi) = &msg.hints.imsi {
            push_all(self.imsi_index.get(imsi), &mut matching);
        }
        if let Some(supi) = &msg.hints.supi {
            push_all(self.imsi_index.get(supi), &mut matching);
        }
        if let Some(call_id) = &msg.hints.sip_call_id {
            push_all(self.call_id_index.get(call_id), &mut matching);
        }
        if let Some(mme_ue_id) = msg.hints.mme_ue_s1ap_id {
            push_all(self.mme_ue_id_index.get(&mme_ue_id), &mut matching);
        }

        // Completed and failed procedures never claim further messages.
        matching.retain(|id| {
            self.procedures
                .get(id)
                .map_or(false, |p| !p.is_complete() && !p.is_failed())
        });
        matching
    }

    fn try_start_procedure(&mut self, msg: &ParsedMessage) -> Option<String> {
        let (mut machine, kind): (ProcedureHandle, ProcedureKind) = if msg.kind
            == MessageKind::S1apInitialUeMessage
            && msg.has_nas(MessageKind::NasAttachRequest)
        {
            (Box::new(LteAttachMachine::new()), ProcedureKind::LteAttach)
        } else if msg.kind == MessageKind::X2apHandoverRequest {
            (Box::new(X2HandoverMachine::new()), ProcedureKind::X2Handover)
        } else if msg.kind == MessageKind::SipInvite {
            (Box::new(VolteCallMachine::new()), ProcedureKind::VolteCallSetup)
        } else if msg.kind == MessageKind::NgapInitialUeMessage
            && msg.has_nas(MessageKind::Nas5gRegistrationRequest)
        {
            (
                Box::new(FiveGRegistrationMachine::new()),
                ProcedureKind::FiveGRegistration,
            )
        } else {
            return None;
        };

        self.id_counter += 1;
        let proc_id = format!("{}_{}", kind.name(), self.id_counter);

        machine.process_message(msg);
        self.procedures.insert(proc_id.clone(), machine);
        self.order.push(proc_id.clone());
        self.add_correlation_keys(&proc_id, msg);

        self.stats.total_procedures_detected += 1;
        *self.stats.by_type.entry(kind).or_insert(0) += 1;

        info!(procedure = proc_id.as_str(), kind = kind.name(), "new procedure detected");
        Some(proc_id)
    }

    fn add_correlation_keys(&mut self, proc_id: &str, msg: &ParsedMessage) {
        if let Some(imsi) = &msg.hints.imsi {
            self.imsi_index
                .entry(imsi.clone())
                .or_default()
                .push(proc_id.to_string());
        }
        if let Some(supi) = &msg.hints.supi {
            self.imsi_index
                .entry(supi.clone())
                .or_default()
                .push(proc_id.to_string());
        }
        if let Some(call_id) = &msg.hints.sip_call_id {
            self.call_id_index
                .entry(call_id.clone())
                .or_default()
                .push(proc_id.to_string());
        }
        if let Some(mme_ue_id) = msg.hints.mme_ue_s1ap_id {
            self.mme_ue_id_index
                .entry(mme_ue_id)
                .or_default()
                .push(proc_id.to_string());
        }
    }
}

fn remove_from_index<K: std::hash::Hash + Eq>(
    index: &mut HashMap<K, Vec<String>>,
    proc_id: &str,
) {
    for ids in index.values_mut() {
        ids.retain(|id| id != proc_id);
    }
}
