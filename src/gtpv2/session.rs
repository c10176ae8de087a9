//! GTPv2-C session state.

use crate::message::{MessageKind, ParsedMessage};
use crate::types::{Teid, Timestamp};
use serde_json::Value;

/// One EPS bearer named in a session's bearer-context IEs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerContext {
    pub eps_bearer_id: Option<u8>,
    pub qci: Option<u8>,
    pub enb_fteid: Option<(Teid, String)>,
    pub sgw_fteid: Option<(Teid, String)>,
}

/// All GTPv2-C messages sharing one control-plane TEID pair.
#[derive(Debug, Clone)]
pub struct Gtpv2Session {
    /// `<local>:<remote>` control TEID pair key; zero for an unknown side.
    pub key: String,
    /// Intra-correlator id, `<timestamp>_G_<seq>`.
    pub intra_correlator: String,
    pub control_teid: Teid,
    pub bearers: Vec<BearerContext>,
    pub apn: Option<String>,
    pub imsi: Option<String>,
    pub msisdn: Option<String>,
    pub ue_ipv4: Option<String>,
    pub ue_ipv6: Option<String>,
    pub message_kinds: Vec<MessageKind>,
    pub message_count: usize,

    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub start_frame: u32,
    pub end_frame: u32,
    pub frames: Vec<u32>,
}

impl Gtpv2Session {
    pub fn new(key: String, intra_correlator: String, control_teid: Teid) -> Self {
        Gtpv2Session {
            key,
            intra_correlator,
            control_teid,
            bearers: Vec::new(),
            apn: None,
            imsi: None,
            msisdn: None,
            ue_ipv4: None,
            ue_ipv6: None,
            message_kinds: Vec::new(),
            message_count: 0,
            start_time: Timestamp::default(),
            end_time: Timestamp::default(),
            start_frame: 0,
            end_frame: 0,
            frames: Vec::new(),
        }
    }

    pub fn add_message(&mut self, msg: &ParsedMessage) {
        if self.start_time.is_unset() || msg.timestamp < self.start_time {
            self.start_time = msg.timestamp;
            self.start_frame = msg.frame_number;
        }
        if msg.timestamp > self.end_time {
            self.end_time = msg.timestamp;
            self.end_frame = msg.frame_number;
        }

        if self.imsi.is_none() {
            self.imsi = msg
                .hints
                .imsi
                .clone()
                .or_else(|| msg.field_str("imsi").map(str::to_string));
        }
        if self.msisdn.is_none() {
            self.msisdn = msg
                .hints
                .msisdn
                .clone()
                .or_else(|| msg.field_str("msisdn").map(str::to_string));
        }
        if self.apn.is_none() {
            self.apn = msg
                .hints
                .apn
                .clone()
                .or_else(|| msg.field_str("apn").map(str::to_string));
        }
        if self.ue_ipv4.is_none() {
            self.ue_ipv4 = msg
                .hints
                .ue_ipv4
                .clone()
                .or_else(|| msg.field_str("ue_ipv4").map(str::to_string));
        }
        if self.ue_ipv6.is_none() {
            self.ue_ipv6 = msg
                .hints
                .ue_ipv6
                .clone()
                .or_else(|| msg.field_str("ue_ipv6").map(str::to_string));
        }

        self.absorb_bearer_contexts(msg);
        self.message_kinds.push(msg.kind);
        self.message_count += 1;
        self.frames.push(msg.frame_number);
    }

    /// True when this session's window overlaps `[start, end]` widened by
    /// `tolerance_ms`.
    pub fn overlaps_window(&self, start: Timestamp, end: Timestamp, tolerance_ms: i64) -> bool {
        let widened_start = start.offset_millis(-tolerance_ms);
        let widened_end = end.offset_millis(tolerance_ms);
        self.start_time <= widened_end && self.end_time >= widened_start
    }

    fn absorb_bearer_contexts(&mut self, msg: &ParsedMessage) {
        let Some(contexts) = msg.fields.get("bearer_contexts").and_then(Value::as_array) else {
            return;
        };

        for ctx in contexts.iter().filter_map(Value::as_object) {
            let ebi = ctx
                .get("eps_bearer_id")
                .and_then(Value::as_u64)
                .map(|v| v as u8);
            let idx = self
                .bearers
                .iter()
                .position(|b| b.eps_bearer_id.is_some() && b.eps_bearer_id == ebi)
                .unwrap_or_else(|| {
                    self.bearers.push(BearerContext::default());
                    self.bearers.len() - 1
                });
            let bearer = &mut self.bearers[idx];

            if bearer.eps_bearer_id.is_none() {
                bearer.eps_bearer_id = ebi;
            }
            if bearer.qci.is_none() {
                bearer.qci = ctx.get("qci").and_then(Value::as_u64).map(|v| v as u8);
            }
            if bearer.enb_fteid.is_none() {
                bearer.enb_fteid = fteid(ctx, "s1u_enb_fteid");
            }
            if bearer.sgw_fteid.is_none() {
                bearer.sgw_fteid = fteid(ctx, "s1u_sgw_fteid");
            }
        }
    }
}

fn fteid(ctx: &serde_json::Map<String, Value>, key: &str) -> Option<(Teid, String)> {
    let obj = ctx.get(key)?.as_object()?;
    let teid = obj.get("teid")?.as_u64()? as u32;
    let ip = obj.get("ipv4").and_then(Value::as_str).unwrap_or_default();
    Some((Teid(teid), ip.to_string()))
}
