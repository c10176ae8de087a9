//! Participant detection.
//!
//! Infers the network element behind each IP from well-known ports, the
//! protocol and the Diameter application, falling back to generic ids.
//! Explicit user mappings always win over detection.

use crate::ladder::types::{ParticipantInfo, ParticipantType};
use crate::message::{ParsedMessage, Protocol};
use std::collections::HashMap;

// Well-known 3GPP signalling ports.
pub const S1AP_PORT: u16 = 36412;
pub const NGAP_PORT: u16 = 38412;
pub const GTP_C_PORT: u16 = 2123;
pub const GTP_U_PORT: u16 = 2152;
pub const PFCP_PORT: u16 = 8805;
pub const DIAMETER_PORT: u16 = 3868;

/// Detects and caches participants by IP (and IP:port).
#[derive(Default)]
pub struct ParticipantDetector {
    by_ip: HashMap<String, ParticipantInfo>,
    by_ip_port: HashMap<String, ParticipantInfo>,
    type_counters: HashMap<ParticipantType, u32>,
}

impl ParticipantDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user-provided mapping that overrides detection.
    pub fn add_explicit_mapping(&mut self, ip: &str, name: &str, participant_type: ParticipantType) {
        let info = ParticipantInfo {
            id: name.to_string(),
            participant_type,
            ip_address: ip.to_string(),
            friendly_name: Some(name.to_string()),
            port: None,
        };
        self.by_ip.insert(ip.to_string(), info);
    }

    /// Registers a port-qualified user mapping.
    pub fn add_explicit_mapping_with_port(
        &mut self,
        ip: &str,
        port: u16,
        name: &str,
        participant_type: ParticipantType,
    ) {
        let info = ParticipantInfo {
            id: name.to_string(),
            participant_type,
            ip_address: ip.to_string(),
            friendly_name: Some(name.to_string()),
            port: Some(port),
        };
        self.by_ip.insert(ip.to_string(), info.clone());
        self.by_ip_port.insert(ip_port_key(ip, port), info);
    }

    /// Detects (or recalls) the participant at one end of a message.
    pub fn detect(&mut self, msg: &ParsedMessage, is_source: bool) -> ParticipantInfo {
        let ip = if is_source { &msg.src_ip } else { &msg.dst_ip };
        let port = if is_source { msg.src_port } else { msg.dst_port };

        if let Some(info) = self.by_ip_port.get(&ip_port_key(ip, port)) {
            return info.clone();
        }
        if let Some(info) = self.by_ip.get(ip) {
            return info.clone();
        }

        let participant_type = self
            .type_from_protocol(msg, is_source)
            .or_else(|| self.type_from_diameter(msg, is_source))
            .unwrap_or(ParticipantType::Unknown);

        let info = ParticipantInfo {
            id: self.generate_id(participant_type, ip),
            participant_type,
            ip_address: ip.clone(),
            friendly_name: None,
            port: Some(port),
        };

        self.by_ip.insert(ip.clone(), info.clone());
        if port != 0 {
            self.by_ip_port.insert(ip_port_key(ip, port), info.clone());
        }
        info
    }

    pub fn participant_for_ip(&self, ip: &str) -> Option<&ParticipantInfo> {
        self.by_ip.get(ip)
    }

    pub fn all_participants(&self) -> Vec<ParticipantInfo> {
        let mut participants: Vec<ParticipantInfo> = self.by_ip.values().cloned().collect();
        participants.sort_by(|a, b| a.id.cmp(&b.id));
        participants
    }

    pub fn clear(&mut self) {
        self.by_ip.clear();
        self.by_ip_port.clear();
        self.type_counters.clear();
    }

    fn type_from_protocol(&self, msg: &ParsedMessage, is_source: bool) -> Option<ParticipantType> {
        let port = if is_source { msg.src_port } else { msg.dst_port };
        let peer_port = if is_source { msg.dst_port } else { msg.src_port };

        // The server side of the association owns the well-known port; the
        // peer's role follows from it.
        match msg.protocol {
            Protocol::S1ap => {
                // eNodeB initiates towards the MME's 36412.
                if peer_port == S1AP_PORT || (port != S1AP_PORT && is_source) {
                    Some(ParticipantType::Enodeb)
                } else {
                    Some(ParticipantType::Mme)
                }
            }
            Protocol::Ngap => {
                if peer_port == NGAP_PORT || (port != NGAP_PORT && is_source) {
                    Some(ParticipantType::Gnodeb)
                } else {
                    Some(ParticipantType::Amf)
                }
            }
            Protocol::Pfcp => {
                if is_source {
                    Some(ParticipantType::Smf)
                } else {
                    Some(ParticipantType::Upf)
                }
            }
            Protocol::GtpC => {
                // MME ↔ S-GW ↔ P-GW; without prior observations the sender
                // of a request is taken as the MME side.
                if is_source {
                    Some(ParticipantType::Mme)
                } else {
                    Some(ParticipantType::Sgw)
                }
            }
            Protocol::Sip => Some(if is_source {
                ParticipantType::Ue
            } else {
                ParticipantType::Pcscf
            }),
            Protocol::Dns => Some(ParticipantType::Dns),
            Protocol::Dhcp => Some(ParticipantType::Dhcp),
            _ => None,
        }
    }

    fn type_from_diameter(&self, msg: &ParsedMessage, is_source: bool) -> Option<ParticipantType> {
        if msg.protocol != Protocol::Diameter {
            return None;
        }
        let app_id = msg.field_u32("application_id")?;
        let pair = match app_id {
            16777251 | 16777250 => (ParticipantType::Mme, ParticipantType::Hss),
            16777238 => (ParticipantType::Pgw, ParticipantType::Pcrf),
            16777236 => (ParticipantType::Pcscf, ParticipantType::Pcrf),
            16777217 => (ParticipantType::As, ParticipantType::Hss),
            16777216 => (ParticipantType::Scscf, ParticipantType::Hss),
            16777272 => (ParticipantType::Pcrf, ParticipantType::Ocs),
            _ => return None,
        };
        Some(if is_source { pair.0 } else { pair.1 })
    }

    fn generate_id(&mut self, participant_type: ParticipantType, ip: &str) -> String {
        match participant_type {
            // Core elements get numbered ids, access nodes keep their IP.
            ParticipantType::Mme
            | ParticipantType::Amf
            | ParticipantType::Sgw
            | ParticipantType::Pgw
            | ParticipantType::Upf
            | ParticipantType::Smf
            | ParticipantType::Hss
            | ParticipantType::Udm
            | ParticipantType::Pcrf
            | ParticipantType::Pcf
            | ParticipantType::Ocs => {
                let counter = self.type_counters.entry(participant_type).or_insert(0);
                *counter += 1;
                format!("{}-{:02}", participant_type.name(), counter)
            }
            _ => format!("{}-{}", participant_type.name(), ip),
        }
    }
}

fn ip_port_key(ip: &str, port: u16) -> String {
    format!("{}:{}", ip, port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use crate::types::Timestamp;

    fn msg(protocol: Protocol, src: &str, src_port: u16, dst: &str, dst_port: u16) -> ParsedMessage {
        ParsedMessage::new(1, Timestamp::from_millis(0), protocol, MessageKind::Unknown)
            .with_endpoints(src, src_port, dst, dst_port)
    }

    #[test]
    fn test_s1ap_roles_by_port() {
        let mut detector = ParticipantDetector::new();
        let m = msg(Protocol::S1ap, "10.0.1.50", 50000, "10.0.2.1", S1AP_PORT);
        let src = detector.detect(&m, true);
        let dst = detector.detect(&m, false);
        assert_eq!(src.participant_type, ParticipantType::Enodeb);
        assert_eq!(dst.participant_type, ParticipantType::Mme);
        assert_eq!(dst.id, "MME-01");
        assert!(src.id.contains("10.0.1.50"));
    }

    #[test]
    fn test_ngap_roles() {
        let mut detector = ParticipantDetector::new();
        let m = msg(Protocol::Ngap, "10.5.1.1", 44000, "10.5.2.1", NGAP_PORT);
        assert_eq!(
            detector.detect(&m, true).participant_type,
            ParticipantType::Gnodeb
        );
        assert_eq!(
            detector.detect(&m, false).participant_type,
            ParticipantType::Amf
        );
    }

    #[test]
    fn test_pfcp_roles() {
        let mut detector = ParticipantDetector::new();
        let m = msg(Protocol::Pfcp, "10.7.1.1", 8805, "10.7.2.1", PFCP_PORT);
        assert_eq!(
            detector.detect(&m, true).participant_type,
            ParticipantType::Smf
        );
        assert_eq!(
            detector.detect(&m, false).participant_type,
            ParticipantType::Upf
        );
    }

    #[test]
    fn test_diameter_roles_from_application() {
        let mut detector = ParticipantDetector::new();
        let m = msg(Protocol::Diameter, "10.9.1.1", 3868, "10.9.2.1", DIAMETER_PORT)
            .with_field("application_id", serde_json::json!(16777238u32));
        assert_eq!(
            detector.detect(&m, true).participant_type,
            ParticipantType::Pgw
        );
        assert_eq!(
            detector.detect(&m, false).participant_type,
            ParticipantType::Pcrf
        );
    }

    #[test]
    fn test_explicit_mapping_wins() {
        let mut detector = ParticipantDetector::new();
        detector.add_explicit_mapping("10.0.2.1", "mme-lab-a", ParticipantType::Mme);
        let m = msg(Protocol::S1ap, "10.0.1.50", 50000, "10.0.2.1", S1AP_PORT);
        let dst = detector.detect(&m, false);
        assert_eq!(dst.id, "mme-lab-a");
        assert_eq!(dst.friendly_name.as_deref(), Some("mme-lab-a"));
    }

    #[test]
    fn test_detection_is_cached() {
        let mut detector = ParticipantDetector::new();
        let m = msg(Protocol::S1ap, "10.0.1.50", 50000, "10.0.2.1", S1AP_PORT);
        let first = detector.detect(&m, false);
        let second = detector.detect(&m, false);
        assert_eq!(first, second);
        assert_eq!(detector.all_participants().len(), 1);
    }

    #[test]
    fn test_numbered_ids_increment() {
        let mut detector = ParticipantDetector::new();
        let a = msg(Protocol::S1ap, "10.0.1.50", 50000, "10.0.2.1", S1AP_PORT);
        let b = msg(Protocol::S1ap, "10.0.1.51", 50001, "10.0.2.2", S1AP_PORT);
        assert_eq!(detector.detect(&a, false).id, "MME-01");
        assert_eq!(detector.detect(&b, false).id, "MME-02");
    }
}
