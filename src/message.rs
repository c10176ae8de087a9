//! Parsed-message envelope handed in by protocol decoders.
//!
//! Wire parsing of the individual protocol stacks is an external concern:
//! decoders deliver a [`ParsedMessage`] carrying the capture metadata
//! (frame, timestamp, 5-tuple), a [`Protocol`] tag, a [`MessageKind`] tag, a
//! map of protocol-specific fields, and the correlation hints they managed
//! to extract. Everything in this crate consumes that envelope.
//!
//! # Examples
//!
//! ```rust
//! use rs_callflow::message::{MessageKind, ParsedMessage, Protocol};
//! use rs_callflow::types::Timestamp;
//!
//! let msg = ParsedMessage::new(
//!     1,
//!     Timestamp::from_millis(0),
//!     Protocol::S1ap,
//!     MessageKind::S1apInitialUeMessage,
//! )
//! .with_nas(MessageKind::NasAttachRequest)
//! .with_imsi("310260123456789");
//!
//! assert!(msg.has_nas(MessageKind::NasAttachRequest));
//! assert_eq!(msg.hints.imsi.as_deref(), Some("310260123456789"));
//! ```

use crate::types::{Ssrc, Teid, Timestamp};
use serde::Serialize;
use serde_json::{Map, Value};

/// Protocol that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    Sip,
    Rtp,
    Rtcp,
    Diameter,
    GtpC,
    GtpU,
    S1ap,
    X2ap,
    Ngap,
    Nas,
    Pfcp,
    Http2,
    Dns,
    Dhcp,
    Unknown,
}

impl Protocol {
    /// Human-readable protocol name used in ladder diagrams.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Sip => "SIP",
            Protocol::Rtp => "RTP",
            Protocol::Rtcp => "RTCP",
            Protocol::Diameter => "Diameter",
            Protocol::GtpC => "GTPv2-C",
            Protocol::GtpU => "GTP-U",
            Protocol::S1ap => "S1AP",
            Protocol::X2ap => "X2AP",
            Protocol::Ngap => "NGAP",
            Protocol::Nas => "NAS",
            Protocol::Pfcp => "PFCP",
            Protocol::Http2 => "HTTP/2",
            Protocol::Dns => "DNS",
            Protocol::Dhcp => "DHCP",
            Protocol::Unknown => "Unknown",
        }
    }
}

/// Transport protocol of the captured packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Transport {
    #[default]
    Udp,
    Tcp,
    Sctp,
}

/// Message kind tag across all ingested protocols.
///
/// Flat on purpose: the procedure state machines, the tunnel manager and the
/// ladder assembler all dispatch on one tag regardless of which stack the
/// message came from. NAS kinds double as the nested-PDU tag on S1AP/NGAP
/// transport messages (see [`ParsedMessage::has_nas`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKind {
    // S1AP
    S1apInitialUeMessage,
    S1apDownlinkNasTransport,
    S1apUplinkNasTransport,
    S1apInitialContextSetupRequest,
    S1apInitialContextSetupResponse,
    S1apPathSwitchRequest,
    S1apPathSwitchRequestAck,
    S1apUeContextReleaseRequest,
    S1apUeContextReleaseCommand,
    S1apUeContextReleaseComplete,
    S1apHandoverNotify,

    // NGAP
    NgapInitialUeMessage,
    NgapDownlinkNasTransport,
    NgapUplinkNasTransport,
    NgapInitialContextSetupRequest,
    NgapInitialContextSetupResponse,

    // X2AP
    X2apHandoverRequest,
    X2apHandoverRequestAck,
    X2apHandoverCancel,
    X2apSnStatusTransfer,
    X2apUeContextRelease,

    // NAS EMM/ESM (also used as the nested-PDU tag)
    NasAttachRequest,
    NasAttachAccept,
    NasAttachComplete,
    NasAttachReject,
    NasAuthenticationRequest,
    NasAuthenticationResponse,
    NasAuthenticationFailure,
    NasSecurityModeCommand,
    NasSecurityModeComplete,
    NasDetachRequest,
    NasDetachAccept,
    NasTauRequest,
    NasTauAccept,
    NasPdnConnectivityRequest,
    NasActivateDefaultBearerRequest,
    NasActivateDefaultBearerAccept,
    NasActivateDedicatedBearerRequest,
    NasActivateDedicatedBearerAccept,

    // 5G NAS
    Nas5gRegistrationRequest,
    Nas5gRegistrationAccept,
    Nas5gRegistrationComplete,
    Nas5gRegistrationReject,
    Nas5gAuthenticationRequest,
    Nas5gAuthenticationResponse,
    Nas5gSecurityModeCommand,
    Nas5gSecurityModeComplete,

    // GTPv2-C
    GtpCreateSessionRequest,
    GtpCreateSessionResponse,
    GtpModifyBearerRequest,
    GtpModifyBearerResponse,
    GtpDeleteSessionRequest,
    GtpDeleteSessionResponse,
    GtpCreateBearerRequest,
    GtpCreateBearerResponse,
    GtpDeleteBearerRequest,
    GtpDeleteBearerResponse,
    GtpEchoRequest,
    GtpEchoResponse,

    // Diameter commands
    DiameterAar,
    DiameterAaa,
    DiameterRar,
    DiameterRaa,
    DiameterCcr,
    DiameterCca,
    DiameterUlr,
    DiameterUla,
    DiameterStr,
    DiameterSta,

    // SIP
    SipInvite,
    SipTrying,
    SipSessionProgress,
    SipRinging,
    SipOk,
    SipAck,
    SipBye,
    SipCancel,
    SipRegister,
    SipMessage,
    SipOptions,
    SipInfo,
    SipPublish,
    SipPrack,
    SipUpdate,

    // User plane / media
    RtpPacket,
    GtpUserData,

    // PFCP (ladder tagging only)
    PfcpHeartbeatRequest,
    PfcpHeartbeatResponse,

    Unknown,
}

impl MessageKind {
    /// True for messages that open a request/response exchange.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            MessageKind::GtpCreateSessionRequest
                | MessageKind::GtpModifyBearerRequest
                | MessageKind::GtpDeleteSessionRequest
                | MessageKind::GtpCreateBearerRequest
                | MessageKind::GtpDeleteBearerRequest
                | MessageKind::GtpEchoRequest
                | MessageKind::DiameterAar
                | MessageKind::DiameterRar
                | MessageKind::DiameterCcr
                | MessageKind::DiameterUlr
                | MessageKind::DiameterStr
                | MessageKind::SipInvite
                | MessageKind::SipRegister
                | MessageKind::SipBye
                | MessageKind::SipCancel
                | MessageKind::SipOptions
                | MessageKind::SipMessage
                | MessageKind::SipUpdate
                | MessageKind::SipPrack
                | MessageKind::X2apHandoverRequest
                | MessageKind::S1apInitialContextSetupRequest
                | MessageKind::S1apPathSwitchRequest
                | MessageKind::S1apUeContextReleaseCommand
                | MessageKind::NgapInitialContextSetupRequest
                | MessageKind::PfcpHeartbeatRequest
        )
    }

    /// True for messages that close a request/response exchange.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            MessageKind::GtpCreateSessionResponse
                | MessageKind::GtpModifyBearerResponse
                | MessageKind::GtpDeleteSessionResponse
                | MessageKind::GtpCreateBearerResponse
                | MessageKind::GtpDeleteBearerResponse
                | MessageKind::GtpEchoResponse
                | MessageKind::DiameterAaa
                | MessageKind::DiameterRaa
                | MessageKind::DiameterCca
                | MessageKind::DiameterUla
                | MessageKind::DiameterSta
                | MessageKind::SipTrying
                | MessageKind::SipSessionProgress
                | MessageKind::SipRinging
                | MessageKind::SipOk
                | MessageKind::X2apHandoverRequestAck
                | MessageKind::S1apInitialContextSetupResponse
                | MessageKind::S1apPathSwitchRequestAck
                | MessageKind::S1apUeContextReleaseComplete
                | MessageKind::NgapInitialContextSetupResponse
                | MessageKind::PfcpHeartbeatResponse
        )
    }

    /// The response kind that answers this request, if the pairing is fixed.
    pub fn response_kind(&self) -> Option<MessageKind> {
        match self {
            MessageKind::GtpCreateSessionRequest => Some(MessageKind::GtpCreateSessionResponse),
            MessageKind::GtpModifyBearerRequest => Some(MessageKind::GtpModifyBearerResponse),
            MessageKind::GtpDeleteSessionRequest => Some(MessageKind::GtpDeleteSessionResponse),
            MessageKind::GtpCreateBearerRequest => Some(MessageKind::GtpCreateBearerResponse),
            MessageKind::GtpDeleteBearerRequest => Some(MessageKind::GtpDeleteBearerResponse),
            MessageKind::GtpEchoRequest => Some(MessageKind::GtpEchoResponse),
            MessageKind::DiameterAar => Some(MessageKind::DiameterAaa),
            MessageKind::DiameterRar => Some(MessageKind::DiameterRaa),
            MessageKind::DiameterCcr => Some(MessageKind::DiameterCca),
            MessageKind::DiameterUlr => Some(MessageKind::DiameterUla),
            MessageKind::DiameterStr => Some(MessageKind::DiameterSta),
            MessageKind::SipInvite => Some(MessageKind::SipOk),
            MessageKind::X2apHandoverRequest => Some(MessageKind::X2apHandoverRequestAck),
            MessageKind::S1apInitialContextSetupRequest => {
                Some(MessageKind::S1apInitialContextSetupResponse)
            }
            MessageKind::S1apPathSwitchRequest => Some(MessageKind::S1apPathSwitchRequestAck),
            MessageKind::S1apUeContextReleaseCommand => {
                Some(MessageKind::S1apUeContextReleaseComplete)
            }
            MessageKind::NgapInitialContextSetupRequest => {
                Some(MessageKind::NgapInitialContextSetupResponse)
            }
            MessageKind::PfcpHeartbeatRequest => Some(MessageKind::PfcpHeartbeatResponse),
            _ => None,
        }
    }

    /// Human-readable message name used in ladder diagrams and step traces.
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::S1apInitialUeMessage => "Initial UE Message",
            MessageKind::S1apDownlinkNasTransport => "Downlink NAS Transport",
            MessageKind::S1apUplinkNasTransport => "Uplink NAS Transport",
            MessageKind::S1apInitialContextSetupRequest => "Initial Context Setup Request",
            MessageKind::S1apInitialContextSetupResponse => "Initial Context Setup Response",
            MessageKind::S1apPathSwitchRequest => "Path Switch Request",
            MessageKind::S1apPathSwitchRequestAck => "Path Switch Request Acknowledge",
            MessageKind::S1apUeContextReleaseRequest => "UE Context Release Request",
            MessageKind::S1apUeContextReleaseCommand => "UE Context Release Command",
            MessageKind::S1apUeContextReleaseComplete => "UE Context Release Complete",
            MessageKind::S1apHandoverNotify => "Handover Notify",
            MessageKind::NgapInitialUeMessage => "Initial UE Message",
            MessageKind::NgapDownlinkNasTransport => "Downlink NAS Transport",
            MessageKind::NgapUplinkNasTransport => "Uplink NAS Transport",
            MessageKind::NgapInitialContextSetupRequest => "Initial Context Setup Request",
            MessageKind::NgapInitialContextSetupResponse => "Initial Context Setup Response",
            MessageKind::X2apHandoverRequest => "Handover Request",
            MessageKind::X2apHandoverRequestAck => "Handover Request Acknowledge",
            MessageKind::X2apHandoverCancel => "Handover Cancel",
            MessageKind::X2apSnStatusTransfer => "SN Status Transfer",
            MessageKind::X2apUeContextRelease => "UE Context Release",
            MessageKind::NasAttachRequest => "Attach Request",
            MessageKind::NasAttachAccept => "Attach Accept",
            MessageKind::NasAttachComplete => "Attach Complete",
            MessageKind::NasAttachReject => "Attach Reject",
            MessageKind::NasAuthenticationRequest => "Authentication Request",
            MessageKind::NasAuthenticationResponse => "Authentication Response",
            MessageKind::NasAuthenticationFailure => "Authentication Failure",
            MessageKind::NasSecurityModeCommand => "Security Mode Command",
            MessageKind::NasSecurityModeComplete => "Security Mode Complete",
            MessageKind::NasDetachRequest => "Detach Request",
            MessageKind::NasDetachAccept => "Detach Accept",
            MessageKind::NasTauRequest => "TAU Request",
            MessageKind::NasTauAccept => "TAU Accept",
            MessageKind::NasPdnConnectivityRequest => "PDN Connectivity Request",
            MessageKind::NasActivateDefaultBearerRequest => "Activate Default Bearer Request",
            MessageKind::NasActivateDefaultBearerAccept => "Activate Default Bearer Accept",
            MessageKind::NasActivateDedicatedBearerRequest => "Activate Dedicated Bearer Request",
            MessageKind::NasActivateDedicatedBearerAccept => "Activate Dedicated Bearer Accept",
            MessageKind::Nas5gRegistrationRequest => "Registration Request",
            MessageKind::Nas5gRegistrationAccept => "Registration Accept",
            MessageKind::Nas5gRegistrationComplete => "Registration Complete",
            MessageKind::Nas5gRegistrationReject => "Registration Reject",
            MessageKind::Nas5gAuthenticationRequest => "Authentication Request",
            MessageKind::Nas5gAuthenticationResponse => "Authentication Response",
            MessageKind::Nas5gSecurityModeCommand => "Security Mode Command",
            MessageKind::Nas5gSecurityModeComplete => "Security Mode Complete",
            MessageKind::GtpCreateSessionRequest => "Create Session Request",
            MessageKind::GtpCreateSessionResponse => "Create Session Response",
            MessageKind::GtpModifyBearerRequest => "Modify Bearer Request",
            MessageKind::GtpModifyBearerResponse => "Modify Bearer Response",
            MessageKind::GtpDeleteSessionRequest => "Delete Session Request",
            MessageKind::GtpDeleteSessionResponse => "Delete Session Response",
            MessageKind::GtpCreateBearerRequest => "Create Bearer Request",
            MessageKind::GtpCreateBearerResponse => "Create Bearer Response",
            MessageKind::GtpDeleteBearerRequest => "Delete Bearer Request",
            MessageKind::GtpDeleteBearerResponse => "Delete Bearer Response",
            MessageKind::GtpEchoRequest => "Echo Request",
            MessageKind::GtpEchoResponse => "Echo Response",
            MessageKind::DiameterAar => "AA-Request",
            MessageKind::DiameterAaa => "AA-Answer",
            MessageKind::DiameterRar => "Re-Auth-Request",
            MessageKind::DiameterRaa => "Re-Auth-Answer",
            MessageKind::DiameterCcr => "Credit-Control-Request",
            MessageKind::DiameterCca => "Credit-Control-Answer",
            MessageKind::DiameterUlr => "Update-Location-Request",
            MessageKind::DiameterUla => "Update-Location-Answer",
            MessageKind::DiameterStr => "Session-Termination-Request",
            MessageKind::DiameterSta => "Session-Termination-Answer",
            MessageKind::SipInvite => "INVITE",
            MessageKind::SipTrying => "100 Trying",
            MessageKind::SipSessionProgress => "183 Session Progress",
            MessageKind::SipRinging => "180 Ringing",
            MessageKind::SipOk => "200 OK",
            MessageKind::SipAck => "ACK",
            MessageKind::SipBye => "BYE",
            MessageKind::SipCancel => "CANCEL",
            MessageKind::SipRegister => "REGISTER",
            MessageKind::SipMessage => "MESSAGE",
            MessageKind::SipOptions => "OPTIONS",
            MessageKind::SipInfo => "INFO",
            MessageKind::SipPublish => "PUBLISH",
            MessageKind::SipPrack => "PRACK",
            MessageKind::SipUpdate => "UPDATE",
            MessageKind::RtpPacket => "RTP",
            MessageKind::GtpUserData => "G-PDU",
            MessageKind::PfcpHeartbeatRequest => "Heartbeat Request",
            MessageKind::PfcpHeartbeatResponse => "Heartbeat Response",
            MessageKind::Unknown => "Unknown",
        }
    }
}

/// Correlation hints a decoder extracted alongside the parsed fields.
///
/// Everything is optional; the correlators and the procedure detector use
/// whatever is present.
#[derive(Debug, Clone, Default)]
pub struct CorrelationHints {
    pub imsi: Option<String>,
    pub supi: Option<String>,
    pub msisdn: Option<String>,
    pub apn: Option<String>,
    pub sip_call_id: Option<String>,
    pub teid_s1u: Option<Teid>,
    pub eps_bearer_id: Option<u8>,
    pub mme_ue_s1ap_id: Option<u32>,
    pub enb_ue_s1ap_id: Option<u32>,
    pub amf_ue_ngap_id: Option<u64>,
    pub ran_ue_ngap_id: Option<u64>,
    pub ue_ipv4: Option<String>,
    pub ue_ipv6: Option<String>,
    pub rtp_ssrc: Option<Ssrc>,
}

/// One parsed protocol message as delivered by a decoder.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub frame_number: u32,
    pub timestamp: Timestamp,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub transport: Transport,
    pub protocol: Protocol,
    pub kind: MessageKind,
    /// NAS PDU kind carried inside an S1AP/NGAP transport message.
    pub nested_nas: Option<MessageKind>,
    /// Protocol-specific parsed fields, keyed by decoder field name.
    pub fields: Map<String, Value>,
    pub hints: CorrelationHints,
    /// Procedure id stamped by the procedure detector; consumed by the
    /// ladder assembler for grouping.
    pub procedure_id: Option<String>,
}

impl ParsedMessage {
    /// Creates a message with the mandatory envelope fields; everything else
    /// starts empty and is filled via the `with_*` builders.
    pub fn new(
        frame_number: u32,
        timestamp: Timestamp,
        protocol: Protocol,
        kind: MessageKind,
    ) -> Self {
        ParsedMessage {
            frame_number,
            timestamp,
            src_ip: String::new(),
            src_port: 0,
            dst_ip: String::new(),
            dst_port: 0,
            transport: Transport::default(),
            protocol,
            kind,
            nested_nas: None,
            fields: Map::new(),
            hints: CorrelationHints::default(),
            procedure_id: None,
        }
    }

    /// Sets the 5-tuple endpoints.
    pub fn with_endpoints(
        mut self,
        src_ip: &str,
        src_port: u16,
        dst_ip: &str,
        dst_port: u16,
    ) -> Self {
        self.src_ip = src_ip.to_string();
        self.src_port = src_port;
        self.dst_ip = dst_ip.to_string();
        self.dst_port = dst_port;
        self
    }

    /// Tags the NAS PDU kind nested in a transport message.
    pub fn with_nas(mut self, nas_kind: MessageKind) -> Self {
        self.nested_nas = Some(nas_kind);
        self
    }

    /// Sets the IMSI correlation hint.
    pub fn with_imsi(mut self, imsi: &str) -> Self {
        self.hints.imsi = Some(imsi.to_string());
        self
    }

    /// Sets the SUPI correlation hint.
    pub fn with_supi(mut self, supi: &str) -> Self {
        self.hints.supi = Some(supi.to_string());
        self
    }

    /// Sets the SIP Call-ID correlation hint.
    pub fn with_call_id(mut self, call_id: &str) -> Self {
        self.hints.sip_call_id = Some(call_id.to_string());
        self
    }

    /// Sets the S1-U TEID correlation hint.
    pub fn with_teid(mut self, teid: Teid) -> Self {
        self.hints.teid_s1u = Some(teid);
        self
    }

    /// Sets the UE S1AP id pair hint.
    pub fn with_ue_ids(mut self, mme_ue_id: u32, enb_ue_id: u32) -> Self {
        self.hints.mme_ue_s1ap_id = Some(mme_ue_id);
        self.hints.enb_ue_s1ap_id = Some(enb_ue_id);
        self
    }

    /// Sets the UE IPv4 hint.
    pub fn with_ue_ipv4(mut self, ip: &str) -> Self {
        self.hints.ue_ipv4 = Some(ip.to_string());
        self
    }

    /// Sets the APN hint.
    pub fn with_apn(mut self, apn: &str) -> Self {
        self.hints.apn = Some(apn.to_string());
        self
    }

    /// Sets the RTP SSRC hint.
    pub fn with_ssrc(mut self, ssrc: Ssrc) -> Self {
        self.hints.rtp_ssrc = Some(ssrc);
        self
    }

    /// Inserts one parsed field.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// True when this message carries the given nested NAS PDU kind.
    pub fn has_nas(&self, nas_kind: MessageKind) -> bool {
        self.nested_nas == Some(nas_kind)
    }

    /// String field accessor.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// u32 field accessor.
    pub fn field_u32(&self, key: &str) -> Option<u32> {
        self.fields
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// u64 field accessor.
    pub fn field_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_response_pairing() {
        assert!(MessageKind::GtpCreateSessionRequest.is_request());
        assert!(MessageKind::GtpCreateSessionResponse.is_response());
        assert_eq!(
            MessageKind::GtpCreateSessionRequest.response_kind(),
            Some(MessageKind::GtpCreateSessionResponse)
        );
        assert_eq!(MessageKind::SipAck.response_kind(), None);
    }

    #[test]
    fn test_requests_are_not_responses() {
        let kinds = [
            MessageKind::SipInvite,
            MessageKind::DiameterAar,
            MessageKind::GtpModifyBearerRequest,
            MessageKind::X2apHandoverRequest,
        ];
        for kind in kinds {
            assert!(kind.is_request(), "{:?}", kind);
            assert!(!kind.is_response(), "{:?}", kind);
        }
    }

    #[test]
    fn test_nested_nas_tagging() {
        let msg = ParsedMessage::new(
            5,
            Timestamp::from_millis(100),
            Protocol::S1ap,
            MessageKind::S1apDownlinkNasTransport,
        )
        .with_nas(MessageKind::NasAuthenticationRequest);

        assert!(msg.has_nas(MessageKind::NasAuthenticationRequest));
        assert!(!msg.has_nas(MessageKind::NasAttachRequest));
    }

    #[test]
    fn test_field_accessors() {
        let msg = ParsedMessage::new(
            1,
            Timestamp::from_millis(0),
            Protocol::GtpC,
            MessageKind::GtpCreateSessionRequest,
        )
        .with_field("qci", serde_json::json!(9))
        .with_field("apn", serde_json::json!("internet"));

        assert_eq!(msg.field_u32("qci"), Some(9));
        assert_eq!(msg.field_str("apn"), Some("internet"));
        assert_eq!(msg.field_u32("missing"), None);
    }

    #[test]
    fn test_message_names() {
        assert_eq!(MessageKind::SipInvite.name(), "INVITE");
        assert_eq!(MessageKind::NasAttachRequest.name(), "Attach Request");
        assert_eq!(
            MessageKind::GtpModifyBearerResponse.name(),
            "Modify Bearer Response"
        );
    }
}
