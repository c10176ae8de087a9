//! NAS message parsing.
//!
//! Parses the plain NAS header (security header skip included), the message
//! type and the TLV information elements that carry subscriber identity and
//! PDN state. This is deliberately not a full TS 24.301 codec: only the IEs
//! the correlation engine consumes are extracted, everything else is walked
//! over.

use crate::identity::guti::Guti4g;
use crate::nas::ies::{self, MobileIdentity, Tai};
use crate::nas::types::{
    EmmCause, EmmMessageType, EsmCause, EsmMessageType, NasPdnType, NasProtocolDiscriminator,
    NasSecurityHeader,
};
use crate::types::Timestamp;
use tracing::debug;

/// IE tags handled by the extraction walk.
const IE_EPS_MOBILE_IDENTITY: u8 = 0x50;
const IE_MOBILE_IDENTITY: u8 = 0x23;
const IE_ACCESS_POINT_NAME: u8 = 0x28;
const IE_PDN_ADDRESS: u8 = 0x29;
const IE_EPS_QOS: u8 = 0x5B;
const IE_LINKED_EPS_BEARER_ID: u8 = 0x5D;
const IE_TAI: u8 = 0x52;
const IE_EMM_CAUSE: u8 = 0x53;
const IE_ESM_CAUSE: u8 = 0x5F;
const IE_ESM_MESSAGE_CONTAINER: u8 = 0x78;

/// One decoded NAS message.
#[derive(Debug, Clone, Default)]
pub struct NasMessage {
    pub frame_number: u32,
    pub timestamp: Timestamp,

    pub security_header: Option<NasSecurityHeader>,
    pub discriminator: Option<NasProtocolDiscriminator>,
    pub emm_type: Option<EmmMessageType>,
    pub esm_type: Option<EsmMessageType>,

    /// Procedure Transaction Identity (ESM).
    pub pti: Option<u8>,
    pub eps_bearer_id: Option<u8>,

    pub imsi: Option<String>,
    pub imei: Option<String>,
    pub imeisv: Option<String>,
    pub guti: Option<Guti4g>,
    pub tmsi: Option<u32>,

    pub apn: Option<String>,
    pub pdn_address: Option<String>,
    pub pdn_type: Option<NasPdnType>,
    pub qci: Option<u8>,
    pub linked_eps_bearer_id: Option<u8>,

    pub emm_cause: Option<EmmCause>,
    pub esm_cause: Option<EsmCause>,
    pub tai: Option<Tai>,

    pub esm_container: Option<Vec<u8>>,
}

/// NAS message direction, derived from the message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NasDirection {
    Uplink,
    Downlink,
    Unknown,
}

impl NasMessage {
    /// Parses a NAS PDU. Returns `None` for buffers too short to carry a
    /// message; field-level decode problems leave the field unset.
    pub fn parse(data: &[u8], frame_number: u32, timestamp: Timestamp) -> Option<NasMessage> {
        if data.len() < 2 {
            return None;
        }

        let mut msg = NasMessage {
            frame_number,
            timestamp,
            ..Default::default()
        };

        let mut offset = 0;
        let octet1 = data[offset];
        offset += 1;
        let security = NasSecurityHeader::from((octet1 >> 4) & 0x0F);
        msg.security_header = Some(security);
        msg.discriminator = Some(NasProtocolDiscriminator::from(octet1 & 0x0F));

        // Security-protected messages prepend a 4-byte MAC and a 1-byte
        // sequence number before the plain inner header.
        if !security.is_plain() {
            if data.len() < offset + 6 {
                return None;
            }
            offset += 5;
            let inner = data[offset];
            offset += 1;
            msg.discriminator = Some(NasProtocolDiscriminator::from(inner & 0x0F));
        }

        match msg.discriminator {
            Some(NasProtocolDiscriminator::Emm) => {
                let type_octet = *data.get(offset)?;
                offset += 1;
                msg.emm_type = Some(EmmMessageType::from(type_octet));
            }
            Some(NasProtocolDiscriminator::Esm) => {
                // ESM: bearer id octet, then PTI, then the message type.
                msg.eps_bearer_id = Some(*data.get(offset)? & 0x0F);
                msg.pti = Some(*data.get(offset + 1)?);
                offset += 2;
                let type_octet = *data.get(offset)?;
                offset += 1;
                msg.esm_type = Some(EsmMessageType::from(type_octet));
            }
            _ => {
                debug!(frame = frame_number, "unknown NAS protocol discriminator");
                return Some(msg);
            }
        }

        if offset < data.len() {
            msg.parse_ies(&data[offset..]);
        }

        Some(msg)
    }

    pub fn is_emm(&self) -> bool {
        self.discriminator == Some(NasProtocolDiscriminator::Emm)
    }

    pub fn is_esm(&self) -> bool {
        self.discriminator == Some(NasProtocolDiscriminator::Esm)
    }

    /// Human-readable message name.
    pub fn type_name(&self) -> &'static str {
        if let Some(emm) = self.emm_type {
            emm.name()
        } else if let Some(esm) = self.esm_type {
            esm.name()
        } else {
            "Unknown NAS"
        }
    }

    pub fn direction(&self) -> NasDirection {
        if let Some(emm) = self.emm_type {
            if emm == EmmMessageType::Unknown {
                return NasDirection::Unknown;
            }
            return if emm.is_uplink() {
                NasDirection::Uplink
            } else {
                NasDirection::Downlink
            };
        }
        if let Some(esm) = self.esm_type {
            return match esm {
                EsmMessageType::PdnConnectivityRequest
                | EsmMessageType::PdnDisconnectRequest
                | EsmMessageType::ActivateDefaultBearerAccept
                | EsmMessageType::ActivateDefaultBearerReject
                | EsmMessageType::ActivateDedicatedBearerAccept
                | EsmMessageType::ActivateDedicatedBearerReject
                | EsmMessageType::ModifyBearerAccept
                | EsmMessageType::ModifyBearerReject
                | EsmMessageType::DeactivateBearerAccept
                | EsmMessageType::EsmInfoResponse => NasDirection::Uplink,
                EsmMessageType::ActivateDefaultBearerRequest
                | EsmMessageType::ActivateDedicatedBearerRequest
                | EsmMessageType::ModifyBearerRequest
                | EsmMessageType::DeactivateBearerRequest
                | EsmMessageType::PdnConnectivityReject
                | EsmMessageType::PdnDisconnectReject
                | EsmMessageType::EsmInfoRequest => NasDirection::Downlink,
                _ => NasDirection::Unknown,
            };
        }
        NasDirection::Unknown
    }

    /// Simplified TLV walk over the remaining octets: every IE is assumed
    /// to be tag + length + value. IEs that do not decode contribute
    /// nothing; the walk stops at the first structural impossibility.
    fn parse_ies(&mut self, data: &[u8]) {
        let mut offset = 0;
        while offset + 2 <= data.len() {
            let ie_type = data[offset];
            let ie_len = data[offset + 1] as usize;
            if offset + 2 + ie_len > data.len() {
                break;
            }
            let ie_data = &data[offset + 2..offset + 2 + ie_len];

            match ie_type {
                IE_EPS_MOBILE_IDENTITY | IE_MOBILE_IDENTITY => {
                    match ies::parse_mobile_identity(ie_data) {
                        Ok(MobileIdentity::Imsi(imsi)) => self.imsi = Some(imsi),
                        Ok(MobileIdentity::Imei(imei)) => self.imei = Some(imei),
                        Ok(MobileIdentity::Imeisv(imeisv)) => self.imeisv = Some(imeisv),
                        Ok(MobileIdentity::Tmsi(tmsi)) => self.tmsi = Some(tmsi),
                        Ok(MobileIdentity::Guti(guti)) => self.guti = Some(guti),
                        Ok(MobileIdentity::None) => {}
                        Err(err) => {
                            debug!(frame = self.frame_number, %err, "mobile identity IE skipped");
                        }
                    }
                }
                IE_ACCESS_POINT_NAME => {
                    if let Some(apn) = ies::parse_apn(ie_data) {
                        self.apn = Some(apn);
                    }
                }
                IE_PDN_ADDRESS => {
                    if let Some((pdn_type, address)) = ies::parse_pdn_address(ie_data) {
                        self.pdn_type = Some(pdn_type);
                        self.pdn_address = Some(address);
                    }
                }
                IE_EPS_QOS => {
                    if let Some(qci) = ies::parse_eps_qos(ie_data) {
                        self.qci = Some(qci);
                    }
                }
                IE_LINKED_EPS_BEARER_ID => {
                    if let Some(&first) = ie_data.first() {
                        self.linked_eps_bearer_id = Some(first & 0x0F);
                    }
                }
                IE_TAI => {
                    if let Some(tai) = ies::parse_tai(ie_data) {
                        self.tai = Some(tai);
                    }
                }
                IE_EMM_CAUSE if self.is_emm() => {
                    if let Some(&cause) = ie_data.first() {
                        self.emm_cause = Some(EmmCause(cause));
                    }
                }
                IE_ESM_CAUSE if self.is_esm() => {
                    if let Some(&cause) = ie_data.first() {
                        self.esm_cause = Some(EsmCause(cause));
                    }
                }
                IE_ESM_MESSAGE_CONTAINER => {
                    self.esm_container = Some(ie_data.to_vec());
                }
                _ => {}
            }

            offset += 2 + ie_len;
        }
    }
}
