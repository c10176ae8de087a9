//! NAS protocol enumerations (3GPP TS 24.301).

use serde::Serialize;

/// Protocol discriminator, low nibble of octet 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NasProtocolDiscriminator {
    /// EPS Mobility Management.
    Emm,
    /// EPS Session Management.
    Esm,
    Unknown,
}

impl From<u8> for NasProtocolDiscriminator {
    fn from(v: u8) -> Self {
        match v {
            0x07 => NasProtocolDiscriminator::Emm,
            0x02 => NasProtocolDiscriminator::Esm,
            _ => NasProtocolDiscriminator::Unknown,
        }
    }
}

/// Security header type, high nibble of octet 1 (TS 24.301 §9.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NasSecurityHeader {
    PlainNas,
    IntegrityProtected,
    IntegrityProtectedCiphered,
    IntegrityProtectedNewContext,
    IntegrityProtectedCipheredNewContext,
    ServiceRequest,
    Unknown,
}

impl From<u8> for NasSecurityHeader {
    fn from(v: u8) -> Self {
        match v {
            0x00 => NasSecurityHeader::PlainNas,
            0x01 => NasSecurityHeader::IntegrityProtected,
            0x02 => NasSecurityHeader::IntegrityProtectedCiphered,
            0x03 => NasSecurityHeader::IntegrityProtectedNewContext,
            0x04 => NasSecurityHeader::IntegrityProtectedCipheredNewContext,
            0x0C => NasSecurityHeader::ServiceRequest,
            _ => NasSecurityHeader::Unknown,
        }
    }
}

impl NasSecurityHeader {
    pub fn is_plain(&self) -> bool {
        matches!(self, NasSecurityHeader::PlainNas)
    }
}

/// EMM message types (TS 24.301 §9.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum EmmMessageType {
    AttachRequest = 0x41,
    AttachAccept = 0x42,
    AttachComplete = 0x43,
    AttachReject = 0x44,
    DetachRequest = 0x45,
    DetachAccept = 0x46,
    TauRequest = 0x48,
    TauAccept = 0x49,
    TauComplete = 0x4A,
    TauReject = 0x4B,
    ServiceRequest = 0x4C,
    ExtendedServiceRequest = 0x4D,
    ServiceReject = 0x4E,
    GutiReallocCommand = 0x50,
    GutiReallocComplete = 0x51,
    AuthenticationRequest = 0x52,
    AuthenticationResponse = 0x53,
    AuthenticationReject = 0x54,
    IdentityRequest = 0x55,
    IdentityResponse = 0x56,
    AuthenticationFailure = 0x5C,
    SecurityModeCommand = 0x5D,
    SecurityModeComplete = 0x5E,
    SecurityModeReject = 0x5F,
    EmmStatus = 0x60,
    EmmInformation = 0x61,
    DownlinkNasTransport = 0x62,
    UplinkNasTransport = 0x63,
    CsServiceNotification = 0x64,
    Unknown = 0x00,
}

impl From<u8> for EmmMessageType {
    fn from(v: u8) -> Self {
        match v {
            0x41 => EmmMessageType::AttachRequest,
            0x42 => EmmMessageType::AttachAccept,
            0x43 => EmmMessageType::AttachComplete,
            0x44 => EmmMessageType::AttachReject,
            0x45 => EmmMessageType::DetachRequest,
            0x46 => EmmMessageType::DetachAccept,
            0x48 => EmmMessageType::TauRequest,
            0x49 => EmmMessageType::TauAccept,
            0x4A => EmmMessageType::TauComplete,
            0x4B => EmmMessageType::TauReject,
            0x4C => EmmMessageType::ServiceRequest,
            0x4D => EmmMessageType::ExtendedServiceRequest,
            0x4E => EmmMessageType::ServiceReject,
            0x50 => EmmMessageType::GutiReallocCommand,
            0x51 => EmmMessageType::GutiReallocComplete,
            0x52 => EmmMessageType::AuthenticationRequest,
            0x53 => EmmMessageType::AuthenticationResponse,
            0x54 => EmmMessageType::AuthenticationReject,
            0x55 => EmmMessageType::IdentityRequest,
            0x56 => EmmMessageType::IdentityResponse,
            0x5C => EmmMessageType::AuthenticationFailure,
            0x5D => EmmMessageType::SecurityModeCommand,
            0x5E => EmmMessageType::SecurityModeComplete,
            0x5F => EmmMessageType::SecurityModeReject,
            0x60 => EmmMessageType::EmmStatus,
            0x61 => EmmMessageType::EmmInformation,
            0x62 => EmmMessageType::DownlinkNasTransport,
            0x63 => EmmMessageType::UplinkNasTransport,
            0x64 => EmmMessageType::CsServiceNotification,
            _ => EmmMessageType::Unknown,
        }
    }
}

impl EmmMessageType {
    pub fn name(&self) -> &'static str {
        match self {
            EmmMessageType::AttachRequest => "Attach Request",
            EmmMessageType::AttachAccept => "Attach Accept",
            EmmMessageType::AttachComplete => "Attach Complete",
            EmmMessageType::AttachReject => "Attach Reject",
            EmmMessageType::DetachRequest => "Detach Request",
            EmmMessageType::DetachAccept => "Detach Accept",
            EmmMessageType::TauRequest => "TAU Request",
            EmmMessageType::TauAccept => "TAU Accept",
            EmmMessageType::TauComplete => "TAU Complete",
            EmmMessageType::TauReject => "TAU Reject",
            EmmMessageType::ServiceRequest => "Service Request",
            EmmMessageType::ExtendedServiceRequest => "Extended Service Request",
            EmmMessageType::ServiceReject => "Service Reject",
            EmmMessageType::GutiReallocCommand => "GUTI Reallocation Command",
            EmmMessageType::GutiReallocComplete => "GUTI Reallocation Complete",
            EmmMessageType::AuthenticationRequest => "Authentication Request",
            EmmMessageType::AuthenticationResponse => "Authentication Response",
            EmmMessageType::AuthenticationReject => "Authentication Reject",
            EmmMessageType::IdentityRequest => "Identity Request",
            EmmMessageType::IdentityResponse => "Identity Response",
            EmmMessageType::AuthenticationFailure => "Authentication Failure",
            EmmMessageType::SecurityModeCommand => "Security Mode Command",
            EmmMessageType::SecurityModeComplete => "Security Mode Complete",
            EmmMessageType::SecurityModeReject => "Security Mode Reject",
            EmmMessageType::EmmStatus => "EMM Status",
            EmmMessageType::EmmInformation => "EMM Information",
            EmmMessageType::DownlinkNasTransport => "Downlink NAS Transport",
            EmmMessageType::UplinkNasTransport => "Uplink NAS Transport",
            EmmMessageType::CsServiceNotification => "CS Service Notification",
            EmmMessageType::Unknown => "Unknown EMM",
        }
    }

    /// True for UE-originated messages.
    pub fn is_uplink(&self) -> bool {
        matches!(
            self,
            EmmMessageType::AttachRequest
                | EmmMessageType::AttachComplete
                | EmmMessageType::DetachRequest
                | EmmMessageType::TauRequest
                | EmmMessageType::TauComplete
                | EmmMessageType::ServiceRequest
                | EmmMessageType::ExtendedServiceRequest
                | EmmMessageType::AuthenticationResponse
                | EmmMessageType::AuthenticationFailure
                | EmmMessageType::IdentityResponse
                | EmmMessageType::SecurityModeComplete
                | EmmMessageType::SecurityModeReject
                | EmmMessageType::GutiReallocComplete
                | EmmMessageType::UplinkNasTransport
        )
    }
}

/// ESM message types (TS 24.301 §9.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum EsmMessageType {
    ActivateDefaultBearerRequest = 0xC1,
    ActivateDefaultBearerAccept = 0xC2,
    ActivateDefaultBearerReject = 0xC3,
    ActivateDedicatedBearerRequest = 0xC5,
    ActivateDedicatedBearerAccept = 0xC6,
    ActivateDedicatedBearerReject = 0xC7,
    ModifyBearerRequest = 0xC9,
    ModifyBearerAccept = 0xCA,
    ModifyBearerReject = 0xCB,
    DeactivateBearerRequest = 0xCD,
    DeactivateBearerAccept = 0xCE,
    PdnConnectivityRequest = 0xD0,
    PdnConnectivityReject = 0xD1,
    PdnDisconnectRequest = 0xD2,
    PdnDisconnectReject = 0xD3,
    BearerResourceAllocRequest = 0xD4,
    BearerResourceAllocReject = 0xD5,
    BearerResourceModifyRequest = 0xD6,
    BearerResourceModifyReject = 0xD7,
    EsmInfoRequest = 0xD9,
    EsmInfoResponse = 0xDA,
    EsmNotification = 0xDB,
    EsmStatus = 0xE8,
    Unknown = 0x00,
}

impl From<u8> for EsmMessageType {
    fn from(v: u8) -> Self {
        match v {
            0xC1 => EsmMessageType::ActivateDefaultBearerRequest,
            0xC2 => EsmMessageType::ActivateDefaultBearerAccept,
            0xC3 => EsmMessageType::ActivateDefaultBearerReject,
            0xC5 => EsmMessageType::ActivateDedicatedBearerRequest,
            0xC6 => EsmMessageType::ActivateDedicatedBearerAccept,
            0xC7 => EsmMessageType::ActivateDedicatedBearerReject,
            0xC9 => EsmMessageType::ModifyBearerRequest,
            0xCA => EsmMessageType::ModifyBearerAccept,
            0xCB => EsmMessageType::ModifyBearerReject,
            0xCD => EsmMessageType::DeactivateBearerRequest,
            0xCE => EsmMessageType::DeactivateBearerAccept,
            0xD0 => EsmMessageType::PdnConnectivityRequest,
            0xD1 => EsmMessageType::PdnConnectivityReject,
            0xD2 => EsmMessageType::PdnDisconnectRequest,
            0xD3 => EsmMessageType::PdnDisconnectReject,
            0xD4 => EsmMessageType::BearerResourceAllocRequest,
            0xD5 => EsmMessageType::BearerResourceAllocReject,
            0xD6 => EsmMessageType::BearerResourceModifyRequest,
            0xD7 => EsmMessageType::BearerResourceModifyReject,
            0xD9 => EsmMessageType::EsmInfoRequest,
            0xDA => EsmMessageType::EsmInfoResponse,
            0xDB => EsmMessageType::EsmNotification,
            0xE8 => EsmMessageType::EsmStatus,
            _ => EsmMessageType::Unknown,
        }
    }
}

impl EsmMessageType {
    pub fn name(&self) -> &'static str {
        match self {
            EsmMessageType::ActivateDefaultBearerRequest => "Activate Default Bearer Request",
            EsmMessageType::ActivateDefaultBearerAccept => "Activate Default Bearer Accept",
            EsmMessageType::ActivateDefaultBearerReject => "Activate Default Bearer Reject",
            EsmMessageType::ActivateDedicatedBearerRequest => "Activate Dedicated Bearer Request",
            EsmMessageType::ActivateDedicatedBearerAccept => "Activate Dedicated Bearer Accept",
            EsmMessageType::ActivateDedicatedBearerReject => "Activate Dedicated Bearer Reject",
            EsmMessageType::ModifyBearerRequest => "Modify Bearer Request",
            EsmMessageType::ModifyBearerAccept => "Modify Bearer Accept",
            EsmMessageType::ModifyBearerReject => "Modify Bearer Reject",
            EsmMessageType::DeactivateBearerRequest => "Deactivate Bearer Request",
            EsmMessageType::DeactivateBearerAccept => "Deactivate Bearer Accept",
            EsmMessageType::PdnConnectivityRequest => "PDN Connectivity Request",
            EsmMessageType::PdnConnectivityReject => "PDN Connectivity Reject",
            EsmMessageType::PdnDisconnectRequest => "PDN Disconnect Request",
            EsmMessageType::PdnDisconnectReject => "PDN Disconnect Reject",
            EsmMessageType::BearerResourceAllocRequest => "Bearer Resource Allocation Request",
            EsmMessageType::BearerResourceAllocReject => "Bearer Resource Allocation Reject",
            EsmMessageType::BearerResourceModifyRequest => "Bearer Resource Modification Request",
            EsmMessageType::BearerResourceModifyReject => "Bearer Resource Modification Reject",
            EsmMessageType::EsmInfoRequest => "ESM Information Request",
            EsmMessageType::EsmInfoResponse => "ESM Information Response",
            EsmMessageType::EsmNotification => "ESM Notification",
            EsmMessageType::EsmStatus => "ESM Status",
            EsmMessageType::Unknown => "Unknown ESM",
        }
    }
}

/// Mobile Identity type, low 3 bits of the first IE octet (TS 24.301
/// §9.9.2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MobileIdentityType {
    NoIdentity,
    Imsi,
    Imei,
    Imeisv,
    Tmsi,
    Tmgi,
    Guti,
    Unknown,
}

impl From<u8> for MobileIdentityType {
    fn from(v: u8) -> Self {
        match v & 0x07 {
            0 => MobileIdentityType::NoIdentity,
            1 => MobileIdentityType::Imsi,
            2 => MobileIdentityType::Imei,
            3 => MobileIdentityType::Imeisv,
            4 => MobileIdentityType::Tmsi,
            5 => MobileIdentityType::Tmgi,
            6 => MobileIdentityType::Guti,
            _ => MobileIdentityType::Unknown,
        }
    }
}

/// PDN type (TS 24.301 §9.9.4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NasPdnType {
    Ipv4,
    Ipv6,
    Ipv4v6,
    NonIp,
    Unknown,
}

impl From<u8> for NasPdnType {
    fn from(v: u8) -> Self {
        match v & 0x07 {
            1 => NasPdnType::Ipv4,
            2 => NasPdnType::Ipv6,
            3 => NasPdnType::Ipv4v6,
            5 => NasPdnType::NonIp,
            _ => NasPdnType::Unknown,
        }
    }
}

impl NasPdnType {
    pub fn name(&self) -> &'static str {
        match self {
            NasPdnType::Ipv4 => "ipv4",
            NasPdnType::Ipv6 => "ipv6",
            NasPdnType::Ipv4v6 => "ipv4v6",
            NasPdnType::NonIp => "non-ip",
            NasPdnType::Unknown => "unknown",
        }
    }
}

/// EMM cause value (TS 24.301 §9.9.3.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmmCause(pub u8);

impl EmmCause {
    pub fn name(&self) -> &'static str {
        match self.0 {
            2 => "IMSI Unknown in HSS",
            3 => "Illegal UE",
            5 => "IMEI Not Accepted",
            6 => "Illegal ME",
            7 => "EPS Services Not Allowed",
            11 => "PLMN Not Allowed",
            12 => "TA Not Allowed",
            13 => "Roaming Not Allowed in TA",
            15 => "No Suitable Cells in TA",
            17 => "Network Failure",
            19 => "ESM Failure",
            20 => "MAC Failure",
            21 => "Synch Failure",
            22 => "Congestion",
            _ => "Unknown EMM Cause",
        }
    }
}

/// ESM cause value (TS 24.301 §9.9.4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EsmCause(pub u8);

impl EsmCause {
    pub fn name(&self) -> &'static str {
        match self.0 {
            8 => "Operator Determined Barring",
            26 => "Insufficient Resources",
            27 => "Unknown APN",
            28 => "Unknown PDN Type",
            29 => "User Authentication Failed",
            30 => "Request Rejected by GW",
            31 => "Request Rejected, Unspecified",
            36 => "Regular Deactivation",
            38 => "Network Failure",
            50 => "PDN Type IPv4 Only Allowed",
            51 => "PDN Type IPv6 Only Allowed",
            _ => "Unknown ESM Cause",
        }
    }

    /// Regular deactivation is the only cause treated as a success outcome.
    pub fn is_success(&self) -> bool {
        self.0 == 36
    }
}

/// PDN classification inferred from the APN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PdnClass {
    Ims,
    Internet,
    Other,
}

/// Classifies a PDN from its APN: "ims" exactly or an "ims." label means
/// the IMS PDN.
pub fn classify_pdn_from_apn(apn: &str) -> PdnClass {
    let lower = apn.to_ascii_lowercase();
    if lower == "ims" || lower.contains("ims.") {
        PdnClass::Ims
    } else if lower.contains("internet") {
        PdnClass::Internet
    } else {
        PdnClass::Other
    }
}
