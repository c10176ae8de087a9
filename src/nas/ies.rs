//! NAS information element decoding.
//!
//! TLV-level decoding of the IEs the correlation engine cares about: Mobile
//! Identity (IMSI/IMEI/IMEISV/TMSI/GUTI), APN, PDN Address, EPS QoS, TAI
//! and the cause values. Buffers that are structurally broken yield decode
//! errors; IEs that merely carry an unexpected identity type yield `None`.

use crate::error::messages;
use crate::identity::guti::{decode_plmn, Guti4g};
use crate::nas::types::{MobileIdentityType, NasPdnType};
use std::io;

/// One decoded Mobile Identity IE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MobileIdentity {
    Imsi(String),
    Imei(String),
    Imeisv(String),
    Tmsi(u32),
    Guti(Guti4g),
    None,
}

/// Tracking Area Identity (PLMN + TAC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tai {
    pub mcc: String,
    pub mnc: String,
    pub tac: u16,
}

impl Tai {
    pub fn to_display_string(&self) -> String {
        format!("{}{}-{}", self.mcc, self.mnc, self.tac)
    }
}

/// Decodes TBCD digits (low nibble first), stopping at the 0xF filler.
///
/// A non-digit, non-filler nibble is a decode error.
pub fn decode_tbcd_digits(data: &[u8]) -> Result<String, io::Error> {
    let mut result = String::with_capacity(data.len() * 2);
    'outer: for byte in data {
        for nibble in [byte & 0x0F, (byte >> 4) & 0x0F] {
            if nibble == 0x0F {
                break 'outer;
            }
            if nibble > 9 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    messages::invalid_bcd_digit("Mobile Identity", nibble),
                ));
            }
            result.push((b'0' + nibble) as char);
        }
    }
    Ok(result)
}

/// Decodes a Mobile Identity IE payload.
///
/// The identity type is in the low 3 bits of the first octet; for digit
/// identities the first digit sits in the high nibble of that same octet.
pub fn parse_mobile_identity(data: &[u8]) -> Result<MobileIdentity, io::Error> {
    if data.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            messages::buffer_too_short("Mobile Identity", 1, 0),
        ));
    }

    match MobileIdentityType::from(data[0]) {
        MobileIdentityType::Imsi => {
            let first_digit = (data[0] >> 4) & 0x0F;
            if first_digit > 9 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    messages::invalid_bcd_digit("IMSI", first_digit),
                ));
            }
            let mut imsi = String::with_capacity(15);
            imsi.push((b'0' + first_digit) as char);
            imsi.push_str(&decode_tbcd_digits(&data[1..])?);
            imsi.truncate(15);
            Ok(MobileIdentity::Imsi(imsi))
        }
        MobileIdentityType::Imei => {
            let first_digit = (data[0] >> 4) & 0x0F;
            let mut imei = String::with_capacity(15);
            if first_digit <= 9 {
                imei.push((b'0' + first_digit) as char);
            }
            imei.push_str(&decode_tbcd_digits(&data[1..])?);
            imei.truncate(15);
            Ok(MobileIdentity::Imei(imei))
        }
        MobileIdentityType::Imeisv => {
            let first_digit = (data[0] >> 4) & 0x0F;
            let mut imeisv = String::with_capacity(16);
            if first_digit <= 9 {
                imeisv.push((b'0' + first_digit) as char);
            }
            imeisv.push_str(&decode_tbcd_digits(&data[1..])?);
            imeisv.truncate(16);
            Ok(MobileIdentity::Imeisv(imeisv))
        }
        MobileIdentityType::Tmsi => {
            if data.len() < 5 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    messages::buffer_too_short("TMSI identity", 5, data.len()),
                ));
            }
            Ok(MobileIdentity::Tmsi(u32::from_be_bytes([
                data[1], data[2], data[3], data[4],
            ])))
        }
        MobileIdentityType::Guti => {
            if data.len() < 11 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    messages::buffer_too_short("GUTI identity", 11, data.len()),
                ));
            }
            let (mcc, mnc) = decode_plmn(&data[1..4]);
            Ok(MobileIdentity::Guti(Guti4g {
                mcc,
                mnc,
                mme_group_id: u16::from_be_bytes([data[4], data[5]]),
                mme_code: data[6],
                m_tmsi: u32::from_be_bytes([data[7], data[8], data[9], data[10]]),
            }))
        }
        _ => Ok(MobileIdentity::None),
    }
}

/// Decodes an APN IE: length-prefixed labels joined by dots (TS 23.003).
pub fn parse_apn(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }

    let mut apn = String::new();
    let mut offset = 0;
    while offset < data.len() {
        let label_len = data[offset] as usize;
        if label_len == 0 || offset + 1 + label_len > data.len() {
            break;
        }
        if !apn.is_empty() {
            apn.push('.');
        }
        match std::str::from_utf8(&data[offset + 1..offset + 1 + label_len]) {
            Ok(label) => apn.push_str(label),
            Err(_) => return None,
        }
        offset += 1 + label_len;
    }

    if apn.is_empty() {
        None
    } else {
        Some(apn)
    }
}

/// Decodes a PDN Address IE into its type and textual address.
pub fn parse_pdn_address(data: &[u8]) -> Option<(NasPdnType, String)> {
    if data.len() < 2 {
        return None;
    }

    let pdn_type = NasPdnType::from(data[0]);
    let address = match pdn_type {
        NasPdnType::Ipv4 | NasPdnType::Ipv4v6 if data.len() >= 5 => {
            format!("{}.{}.{}.{}", data[1], data[2], data[3], data[4])
        }
        NasPdnType::Ipv6 if data.len() >= 9 => {
            // Interface-identifier form: 8 octets of IPv6 prefix.
            let mut parts = Vec::with_capacity(4);
            for chunk in data[1..9].chunks(2) {
                parts.push(format!("{:02x}{:02x}", chunk[0], chunk[1]));
            }
            parts.join(":")
        }
        _ => return None,
    };

    Some((pdn_type, address))
}

/// Decodes an EPS QoS IE, returning the QCI.
///
/// Extended and reserved QCI values are treated as absent.
pub fn parse_eps_qos(data: &[u8]) -> Option<u8> {
    let qci = *data.first()?;
    if qci == 0 || qci > 9 {
        return None;
    }
    Some(qci)
}

/// Decodes a TAI IE (3-byte PLMN + 2-byte TAC).
pub fn parse_tai(data: &[u8]) -> Option<Tai> {
    if data.len() < 5 {
        return None;
    }
    let (mcc, mnc) = decode_plmn(&data[..3]);
    Some(Tai {
        mcc,
        mnc,
        tac: u16::from_be_bytes([data[3], data[4]]),
    })
}
