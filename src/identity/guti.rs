//! GUTI parsing and encoding for 4G (TS 24.301) and 5G (TS 24.501).
//!
//! Both generations fit the same 11-byte layout: a 3-byte BCD PLMN followed
//! by the serving-node identifiers and a 32-bit temporary id, padded with a
//! trailing 0xFF byte. The MNC-digit-3 nibble is 0xF for 2-digit MNCs.
//!
//! The 5G set-id/pointer field follows TS 24.501 §9.11.3.4: the 16 bits
//! after the AMF region id carry the AMF set id in the top 10 bits and the
//! AMF pointer in the low 6.

use crate::error::messages;
use serde::Serialize;
use std::fmt;
use std::io;

/// Encoded length of a GUTI (including the padding byte).
pub const GUTI_LEN: usize = 11;

/// A 4G GUTI: PLMN + MME group/code + M-TMSI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Guti4g {
    pub mcc: String,
    pub mnc: String,
    pub mme_group_id: u16,
    pub mme_code: u8,
    pub m_tmsi: u32,
}

impl Guti4g {
    /// Parses an 11-byte GUTI buffer.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rs_callflow::identity::guti::Guti4g;
    ///
    /// let data = [0x13, 0x00, 0x62, 0x00, 0x01, 0x02, 0x12, 0x34, 0x56, 0x78, 0xFF];
    /// let guti = Guti4g::unmarshal(&data).unwrap();
    /// assert_eq!(guti.mcc, "310");
    /// assert_eq!(guti.mnc, "260");
    /// assert_eq!(guti.mme_group_id, 1);
    /// assert_eq!(guti.mme_code, 2);
    /// assert_eq!(guti.m_tmsi, 0x12345678);
    /// ```
    pub fn unmarshal(data: &[u8]) -> Result<Self, io::Error> {
        if data.len() < GUTI_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                messages::buffer_too_short("GUTI", GUTI_LEN, data.len()),
            ));
        }

        let (mcc, mnc) = decode_plmn(&data[..3]);
        Ok(Guti4g {
            mcc,
            mnc,
            mme_group_id: u16::from_be_bytes([data[3], data[4]]),
            mme_code: data[5],
            m_tmsi: u32::from_be_bytes([data[6], data[7], data[8], data[9]]),
        })
    }

    /// Encodes into the 11-byte wire layout (padding byte 0xFF).
    pub fn marshal(&self) -> [u8; GUTI_LEN] {
        let mut out = [0u8; GUTI_LEN];
        encode_plmn(&self.mcc, &self.mnc, &mut out[..3]);
        out[3..5].copy_from_slice(&self.mme_group_id.to_be_bytes());
        out[5] = self.mme_code;
        out[6..10].copy_from_slice(&self.m_tmsi.to_be_bytes());
        out[10] = 0xFF;
        out
    }

    /// Parses from a hex string (spaces and colons tolerated).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let bytes = hex_to_bytes(hex)?;
        if bytes.len() != GUTI_LEN {
            return None;
        }
        Self::unmarshal(&bytes).ok()
    }

    /// True when both GUTIs point into the same MME pool (same PLMN and
    /// MME group id); the M-TMSI is ignored.
    pub fn same_mme_pool(&self, other: &Guti4g) -> bool {
        self.mcc == other.mcc && self.mnc == other.mnc && self.mme_group_id == other.mme_group_id
    }

    /// Index form used by the subscriber context manager:
    /// `MCC + MNC + hex(M-TMSI)`.
    pub fn index_key(&self) -> String {
        format!("{}{}-{:x}", self.mcc, self.mnc, self.m_tmsi)
    }
}

impl fmt::Display for Guti4g {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GUTI{{MCC={},MNC={},MME-GID={},MME-CODE={},M-TMSI=0x{:08x}}}",
            self.mcc, self.mnc, self.mme_group_id, self.mme_code, self.m_tmsi
        )
    }
}

/// A 5G-GUTI: PLMN + AMF region/set/pointer + 5G-TMSI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Guti5g {
    pub mcc: String,
    pub mnc: String,
    pub amf_region_id: u8,
    /// 10 bits.
    pub amf_set_id: u16,
    /// 6 bits.
    pub amf_pointer: u8,
    pub tmsi_5g: u32,
}

impl Guti5g {
    /// Parses an 11-byte 5G-GUTI buffer.
    pub fn unmarshal(data: &[u8]) -> Result<Self, io::Error> {
        if data.len() < GUTI_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                messages::buffer_too_short("5G-GUTI", GUTI_LEN, data.len()),
            ));
        }

        let (mcc, mnc) = decode_plmn(&data[..3]);
        let amf_field = u16::from_be_bytes([data[4], data[5]]);
        Ok(Guti5g {
            mcc,
            mnc,
            amf_region_id: data[3],
            amf_set_id: (amf_field >> 6) & 0x3FF,
            amf_pointer: (amf_field & 0x3F) as u8,
            tmsi_5g: u32::from_be_bytes([data[6], data[7], data[8], data[9]]),
        })
    }

    /// Encodes into the 11-byte wire layout (padding byte 0xFF).
    pub fn marshal(&self) -> [u8; GUTI_LEN] {
        let mut out = [0u8; GUTI_LEN];
        encode_plmn(&self.mcc, &self.mnc, &mut out[..3]);
        out[3] = self.amf_region_id;
        let amf_field = ((self.amf_set_id & 0x3FF) << 6) | (self.amf_pointer & 0x3F) as u16;
        out[4..6].copy_from_slice(&amf_field.to_be_bytes());
        out[6..10].copy_from_slice(&self.tmsi_5g.to_be_bytes());
        out[10] = 0xFF;
        out
    }

    /// Parses from a hex string (spaces and colons tolerated).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let bytes = hex_to_bytes(hex)?;
        if bytes.len() != GUTI_LEN {
            return None;
        }
        Self::unmarshal(&bytes).ok()
    }

    /// True when both GUTIs point into the same AMF set (same PLMN, region
    /// and set id); the 5G-TMSI is ignored.
    pub fn same_amf_set(&self, other: &Guti5g) -> bool {
        self.mcc == other.mcc
            && self.mnc == other.mnc
            && self.amf_region_id == other.amf_region_id
            && self.amf_set_id == other.amf_set_id
    }
}

impl fmt::Display for Guti5g {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "5G-GUTI{{MCC={},MNC={},AMF-REGION={},AMF-SET={},AMF-PTR={},5G-TMSI=0x{:08x}}}",
            self.mcc, self.mnc, self.amf_region_id, self.amf_set_id, self.amf_pointer, self.tmsi_5g
        )
    }
}

/// Decodes the 3-byte BCD PLMN used by GUTI, TAI and Mobile Identity IEs.
///
/// Layout: byte 0 = MCC2|MCC1, byte 1 = MNC3|MCC3 (MNC3 = 0xF for 2-digit
/// MNCs), byte 2 = MNC2|MNC1.
pub fn decode_plmn(data: &[u8]) -> (String, String) {
    let mut mcc = String::with_capacity(3);
    mcc.push((b'0' + (data[0] & 0x0F)) as char);
    mcc.push((b'0' + ((data[0] >> 4) & 0x0F)) as char);
    mcc.push((b'0' + (data[1] & 0x0F)) as char);

    let mut mnc = String::with_capacity(3);
    mnc.push((b'0' + (data[2] & 0x0F)) as char);
    mnc.push((b'0' + ((data[2] >> 4) & 0x0F)) as char);
    let mnc3 = (data[1] >> 4) & 0x0F;
    if mnc3 != 0x0F {
        mnc.push((b'0' + mnc3) as char);
    }

    (mcc, mnc)
}

/// Encodes a PLMN into the 3-byte BCD layout. Invalid digit counts produce
/// 0xFF filler so a bad PLMN stays visibly bad on the wire.
pub fn encode_plmn(mcc: &str, mnc: &str, out: &mut [u8]) {
    let m = mcc.as_bytes();
    if m.len() != 3 {
        out[0] = 0xFF;
        out[1] = 0xFF;
        out[2] = 0xFF;
        return;
    }

    out[0] = ((m[1] - b'0') << 4) | (m[0] - b'0');
    out[1] = m[2] - b'0';

    let n = mnc.as_bytes();
    match n.len() {
        2 => {
            out[1] |= 0xF0;
            out[2] = ((n[1] - b'0') << 4) | (n[0] - b'0');
        }
        3 => {
            out[1] |= (n[2] - b'0') << 4;
            out[2] = ((n[1] - b'0') << 4) | (n[0] - b'0');
        }
        _ => {
            out[1] |= 0xF0;
            out[2] = 0xFF;
        }
    }
}

fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    let clean: String = hex.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if clean.len() % 2 != 0 {
        return None;
    }
    (0..clean.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&clean[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // MCC=310, MNC=260 -> PLMN BCD 13 00 62 (MNC digit 3 shares byte 1).
    const GUTI_4G_BYTES: [u8; 11] = [
        0x13, 0x00, 0x62, 0x00, 0x01, 0x02, 0x12, 0x34, 0x56, 0x78, 0xFF,
    ];

    #[test]
    fn test_guti4g_unmarshal() {
        let guti = Guti4g::unmarshal(&GUTI_4G_BYTES).unwrap();
        assert_eq!(guti.mcc, "310");
        assert_eq!(guti.mnc, "260");
        assert_eq!(guti.mme_group_id, 1);
        assert_eq!(guti.mme_code, 2);
        assert_eq!(guti.m_tmsi, 0x12345678);
    }

    #[test]
    fn test_guti4g_roundtrip() {
        let guti = Guti4g::unmarshal(&GUTI_4G_BYTES).unwrap();
        let encoded = guti.marshal();
        let again = Guti4g::unmarshal(&encoded).unwrap();
        assert_eq!(guti, again);
    }

    #[test]
    fn test_guti4g_roundtrip_two_digit_mnc() {
        let guti = Guti4g {
            mcc: "262".to_string(),
            mnc: "02".to_string(),
            mme_group_id: 0x8001,
            mme_code: 0x11,
            m_tmsi: 0xC0FFEE01,
        };
        let again = Guti4g::unmarshal(&guti.marshal()).unwrap();
        assert_eq!(guti, again);
    }

    #[test]
    fn test_guti4g_too_short() {
        let err = Guti4g::unmarshal(&GUTI_4G_BYTES[..7]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_guti4g_from_hex() {
        let guti = Guti4g::from_hex("13 00 62 00 01 02 12 34 56 78 ff").unwrap();
        assert_eq!(guti.m_tmsi, 0x12345678);
        assert!(Guti4g::from_hex("1302").is_none());
    }

    #[test]
    fn test_guti4g_same_mme_pool() {
        let a = Guti4g::unmarshal(&GUTI_4G_BYTES).unwrap();
        let mut b = a.clone();
        b.m_tmsi = 0xAAAAAAAA;
        assert!(a.same_mme_pool(&b));

        b.mme_group_id = 2;
        assert!(!a.same_mme_pool(&b));
    }

    #[test]
    fn test_guti4g_display() {
        let guti = Guti4g::unmarshal(&GUTI_4G_BYTES).unwrap();
        assert_eq!(
            format!("{}", guti),
            "GUTI{MCC=310,MNC=260,MME-GID=1,MME-CODE=2,M-TMSI=0x12345678}"
        );
    }

    #[test]
    fn test_guti5g_unmarshal() {
        let data = [
            0x13, 0x00, 0x62, 0x05, 0x02, 0x20, 0xAB, 0xCD, 0xEF, 0x01, 0xFF,
        ];
        let guti = Guti5g::unmarshal(&data).unwrap();
        assert_eq!(guti.mcc, "310");
        assert_eq!(guti.mnc, "260");
        assert_eq!(guti.amf_region_id, 5);
        // 0x0220: top 10 bits = 8, low 6 bits = 32 per TS 24.501.
        assert_eq!(guti.amf_set_id, 8);
        assert_eq!(guti.amf_pointer, 32);
        assert_eq!(guti.tmsi_5g, 0xABCDEF01);
    }

    #[test]
    fn test_guti5g_roundtrip() {
        let guti = Guti5g {
            mcc: "310".to_string(),
            mnc: "260".to_string(),
            amf_region_id: 128,
            amf_set_id: 0x3FF,
            amf_pointer: 0x3F,
            tmsi_5g: 0xDEADBEEF,
        };
        let again = Guti5g::unmarshal(&guti.marshal()).unwrap();
        assert_eq!(guti, again);
    }

    #[test]
    fn test_guti5g_same_amf_set() {
        let a = Guti5g {
            mcc: "310".to_string(),
            mnc: "260".to_string(),
            amf_region_id: 1,
            amf_set_id: 10,
            amf_pointer: 2,
            tmsi_5g: 1,
        };
        let mut b = a.clone();
        b.tmsi_5g = 2;
        b.amf_pointer = 5;
        assert!(a.same_amf_set(&b));

        b.amf_set_id = 11;
        assert!(!a.same_amf_set(&b));
    }

    #[test]
    fn test_plmn_roundtrip_three_digit_mnc() {
        let mut buf = [0u8; 3];
        encode_plmn("310", "260", &mut buf);
        let (mcc, mnc) = decode_plmn(&buf);
        assert_eq!(mcc, "310");
        assert_eq!(mnc, "260");
    }

    #[test]
    fn test_plmn_roundtrip_two_digit_mnc() {
        let mut buf = [0u8; 3];
        encode_plmn("262", "02", &mut buf);
        let (mcc, mnc) = decode_plmn(&buf);
        assert_eq!(mcc, "262");
        assert_eq!(mnc, "02");
    }
}
