//! IMSI normalisation.
//!
//! Accepts plain 15-digit strings, `imsi-`/`imsi:` prefixed forms, Diameter
//! User-Name values (`IMSI@realm`) and TBCD byte buffers as carried in GTP
//! and NAS IEs. The MNC split is decided by an MCC table: North-American and
//! Caribbean PLMNs use 3-digit MNCs, everything else defaults to 2.

use serde::Serialize;

/// MCCs whose networks allocate 3-digit MNCs. All other MCCs default to 2.
const THREE_DIGIT_MNC_MCCS: &[&str] = &[
    "302", // Canada
    "310", // USA
    "311", // USA
    "312", // USA
    "313", // USA
    "316", // USA
    "334", // Mexico
    "338", // Jamaica
    "342", // Barbados
    "344", // Antigua and Barbuda
    "346", // Cayman Islands
    "348", // British Virgin Islands
    "350", // Bermuda
    "352", // Grenada
    "354", // Montserrat
    "356", // Saint Kitts and Nevis
    "358", // Saint Lucia
    "360", // Saint Vincent and the Grenadines
    "362", // Bonaire, Sint Eustatius and Saba
    "363", // Aruba
    "364", // Bahamas
    "365", // Anguilla
    "366", // Dominica
    "368", // Cuba
    "370", // Dominican Republic
    "372", // Haiti
    "374", // Trinidad and Tobago
    "376", // Turks and Caicos Islands
    "732", // Colombia
];

/// A validated 15-digit IMSI with its PLMN split out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedImsi {
    /// Original input, untouched.
    pub raw: String,
    /// Canonical 15 digits.
    pub digits: String,
    /// Mobile Country Code, 3 digits.
    pub mcc: String,
    /// Mobile Network Code, 2 or 3 digits.
    pub mnc: String,
    /// Mobile Subscriber Identification Number (the remainder).
    pub msin: String,
}

impl NormalizedImsi {
    /// MCC and MNC concatenated.
    pub fn plmn(&self) -> String {
        format!("{}{}", self.mcc, self.mnc)
    }
}

/// Normalises an IMSI from any supported textual shape.
///
/// Returns `None` unless the input reduces to exactly 15 digits with an MCC
/// in [200, 799].
///
/// # Examples
///
/// ```rust
/// use rs_callflow::identity::imsi;
///
/// let i = imsi::normalize("imsi-310260123456789").unwrap();
/// assert_eq!(i.mcc, "310");
/// assert_eq!(i.mnc, "260");
/// assert_eq!(i.msin, "123456789");
/// assert_eq!(i.plmn(), "310260");
/// ```
pub fn normalize(input: &str) -> Option<NormalizedImsi> {
    if input.is_empty() {
        return None;
    }

    let working = strip_prefix(input);

    if working.contains('@') {
        return from_diameter_username(input);
    }

    let digits: String = working.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 15 || !is_valid(&digits) {
        return None;
    }

    let mcc = digits[..3].to_string();
    let mnc_len = mnc_length(&mcc);
    let mnc = digits[3..3 + mnc_len].to_string();
    let msin = digits[3 + mnc_len..].to_string();

    Some(NormalizedImsi {
        raw: input.to_string(),
        digits,
        mcc,
        mnc,
        msin,
    })
}

/// Decodes a TBCD-encoded IMSI buffer (2 digits per byte, low nibble first,
/// 0xF filler terminating the value).
///
/// # Examples
///
/// ```rust
/// use rs_callflow::identity::imsi;
///
/// let bcd = [0x13, 0x20, 0x06, 0x21, 0x43, 0x65, 0x87, 0xF9];
/// let i = imsi::from_bcd(&bcd).unwrap();
/// assert_eq!(i.digits, "310260123456789");
/// assert_eq!(i.mnc, "260");
/// ```
pub fn from_bcd(data: &[u8]) -> Option<NormalizedImsi> {
    if data.is_empty() {
        return None;
    }

    let mut digits = String::with_capacity(data.len() * 2);
    'outer: for byte in data {
        for nibble in [byte & 0x0F, (byte >> 4) & 0x0F] {
            if nibble == 0x0F {
                break 'outer;
            }
            if nibble > 9 {
                return None;
            }
            digits.push((b'0' + nibble) as char);
        }
    }

    if digits.len() != 15 {
        return None;
    }
    normalize(&digits)
}

/// Extracts the IMSI from a Diameter User-Name AVP
/// (`310260123456789@ims.mnc260.mcc310.3gppnetwork.org`).
pub fn from_diameter_username(username: &str) -> Option<NormalizedImsi> {
    match username.find('@') {
        Some(at) => normalize(&username[..at]),
        None => normalize(username),
    }
}

/// Validates the canonical digit form: 15 digits, MCC in [200, 799].
pub fn is_valid(imsi: &str) -> bool {
    if imsi.len() != 15 || !imsi.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    match imsi[..3].parse::<u16>() {
        Ok(mcc) => (200..=799).contains(&mcc),
        Err(_) => false,
    }
}

/// MNC digit count for an MCC: 3 for the listed PLMNs, 2 otherwise.
pub fn mnc_length(mcc: &str) -> usize {
    if THREE_DIGIT_MNC_MCCS.contains(&mcc) {
        3
    } else {
        2
    }
}

fn strip_prefix(input: &str) -> &str {
    input
        .strip_prefix("imsi-")
        .or_else(|| input.strip_prefix("imsi:"))
        .or_else(|| input.strip_prefix("IMSI"))
        .unwrap_or(input)
}
