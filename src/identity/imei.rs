//! IMEI / IMEISV normalisation.
//!
//! Accepts the 14-digit body, the 15-digit form with a Luhn check digit, and
//! the 16-digit IMEISV, with optional `imei-`/`imei:`/`imeisv-`/`imeisv:`
//! prefixes or TBCD encoding. A failed check digit does not reject the
//! value; it is kept and flagged, since captures routinely carry equipment
//! identities with miscomputed or zeroed check digits.

use serde::Serialize;

/// A normalised equipment identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedImei {
    /// Original input, untouched.
    pub raw: String,
    /// 14-digit IMEI body (no check digit).
    pub imei: String,
    /// Full 16-digit IMEISV when the input carried one.
    pub imeisv: Option<String>,
    /// Type Allocation Code, first 8 digits.
    pub tac: String,
    /// Serial number, digits 9-14.
    pub snr: String,
    /// False when a 15-digit input failed Luhn verification.
    pub check_digit_ok: bool,
}

/// Normalises an IMEI/IMEISV from its textual shapes.
///
/// Returns `None` when the digit count is not 14, 15 or 16.
///
/// # Examples
///
/// ```rust
/// use rs_callflow::identity::imei;
///
/// let e = imei::normalize("49015420323751").unwrap();
/// assert_eq!(e.tac, "49015420");
/// assert_eq!(e.snr, "323751");
/// assert!(e.check_digit_ok);
/// ```
pub fn normalize(input: &str) -> Option<NormalizedImei> {
    if input.is_empty() {
        return None;
    }

    let working = strip_prefix(input);
    let digits: String = working.chars().filter(|c| c.is_ascii_digit()).collect();

    let (body, imeisv, check_ok) = match digits.len() {
        14 => (digits, None, true),
        15 => {
            let ok = verify_check_digit(&digits);
            (digits[..14].to_string(), None, ok)
        }
        16 => (digits[..14].to_string(), Some(digits), true),
        _ => return None,
    };

    Some(NormalizedImei {
        raw: input.to_string(),
        tac: body[..8].to_string(),
        snr: body[8..14].to_string(),
        imei: body,
        imeisv,
        check_digit_ok: check_ok,
    })
}

/// Decodes a TBCD-encoded IMEI/IMEISV buffer (low nibble first, 0xF filler).
pub fn from_bcd(data: &[u8]) -> Option<NormalizedImei> {
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

    if !(14..=16).contains(&digits.len()) {
        return None;
    }
    normalize(&digits)
}

/// Computes the Luhn check digit over a 14-digit IMEI body.
///
/// Returns `None` for any other length.
pub fn calculate_check_digit(imei: &str) -> Option<u8> {
    if imei.len() != 14 || !imei.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut sum = 0u32;
    for (i, c) in imei.chars().enumerate() {
        let mut digit = c.to_digit(10).unwrap_or(0);
        if i % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }

    Some(((10 - (sum % 10)) % 10) as u8)
}

/// Verifies the check digit of a 15-digit IMEI.
pub fn verify_check_digit(imei: &str) -> bool {
    if imei.len() != 15 {
        return false;
    }
    let expected = match calculate_check_digit(&imei[..14]) {
        Some(d) => d,
        None => return false,
    };
    imei.as_bytes()[14] - b'0' == expected
}

fn strip_prefix(input: &str) -> &str {
    input
        .strip_prefix("imeisv-")
        .or_else(|| input.strip_prefix("imeisv:"))
        .or_else(|| input.strip_prefix("imei-"))
        .or_else(|| input.strip_prefix("imei:"))
        .or_else(|| input.strip_prefix("IMEI"))
        .unwrap_or(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_fourteen_digits() {
        let e = normalize("49015420323751").unwrap();
        assert_eq!(e.imei, "49015420323751");
        assert_eq!(e.tac, "49015420");
        assert_eq!(e.snr, "323751");
        assert!(e.imeisv.is_none());
        assert!(e.check_digit_ok);
    }

    #[test]
    fn test_normalize_fifteen_digits_valid_check() {
        let check = calculate_check_digit("49015420323751").unwrap();
        let full = format!("49015420323751{}", check);
        let e = normalize(&full).unwrap();
        assert_eq!(e.imei, "49015420323751");
        assert!(e.check_digit_ok);
    }

    #[test]
    fn test_normalize_fifteen_digits_bad_check_flagged() {
        let check = calculate_check_digit("49015420323751").unwrap();
        let wrong = (check + 1) % 10;
        let full = format!("49015420323751{}", wrong);
        let e = normalize(&full).unwrap();
        // Accepted, but flagged.
        assert_eq!(e.imei, "49015420323751");
        assert!(!e.check_digit_ok);
    }

    #[test]
    fn test_normalize_imeisv() {
        let e = normalize("4901542032375101").unwrap();
        assert_eq!(e.imei, "49015420323751");
        assert_eq!(e.imeisv.as_deref(), Some("4901542032375101"));
    }

    #[test]
    fn test_normalize_prefixes() {
        assert!(normalize("imei-49015420323751").is_some());
        assert!(normalize("imeisv:4901542032375101").is_some());
    }

    #[test]
    fn test_normalize_rejects_wrong_length() {
        assert!(normalize("4901542032375").is_none());
        assert!(normalize("49015420323751012").is_none());
        assert!(normalize("").is_none());
    }

    #[test]
    fn test_luhn_roundtrip() {
        // A body plus its computed check digit always verifies.
        for body in ["49015420323751", "35875507001234", "01326200012345"] {
            let check = calculate_check_digit(body).unwrap();
            let full = format!("{}{}", body, check);
            assert!(verify_check_digit(&full), "{}", full);
        }
    }

    #[test]
    fn test_from_bcd() {
        // 49015420323751 in TBCD, low nibble first, trailing filler.
        let bcd = [0x94, 0x10, 0x45, 0x02, 0x23, 0x73, 0x15, 0xFF];
        let e = from_bcd(&bcd).unwrap();
        assert_eq!(e.imei, "49015420323751");
    }

    #[test]
    fn test_from_bcd_invalid() {
        assert!(from_bcd(&[0x9C, 0x10]).is_none());
        assert!(from_bcd(&[]).is_none());
    }
}
