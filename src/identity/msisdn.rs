//! MSISDN normalisation.
//!
//! Subscriber numbers arrive in wildly different shapes across protocols:
//! SIP URIs (`sip:+14155551234@ims.example.com;user=phone`), TEL URIs
//! (`tel:+1-415-555-1234`), bare national digits with leading zeros, and
//! E.164 with or without `+`. [`NormalizedMsisdn`] carries every comparable
//! form so matching can degrade gracefully from exact international down to
//! a digit-suffix comparison.

use serde::Serialize;

/// Default number of trailing digits for the fuzzy suffix match.
pub const DEFAULT_SUFFIX_DIGITS: usize = 9;

/// Country codes recognised by the longest-prefix scan, 3- then 2- then
/// 1-digit.
const COUNTRY_CODES: &[&str] = &[
    "1",   // North America
    "44",  // United Kingdom
    "49",  // Germany
    "33",  // France
    "81",  // Japan
    "86",  // China
    "91",  // India
    "90",  // Turkey
    "7",   // Russia
    "39",  // Italy
    "34",  // Spain
    "82",  // South Korea
    "61",  // Australia
    "55",  // Brazil
    "52",  // Mexico
    "31",  // Netherlands
    "46",  // Sweden
    "47",  // Norway
    "45",  // Denmark
    "41",  // Switzerland
    "43",  // Austria
    "32",  // Belgium
    "351", // Portugal
    "353", // Ireland
    "358", // Finland
    "420", // Czech Republic
    "421", // Slovakia
    "48",  // Poland
    "30",  // Greece
];

/// An MSISDN reduced to its comparable forms.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct NormalizedMsisdn {
    /// Original input, untouched.
    pub raw: String,
    /// Every digit of the input, in order.
    pub digits_only: String,
    /// National form: country code and leading zeros stripped.
    pub national: String,
    /// International (E.164) form, without `+`.
    pub international: String,
    /// Detected country code, empty when none matched.
    pub country_code: String,
}

impl NormalizedMsisdn {
    /// True when normalisation found no digits at all.
    pub fn is_empty(&self) -> bool {
        self.digits_only.is_empty()
    }

    /// Fuzzy equality with the default 9-digit suffix rule.
    pub fn matches(&self, other: &NormalizedMsisdn) -> bool {
        matches(self, other, DEFAULT_SUFFIX_DIGITS)
    }
}

/// Normalises an MSISDN from any of the supported wire shapes.
///
/// Never fails: input without digits yields an empty [`NormalizedMsisdn`]
/// (check [`NormalizedMsisdn::is_empty`]).
///
/// # Examples
///
/// ```rust
/// use rs_callflow::identity::msisdn;
///
/// let a = msisdn::normalize("sip:+14155551234@ims.example.com;user=phone");
/// let b = msisdn::normalize("tel:+1-415-555-1234");
/// assert_eq!(a.international, "14155551234");
/// assert_eq!(a.country_code, "1");
/// assert_eq!(a.national, "4155551234");
/// assert!(msisdn::matches(&a, &b, 9));
/// ```
pub fn normalize(input: &str) -> NormalizedMsisdn {
    if input.starts_with("sip:") || input.starts_with("sips:") {
        if let Some(parsed) = from_sip_uri(input) {
            return parsed;
        }
    }
    if input.starts_with("tel:") {
        if let Some(parsed) = from_tel_uri(input) {
            return parsed;
        }
    }

    let working = input.strip_prefix("msisdn-").unwrap_or(input);
    let digits = extract_digits(working);
    let has_plus = input.contains('+');
    build(input, digits, has_plus)
}

/// Extracts an MSISDN from a SIP or SIPS URI.
///
/// Returns `None` when the user part carries no digits (e.g. an alphanumeric
/// IMS identity).
pub fn from_sip_uri(uri: &str) -> Option<NormalizedMsisdn> {
    let mut working = uri;
    if let Some(rest) = working.strip_prefix("sips:") {
        working = rest;
    } else if let Some(rest) = working.strip_prefix("sip:") {
        working = rest;
    }

    // Drop the host part and any URI parameters.
    if let Some(at) = working.find('@') {
        working = &working[..at];
    }
    working = strip_uri_parameters(working);

    let cleaned = remove_separators(working);
    let digits = extract_digits(&cleaned);
    if digits.is_empty() {
        return None;
    }

    let has_plus = uri.contains('+');
    Some(build(uri, digits, has_plus))
}

/// Extracts an MSISDN from a TEL URI.
pub fn from_tel_uri(uri: &str) -> Option<NormalizedMsisdn> {
    let mut working = uri;
    if let Some(rest) = working.strip_prefix("tel:") {
        working = rest;
    }
    working = strip_uri_parameters(working);

    let cleaned = remove_separators(working);
    let digits = extract_digits(&cleaned);
    if digits.is_empty() {
        return None;
    }

    // tel: URIs with + are always international.
    let has_plus = uri.contains('+');
    Some(build(uri, digits, has_plus))
}

/// Fuzzy MSISDN comparison.
///
/// Matches when the national forms are equal, the international forms are
/// equal, the last `suffix_digits` digits agree, or one national form
/// contains the other (both longer than 6 digits).
pub fn matches(m1: &NormalizedMsisdn, m2: &NormalizedMsisdn, suffix_digits: usize) -> bool {
    if !m1.national.is_empty() && !m2.national.is_empty() && m1.national == m2.national {
        return true;
    }
    if !m1.international.is_empty()
        && !m2.international.is_empty()
        && m1.international == m2.international
    {
        return true;
    }

    if m1.digits_only.len() >= suffix_digits && m2.digits_only.len() >= suffix_digits {
        let s1 = &m1.digits_only[m1.digits_only.len() - suffix_digits..];
        let s2 = &m2.digits_only[m2.digits_only.len() - suffix_digits..];
        if s1 == s2 {
            return true;
        }
    }

    // Partial containment for numbers captured with differing prefixes.
    if m1.national.len() > 6 && m2.national.len() > 6 {
        if m1.national.contains(m2.national.as_str()) || m2.national.contains(m1.national.as_str())
        {
            return true;
        }
    }

    false
}

/// Convenience form: normalises `raw` and compares against `normalized`.
pub fn matches_raw(raw: &str, normalized: &NormalizedMsisdn, suffix_digits: usize) -> bool {
    matches(&normalize(raw), normalized, suffix_digits)
}

fn build(raw: &str, digits: String, has_plus: bool) -> NormalizedMsisdn {
    let mut result = NormalizedMsisdn {
        raw: raw.to_string(),
        digits_only: digits,
        ..Default::default()
    };

    if result.digits_only.is_empty() {
        return result;
    }

    // A + prefix or a run longer than 10 digits means international form.
    if has_plus || result.digits_only.len() > 10 {
        result.country_code = detect_country_code(&result.digits_only);
        result.international = result.digits_only.clone();
        if result.country_code.is_empty() {
            result.national = strip_leading_zeros(&result.digits_only);
        } else {
            result.national =
                strip_leading_zeros(&result.digits_only[result.country_code.len()..]);
        }
    } else {
        result.national = strip_leading_zeros(&result.digits_only);
        result.international = result.digits_only.clone();
    }

    result
}

fn extract_digits(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn remove_separators(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '-' | '.' | '(' | ')' | ' '))
        .collect()
}

fn strip_leading_zeros(input: &str) -> String {
    let stripped = input.trim_start_matches('0');
    if stripped.is_empty() && !input.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

fn detect_country_code(digits: &str) -> String {
    for len in (1..=3).rev() {
        if digits.len() > len {
            let prefix = &digits[..len];
            if COUNTRY_CODES.contains(&prefix) {
                return prefix.to_string();
            }
        }
    }
    String::new()
}

fn strip_uri_parameters(uri: &str) -> &str {
    match uri.find(';') {
        Some(pos) => &uri[..pos],
        None => uri,
    }
}
