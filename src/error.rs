//! Error reporting conventions for the correlation engine.
//!
//! Two failure classes exist and they never mix:
//!
//! - A buffer that is structurally broken (truncated GUTI, non-digit BCD
//!   nibble, TLV running past its container) is a decode error. Decode
//!   functions return `Result<_, std::io::Error>` with
//!   [`std::io::ErrorKind::InvalidData`] and a message built from the
//!   templates in [`messages`].
//! - An input that is well-formed bytes but simply not the identifier the
//!   caller hoped for (wrong digit count, MCC out of range, no digits at
//!   all) is not an error; normalisers return `Option::None` and the caller
//!   leaves the field unset.
//!
//! Correlators never propagate either class to their callers: a message
//! that fails to contribute a field is logged at debug level, counted in
//! the correlator's statistics, and ingestion continues.

/// Error message templates shared by the decode paths.
pub mod messages {
    /// Format: "{context} too short: expected at least {expected} bytes, got {actual}"
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_callflow::error::messages;
    ///
    /// let msg = messages::buffer_too_short("GUTI", 11, 7);
    /// assert_eq!(msg, "GUTI too short: expected at least 11 bytes, got 7");
    /// ```
    pub fn buffer_too_short(context: &str, expected: usize, actual: usize) -> String {
        format!(
            "{} too short: expected at least {} bytes, got {}",
            context, expected, actual
        )
    }

    /// Format: "Invalid BCD digit 0x{nibble:X} in {context}"
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_callflow::error::messages;
    ///
    /// let msg = messages::invalid_bcd_digit("IMSI", 0x0B);
    /// assert_eq!(msg, "Invalid BCD digit 0xB in IMSI");
    /// ```
    pub fn invalid_bcd_digit(context: &str, nibble: u8) -> String {
        format!("Invalid BCD digit 0x{:X} in {}", nibble, context)
    }

    /// Format: "{ie_name} IE overruns its container"
    pub fn ie_overrun(ie_name: &str) -> String {
        format!("{} IE overruns its container", ie_name)
    }

    /// Format: "Invalid {field_name} value: {reason}"
    pub fn invalid_value(field_name: &str, reason: &str) -> String {
        format!("Invalid {} value: {}", field_name, reason)
    }

    /// Format: "Invalid UTF-8 in {field_name}"
    pub fn invalid_utf8(field_name: &str) -> String {
        format!("Invalid UTF-8 in {}", field_name)
    }
}
