//! Signature algorithm and verification for gateway callbacks.
//!
//! Every callback delivered by the payment processor carries an
//! HMAC-SHA256 signature in the following header:
//!
//! ```text
//! Subcoord-Gateway-Signature: {unix_timestamp}.{base64_signature}
//! ```
//!
//! The signed data is `"{timestamp}.{raw_json_body}"` and the key is the
//! callback secret shared with the processor. The raw body is signed as-is,
//! so verification happens before the payload is deserialized.

/// Header name for the callback HMAC signature.
pub const SIGNATURE_HEADER: &str = "Subcoord-Gateway-Signature";

/// Default maximum distance between the signature timestamp and now (seconds).
pub const DEFAULT_SIGNATURE_TOLERANCE: i64 = 5 * 60;

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature timestamp outside the accepted window")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

// ---------------------------------------------------------------------------
// Raw body signing
// ---------------------------------------------------------------------------

/// Sign a raw body and return the header value.
pub fn sign_raw(timestamp: i64, raw_body: &[u8], key: &[u8]) -> String {
    format_signature_header(timestamp, &hmac(timestamp, raw_body, key))
}

/// Verify a raw body against a header value at `now` (unix seconds).
///
/// Runs on every inbound callback, before any attempt to interpret the
/// body.
pub fn verify_raw_at(
    header_value: &str,
    raw_body: &[u8],
    key: &[u8],
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let (timestamp, signature) = parse_signature_header(header_value)?;
    verify_parts(timestamp, &signature, raw_body, key, tolerance_secs, now)
}

fn verify_parts(
    timestamp: i64,
    signature: &[u8],
    raw_body: &[u8],
    key: &[u8],
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    ring::hmac::verify(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        &signed_data(timestamp, raw_body),
        signature,
    )?;
    check_timestamp(timestamp, now, tolerance_secs)
}

fn signed_data(timestamp: i64, raw_body: &[u8]) -> Vec<u8> {
    let mut data = format!("{timestamp}.").into_bytes();
    data.extend_from_slice(raw_body);
    data
}

fn hmac(timestamp: i64, raw_body: &[u8], key: &[u8]) -> Box<[u8]> {
    let tag = ring::hmac::sign(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        &signed_data(timestamp, raw_body),
    );
    tag.as_ref().to_owned().into_boxed_slice()
}

// ---------------------------------------------------------------------------
// Header parsing / formatting
// ---------------------------------------------------------------------------

/// Parse a signature header value (`{timestamp}.{base64}`) into
/// `(timestamp, raw_signature_bytes)`.
pub fn parse_signature_header(value: &str) -> Result<(i64, Box<[u8]>), SignatureError> {
    let (timestamp, encoded) = value
        .trim()
        .split_once('.')
        .ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidFormat)?;
    let signature_bytes = fast32::base64::RFC4648_NOPAD
        .decode_str(encoded)
        .map_err(|_| SignatureError::InvalidBase64)?
        .into_boxed_slice();
    Ok((timestamp, signature_bytes))
}

/// Format a `{timestamp}.{base64}` header value from its parts.
pub fn format_signature_header(timestamp: i64, signature: &[u8]) -> String {
    format!(
        "{}.{}",
        timestamp,
        fast32::base64::RFC4648_NOPAD.encode(signature)
    )
}

/// Check that a signature timestamp lies within `tolerance_secs` of `now`,
/// in either direction.
pub fn check_timestamp(timestamp: i64, now: i64, tolerance_secs: i64) -> Result<(), SignatureError> {
    if (now - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }
    Ok(())
}
