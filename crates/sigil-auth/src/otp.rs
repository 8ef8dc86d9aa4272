//! One-time code generation and verification.
//!
//! Randomly generated codes travel as a self-describing hash envelope
//! stored in the pre-authorized token, so verification needs no
//! database round-trip. TOTP codes verify against the user's shared
//! secret per RFC 6238.

use std::time::Duration;

use chrono::Utc;
use totp_rs::{Algorithm, Secret, TOTP};

use sigil_core::{DeliveryMethod, Error, Result};

use crate::crypto;

/// Length of randomly generated one-time codes.
pub const CODE_LEN: usize = 6;

/// Parsed form of the OTP hash envelope
/// `<hex-sha512>:<unix-expires>:<address>:<method>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpEnvelope {
    pub digest: String,
    pub expires_at: i64,
    pub address: String,
    pub method: DeliveryMethod,
}

impl OtpEnvelope {
    /// Parse an envelope string. The address segment may itself
    /// contain colons (e.g. some email local parts), so the method is
    /// taken from the tail and the address re-joined from the middle.
    pub fn parse(envelope: &str) -> Result<Self> {
        let parts: Vec<&str> = envelope.split(':').collect();
        if parts.len() < 4 {
            return Err(Error::invalid_field("code", "invalid code format"));
        }

        let digest = parts[0].to_string();
        let expires_at: i64 = parts[1]
            .parse()
            .map_err(|_| Error::invalid_field("code", "invalid code format"))?;
        let method: DeliveryMethod = parts[parts.len() - 1]
            .parse()
            .map_err(|_| Error::invalid_field("code", "invalid code format"))?;
        let address = parts[2..parts.len() - 1].join(":");

        if digest.is_empty() || address.is_empty() {
            return Err(Error::invalid_field("code", "invalid code format"));
        }

        Ok(OtpEnvelope {
            digest,
            expires_at,
            address,
            method,
        })
    }
}

impl std::fmt::Display for OtpEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.digest, self.expires_at, self.address, self.method
        )
    }
}

/// Generate a random code for an address and delivery method.
/// Returns `(code, envelope)`.
pub fn otp_code(address: &str, method: DeliveryMethod, ttl: Duration) -> Result<(String, String)> {
    if address.is_empty() {
        return Err(Error::invalid_field("address", "delivery address is not valid"));
    }

    let code = crypto::random_digits(CODE_LEN)?;
    let envelope = OtpEnvelope {
        digest: crypto::hash(&code),
        expires_at: Utc::now().timestamp() + ttl.as_secs() as i64,
        address: address.to_string(),
        method,
    };

    Ok((code, envelope.to_string()))
}

/// Validate a submitted code against a hash envelope. Any mismatch,
/// malformation, or expiry fails with the same `invalid_field` error.
pub fn validate_otp(code: &str, envelope: &str) -> Result<()> {
    let parsed = OtpEnvelope::parse(envelope)?;

    if Utc::now().timestamp() >= parsed.expires_at {
        return Err(Error::invalid_field("code", "code is expired"));
    }

    if !crypto::hash_eq(code, &parsed.digest) {
        return Err(Error::invalid_field("code", "incorrect code provided"));
    }

    Ok(())
}

fn totp_instance(secret: Vec<u8>, issuer: &str, account: &str) -> Result<TOTP> {
    TOTP::new(
        Algorithm::SHA1, // RFC 6238 default
        6,               // digits
        1,               // skew (±1 step)
        30,              // step seconds
        secret,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| Error::Crypto(format!("TOTP init: {e}")))
}

/// Verify a TOTP code against a raw shared secret.
pub fn verify_totp(secret: &[u8], code: &str, issuer: &str, account: &str) -> Result<bool> {
    let totp = totp_instance(secret.to_vec(), issuer, account)?;
    totp.check_current(code)
        .map_err(|e| Error::Crypto(format!("TOTP check: {e}")))
}

/// Generate a TOTP enrollment: raw secret bytes, the base32 form for
/// manual entry, and the `otpauth://` URI for QR code generation.
pub fn totp_enrollment(issuer: &str, account: &str) -> Result<(Vec<u8>, String, String)> {
    let secret = Secret::generate_secret();
    let secret_bytes = secret
        .to_bytes()
        .map_err(|e| Error::Crypto(format!("secret bytes: {e}")))?;

    let totp = totp_instance(secret_bytes.clone(), issuer, account)?;
    let base32 = secret.to_encoded().to_string();
    let uri = totp.get_url();

    Ok((secret_bytes, base32, uri))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_and_envelope_roundtrip() {
        let (code, envelope) =
            otp_code("jane@example.com", DeliveryMethod::Email, Duration::from_secs(300)).unwrap();

        assert_eq!(code.len(), CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        validate_otp(&code, &envelope).unwrap();
    }

    #[test]
    fn envelope_parse_recovers_fields() {
        let (_, envelope) =
            otp_code("+15555550100", DeliveryMethod::Phone, Duration::from_secs(300)).unwrap();

        let parsed = OtpEnvelope::parse(&envelope).unwrap();
        assert_eq!(parsed.address, "+15555550100");
        assert_eq!(parsed.method, DeliveryMethod::Phone);
        assert_eq!(parsed.digest.len(), 128);
        assert!(parsed.expires_at > Utc::now().timestamp());
        assert_eq!(parsed.to_string(), envelope);
    }

    #[test]
    fn mutated_code_fails() {
        let (code, envelope) =
            otp_code("jane@example.com", DeliveryMethod::Email, Duration::from_secs(300)).unwrap();

        // Flip one digit of the code.
        let mut chars: Vec<char> = code.chars().collect();
        chars[0] = if chars[0] == '9' { '0' } else { '9' };
        let wrong: String = chars.into_iter().collect();

        let err = validate_otp(&wrong, &envelope).unwrap_err();
        assert!(matches!(err, Error::InvalidField { .. }));
    }

    #[test]
    fn expired_envelope_fails() {
        let envelope = OtpEnvelope {
            digest: crypto::hash("123456"),
            expires_at: Utc::now().timestamp() - 1,
            address: "jane@example.com".into(),
            method: DeliveryMethod::Email,
        };

        let err = validate_otp("123456", &envelope.to_string()).unwrap_err();
        assert!(matches!(err, Error::InvalidField { .. }));
    }

    #[test]
    fn malformed_envelope_fails() {
        assert!(validate_otp("123456", "not-an-envelope").is_err());
        assert!(validate_otp("123456", "digest:nan:addr:email").is_err());
        assert!(validate_otp("123456", "digest:0:addr:carrier-pigeon").is_err());
    }

    #[test]
    fn totp_roundtrip() {
        let (secret, base32, uri) = totp_enrollment("SIGIL", "jane@example.com").unwrap();
        assert!(!base32.is_empty());
        assert!(uri.starts_with("otpauth://totp/"));

        let totp = totp_instance(secret.clone(), "SIGIL", "jane@example.com").unwrap();
        let code = totp.generate_current().unwrap();
        assert!(verify_totp(&secret, &code, "SIGIL", "jane@example.com").unwrap());
        assert!(!verify_totp(&secret, "000000", "SIGIL", "jane@example.com").unwrap());
    }
}
