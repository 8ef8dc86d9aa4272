//! Crypto primitives: random strings, SHA-512 digests, Argon2id
//! password hashing, and AES-256-GCM secret encryption.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::TryRngCore;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

use sigil_core::{Error, Result};

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a cryptographically random alphanumeric string of length
/// `n`. Fails if the OS entropy source is unavailable.
pub fn random_string(n: usize) -> Result<String> {
    let mut bytes = vec![0u8; n];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::internal(format!("entropy source unavailable: {e}")))?;

    Ok(bytes
        .into_iter()
        .map(|b| CHARSET[b as usize % CHARSET.len()] as char)
        .collect())
}

/// Generate a random numeric code of `n` digits.
pub fn random_digits(n: usize) -> Result<String> {
    let mut bytes = vec![0u8; n];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::internal(format!("entropy source unavailable: {e}")))?;

    Ok(bytes.into_iter().map(|b| (b'0' + b % 10) as char).collect())
}

/// Hex-encoded SHA-512 digest of a string.
pub fn hash(s: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of a value against a stored hex SHA-512
/// digest.
pub fn hash_eq(value: &str, hex_digest: &str) -> bool {
    let computed = hash(value);
    computed.as_bytes().ct_eq(hex_digest.as_bytes()).into()
}

/// Password bytes with the optional server-side pepper applied.
fn peppered(password: &str, pepper: Option<&str>) -> Vec<u8> {
    match pepper {
        Some(p) => [p.as_bytes(), password.as_bytes()].concat(),
        None => password.as_bytes().to_vec(),
    }
}

/// Argon2id tuned per the OWASP cheat sheet: 19 MiB memory, two
/// passes, a single lane.
fn kdf() -> Result<Argon2<'static>> {
    let params = argon2::Params::new(19 * 1024, 2, 1, None)
        .map_err(|e| Error::Crypto(format!("bad KDF parameters: {e}")))?;
    Ok(Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        params,
    ))
}

/// Hash a password for storage. Every call salts freshly, so equal
/// passwords produce distinct PHC strings.
pub fn password_hash(password: &str, pepper: Option<&str>) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let phc = kdf()?
        .hash_password(&peppered(password, pepper), &salt)
        .map_err(|e| Error::Crypto(format!("KDF failure: {e}")))?;
    Ok(phc.to_string())
}

/// Check a submitted password against a stored PHC string. A mismatch
/// is `Ok(false)`; only a malformed stored hash is an error.
pub fn password_verify(password: &str, hash: &str, pepper: Option<&str>) -> Result<bool> {
    let stored = argon2::PasswordHash::new(hash)
        .map_err(|e| Error::Crypto(format!("stored password hash is malformed: {e}")))?;

    match Argon2::default().verify_password(&peppered(password, pepper), &stored) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(Error::Crypto(format!("password verification: {e}"))),
    }
}

const SECRET_NONCE_LEN: usize = 12;

/// Seal a TFA secret for storage with AES-256-GCM. The random nonce
/// leads the sealed bytes and the whole buffer is base64-encoded.
pub fn encrypt_secret(key: &[u8; 32], plaintext: &[u8]) -> Result<String> {
    let mut buf = vec![0u8; SECRET_NONCE_LEN];
    OsRng.fill_bytes(&mut buf);

    let sealed = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
        .encrypt(Nonce::from_slice(&buf), plaintext)
        .map_err(|_| Error::Crypto("TFA secret encryption failed".into()))?;
    buf.extend(sealed);

    Ok(STANDARD.encode(buf))
}

/// Recover a TFA secret sealed by [`encrypt_secret`].
pub fn decrypt_secret(key: &[u8; 32], encoded: &str) -> Result<Vec<u8>> {
    let buf = STANDARD
        .decode(encoded)
        .map_err(|_| Error::Crypto("stored TFA secret is not valid base64".into()))?;
    if buf.len() <= SECRET_NONCE_LEN {
        return Err(Error::Crypto("stored TFA secret is truncated".into()));
    }

    let (nonce, sealed) = buf.split_at(SECRET_NONCE_LEN);
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| Error::Crypto("TFA secret decryption failed".into()))
}
