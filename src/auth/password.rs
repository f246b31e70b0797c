//! Password Storage
//! Mission: Salted PBKDF2 hashes, constant-time verification
//!
//! Stored form is base64(salt ‖ digest) with a 16-byte random salt and a
//! 32-byte PBKDF2-HMAC-SHA256 digest at 120k rounds.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;
const DIGEST_LEN: usize = 32;
const ROUNDS: u32 = 120_000;

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut digest = [0u8; DIGEST_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, ROUNDS, &mut digest);

    let mut raw = Vec::with_capacity(SALT_LEN + DIGEST_LEN);
    raw.extend_from_slice(&salt);
    raw.extend_from_slice(&digest);
    BASE64.encode(raw)
}

/// Verify a password against a stored hash. Any decoding failure counts as
/// a mismatch; the digest comparison itself is constant-time.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(raw) = BASE64.decode(stored_hash) else {
        return false;
    };
    if raw.len() != SALT_LEN + DIGEST_LEN {
        return false;
    }

    let (salt, digest) = raw.split_at(SALT_LEN);
    let mut candidate = [0u8; DIGEST_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, ROUNDS, &mut candidate);

    candidate.ct_eq(digest).into()
}
