//! Token and credential helpers for Callwire Server
//!
//! Session tokens are stored only as SHA-256 hashes; TURN credentials
//! follow the time-limited REST scheme (HMAC-SHA1 over `expiry:username`).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use ring::{digest, hmac, rand::{SecureRandom, SystemRandom}};

const USER_ID_LENGTH: usize = 8;
const SESSION_TOKEN_LENGTH: usize = 32;

fn random_bytes<const N: usize>() -> anyhow::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| anyhow::anyhow!("system randomness unavailable"))?;
    Ok(bytes)
}

/// Generate a random user ID (8 characters, alphanumeric)
pub fn generate_user_id() -> anyhow::Result<String> {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

    let bytes = random_bytes::<USER_ID_LENGTH>()?;
    Ok(bytes
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect())
}

/// Generate a session token (base64url, 32 bytes)
pub fn generate_session_token() -> anyhow::Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes::<SESSION_TOKEN_LENGTH>()?))
}

/// Hash a session token for storage (SHA-256)
pub fn hash_token(token: &str) -> String {
    let hash = digest::digest(&digest::SHA256, token.as_bytes());
    hex::encode(hash.as_ref())
}

/// Generate TURN credentials with time-limited validity
pub fn generate_turn_credentials(username: &str, secret: &str, ttl_seconds: u64) -> (String, String) {
    let expiry = Utc::now().timestamp() as u64 + ttl_seconds;
    let turn_username = format!("{}:{}", expiry, username);

    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, secret.as_bytes());
    let signature = hmac::sign(&key, turn_username.as_bytes());
    let turn_credential = base64::engine::general_purpose::STANDARD.encode(signature.as_ref());

    (turn_username, turn_credential)
}
