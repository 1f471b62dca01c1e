//! PKCE (RFC 7636) helpers: random secrets and the `S256` code challenge.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// `base64url-no-pad(SHA-256(verifier))`.
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

/// Draw `len` bytes from the OS RNG and render them as lowercase hex.
///
/// # Errors
/// Returns an error if the OS random source is unavailable.
pub fn random_hex(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to read from the OS random source")?;
    Ok(hex::encode(bytes))
}
