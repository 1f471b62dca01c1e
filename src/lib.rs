//! # step-ca-enroll (Certificate Enrollment Gateway)
//!
//! `step-ca-enroll` turns a browser login into a short-lived X.509 client
//! certificate. The user authenticates against an OpenID Connect provider
//! (Authorization Code flow with PKCE); the verified ID token is then presented
//! to step-ca as a one-time token to sign a freshly generated CSR, and the
//! resulting key, leaf and chain are returned as a password-protected PKCS#12
//! archive.
//!
//! ## Flow
//!
//! 1. `GET /enroll` creates a PKCE session and redirects to the provider.
//! 2. `GET /callback` consumes the session, redeems the code, verifies the ID token.
//! 3. A P-256 key and CSR (`CN` and `SAN` = verified email) are generated in memory.
//! 4. step-ca signs the CSR (`POST /1.0/sign`, `ott` = ID token).
//! 5. The PKCS#12 archive is streamed back and every secret is dropped.
//!
//! Nothing is persisted: sessions live in memory with a TTL and are single-use,
//! and keys never touch disk.

pub mod cli;
pub mod enroll;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
