//! PKCS#12 packaging of the issued credential.

use crate::enroll::EnrollError;
use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    pkcs12::Pkcs12,
    pkey::{PKey, PKeyRef, Private},
    stack::Stack,
    x509::{X509, X509Ref},
};
use secrecy::{ExposeSecret, SecretString};

pub const CONTENT_TYPE: &str = "application/x-pkcs12";

/// How the archive bags and MAC are protected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encryption {
    /// OpenSSL defaults: PBES2 with AES-256-CBC and a SHA-256 MAC.
    #[default]
    Modern,
    /// PBE-SHA1-3DES for key and certificates with a SHA-1 MAC, for key stores
    /// that predate PBES2.
    Legacy,
}

/// Bundle key, leaf and chain into a DER-encoded PKCS#12 archive protected by `password`.
///
/// `friendly_name` becomes the bag label most key stores display.
///
/// # Errors
/// Returns `EnrollError::Packaging` if OpenSSL refuses to build the archive.
pub fn package(
    friendly_name: &str,
    key: &PKeyRef<Private>,
    leaf: &X509Ref,
    chain: &[X509],
    password: &SecretString,
    encryption: Encryption,
) -> Result<Vec<u8>, EnrollError> {
    build(
        friendly_name,
        key,
        leaf,
        chain,
        password.expose_secret(),
        encryption,
    )
    .map_err(|e| EnrollError::Packaging(e.to_string()))
}

fn build(
    friendly_name: &str,
    key: &PKeyRef<Private>,
    leaf: &X509Ref,
    chain: &[X509],
    password: &str,
    encryption: Encryption,
) -> Result<Vec<u8>, ErrorStack> {
    let mut builder = Pkcs12::builder();
    builder.name(friendly_name).pkey(key).cert(leaf);

    if encryption == Encryption::Legacy {
        // RC2 needs the legacy provider, 3DES does not
        builder
            .key_algorithm(Nid::PBE_WITHSHA1AND3_KEY_TRIPLEDES_CBC)
            .cert_algorithm(Nid::PBE_WITHSHA1AND3_KEY_TRIPLEDES_CBC)
            .mac_md(MessageDigest::sha1());
    }

    if !chain.is_empty() {
        let mut ca = Stack::new()?;
        for cert in chain {
            ca.push(cert.clone())?;
        }
        builder.ca(ca);
    }

    builder.build2(password)?.to_der()
}

/// What an archive decrypts to.
pub struct ArchiveContents {
    pub key: PKey<Private>,
    pub leaf: X509,
    pub chain: Vec<X509>,
}

/// Open an archive produced by [`package`].
///
/// # Errors
/// Returns `EnrollError::Packaging` if the archive is malformed, the password
/// is wrong, or the key or leaf is missing.
pub fn read_archive(der: &[u8], password: &str) -> Result<ArchiveContents, EnrollError> {
    let parsed = Pkcs12::from_der(der)
        .and_then(|p12| p12.parse2(password))
        .map_err(|e| EnrollError::Packaging(e.to_string()))?;

    let key = parsed
        .pkey
        .ok_or_else(|| EnrollError::Packaging("archive has no private key".to_string()))?;
    let leaf = parsed
        .cert
        .ok_or_else(|| EnrollError::Packaging("archive has no certificate".to_string()))?;
    let chain = parsed.ca.map(|ca| ca.into_iter().collect()).unwrap_or_default();

    Ok(ArchiveContents { key, leaf, chain })
}
