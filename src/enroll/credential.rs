//! In-memory P-256 key pair and PKCS#10 request bound to the verified email.

use crate::enroll::EnrollError;
use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    stack::Stack,
    x509::{X509NameBuilder, X509Req, extension::SubjectAlternativeName},
};
use regex::Regex;

/// Conservative address check; the email ends up in a subject and a download filename.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)+$")
        .is_ok_and(|re| re.is_match(email))
}

pub struct Credential {
    pub key: PKey<Private>,
    pub csr: X509Req,
}

impl Credential {
    /// Generate a fresh key and a CSR with `CN=<email>` and an email SAN, signed with SHA-256.
    ///
    /// # Errors
    /// Returns `EnrollError::Crypto` if key generation or signing fails.
    pub fn generate(email: &str) -> Result<Self, EnrollError> {
        build(email).map_err(|e| EnrollError::Crypto(e.to_string()))
    }

    /// # Errors
    /// Returns `EnrollError::Crypto` if the request can't be PEM encoded.
    pub fn csr_pem(&self) -> Result<String, EnrollError> {
        let pem = self
            .csr
            .to_pem()
            .map_err(|e| EnrollError::Crypto(e.to_string()))?;
        String::from_utf8(pem).map_err(|e| EnrollError::Crypto(e.to_string()))
    }
}

fn build(email: &str) -> Result<Credential, ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, email)?;
    let name = name.build();

    let mut req = X509Req::builder()?;
    req.set_version(0)?;
    req.set_subject_name(&name)?;
    req.set_pubkey(&key)?;

    let san = SubjectAlternativeName::new()
        .email(email)
        .build(&req.x509v3_context(None))?;
    let mut extensions = Stack::new()?;
    extensions.push(san)?;
    req.add_extensions(&extensions)?;

    req.sign(&key, MessageDigest::sha256())?;

    Ok(Credential {
        key,
        csr: req.build(),
    })
}
