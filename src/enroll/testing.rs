//! Doubles shared by the unit tests: a throwaway CA and stub upstreams.

use crate::enroll::{
    BoxFuture, EnrollError,
    oidc::{IdentityProvider, VerifiedIdentity},
    step_ca::{CertificateAuthority, SignedCertificate},
};
use anyhow::Result;
use openssl::x509::{X509, X509Req};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Mutex;
use url::Url;

// Shared with the integration tests.
#[path = "../../tests/common/ca.rs"]
mod ca;

pub use ca::TestCa;

/// Identity provider that accepts one code and vouches for a fixed email.
pub struct StubProvider {
    pub authorization_endpoint: Url,
    pub code: String,
    pub email: String,
    /// Verifiers presented to `authenticate`, in order.
    pub seen_verifiers: Mutex<Vec<String>>,
}

impl StubProvider {
    pub fn new(code: &str, email: &str) -> Result<Self> {
        Ok(Self {
            authorization_endpoint: Url::parse("https://idm.example.com/ui/oauth2")?,
            code: code.to_string(),
            email: email.to_string(),
            seen_verifiers: Mutex::new(Vec::new()),
        })
    }
}

impl IdentityProvider for StubProvider {
    fn authorization_url(&self, state: &str, code_challenge: &str) -> Url {
        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge);
        url
    }

    fn authenticate<'a>(
        &'a self,
        code: &'a str,
        verifier: &'a SecretString,
    ) -> BoxFuture<'a, Result<VerifiedIdentity, EnrollError>> {
        Box::pin(async move {
            if let Ok(mut seen) = self.seen_verifiers.lock() {
                seen.push(verifier.expose_secret().to_string());
            }
            if code != self.code {
                return Err(EnrollError::UpstreamAuth(format!("unknown code {code}")));
            }
            Ok(VerifiedIdentity {
                email: self.email.clone(),
                id_token: SecretString::from(format!("id-token-for-{}", self.email)),
            })
        })
    }
}

/// CA double backed by [`TestCa`]; `fail` makes every request a CA error.
pub struct StubAuthority {
    pub ca: TestCa,
    pub fail: bool,
}

impl CertificateAuthority for StubAuthority {
    fn sign<'a>(
        &'a self,
        csr_pem: &'a str,
        _ott: &'a SecretString,
    ) -> BoxFuture<'a, Result<SignedCertificate, EnrollError>> {
        Box::pin(async move {
            if self.fail {
                return Err(EnrollError::Ca("step-ca returned 401: token is not valid".to_string()));
            }
            let issue = || -> Result<X509> {
                let csr = X509Req::from_pem(csr_pem.as_bytes())?;
                self.ca.issue(&csr)
            };
            let leaf = issue().map_err(|e| EnrollError::Ca(e.to_string()))?;
            Ok(SignedCertificate {
                leaf,
                chain: vec![self.ca.cert.clone()],
            })
        })
    }
}
