//! step-ca signing client (`POST /1.0/sign`).

use crate::{
    APP_USER_AGENT,
    cli::commands::step_ca::CaTrust,
    enroll::{BoxFuture, EnrollError},
};
use anyhow::{Context, Result, anyhow};
use openssl::x509::X509;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

#[derive(Debug, Serialize)]
pub struct SignRequest<'a> {
    pub csr: &'a str,
    pub ott: &'a str,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignResponse {
    pub crt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(rename = "certChain", default, skip_serializing_if = "Vec::is_empty")]
    pub cert_chain: Vec<String>,
}

/// Issued leaf plus whatever issuer certificates could be parsed, leaf excluded.
#[derive(Debug, Clone)]
pub struct SignedCertificate {
    pub leaf: X509,
    pub chain: Vec<X509>,
}

pub trait CertificateAuthority: Send + Sync {
    /// Have the CA sign `csr_pem`, authorizing with the one-time token `ott`.
    fn sign<'a>(
        &'a self,
        csr_pem: &'a str,
        ott: &'a SecretString,
    ) -> BoxFuture<'a, Result<SignedCertificate, EnrollError>>;
}

/// Build the HTTP client used to reach step-ca.
///
/// # Errors
/// Returns an error if the trust bundle can't be read or holds no certificate.
pub fn build_client(trust: &CaTrust, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(timeout);

    match trust {
        CaTrust::System => {}
        CaTrust::Bundle(path) => {
            let pem = std::fs::read(path)
                .with_context(|| format!("failed to read CA bundle {}", path.display()))?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem)
                .with_context(|| format!("invalid CA bundle {}", path.display()))?;
            if certs.is_empty() {
                return Err(anyhow!("no certificates in CA bundle {}", path.display()));
            }
            debug!("Trusting {} extra roots for step-ca", certs.len());
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        CaTrust::Insecure => {
            warn!("step-ca TLS certificate validation is DISABLED");
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder.build().context("failed to build step-ca client")
}

/// Turn a sign response into certificates.
///
/// The leaf is mandatory. `ca` and `certChain` entries are optional: every
/// entry that parses is kept in order, `ca` first, and any entry that fails to
/// parse is logged and skipped.
///
/// # Errors
/// Returns `EnrollError::Ca` if the leaf PEM doesn't parse.
pub fn parse_sign_response(response: &SignResponse) -> Result<SignedCertificate, EnrollError> {
    let leaf = X509::from_pem(response.crt.as_bytes())
        .map_err(|e| EnrollError::Ca(format!("invalid leaf certificate: {e}")))?;

    let mut chain = Vec::new();

    let optional = response
        .ca
        .iter()
        .map(|pem| ("ca", pem))
        .chain(response.cert_chain.iter().map(|pem| ("certChain", pem)));

    for (field, pem) in optional {
        match X509::from_pem(pem.as_bytes()) {
            Ok(cert) => chain.push(cert),
            Err(e) => warn!("Skipping unparsable {field} certificate from step-ca: {e}"),
        }
    }

    Ok(SignedCertificate { leaf, chain })
}

pub struct StepCaClient {
    client: reqwest::Client,
    sign_url: Url,
}

impl StepCaClient {
    /// # Errors
    /// Returns an error if the sign URL can't be derived from `base_url`.
    pub fn new(client: reqwest::Client, base_url: &Url) -> Result<Self> {
        let sign_url = Url::parse(&format!(
            "{}/1.0/sign",
            base_url.as_str().trim_end_matches('/')
        ))
        .context("invalid step-ca URL")?;
        Ok(Self { client, sign_url })
    }

    #[must_use]
    pub fn sign_url(&self) -> &Url {
        &self.sign_url
    }
}

impl CertificateAuthority for StepCaClient {
    fn sign<'a>(
        &'a self,
        csr_pem: &'a str,
        ott: &'a SecretString,
    ) -> BoxFuture<'a, Result<SignedCertificate, EnrollError>> {
        Box::pin(async move {
            let request = SignRequest {
                csr: csr_pem,
                ott: ott.expose_secret(),
            };

            let response = self
                .client
                .post(self.sign_url.clone())
                .json(&request)
                .send()
                .await
                .map_err(|e| EnrollError::Ca(format!("request to {} failed: {e}", self.sign_url)))?;

            let status = response.status();
            if status != StatusCode::OK && status != StatusCode::CREATED {
                let body = response.text().await.unwrap_or_default();
                error!("step-ca returned {status}: {body}");
                return Err(EnrollError::Ca(format!("unexpected status {status}")));
            }

            let body: SignResponse = response
                .json()
                .await
                .map_err(|e| EnrollError::Ca(format!("invalid sign response: {e}")))?;
            parse_sign_response(&body)
        })
    }
}
