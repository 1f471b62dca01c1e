//! OpenID Connect client: discovery, authorization URL, code exchange and ID token verification.

pub mod id_token;
pub mod jwks;

use crate::{
    cli::commands::oidc::Options,
    enroll::{BoxFuture, EnrollError, pkce::CODE_CHALLENGE_METHOD},
};
use anyhow::{Context, Result, anyhow};
use id_token::Expectations;
use jwks::Jwks;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

pub const SCOPES: &str = "openid email profile";

/// The subset of the discovery document the flow needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub jwks_uri: Url,
}

/// Per-client issuer URL, `{base}/oauth2/openid/{client_id}`.
///
/// # Errors
/// Returns an error if the joined URL is invalid.
pub fn issuer_url(base: &Url, client_id: &str) -> Result<Url> {
    let base = base.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/oauth2/openid/{client_id}"))
        .with_context(|| format!("invalid issuer URL for client {client_id}"))
}

/// # Errors
/// Returns an error if the joined URL is invalid.
pub fn discovery_url(base: &Url, client_id: &str) -> Result<Url> {
    let issuer = issuer_url(base, client_id)?;
    Url::parse(&format!(
        "{}/.well-known/openid-configuration",
        issuer.as_str().trim_end_matches('/')
    ))
    .context("invalid discovery URL")
}

/// The authenticated user, as vouched for by the provider.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub email: String,
    /// Raw ID token, later presented to the CA as one-time token.
    pub id_token: SecretString,
}

pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser for `state` and PKCE `code_challenge`.
    fn authorization_url(&self, state: &str, code_challenge: &str) -> Url;

    /// Redeem `code` with `verifier` and verify the returned ID token.
    fn authenticate<'a>(
        &'a self,
        code: &'a str,
        verifier: &'a SecretString,
    ) -> BoxFuture<'a, Result<VerifiedIdentity, EnrollError>>;
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

pub struct OidcProvider {
    client: reqwest::Client,
    metadata: ProviderMetadata,
    client_id: String,
    client_secret: SecretString,
    redirect_url: Url,
    jwks: RwLock<Option<Jwks>>,
}

impl OidcProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, metadata: ProviderMetadata, options: &Options) -> Self {
        Self {
            client,
            metadata,
            client_id: options.client_id.clone(),
            client_secret: options.client_secret.clone(),
            redirect_url: options.redirect_url.clone(),
            jwks: RwLock::new(None),
        }
    }

    /// Fetch the discovery document and build a provider from it.
    ///
    /// # Errors
    /// Returns an error if the document can't be fetched or its issuer doesn't
    /// match the configured client.
    pub async fn discover(client: reqwest::Client, options: &Options) -> Result<Self> {
        let url = discovery_url(&options.kanidm_url, &options.client_id)?;
        debug!("Fetching OIDC discovery document from {url}");

        let metadata: ProviderMetadata = client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("discovery failed for {url}"))?
            .json()
            .await
            .context("invalid discovery document")?;

        let expected = issuer_url(&options.kanidm_url, &options.client_id)?;
        if metadata.issuer.trim_end_matches('/') != expected.as_str().trim_end_matches('/') {
            return Err(anyhow!(
                "issuer mismatch: expected {expected}, discovery returned {}",
                metadata.issuer
            ));
        }

        info!("OIDC provider discovered, issuer: {}", metadata.issuer);
        Ok(Self::new(client, metadata, options))
    }

    #[must_use]
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn exchange_code(&self, code: &str, verifier: &SecretString) -> Result<String> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
            ("code_verifier", verifier.expose_secret()),
            ("client_id", self.client_id.as_str()),
        ];

        let response = self
            .client
            .post(self.metadata.token_endpoint.clone())
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&form)
            .send()
            .await
            .context("token request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("token endpoint returned {status}: {body}"));
        }

        let token: TokenResponse = response.json().await.context("invalid token response")?;
        token
            .id_token
            .filter(|token| !token.is_empty())
            .context("no id_token in token response")
    }

    async fn fetch_jwks(&self) -> Result<Jwks> {
        let jwks: Jwks = self
            .client
            .get(self.metadata.jwks_uri.clone())
            .send()
            .await
            .context("JWKS request failed")?
            .error_for_status()
            .context("JWKS request failed")?
            .json()
            .await
            .context("invalid JWKS document")?;
        debug!("Fetched {} provider keys", jwks.keys.len());
        Ok(jwks)
    }

    /// Verify with the cached key set, refreshing it once when the signing key is unknown.
    async fn verify_id_token(&self, token: &str) -> Result<id_token::IdTokenClaims> {
        let now_unix_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or_default();
        let expect = Expectations {
            issuer: &self.metadata.issuer,
            audience: &self.client_id,
            now_unix_seconds,
        };

        if let Some(jwks) = self.jwks.read().await.as_ref() {
            match id_token::verify(token, jwks, &expect) {
                Err(id_token::Error::UnknownKid(kid)) => {
                    warn!("ID token signed with unknown key {kid:?}, refreshing JWKS");
                }
                result => return result.context("ID token verification failed"),
            }
        }

        let jwks = self.fetch_jwks().await?;
        let result = id_token::verify(token, &jwks, &expect);
        *self.jwks.write().await = Some(jwks);
        result.context("ID token verification failed")
    }
}

impl IdentityProvider for OidcProvider {
    fn authorization_url(&self, state: &str, code_challenge: &str) -> Url {
        let mut url = self.metadata.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
        url
    }

    fn authenticate<'a>(
        &'a self,
        code: &'a str,
        verifier: &'a SecretString,
    ) -> BoxFuture<'a, Result<VerifiedIdentity, EnrollError>> {
        Box::pin(async move {
            let id_token = self
                .exchange_code(code, verifier)
                .await
                .map_err(|e| EnrollError::UpstreamAuth(format!("{e:#}")))?;
            let claims = self
                .verify_id_token(&id_token)
                .await
                .map_err(|e| EnrollError::UpstreamAuth(format!("{e:#}")))?;
            let email = claims
                .email()
                .map_err(|e| EnrollError::UpstreamAuth(e.to_string()))?
                .to_string();

            Ok(VerifiedIdentity {
                email,
                id_token: SecretString::from(id_token),
            })
        })
    }
}
