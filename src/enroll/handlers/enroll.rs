use super::no_store;
use crate::enroll::{EnrollError, EnrollState, pkce::code_challenge};
use axum::{
    extract::Extension,
    http::{HeaderValue, StatusCode, header::LOCATION},
    response::IntoResponse,
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, instrument};

#[utoipa::path(
    get,
    path= "/enroll",
    responses (
        (status = 302, description = "Redirect to the identity provider's authorization endpoint",
            headers(("location" = String, description = "Authorization URL carrying state and the PKCE challenge"))),
        (status = 500, description = "Failed to start the enrollment", body = String)
    ),
    tag = "enroll",
)]
#[instrument(skip(state))]
/// Start an enrollment: register a PKCE session and send the browser to the provider.
pub async fn enroll(
    Extension(state): Extension<Arc<EnrollState>>,
) -> Result<impl IntoResponse, EnrollError> {
    let session = state
        .sessions()
        .create()
        .map_err(|e| EnrollError::Crypto(format!("{e:#}")))?;

    let challenge = code_challenge(session.verifier.expose_secret());
    let url = state
        .provider()
        .authorization_url(&session.state, &challenge);

    let location = HeaderValue::from_str(url.as_str())
        .map_err(|e| EnrollError::UpstreamAuth(format!("invalid authorization URL: {e}")))?;

    debug!("Redirecting to {}", url.origin().ascii_serialization());

    let mut headers = no_store();
    headers.insert(LOCATION, location);
    Ok((StatusCode::FOUND, headers))
}
