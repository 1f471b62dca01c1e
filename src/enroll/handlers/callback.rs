use super::no_store;
use crate::enroll::{
    EnrollError, EnrollState, archive,
    credential::{Credential, valid_email},
};
use axum::{
    extract::{Extension, Query, rejection::QueryRejection},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::IntoParams;

#[derive(IntoParams, Debug, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    /// Opaque value issued by `/enroll`
    state: Option<String>,
    /// Authorization code from the identity provider
    code: Option<String>,
    /// Set by the provider when the user denied or the request was invalid
    error: Option<String>,
    error_description: Option<String>,
}

fn parse_params(query: Result<Query<CallbackParams>, QueryRejection>) -> CallbackParams {
    match query {
        Ok(Query(params)) => params,
        Err(err) => {
            warn!("Failed to parse callback query: {err}");
            CallbackParams::default()
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[utoipa::path(
    get,
    path= "/callback",
    params(CallbackParams),
    responses (
        (status = 200, description = "PKCS#12 archive with the key, certificate and chain",
            content_type = "application/x-pkcs12", body = Vec<u8>),
        (status = 400, description = "Missing or invalid state or code", body = String),
        (status = 500, description = "Identity provider, key generation, CA or packaging failure", body = String)
    ),
    tag = "enroll",
)]
#[instrument(skip(state, query))]
/// Finish an enrollment and return the issued credential as a PKCS#12 archive.
pub async fn callback(
    Extension(state): Extension<Arc<EnrollState>>,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> Result<impl IntoResponse, EnrollError> {
    let params = parse_params(query);

    let session_state =
        non_empty(params.state).ok_or(EnrollError::Validation("No state in request"))?;

    if let Some(error) = non_empty(params.error) {
        warn!(
            "Identity provider returned {error}: {}",
            params.error_description.as_deref().unwrap_or("no description")
        );
        return Err(EnrollError::Validation("Authorization was not granted"));
    }

    // Checked before the session is consumed so a bare retry can still complete.
    let code = non_empty(params.code).ok_or(EnrollError::Validation("No code in request"))?;

    let verifier = state
        .sessions()
        .consume(&session_state)
        .ok_or(EnrollError::Validation("Invalid state"))?;

    let identity = state.provider().authenticate(&code, &verifier).await?;
    drop(verifier);

    if !valid_email(&identity.email) {
        return Err(EnrollError::UpstreamAuth(format!(
            "unusable email claim: {:?}",
            identity.email
        )));
    }
    debug!("Identity verified for {}", identity.email);

    let credential = Credential::generate(&identity.email)?;
    let signed = state
        .authority()
        .sign(&credential.csr_pem()?, &identity.id_token)
        .await?;

    let serial = signed
        .leaf
        .serial_number()
        .to_bn()
        .and_then(|bn| bn.to_hex_str().map(|hex| hex.to_string()))
        .unwrap_or_default();

    let body = archive::package(
        &identity.email,
        &credential.key,
        &signed.leaf,
        &signed.chain,
        state.p12_password(),
        state.p12_encryption(),
    )?;

    info!(
        "Issued certificate {serial} for {} ({} chain certificates)",
        identity.email,
        signed.chain.len()
    );

    let disposition =
        HeaderValue::from_str(&format!("attachment; filename={}.p12", identity.email))
            .map_err(|e| EnrollError::Packaging(e.to_string()))?;

    let mut headers = no_store();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(archive::CONTENT_TYPE));
    headers.insert(CONTENT_DISPOSITION, disposition);

    Ok((StatusCode::OK, headers, body))
}
