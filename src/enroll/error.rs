//! Failure taxonomy for the enrollment flow.
//!
//! Only `Validation` messages reach the browser. Everything else maps to a `500`
//! with a fixed message; the detailed cause (provider or CA output included) is
//! logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum EnrollError {
    /// Client-correctable request defect (missing or unknown `state`, missing `code`).
    #[error("{0}")]
    Validation(&'static str),
    /// Code exchange or ID token verification failed.
    #[error("identity provider error: {0}")]
    UpstreamAuth(String),
    /// Randomness, key or CSR generation failed.
    #[error("crypto error: {0}")]
    Crypto(String),
    /// step-ca rejected the request or answered with something unusable.
    #[error("step-ca error: {0}")]
    Ca(String),
    /// The PKCS#12 archive could not be built.
    #[error("packaging error: {0}")]
    Packaging(String),
}

impl EnrollError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamAuth(_) | Self::Crypto(_) | Self::Ca(_) | Self::Packaging(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            Self::Validation(message) => *message,
            Self::UpstreamAuth(_) => "Failed to authenticate with the identity provider",
            Self::Crypto(_) => "Failed to generate key",
            Self::Ca(_) => "Failed to sign CSR",
            Self::Packaging(_) => "Failed to create PKCS12",
        }
    }
}

impl IntoResponse for EnrollError {
    fn into_response(self) -> Response {
        if !matches!(self, Self::Validation(_)) {
            error!("Enrollment failed: {self}");
        }
        (self.status(), self.public_message()).into_response()
    }
}
