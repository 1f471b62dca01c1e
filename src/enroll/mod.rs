//! HTTP surface and wiring of the enrollment flow.

pub mod archive;
pub mod credential;
mod error;
pub mod handlers;
pub mod oidc;
pub mod pkce;
pub mod session;
pub mod step_ca;

#[cfg(test)]
pub(crate) mod testing;

pub use error::EnrollError;

use anyhow::Result;
use archive::Encryption;
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
};
use handlers::{callback, enroll, health};
use oidc::IdentityProvider;
use secrecy::SecretString;
use session::SessionStore;
use std::{future::Future, net::SocketAddr, pin::Pin, sync::Arc};
use step_ca::CertificateAuthority;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, debug_span, info};
use ulid::Ulid;
use utoipa::openapi::{InfoBuilder, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything the handlers share.
pub struct EnrollState {
    sessions: Arc<dyn SessionStore>,
    provider: Arc<dyn IdentityProvider>,
    authority: Arc<dyn CertificateAuthority>,
    p12_password: SecretString,
    p12_encryption: Encryption,
}

impl EnrollState {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        provider: Arc<dyn IdentityProvider>,
        authority: Arc<dyn CertificateAuthority>,
        p12_password: SecretString,
    ) -> Self {
        Self {
            sessions,
            provider,
            authority,
            p12_password,
            p12_encryption: Encryption::default(),
        }
    }

    /// Protect archives with `encryption` instead of the OpenSSL defaults.
    #[must_use]
    pub fn with_p12_encryption(mut self, encryption: Encryption) -> Self {
        self.p12_encryption = encryption;
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    #[must_use]
    pub fn provider(&self) -> &dyn IdentityProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn authority(&self) -> &dyn CertificateAuthority {
        self.authority.as_ref()
    }

    #[must_use]
    pub fn p12_password(&self) -> &SecretString {
        &self.p12_password
    }

    #[must_use]
    pub fn p12_encryption(&self) -> Encryption {
        self.p12_encryption
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
#[must_use]
pub fn router() -> OpenApiRouter {
    let info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    let mut router = OpenApiRouter::with_openapi(OpenApiBuilder::new().info(info).build())
        .routes(routes!(enroll::enroll))
        .routes(routes!(callback::callback))
        .routes(routes!(health::health));

    let mut enroll_tag = Tag::new("enroll");
    enroll_tag.description = Some("Browser certificate enrollment".to_string());
    router.get_openapi_mut().tags = Some(vec![enroll_tag, Tag::new("health")]);

    router
}

/// The service with request-id, tracing and state layers applied.
pub fn app(state: Arc<EnrollState>) -> Router {
    let (router, _openapi) = router().split_for_parts();
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(state)),
    )
}

/// Serve until Ctrl-C or SIGTERM.
///
/// # Errors
/// Returns an error if the listener can't be bound or the server fails.
pub async fn serve(bind_addr: SocketAddr, state: Arc<EnrollState>) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;

    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    // Query strings carry `state` and `code`; only the path is recorded.
    debug_span!("http-request", path, request_id)
}
