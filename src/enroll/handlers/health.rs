use crate::GIT_COMMIT_HASH;
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};
use tracing::debug;

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Process is up", body = String)
    ),
    tag = "health",
)]
// axum handler for health
pub async fn health() -> impl IntoResponse {
    let short_hash = if GIT_COMMIT_HASH.len() > 7 {
        &GIT_COMMIT_HASH[0..7]
    } else {
        ""
    };

    let headers = format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )
    .parse::<HeaderValue>()
    .map(|x_app_header_value| {
        let mut headers = HeaderMap::new();
        headers.insert("X-App", x_app_header_value);
        headers
    })
    .map_err(|err| {
        debug!("Failed to parse X-App header: {}", err);
    })
    .unwrap_or_else(|()| HeaderMap::new());

    (StatusCode::OK, headers, "OK")
}
