pub mod callback;
pub mod enroll;
pub mod health;

use axum::http::{HeaderMap, HeaderValue, header::CACHE_CONTROL};

/// Headers for responses that carry one-time material (redirects with `state`, archives).
fn no_store() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers
}
