use crate::{node::Node, GIT_COMMIT_HASH};
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    arbiter: String,
    pool_size: usize,
    leased: usize,
    authenticated: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    responses (
        (status = 200, description = "Arbiter is running", body = Health),
        (status = 503, description = "Arbiter stopped", body = Health)
    ),
    tag = "health",
)]
/// Report build info, slot usage and cache size.
pub async fn health(Extension(node): Extension<Node>) -> impl IntoResponse {
    let authenticated = node.cache().len().await;
    let (status, arbiter, pool_size, leased) = match node.arbiter().status().await {
        Ok(status) => (StatusCode::OK, "ok", status.pool_size, status.leased),
        Err(err) => {
            error!("Health check failed: {err}");
            (StatusCode::SERVICE_UNAVAILABLE, "error", 0, 0)
        }
    };

    let body = Json(Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        arbiter: arbiter.to_string(),
        pool_size,
        leased,
        authenticated,
    });

    let short_hash = if GIT_COMMIT_HASH.len() > 7 {
        &GIT_COMMIT_HASH[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )) {
        headers.insert("X-App", value);
    }

    (status, headers, body)
}
