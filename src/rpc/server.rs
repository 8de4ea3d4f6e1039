use super::{procedure_path, AUTHENTICATE, GET_ALL_AUTHENTICATED, UNAUTHENTICATE};
use crate::auth::{AuthCache, Principal};
use axum::{extract::Extension, routing::post, Json, Router};
use std::{collections::HashMap, future::Future, io};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Router exposing `cache` to peers.
pub fn router(cache: AuthCache) -> Router {
    Router::new()
        .route(&procedure_path(AUTHENTICATE), post(authenticate))
        .route(&procedure_path(UNAUTHENTICATE), post(unauthenticate))
        .route(&procedure_path(GET_ALL_AUTHENTICATED), post(get_all_authenticated))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(cache))
}

/// Serve the replication procedures on `listener` until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the listener fails.
pub async fn serve<F>(listener: TcpListener, cache: AuthCache, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("RPC listening on {}", addr);
    }
    axum::serve(listener, router(cache).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

async fn authenticate(
    Extension(cache): Extension<AuthCache>,
    Json(principal): Json<Principal>,
) -> Json<bool> {
    debug!(kind = ?principal.kind, "peer authenticated principal");
    cache.put(principal).await;
    Json(true)
}

async fn unauthenticate(
    Extension(cache): Extension<AuthCache>,
    Json(principal): Json<Principal>,
) -> Json<bool> {
    debug!(kind = ?principal.kind, "peer unauthenticated principal");
    cache.remove(&principal).await;
    Json(true)
}

async fn get_all_authenticated(
    Extension(cache): Extension<AuthCache>,
    Json(_ignored): Json<bool>,
) -> Json<HashMap<String, Principal>> {
    let snapshot = cache.snapshot().await;
    info!(count = snapshot.len(), "served authenticated snapshot");
    Json(snapshot)
}
