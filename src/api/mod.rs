use crate::{auth, node::Node};
use anyhow::Result;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use std::{future::Future, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use utoipa::OpenApi;

pub mod admission;
pub mod handlers;

use self::handlers::{apps, health, session};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        session::session,
        session::login,
        session::logout,
        apps::register,
        apps::revoke
    ),
    components(schemas(
        health::Health,
        auth::Session,
        auth::Principal,
        auth::PrincipalKind,
        auth::RegisteredApp,
        session::LoginRequest,
        apps::RegisterAppRequest,
        admission::ErrorBody
    )),
    tags(
        (name = "health", description = "Liveness and build info"),
        (name = "auth", description = "Session state of the caller"),
        (name = "apps", description = "Registered application credentials")
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

/// HTTP surface of a node. Session and app routes are guarded by admission;
/// health and the `OpenAPI` document are not.
pub fn router(node: Node, response_timeout: Duration) -> Router {
    let guarded = Router::new()
        .route("/v1/auth/session", get(session::session))
        .route("/v1/auth/login", post(session::login))
        .route("/v1/auth/logout", post(session::logout))
        .route("/v1/auth/apps", post(apps::register))
        .route("/v1/auth/apps/:token", delete(apps::revoke))
        .layer(middleware::from_fn_with_state(
            node.clone(),
            admission::admit,
        ));

    Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/openapi.json", get(openapi_json))
        .merge(guarded)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    response_timeout,
                ))
                .layer(Extension(node)),
        )
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the server fails.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let method = request.method();
    let path = request.uri().path();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", %method, path, request_id)
}
