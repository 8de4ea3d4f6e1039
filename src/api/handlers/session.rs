//! Session endpoints. All run behind the admission middleware.

use crate::{
    api::admission::{clear_session_cookie, error_response, session_cookie, RequestContext},
    auth::{Session, VerifyError},
    node::{LoginError, Node},
};
use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::{error, info, warn};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Access token issued by the identity provider.
    pub token: String,
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Current session, authenticated or not", body = Session),
        (status = 429, description = "No admission slot free", body = crate::api::admission::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn session(Extension(context): Extension<RequestContext>) -> Json<Session> {
    Json(context.session)
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session authenticated", body = Session),
        (status = 401, description = "Provider token rejected", body = crate::api::admission::ErrorBody),
        (status = 429, description = "No admission slot free", body = crate::api::admission::ErrorBody),
        (status = 502, description = "Identity provider failed", body = crate::api::admission::ErrorBody),
        (status = 503, description = "Login unavailable", body = crate::api::admission::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(node): Extension<Node>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<LoginRequest>,
) -> Response {
    match node.login_with_token(context.session, &request.token).await {
        Ok(session) => {
            let mut headers = HeaderMap::new();
            match session_cookie(&session.id) {
                Ok(cookie) => {
                    headers.insert(SET_COOKIE, cookie);
                }
                Err(err) => error!("Failed to build session cookie: {err}"),
            }
            (StatusCode::OK, headers, Json(session)).into_response()
        }
        Err(LoginError::Verify(VerifyError::Rejected)) => {
            info!("login with a rejected provider token");
            error_response(StatusCode::UNAUTHORIZED, "invalid token")
        }
        Err(LoginError::Verify(VerifyError::Unavailable)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "login is not configured")
        }
        Err(LoginError::Verify(err)) => {
            warn!(error = %err, "identity provider failed");
            error_response(StatusCode::BAD_GATEWAY, "identity provider unavailable")
        }
        Err(LoginError::Arbiter(err)) => {
            error!("Failed to log in: {err}");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "admission unavailable")
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = Session),
        (status = 429, description = "No admission slot free", body = crate::api::admission::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn logout(
    Extension(node): Extension<Node>,
    Extension(context): Extension<RequestContext>,
) -> impl IntoResponse {
    match node.logout(context.session).await {
        Ok(session) => {
            let mut headers = HeaderMap::new();
            headers.insert(SET_COOKIE, clear_session_cookie());
            (StatusCode::OK, headers, Json(session)).into_response()
        }
        Err(err) => {
            error!("Failed to log out: {err}");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "admission unavailable")
        }
    }
}
