//! Registered application credentials. Only an authenticated session may
//! register an app. The app carries its owner's email and only that owner may
//! revoke it.

use crate::{
    api::admission::{error_response, RequestContext},
    auth::{Principal, RegisteredApp},
    node::Node,
};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterAppRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

fn caller(context: &RequestContext) -> Result<&Principal, Response> {
    match &context.session.principal {
        Some(principal) if context.session.authenticated => Ok(principal),
        _ => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "authentication required",
        )),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/apps",
    request_body = RegisterAppRequest,
    responses(
        (status = 201, description = "App registered and announced to peers", body = RegisteredApp),
        (status = 400, description = "Missing app name", body = crate::api::admission::ErrorBody),
        (status = 401, description = "Caller is not logged in", body = crate::api::admission::ErrorBody),
        (status = 429, description = "No admission slot free", body = crate::api::admission::ErrorBody)
    ),
    tag = "apps"
)]
pub async fn register(
    Extension(node): Extension<Node>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<RegisterAppRequest>,
) -> Response {
    let owner = match caller(&context) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let name = request.name.trim();
    if name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "app name is required");
    }

    let app = RegisteredApp {
        token: Uuid::new_v4().to_string(),
        name: name.to_string(),
        email: owner.email.clone(),
        description: request.description,
        is_master: false,
    };
    info!(app = %app.name, owner = %owner.email, "app registration requested");
    node.register_app(app.clone()).await;

    (StatusCode::CREATED, Json(app)).into_response()
}

#[utoipa::path(
    delete,
    path = "/v1/auth/apps/{token}",
    params(("token" = String, Path, description = "Access token of the app")),
    responses(
        (status = 204, description = "App revoked on this node and announced to peers"),
        (status = 401, description = "Caller is not logged in", body = crate::api::admission::ErrorBody),
        (status = 403, description = "Caller does not own the app", body = crate::api::admission::ErrorBody),
        (status = 404, description = "Unknown app", body = crate::api::admission::ErrorBody),
        (status = 429, description = "No admission slot free", body = crate::api::admission::ErrorBody)
    ),
    tag = "apps"
)]
pub async fn revoke(
    Extension(node): Extension<Node>,
    Extension(context): Extension<RequestContext>,
    Path(token): Path<String>,
) -> Response {
    let owner = match caller(&context) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let Some(app) = node.cache().app(&token).await else {
        return error_response(StatusCode::NOT_FOUND, "unknown app");
    };
    if app.email != owner.email {
        return error_response(StatusCode::FORBIDDEN, "not the owner of this app");
    }

    node.revoke_app(&app).await;
    StatusCode::NO_CONTENT.into_response()
}
