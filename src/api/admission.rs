//! Admission middleware: every request on the guarded routes holds one slot
//! from the arbiter for as long as its handler runs.

use crate::{
    arbiter::{Admission, ArbiterHandle, Lease},
    auth::{Session, SESSION_COOKIE},
    node::Node,
};
use axum::{
    extract::{Request, State},
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

/// Request-scoped admission data, available to handlers as an extension.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub lease: Lease,
    pub session: Session,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Gives the slot back if the handler future is dropped before completion
/// (client gone, response timeout).
struct SlotGuard {
    arbiter: ArbiterHandle,
    lease: Option<Lease>,
}

impl SlotGuard {
    async fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            match self.arbiter.release(lease).await {
                Ok(true) => {}
                Ok(false) => warn!(slot = lease.slot, "lease was reclaimed before the request finished"),
                Err(err) => error!(slot = lease.slot, error = %err, "failed to release slot"),
            }
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            let arbiter = self.arbiter.clone();
            debug!(slot = lease.slot, "request abandoned, releasing slot in background");
            tokio::spawn(async move {
                let _ = arbiter.release(lease).await;
            });
        }
    }
}

pub async fn admit(State(node): State<Node>, mut request: Request, next: Next) -> Response {
    let presented = session_id(request.headers()).unwrap_or_default();

    let (lease, session) = match node.arbiter().acquire(&presented).await {
        Ok(Admission::Granted { lease, session }) => (lease, session),
        Ok(Admission::Exhausted) => {
            warn!(path = %request.uri().path(), "admission pool exhausted");
            return error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "too many concurrent requests, try again later",
            );
        }
        Err(err) => {
            error!(error = %err, "admission unavailable");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "admission unavailable");
        }
    };

    let guard = SlotGuard {
        arbiter: node.arbiter().clone(),
        lease: Some(lease),
    };
    let issue_cookie = session.id != presented;
    let session_id = session.id.clone();
    request
        .extensions_mut()
        .insert(RequestContext { lease, session });

    let mut response = next.run(request).await;
    guard.release().await;

    // handlers that set their own cookie (logout) win
    if issue_cookie && !response.headers().contains_key(SET_COOKIE) {
        match session_cookie(&session_id) {
            Ok(cookie) => {
                response.headers_mut().insert(SET_COOKIE, cookie);
            }
            Err(err) => error!("Failed to build session cookie: {err}"),
        }
    }
    response
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(COOKIE)?.to_str().ok()?;
    for pair in value.split(';') {
        let Some((key, val)) = pair.trim().split_once('=') else {
            continue;
        };
        let val = val.trim();
        if key.trim() == SESSION_COOKIE && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

pub(crate) fn session_cookie(id: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax"
    ))
}

pub(crate) fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("auth-token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_read_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; secure; auth-token=abc-123 ; other=1"),
        );
        assert_eq!(session_id(&headers), Some("abc-123".to_string()));

        headers.insert(COOKIE, HeaderValue::from_static("auth-token="));
        assert_eq!(session_id(&headers), None);

        assert_eq!(session_id(&HeaderMap::new()), None);
    }

    #[test]
    fn cleared_cookie_matches_session_cookie_name() {
        let cleared = clear_session_cookie();
        assert!(cleared
            .to_str()
            .is_ok_and(|c| c.starts_with(&format!("{SESSION_COOKIE}="))));
    }
}
