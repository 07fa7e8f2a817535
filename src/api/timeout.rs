//! Request deadline with the same JSON error body the handlers use.

use crate::api::handlers::login::LoginFailed;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

pub const STAGE_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";

/// Drops the inner future after `limit`; a running login tears its browser down with it.
pub async fn request_timeout(
    State(limit): State<Duration>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    match timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(path = %path, "Request exceeded {}s", limit.as_secs());
            LoginFailed::response(
                StatusCode::REQUEST_TIMEOUT,
                Some(STAGE_REQUEST_TIMEOUT.to_string()),
                format!("request did not complete within {}s", limit.as_secs()),
            )
        }
    }
}
