use crate::{
    api::handlers::health,
    auth::Authenticator,
};
use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    middleware,
    routing::options,
    Extension, Router,
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;
mod timeout;

pub use self::openapi::openapi;

/// Full application router, without binding a socket.
pub fn app(authenticator: Arc<Authenticator>, login_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    let (router, openapi) = openapi::api_router().split_for_parts();

    router
        .route("/health", options(health::health))
        .merge(SwaggerUi::new("/docs").url("/openapi.json", openapi))
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
                .layer(cors)
                .layer(middleware::from_fn_with_state(
                    login_timeout,
                    timeout::request_timeout,
                ))
                .layer(Extension(authenticator)),
        )
}

/// Serve the API until Ctrl-C.
/// # Errors
/// Returns an error if the server fails to start
pub async fn new(port: u16, authenticator: Arc<Authenticator>, login_timeout: Duration) -> Result<()> {
    let app = app(authenticator, login_timeout);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let path = request.uri().path();
    let method = request.method().as_str();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    // Headers stay out of the span: login bodies are small, but cookies are not.
    info_span!("http.request", method, path, request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        fake::{FakeEngine, Script},
        AuthConfig,
    };
    use axum::{body::to_bytes, http::StatusCode};
    use tower::ServiceExt;

    fn test_app() -> anyhow::Result<Router> {
        let authenticator = Authenticator::new(
            AuthConfig::maganghub()?,
            Arc::new(FakeEngine::new(Script::default())),
        );
        Ok(app(Arc::new(authenticator), Duration::from_secs(120)))
    }

    #[tokio::test]
    async fn health_gets_request_id() -> anyhow::Result<()> {
        let response = test_app()?
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(Ulid::from_string(request_id).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn options_health_is_routed() -> anyhow::Result<()> {
        let response = test_app()?
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn serves_openapi_document() -> anyhow::Result<()> {
        let response = test_app()?
            .oneshot(Request::builder().uri("/openapi.json").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let doc: serde_json::Value = serde_json::from_slice(&body)?;
        assert!(doc["paths"]["/api/login"]["post"].is_object());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_is_always_unauthorized() -> anyhow::Result<()> {
        let response = test_app()?
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/refresh-token")
                    .body(Body::empty())?,
            )
            .await?;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
