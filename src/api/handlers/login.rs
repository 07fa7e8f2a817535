use crate::auth::{AuthError, AuthResult, Authenticator, Credentials};
use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    status: String,
    /// Monev token.
    access_token: String,
    /// MagangHub SSO access token.
    magang_token: String,
    /// MagangHub portal cookies, `name=value; ...`.
    magang_cookie: String,
}

impl From<AuthResult> for LoginResponse {
    fn from(result: AuthResult) -> Self {
        Self {
            status: "success".to_string(),
            access_token: result.monev_access_token,
            magang_token: result.sso_tokens.access_token,
            magang_cookie: result.cookie_string,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginFailed {
    status: String,
    /// Machine-readable failure code, e.g. `NO_REDIRECT`.
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
    message: String,
}

impl LoginFailed {
    pub(crate) fn response(
        status: StatusCode,
        stage: Option<String>,
        message: impl Into<String>,
    ) -> Response {
        (
            status,
            Json(Self {
                status: "error".to_string(),
                stage,
                message: message.into(),
            }),
        )
            .into_response()
    }
}

impl From<AuthError> for LoginFailed {
    fn from(err: AuthError) -> Self {
        Self {
            status: "error".to_string(),
            stage: Some(err.stage.as_str().to_string()),
            message: err.message,
        }
    }
}

#[utoipa::path(
    post,
    path= "/api/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Both SSO and Monev tokens obtained", body = LoginResponse, content_type = "application/json"),
        (status = 400, description = "Missing or malformed body", body = LoginFailed),
        (status = 401, description = "Login failed at the reported stage", body = LoginFailed),
    ),
    tag = "auth",
)]
/// Log in to MagangHub SSO and Monev with one set of credentials.
///
/// Can take up to two minutes: most of it is the headless browser waiting on Monev.
#[instrument(skip(authenticator, payload))]
pub async fn login(
    authenticator: Extension<Arc<Authenticator>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!("Rejected login body: {rejection}");
            return LoginFailed::response(StatusCode::BAD_REQUEST, None, rejection.body_text());
        }
    };

    if request.username.trim().is_empty() || request.password.is_empty() {
        return LoginFailed::response(
            StatusCode::BAD_REQUEST,
            None,
            "username and password are required",
        );
    }

    let credentials = Credentials::new(request.username.trim(), request.password);

    match authenticator.login(&credentials).await {
        Ok(result) => (StatusCode::OK, Json(LoginResponse::from(result))).into_response(),
        Err(err) => {
            error!(stage = %err.stage, "Login failed: {}", err.message);
            (StatusCode::UNAUTHORIZED, Json(LoginFailed::from(err))).into_response()
        }
    }
}
