use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRejected {
    status: String,
    message: String,
}

#[utoipa::path(
    post,
    path= "/api/refresh-token",
    responses (
        (status = 401, description = "Refresh is not supported, log in again", body = RefreshRejected),
    ),
    tag = "auth",
)]
/// Sessions are never refreshed server-side; clients must call `/api/login` again.
pub async fn refresh_token() -> impl IntoResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(RefreshRejected {
            status: "auth_error".to_string(),
            message: "Silakan login ulang.".to_string(),
        }),
    )
}
