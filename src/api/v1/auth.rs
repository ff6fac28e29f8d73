use crate::api::v1::models::ApiResponse;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Bearer 令牌认证中间件，未配置令牌时放行所有请求
pub async fn auth_middleware(
    State(auth_token): State<Option<Arc<str>>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiResponse<()>> {
    let Some(expected_token) = auth_token else {
        return Ok(next.run(request).await);
    };

    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok());

    match auth_header.and_then(|auth| auth.strip_prefix("Bearer ")) {
        Some(token) if token.trim() == expected_token.as_ref() => Ok(next.run(request).await),
        Some(_) => Err(ApiResponse::error(
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "Invalid bearer token",
        )),
        None => Err(ApiResponse::error(
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "Bearer authentication required",
        )),
    }
}
