//! Shared-secret API-key check for the processing endpoints.
//!
//! Clients send the key in `X-API-Key`. `Paddle-API-Key` is accepted too
//! for clients written against the older service. When no key is
//! configured every request passes.

use super::response::ApiResponse;
use super::AppState;
use crate::error::GatewayError;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const LEGACY_API_KEY_HEADER: &str = "paddle-api-key";

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    if provided_key(request.headers()) == Some(expected) {
        next.run(request).await
    } else {
        ApiResponse::<()>::from(GatewayError::Unauthorized).into_response()
    }
}

fn provided_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .or_else(|| headers.get(LEGACY_API_KEY_HEADER))
        .and_then(|v| v.to_str().ok())
}
