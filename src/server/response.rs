//! Response envelope shared by every endpoint.
//!
//! ```json
//! { "error": false, "success": true, "data": { ... }, "message": "..." }
//! ```
//!
//! On failure `error` is `true`, `success` is `false`, `data` is `null` and
//! `message` carries the error text. The HTTP status comes from
//! [`GatewayError::status_code`].

use crate::error::GatewayError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Wire format of every response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub error: bool,
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
}

/// An [`Envelope`] plus the status code it is sent with.
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    body: Envelope<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            body: Envelope {
                error: false,
                success: true,
                data: Some(data),
                message: message.into(),
            },
        }
    }

    /// Success with `data: null`.
    pub fn ok_empty(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            body: Envelope {
                error: false,
                success: true,
                data: None,
                message: message.into(),
            },
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Envelope {
                error: true,
                success: false,
                data: None,
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl<T: Serialize> From<GatewayError> for ApiResponse<T> {
    fn from(err: GatewayError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(kind = err.kind(), "{err}");
        } else {
            warn!(kind = err.kind(), "{err}");
        }
        Self::error(status, err.to_string())
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
