//! HTTP surface.
//!
//! | Route                     | Auth    | Purpose                              |
//! |---------------------------|---------|--------------------------------------|
//! | `GET  /health`            | none    | liveness                             |
//! | `POST /ocr`               | API key | OCR, nothing persisted               |
//! | `POST /document-parsing`  | API key | OCR + persisted artifacts and URLs   |
//! | `GET  {mount}/...`        | none    | static files from the artifact store |

pub mod auth;
pub mod handlers;
pub mod response;

use crate::service::Pipeline;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// `None` disables the API-key check.
    pub api_key: Option<String>,
    pub public_base_url: Option<String>,
    pub max_upload_bytes: usize,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/ocr", post(handlers::ocr))
        .route("/document-parsing", post(handlers::parse_document))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    let mount = state.pipeline.store().mount().to_string();
    let outputs = ServeDir::new(state.pipeline.store().root());

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .nest_service(&mount, outputs)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
