//! Endpoint handlers.

use super::response::ApiResponse;
use super::AppState;
use crate::error::GatewayError;
use crate::output::{OcrResponseData, ParsingResponseData};
use crate::pipeline::input::UploadedDocument;
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header, HeaderMap},
};
use tracing::info;

pub const HEALTH_MESSAGE: &str = "Service is healthy and ready";

/// `GET /health`
pub async fn health() -> ApiResponse<()> {
    ApiResponse::ok_empty(HEALTH_MESSAGE)
}

/// `POST /ocr`: multipart `file` + optional `pages`.
pub async fn ocr(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResponse<OcrResponseData> {
    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(e) => return e.into(),
    };
    info!("POST /ocr: {} ({} bytes)", form.upload.display_name(), form.upload.bytes.len());

    match state.pipeline.ocr(form.upload, form.pages.as_deref()).await {
        Ok(data) => {
            let message = format!("OCR completed for {} page(s)", data.pages.len());
            ApiResponse::ok(data, message)
        }
        Err(e) => e.into(),
    }
}

/// `POST /document-parsing`: like `/ocr`, but artifacts are persisted.
pub async fn parse_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResponse<ParsingResponseData> {
    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(e) => return e.into(),
    };
    info!(
        "POST /document-parsing: {} ({} bytes)",
        form.upload.display_name(),
        form.upload.bytes.len()
    );

    let base_url = base_url(&state, &headers);
    match state
        .pipeline
        .parse_document(form.upload, form.pages.as_deref(), &base_url)
        .await
    {
        Ok(data) => ApiResponse::ok(data, "Document parsed successfully"),
        Err(e) => e.into(),
    }
}

struct UploadForm {
    upload: UploadedDocument,
    pages: Option<String>,
}

async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<UploadForm, GatewayError> {
    let mut multipart = multipart.map_err(|e| GatewayError::InvalidUpload(e.body_text()))?;
    let mut upload = None;
    let mut pages = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::InvalidUpload(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::InvalidUpload(e.body_text()))?;
                upload = Some(UploadedDocument::new(filename, content_type, bytes.to_vec()));
            }
            "pages" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| GatewayError::InvalidUpload(e.body_text()))?;
                pages = Some(text);
            }
            _ => {}
        }
    }

    Ok(UploadForm {
        upload: upload.ok_or(GatewayError::MissingFile)?,
        pages,
    })
}

/// Base for download links: configured public URL, else the request's host.
fn base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(ref base) = state.public_base_url {
        return base.trim_end_matches('/').to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}")
}
