//! Error types for the ocr-gateway library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`GatewayError`] is **fatal**: the request cannot proceed at all (bad
//!   upload, malformed page selection, unreadable PDF, disk full). Every
//!   variant maps to one HTTP status via [`GatewayError::status_code`].
//!
//! * [`PageError`] is **non-fatal**: a single page failed to render or OCR
//!   but its siblings are fine. Page errors never leave the orchestrator
//!   unless *every* page failed, in which case they are folded into
//!   [`GatewayError::AllPagesFailed`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pipeline.
#[derive(Debug, Error)]
pub enum GatewayError {
    // ── Input errors (400) ────────────────────────────────────────────────
    /// The `pages` value is neither a JSON integer/array nor a comma list.
    #[error("Invalid 'pages' value '{input}'. Use a JSON array [1,2] or comma-separated numbers '1,2'")]
    InvalidSelectionFormat { input: String },

    /// The `pages` value decoded to numbers, but none of them is positive.
    #[error("Page numbers must be positive integers (got '{input}')")]
    NoValidPages { input: String },

    /// Extension / content type is not one of pdf, jpg, jpeg, png, bmp.
    #[error("Unsupported file format for '{filename}'. Use one of: .pdf, .jpg, .jpeg, .png, .bmp")]
    UnsupportedFormat { filename: String },

    /// The file claims a supported format but its content cannot be read.
    #[error("Unable to read document '{filename}': {detail}")]
    UnreadableDocument { filename: String, detail: String },

    /// The PDF parsed fine but has zero pages.
    #[error("Document '{filename}' has no pages")]
    EmptyDocument { filename: String },

    /// None of the requested pages exists in the document.
    #[error("Requested pages {requested:?} are out of range (document has {total} pages)")]
    PageOutOfRange { requested: Vec<usize>, total: usize },

    /// An explicit selection on a single-image upload that excludes page 1.
    #[error("Image files only have page 1 (requested {requested:?})")]
    UnsupportedPageRequest { requested: Vec<usize> },

    /// Multipart body without a `file` field.
    #[error("Missing 'file' field in multipart form")]
    MissingFile,

    /// The multipart body itself could not be read.
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    // ── Auth (401) ────────────────────────────────────────────────────────
    /// The API-key header is missing or does not match.
    #[error("Unauthorized")]
    Unauthorized,

    // ── Processing errors (500) ───────────────────────────────────────────
    /// Every selected page failed to render or OCR.
    #[error("All {total} pages failed to process. First error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// Writing an artifact to the output directory failed.
    #[error("Failed to write '{path}': {source}")]
    PersistenceFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A path handed to the artifact store does not live under its root.
    #[error("Path '{path}' is outside the output root '{root}'")]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    /// The OCR engine could not be constructed.
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status code the server layer answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidSelectionFormat { .. }
            | GatewayError::NoValidPages { .. }
            | GatewayError::UnsupportedFormat { .. }
            | GatewayError::UnreadableDocument { .. }
            | GatewayError::EmptyDocument { .. }
            | GatewayError::PageOutOfRange { .. }
            | GatewayError::UnsupportedPageRequest { .. }
            | GatewayError::MissingFile
            | GatewayError::InvalidUpload(_) => 400,
            GatewayError::Unauthorized => 401,
            GatewayError::AllPagesFailed { .. }
            | GatewayError::PersistenceFailed { .. }
            | GatewayError::PathOutsideRoot { .. }
            | GatewayError::EngineUnavailable(_)
            | GatewayError::PdfiumBindingFailed(_)
            | GatewayError::Internal(_) => 500,
        }
    }

    /// Stable snake_case identifier, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidSelectionFormat { .. } => "invalid_selection_format",
            GatewayError::NoValidPages { .. } => "no_valid_pages",
            GatewayError::UnsupportedFormat { .. } => "unsupported_format",
            GatewayError::UnreadableDocument { .. } => "unreadable_document",
            GatewayError::EmptyDocument { .. } => "empty_document",
            GatewayError::PageOutOfRange { .. } => "page_out_of_range",
            GatewayError::UnsupportedPageRequest { .. } => "unsupported_page_request",
            GatewayError::MissingFile => "missing_file",
            GatewayError::InvalidUpload(_) => "invalid_upload",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::AllPagesFailed { .. } => "all_pages_failed",
            GatewayError::PersistenceFailed { .. } => "persistence_failed",
            GatewayError::PathOutsideRoot { .. } => "path_outside_root",
            GatewayError::EngineUnavailable(_) => "engine_unavailable",
            GatewayError::PdfiumBindingFailed(_) => "pdfium_binding_failed",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// `true` for errors caused by the client's input.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

/// A non-fatal error for a single page.
///
/// Produced at the page boundary by the rasteriser and the OCR invoker.
/// The request continues unless ALL pages fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation or image encoding failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The OCR engine failed on every attempt.
    #[error("Page {page}: OCR failed after {attempts} attempt(s): {detail}")]
    OcrFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// The engine answered but its output exposes no usable structured export.
    #[error("Page {page}: result normalisation failed: {detail}")]
    NormalizationFailed { page: usize, detail: String },
}

impl PageError {
    /// 1-indexed page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::OcrFailed { page, .. }
            | PageError::NormalizationFailed { page, .. } => *page,
        }
    }
}
