//! Output types produced by the pipeline and returned by the HTTP layer.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// One raster image handed to the OCR engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed page number.
    pub page: usize,
    /// Where the image lives (scratch dir, artifact tree, or the upload itself).
    pub path: PathBuf,
    /// Render resolution. `None` for uploaded images used as-is.
    pub dpi: Option<u32>,
}

/// OCR result for a single page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OcrPageResult {
    /// 1-indexed page number, equal to the originating [`PageImage::page`].
    pub page: usize,
    /// One structured record per engine output object. Schema is engine-defined.
    pub results: Vec<Value>,
    /// Markdown for this page. Empty when the engine produced none.
    pub markdown: String,
}

/// Wall-clock timings for one request, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub render_ms: u64,
    pub ocr_ms: u64,
    pub total_ms: u64,
}

/// Everything one pipeline run produced, before it is shaped into a response.
#[derive(Debug, Clone)]
pub struct DocumentResult {
    /// Successful pages in ascending page order.
    pub pages: Vec<OcrPageResult>,
    /// Combined Markdown of every successful page.
    pub markdown: String,
    /// Pages that failed to render, OCR, or normalise.
    pub failed: Vec<PageError>,
    /// Number of pages the run targeted after page selection.
    pub pages_requested: usize,
    /// Pages written to disk by the rasteriser, in page order.
    pub images: Vec<PageImage>,
    pub stats: RunStats,
}

impl DocumentResult {
    /// Page numbers that failed, in ascending order.
    pub fn failed_pages(&self) -> Vec<usize> {
        self.failed.iter().map(PageError::page).collect()
    }
}

/// `data` payload of `POST /ocr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResponseData {
    pub pages: Vec<OcrPageResult>,
    pub markdown: String,
}

/// `data` payload of `POST /document-parsing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingResponseData {
    /// Combined Markdown.
    pub markdown: String,
    /// Sanitised name the original upload was stored under.
    pub filename: String,
    /// File name of the combined Markdown artifact.
    pub output_filename: String,
    /// Public URL of the combined Markdown artifact.
    pub download_url: String,
    /// Public URLs of the page images the engine saw.
    pub stored_images: Vec<String>,
    /// Public URLs of the per-page Markdown artifacts.
    pub stored_markdown: Vec<String>,
    /// Number of pages that produced a result.
    pub pages_processed: usize,
}
