//! # ocr-gateway
//!
//! Document-ingestion HTTP service: accept a PDF or image upload, pick the
//! requested pages, rasterise them, run an OCR engine on each page and hand
//! back structured records plus assembled Markdown.
//!
//! ## Request Flow
//!
//! ```text
//! multipart upload
//!  │
//!  ├─ 1. Validate   extension / content type, then page selection, then bytes
//!  ├─ 2. Select     parse `pages` (JSON list, int, comma list, null)
//!  ├─ 3. Render     pdfium → one image per selected page (spawn_blocking)
//!  ├─ 4. OCR        engine per page, bounded concurrency, per-page isolation
//!  ├─ 5. Normalise  engine outputs → JSON records + Markdown
//!  ├─ 6. Aggregate  "## Page N" fragments joined into one document
//!  └─ 7. Persist    (document-parsing only) originals, pages, Markdown → URLs
//! ```
//!
//! ## Library Use
//!
//! ```rust,no_run
//! use ocr_gateway::{
//!     ArtifactStore, ConfiguredEngineFactory, EngineConfig, EngineHandle, PdfiumBackend,
//!     Pipeline, PipelineConfig, RenderPolicy, UploadedDocument,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .dpi(200)
//!         .render_policy(RenderPolicy::PerPage)
//!         .build()?;
//!     let engine = EngineHandle::new(Arc::new(ConfiguredEngineFactory::new(EngineConfig::default())));
//!     let pipeline = Pipeline::new(
//!         config,
//!         Arc::new(engine),
//!         Arc::new(PdfiumBackend::new()),
//!         ArtifactStore::new("outputs", "/outputs"),
//!     );
//!
//!     let upload = UploadedDocument::new(Some("scan.pdf".into()), None, std::fs::read("scan.pdf")?);
//!     let result = pipeline.ocr(upload, Some("[1, 2]")).await?;
//!     println!("{}", result.markdown);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocr-gateway` server binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    EngineConfig, EngineKind, PageFilterMode, PageSelection, PipelineConfig,
    PipelineConfigBuilder, RasterFormat, RenderPolicy, ServerConfig,
};
pub use engine::{
    ConfiguredEngineFactory, EngineError, EngineFactory, EngineHandle, EngineOutput, OcrEngine,
};
pub use error::{GatewayError, PageError};
pub use output::{DocumentResult, OcrPageResult, OcrResponseData, PageImage, ParsingResponseData};
pub use pipeline::input::UploadedDocument;
pub use pipeline::render::{PdfRasterBackend, PdfiumBackend};
pub use server::{create_router, AppState};
pub use service::Pipeline;
pub use store::ArtifactStore;
