//! Pipeline stages for turning an upload into page-level OCR results.
//!
//! Each submodule implements one transformation step. [`crate::service`]
//! wires them together per request.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ ocr ──▶ normalize ──▶ postprocess
//! (upload)  (pdfium)   (engine) (records+md)  (fragments, join)
//!              │          │
//!              └ encode ──┘
//! ```
//!
//! 1. [`input`]  validate the upload's format and content, sanitise its name
//! 2. [`render`] rasterise selected PDF pages; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`] write page images to disk and package them for VLM requests
//! 4. [`ocr`]    run the engine on every page with bounded concurrency and
//!    retries; one page failing never aborts its siblings
//! 5. [`normalize`] reduce heterogeneous engine outputs to JSON records and
//!    Markdown
//! 6. [`postprocess`] clean VLM Markdown, add page headings, join fragments

pub mod encode;
pub mod input;
pub mod normalize;
pub mod ocr;
pub mod postprocess;
pub mod render;
