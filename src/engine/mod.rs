//! OCR engine abstraction.
//!
//! An [`OcrEngine`] turns one image file into a list of [`EngineOutput`]
//! objects. Engines differ in which exports their outputs support: some hand
//! back a JSON value directly, some only a serialised string, some can only
//! dump files into a directory. [`EngineOutput`] models each export as an
//! optional capability; the normaliser in [`crate::pipeline::normalize`]
//! probes them in a fixed order.
//!
//! The process holds exactly one engine, behind an [`EngineHandle`]. The
//! handle builds it lazily on first use (or eagerly via
//! [`EngineHandle::preload`]) and never rebuilds it.

pub mod remote;
pub mod vlm;

pub use remote::LayoutParsingEngine;
pub use vlm::VlmEngine;

use crate::config::{EngineConfig, EngineKind};
use crate::error::GatewayError;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

/// Errors raised by an engine or one of its outputs.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine cannot be built from the current configuration.
    #[error("Engine not configured: {0}")]
    NotConfigured(String),

    /// The model or service rejected the input or failed while running.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Network-level failure talking to a remote engine.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The engine answered with something we cannot interpret.
    #[error("Unexpected engine response: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One result object returned by [`OcrEngine::predict`].
///
/// Every method is an optional capability: `None` means "this output does
/// not support that export", `Some(Err(..))` means it does but the call
/// failed.
pub trait EngineOutput: Send + Sync {
    /// Structured record as an in-memory JSON value.
    fn to_value(&self) -> Option<Value> {
        None
    }

    /// Structured record as a serialised JSON string.
    fn to_json(&self) -> Option<Result<String, EngineError>> {
        None
    }

    /// Write the structured record as one or more `*.json` files into `dir`.
    fn save_to_json(&self, _dir: &Path) -> Option<Result<(), EngineError>> {
        None
    }

    /// Markdown rendering as a plain string.
    fn markdown(&self) -> Option<String> {
        None
    }

    /// Markdown as a serialised JSON object holding a `markdown_texts` or
    /// `text` field.
    fn markdown_export(&self) -> Option<Result<String, EngineError>> {
        None
    }

    /// Write the Markdown rendering as one or more `*.md` files into `dir`.
    fn save_to_markdown(&self, _dir: &Path) -> Option<Result<(), EngineError>> {
        None
    }
}

/// A document-understanding engine.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Run the engine on one image file.
    async fn predict(&self, image: &Path) -> Result<Vec<Box<dyn EngineOutput>>, EngineError>;

    /// Engine-specific concatenation of per-page Markdown fragments.
    ///
    /// `None` lets the caller fall back to joining with a blank line.
    fn concatenate_markdown(&self, _fragments: &[String]) -> Option<String> {
        None
    }
}

/// Builds the process-wide engine.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn OcrEngine>, EngineError>;
}

/// Factory driven by [`EngineConfig`].
pub struct ConfiguredEngineFactory {
    config: EngineConfig,
}

impl ConfiguredEngineFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineFactory for ConfiguredEngineFactory {
    async fn create(&self) -> Result<Arc<dyn OcrEngine>, EngineError> {
        let engine: Arc<dyn OcrEngine> = match self.config.kind {
            EngineKind::Vlm => Arc::new(VlmEngine::from_config(&self.config)?),
            EngineKind::LayoutParsing => Arc::new(LayoutParsingEngine::from_config(&self.config)?),
        };
        info!("OCR engine ready: {}", engine.name());
        Ok(engine)
    }
}

/// Factory that hands out an engine built elsewhere.
struct PrebuiltFactory(Arc<dyn OcrEngine>);

#[async_trait]
impl EngineFactory for PrebuiltFactory {
    async fn create(&self) -> Result<Arc<dyn OcrEngine>, EngineError> {
        Ok(Arc::clone(&self.0))
    }
}

/// Lazily-initialised, process-wide engine.
///
/// Concurrent first callers of [`EngineHandle::get`] share one
/// initialisation; a failed initialisation is retried by the next caller.
pub struct EngineHandle {
    cell: OnceCell<Arc<dyn OcrEngine>>,
    factory: Arc<dyn EngineFactory>,
}

impl EngineHandle {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            cell: OnceCell::new(),
            factory,
        }
    }

    /// Wrap an already-built engine. Mostly useful in tests.
    pub fn from_engine(engine: Arc<dyn OcrEngine>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(Arc::clone(&engine))),
            factory: Arc::new(PrebuiltFactory(engine)),
        }
    }

    /// Return the engine, building it on first use.
    pub async fn get(&self) -> Result<Arc<dyn OcrEngine>, GatewayError> {
        self.cell
            .get_or_try_init(|| self.factory.create())
            .await
            .map(Arc::clone)
            .map_err(|e| GatewayError::EngineUnavailable(e.to_string()))
    }

    /// Build the engine now instead of on the first request.
    pub async fn preload(&self) -> Result<(), GatewayError> {
        self.get().await.map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullEngine;

    #[async_trait]
    impl OcrEngine for NullEngine {
        fn name(&self) -> &str {
            "null"
        }

        async fn predict(&self, _image: &Path) -> Result<Vec<Box<dyn EngineOutput>>, EngineError> {
            Ok(Vec::new())
        }
    }

    struct CountingFactory {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl EngineFactory for CountingFactory {
        async fn create(&self) -> Result<Arc<dyn OcrEngine>, EngineError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if self.fail_first && n == 0 {
                return Err(EngineError::NotConfigured("no model".into()));
            }
            Ok(Arc::new(NullEngine))
        }
    }

    #[tokio::test]
    async fn concurrent_first_use_initialises_once() {
        let factory = Arc::new(CountingFactory {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        let handle = Arc::new(EngineHandle::new(factory.clone()));
        assert!(!handle.is_initialized());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                tokio::spawn(async move { handle.get().await.map(|e| e.name().to_string()) })
            })
            .collect();
        for t in tasks {
            assert_eq!(t.await.unwrap().unwrap(), "null");
        }

        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_initialized());
    }

    #[tokio::test]
    async fn failed_initialisation_is_retried() {
        let factory = Arc::new(CountingFactory {
            calls: AtomicUsize::new(0),
            fail_first: true,
        });
        let handle = EngineHandle::new(factory.clone());

        let err = handle.get().await.err().unwrap();
        assert!(matches!(err, GatewayError::EngineUnavailable(_)));
        assert!(handle.preload().await.is_ok());
        assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_capabilities_are_absent() {
        struct Bare;
        impl EngineOutput for Bare {}
        let out = Bare;
        assert!(out.to_value().is_none());
        assert!(out.to_json().is_none());
        assert!(out.markdown().is_none());
        assert!(out.save_to_json(Path::new("/nonexistent")).is_none());
    }

    #[test]
    fn prebuilt_handle_is_initialised() {
        let handle = EngineHandle::from_engine(Arc::new(NullEngine));
        assert!(handle.is_initialized());
    }
}
