//! OCR invocation: one engine call per page image, with failures isolated
//! to the page that caused them.
//!
//! ## Retry Strategy
//!
//! Remote engines fail transiently (timeouts, 429, 503). With
//! `max_retries > 0` a failed page is retried after
//! `retry_backoff_ms * 2^(attempt-1)`: with a 500 ms base and 3 retries the
//! waits are 500 ms → 1 s → 2 s. Local engines usually run with no retries.
//!
//! ## Ordering
//!
//! Pages may run concurrently (`ocr_concurrency`), so outcomes arrive in
//! completion order. They are sorted back into page order before returning.

use crate::config::PipelineConfig;
use crate::engine::OcrEngine;
use crate::error::PageError;
use crate::output::{OcrPageResult, PageImage};
use crate::pipeline::normalize;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Result of one page: its OCR output, or why it has none.
pub type PageOutcome = Result<OcrPageResult, PageError>;

fn outcome_page(outcome: &PageOutcome) -> usize {
    match outcome {
        Ok(result) => result.page,
        Err(e) => e.page(),
    }
}

/// Drives the engine over a list of page images.
#[derive(Debug, Clone)]
pub struct OcrInvoker {
    concurrency: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    scratch_root: PathBuf,
}

impl OcrInvoker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            concurrency: config.ocr_concurrency.max(1),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            scratch_root: config.scratch_root(),
        }
    }

    /// Run every image through the engine. Returns one outcome per image,
    /// ascending by page. Never fails as a whole.
    pub async fn invoke(&self, engine: &Arc<dyn OcrEngine>, images: &[PageImage]) -> Vec<PageOutcome> {
        let mut outcomes: Vec<PageOutcome> = stream::iter(images.to_vec().into_iter().map(|image| {
            let engine = Arc::clone(engine);
            let invoker = self.clone();
            async move { invoker.process_page(engine.as_ref(), &image).await }
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        outcomes.sort_by_key(outcome_page);
        outcomes
    }

    /// Delay before retry `attempt` (1-based): doubles each time, saturating.
    fn backoff_ms(&self, attempt: u32) -> u64 {
        self.retry_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }

    async fn process_page(&self, engine: &dyn OcrEngine, image: &PageImage) -> PageOutcome {
        let page = image.page;
        let start = Instant::now();
        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.backoff_ms(attempt);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match engine.predict(&image.path).await {
                Ok(outputs) => {
                    debug!(
                        "Page {}: {} output(s) from {} in {:?}",
                        page,
                        outputs.len(),
                        engine.name(),
                        start.elapsed()
                    );
                    let normalized = normalize::normalize(page, outputs, &self.scratch_root).await?;
                    return Ok(OcrPageResult {
                        page,
                        results: normalized.records,
                        markdown: normalized.markdown,
                    });
                }
                Err(e) => {
                    warn!("Page {}: attempt {} failed: {}", page, attempt + 1, e);
                    last_err = e.to_string();
                }
            }
        }

        Err(PageError::OcrFailed {
            page,
            attempts: self.max_retries + 1,
            detail: last_err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, EngineOutput};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Text(String);
    impl EngineOutput for Text {
        fn to_value(&self) -> Option<Value> {
            Some(json!({ "text": self.0 }))
        }
        fn markdown(&self) -> Option<String> {
            Some(self.0.clone())
        }
    }

    /// Echoes the file stem; fails on stems listed in `fail_on` until
    /// `recover_after` calls have been made.
    struct ScriptedEngine {
        fail_on: Vec<&'static str>,
        recover_after: Option<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OcrEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn predict(&self, image: &Path) -> Result<Vec<Box<dyn EngineOutput>>, EngineError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let stem = image.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
            let recovered = self.recover_after.is_some_and(|r| n >= r);
            if self.fail_on.contains(&stem.as_str()) && !recovered {
                return Err(EngineError::Inference(format!("cannot read {stem}")));
            }
            // Later pages finish first under concurrency.
            let delay = 30u64.saturating_sub(stem.len() as u64 * 3);
            sleep(Duration::from_millis(delay)).await;
            let output: Box<dyn EngineOutput> = Box::new(Text(stem));
            Ok(vec![output])
        }
    }

    fn images(n: usize) -> Vec<PageImage> {
        (1..=n)
            .map(|p| PageImage {
                page: p,
                path: PathBuf::from(format!("/scratch/{}.png", "p".repeat(p))),
                dpi: Some(200),
            })
            .collect()
    }

    fn invoker(scratch: &Path, concurrency: usize, retries: u32) -> OcrInvoker {
        let config = PipelineConfig::builder()
            .ocr_concurrency(concurrency)
            .max_retries(retries)
            .retry_backoff_ms(1)
            .scratch_dir(scratch)
            .build()
            .unwrap();
        OcrInvoker::new(&config)
    }

    #[tokio::test]
    async fn failing_page_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let engine: Arc<dyn OcrEngine> = Arc::new(ScriptedEngine {
            fail_on: vec!["pp"],
            recover_after: None,
            calls: AtomicUsize::new(0),
        });

        let outcomes = invoker(dir.path(), 1, 0).invoke(&engine, &images(3)).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].as_ref().unwrap().markdown, "p");
        assert!(matches!(outcomes[1], Err(PageError::OcrFailed { page: 2, attempts: 1, .. })));
        assert_eq!(outcomes[2].as_ref().unwrap().page, 3);
    }

    #[tokio::test]
    async fn concurrent_outcomes_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let engine: Arc<dyn OcrEngine> = Arc::new(ScriptedEngine {
            fail_on: vec![],
            recover_after: None,
            calls: AtomicUsize::new(0),
        });

        let outcomes = invoker(dir.path(), 4, 0).invoke(&engine, &images(5)).await;
        let pages: Vec<usize> = outcomes.iter().map(outcome_page).collect();
        assert_eq!(pages, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn retries_recover_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let engine: Arc<dyn OcrEngine> = Arc::new(ScriptedEngine {
            fail_on: vec!["p"],
            recover_after: Some(2),
            calls: AtomicUsize::new(0),
        });

        let outcomes = invoker(dir.path(), 1, 3).invoke(&engine, &images(1)).await;
        let result = outcomes[0].as_ref().unwrap();
        assert_eq!(result.results, vec![json!({"text": "p"})]);
    }

    #[tokio::test]
    async fn invocation_runs_on_spawned_task() {
        let dir = tempfile::tempdir().unwrap();
        let engine: Arc<dyn OcrEngine> = Arc::new(ScriptedEngine {
            fail_on: vec![],
            recover_after: None,
            calls: AtomicUsize::new(0),
        });
        let invoker = invoker(dir.path(), 2, 0);
        let pages = images(3);

        let outcomes = tokio::spawn(async move { invoker.invoke(&engine, &pages).await })
            .await
            .unwrap();
        assert_eq!(outcomes.iter().map(outcome_page).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder()
            .max_retries(100)
            .retry_backoff_ms(500)
            .scratch_dir(dir.path())
            .build()
            .unwrap();
        let invoker = OcrInvoker::new(&config);
        assert_eq!(invoker.backoff_ms(1), 500);
        assert_eq!(invoker.backoff_ms(3), 2000);
        assert_eq!(invoker.backoff_ms(70), u64::MAX);
    }
}
