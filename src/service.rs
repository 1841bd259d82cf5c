//! Request orchestration: upload → validation → rasterisation → OCR →
//! Markdown assembly → (optional) persistence.
//!
//! [`Pipeline`] offers two flows over the same stages:
//!
//! * [`Pipeline::ocr`] keeps everything in a per-request scratch directory
//!   and returns per-page results plus the combined Markdown.
//! * [`Pipeline::parse_document`] persists the original, page images,
//!   per-page Markdown and combined Markdown in the [`ArtifactStore`] and
//!   returns download URLs.
//!
//! Page failures only shrink the result. The request fails when the input
//! is bad, when storage fails, or when no page at all succeeded.

use crate::config::{PageSelection, PipelineConfig};
use crate::engine::{EngineHandle, OcrEngine};
use crate::error::GatewayError;
use crate::output::{
    DocumentResult, OcrPageResult, OcrResponseData, PageImage, ParsingResponseData, RunStats,
};
use crate::pipeline::input::{DocumentKind, UploadedDocument, ValidatedUpload};
use crate::pipeline::ocr::OcrInvoker;
use crate::pipeline::postprocess;
use crate::pipeline::render::{PdfRasterBackend, Rasterizer};
use crate::store::{ArtifactStore, RequestLayout};
use chrono::Local;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    PersistedOriginal,
    Selected,
    Rasterized,
    OcrComplete,
    Aggregated,
    PersistedMarkdown,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::PersistedOriginal => "persisted_original",
            Stage::Selected => "selected",
            Stage::Rasterized => "rasterized",
            Stage::OcrComplete => "ocr_complete",
            Stage::Aggregated => "aggregated",
            Stage::PersistedMarkdown => "persisted_markdown",
            Stage::Responded => "responded",
        };
        f.write_str(name)
    }
}

/// Logs stage transitions for one request.
struct StageTracker {
    request_id: String,
    stage: Stage,
}

impl StageTracker {
    fn new() -> Self {
        let request_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        debug!(request = %request_id, "stage → {}", Stage::Received);
        Self {
            request_id,
            stage: Stage::Received,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug!(request = %self.request_id, "stage {} → {}", self.stage, next);
        self.stage = next;
    }
}

/// A validated upload together with its parsed page selection.
struct Accepted {
    upload: UploadedDocument,
    meta: ValidatedUpload,
    selection: PageSelection,
}

/// Shared, per-process pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    engine: Arc<EngineHandle>,
    rasterizer: Rasterizer,
    invoker: OcrInvoker,
    store: ArtifactStore,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        engine: Arc<EngineHandle>,
        backend: Arc<dyn PdfRasterBackend>,
        store: ArtifactStore,
    ) -> Self {
        Self {
            rasterizer: Rasterizer::new(backend, &config),
            invoker: OcrInvoker::new(&config),
            config,
            engine,
            store,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Ephemeral OCR: nothing outlives the request.
    pub async fn ocr(
        &self,
        upload: UploadedDocument,
        pages: Option<&str>,
    ) -> Result<OcrResponseData, GatewayError> {
        let mut tracker = StageTracker::new();
        let accepted = accept(upload, pages)?;
        tracker.advance(Stage::Validated);

        let scratch = self.request_scratch()?;
        let original = scratch.path().join(&accepted.meta.filename);
        tokio::fs::write(&original, &accepted.upload.bytes)
            .await
            .map_err(|e| GatewayError::PersistenceFailed {
                path: original.clone(),
                source: e,
            })?;
        tracker.advance(Stage::PersistedOriginal);

        let result = self
            .run(
                &mut tracker,
                &accepted,
                &original,
                scratch.path(),
                &accepted.meta.stem,
            )
            .await?;
        log_summary(&accepted.meta.filename, &result);
        tracker.advance(Stage::Responded);

        Ok(OcrResponseData {
            pages: result.pages,
            markdown: result.markdown,
        })
    }

    /// Persistent parsing: artifacts land in the store and come back as URLs.
    pub async fn parse_document(
        &self,
        upload: UploadedDocument,
        pages: Option<&str>,
        base_url: &str,
    ) -> Result<ParsingResponseData, GatewayError> {
        let mut tracker = StageTracker::new();
        let accepted = accept(upload, pages)?;
        tracker.advance(Stage::Validated);

        let layout = RequestLayout::new(Local::now(), accepted.meta.kind);
        let original = self
            .store
            .store(&layout.original(&accepted.meta.filename), &accepted.upload.bytes)
            .await?;
        tracker.advance(Stage::PersistedOriginal);

        let images_dir = self.store.resolve(&layout.images_dir())?;
        let page_stem = layout.page_stem(&accepted.meta.stem);
        let result = self
            .run(&mut tracker, &accepted, &original, &images_dir, &page_stem)
            .await?;
        log_summary(&accepted.meta.filename, &result);

        let stem = &accepted.meta.stem;
        let mut stored_markdown = Vec::with_capacity(result.pages.len());
        for page in &result.pages {
            let path = self
                .store
                .store(&layout.page_markdown(stem, page.page), page.markdown.as_bytes())
                .await?;
            stored_markdown.push(self.store.url_for(&path, base_url)?);
        }

        let combined = self
            .store
            .store(&layout.combined_markdown(stem), result.markdown.as_bytes())
            .await?;
        tracker.advance(Stage::PersistedMarkdown);

        let stored_images = result
            .images
            .iter()
            .map(|image| self.store.url_for(&image.path, base_url))
            .collect::<Result<Vec<_>, _>>()?;
        let output_filename = combined
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let download_url = self.store.url_for(&combined, base_url)?;
        tracker.advance(Stage::Responded);

        info!(
            "{}: stored {} ({} pages)",
            accepted.meta.filename,
            output_filename,
            result.pages.len()
        );

        Ok(ParsingResponseData {
            markdown: result.markdown,
            filename: accepted.meta.filename,
            output_filename,
            download_url,
            stored_images,
            stored_markdown,
            pages_processed: result.pages.len(),
        })
    }

    /// Stages shared by both flows, from page selection to aggregation.
    ///
    /// Rendered pages are written to `image_dir` as `{stem}_page_{n}.{ext}`.
    async fn run(
        &self,
        tracker: &mut StageTracker,
        accepted: &Accepted,
        original: &Path,
        image_dir: &Path,
        stem: &str,
    ) -> Result<DocumentResult, GatewayError> {
        let total_start = Instant::now();
        let meta = &accepted.meta;

        let render_start = Instant::now();
        let rasterized = self
            .rasterizer
            .rasterize(
                original,
                &meta.filename,
                meta.kind,
                &accepted.selection,
                image_dir,
                stem,
            )
            .await?;
        tracker.advance(Stage::Selected);
        let render_ms = render_start.elapsed().as_millis() as u64;
        tracker.advance(Stage::Rasterized);
        info!(
            "{}: rasterised {}/{} selected pages in {}ms",
            meta.filename,
            rasterized.images.len(),
            rasterized.targets.len(),
            render_ms
        );

        let engine = self.engine.get().await?;
        let ocr_start = Instant::now();
        let outcomes = self.invoker.invoke(&engine, &rasterized.images).await;
        let ocr_ms = ocr_start.elapsed().as_millis() as u64;
        tracker.advance(Stage::OcrComplete);

        let mut failed = rasterized.failures;
        let mut pages: Vec<OcrPageResult> = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(mut page) => {
                    page.markdown = postprocess::page_fragment(
                        page.page,
                        &page.markdown,
                        meta.kind == DocumentKind::Pdf,
                    );
                    pages.push(page);
                }
                Err(e) => failed.push(e),
            }
        }
        failed.sort_by_key(|e| e.page());

        if pages.is_empty() {
            let first_error = failed
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(GatewayError::AllPagesFailed {
                total: rasterized.targets.len(),
                first_error,
            });
        }

        let markdown = aggregate(engine.as_ref(), &pages);
        tracker.advance(Stage::Aggregated);

        let images: Vec<PageImage> = rasterized
            .images
            .into_iter()
            .filter(|image| pages.iter().any(|p| p.page == image.page))
            .collect();

        let stats = RunStats {
            render_ms,
            ocr_ms,
            total_ms: total_start.elapsed().as_millis() as u64,
        };

        Ok(DocumentResult {
            pages,
            markdown,
            failed,
            pages_requested: rasterized.targets.len(),
            images,
            stats,
        })
    }

    fn request_scratch(&self) -> Result<TempDir, GatewayError> {
        let root = self.config.scratch_root();
        std::fs::create_dir_all(&root).map_err(|e| GatewayError::PersistenceFailed {
            path: root.clone(),
            source: e,
        })?;
        tempfile::Builder::new()
            .prefix("request_")
            .tempdir_in(&root)
            .map_err(|e| GatewayError::PersistenceFailed { path: root, source: e })
    }
}

fn log_summary(filename: &str, result: &DocumentResult) {
    info!(
        "{}: {}/{} pages OCR'd in {}ms (render {}ms, ocr {}ms)",
        filename,
        result.pages.len(),
        result.pages_requested,
        result.stats.total_ms,
        result.stats.render_ms,
        result.stats.ocr_ms
    );
    if !result.failed.is_empty() {
        warn!("{}: failed pages {:?}", filename, result.failed_pages());
        for error in &result.failed {
            debug!("{}: {}", filename, error);
        }
    }
}

/// Validation gate: format, page selection, then content.
fn accept(upload: UploadedDocument, pages: Option<&str>) -> Result<Accepted, GatewayError> {
    let meta = upload.validate()?;
    let selection = PageSelection::parse(pages)?;
    upload.check_content(meta.kind)?;
    debug!(
        "Accepted {} ({:?}, {} bytes, pages={:?})",
        meta.filename,
        meta.kind,
        upload.bytes.len(),
        selection
    );
    Ok(Accepted {
        upload,
        meta,
        selection,
    })
}

fn aggregate(engine: &dyn OcrEngine, pages: &[OcrPageResult]) -> String {
    let fragments: Vec<String> = pages.iter().map(|p| p.markdown.clone()).collect();
    postprocess::aggregate(engine, &fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_snake_case() {
        assert_eq!(Stage::PersistedOriginal.to_string(), "persisted_original");
        assert_eq!(Stage::OcrComplete.to_string(), "ocr_complete");
    }

    #[test]
    fn gate_rejects_before_reading_content() {
        let upload = UploadedDocument::new(Some("x.docx".into()), None, b"%PDF".to_vec());
        assert!(matches!(
            accept(upload, Some("1")).err().unwrap(),
            GatewayError::UnsupportedFormat { .. }
        ));

        let upload = UploadedDocument::new(Some("x.pdf".into()), None, b"garbage".to_vec());
        assert!(matches!(
            accept(upload, Some("abc")).err().unwrap(),
            GatewayError::InvalidSelectionFormat { .. }
        ));

        let upload = UploadedDocument::new(Some("x.pdf".into()), None, b"garbage".to_vec());
        assert!(matches!(
            accept(upload, None).err().unwrap(),
            GatewayError::UnreadableDocument { .. }
        ));
    }
}
