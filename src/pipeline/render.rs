//! Document rasterisation: turn the selected pages of an upload into image
//! files the OCR engine can read.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and
//! not async-aware. Page counting, rendering and image encoding all run on
//! tokio's blocking pool so request handlers never stall a worker thread.
//!
//! ## Why one range per page?
//!
//! [`RenderPolicy::PerPage`] asks the backend for one single-page range at a
//! time, so only one bitmap is alive at once no matter how long the PDF is.
//! [`RenderPolicy::WholeDocument`] renders every page in one pass and keeps
//! the selected ones, which suits backends that are expensive to open.

use crate::config::{PageFilterMode, PageSelection, PipelineConfig, RasterFormat, RenderPolicy};
use crate::error::{GatewayError, PageError};
use crate::output::PageImage;
use crate::pipeline::encode;
use crate::pipeline::input::DocumentKind;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failures reported by a [`PdfRasterBackend`].
#[derive(Debug, Error)]
pub enum RasterError {
    /// The rendering library itself is unavailable.
    #[error("{0}")]
    Binding(String),

    /// The document cannot be opened or parsed.
    #[error("{0}")]
    Open(String),

    /// One page failed to render.
    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },
}

/// One page produced by a backend: its 1-indexed number and the bitmap, or
/// why that page could not be rendered.
pub type RenderedPage = (usize, Result<DynamicImage, RasterError>);

/// PDF rendering library boundary. Methods are blocking.
pub trait PdfRasterBackend: Send + Sync {
    /// Page count from document metadata, without rendering anything.
    fn page_count(&self, path: &Path) -> Result<usize, RasterError>;

    /// Render pages `first..=last` (1-indexed) at `dpi`, with neither edge
    /// exceeding `max_pixels`.
    fn render_range(
        &self,
        path: &Path,
        first: usize,
        last: usize,
        dpi: u32,
        max_pixels: u32,
    ) -> Result<Vec<RenderedPage>, RasterError>;
}

/// [`PdfRasterBackend`] on top of pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    library_dir: Option<PathBuf>,
}

impl PdfiumBackend {
    /// Bind to a pdfium library found in `./` or on the system library path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the pdfium library inside `dir`.
    pub fn with_library_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: Some(dir.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium, RasterError> {
        let bindings = match &self.library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| RasterError::Binding(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }
}

impl PdfRasterBackend for PdfiumBackend {
    fn page_count(&self, path: &Path) -> Result<usize, RasterError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| RasterError::Open(format!("{e:?}")))?;
        Ok(document.pages().len() as usize)
    }

    fn render_range(
        &self,
        path: &Path,
        first: usize,
        last: usize,
        dpi: u32,
        max_pixels: u32,
    ) -> Result<Vec<RenderedPage>, RasterError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| RasterError::Open(format!("{e:?}")))?;
        let pages = document.pages();
        let total = pages.len() as usize;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut rendered = Vec::with_capacity(last.saturating_sub(first) + 1);
        for page_num in first..=last.min(total) {
            let image = pages
                .get((page_num - 1) as u16)
                .and_then(|page| {
                    page.render_with_config(&render_config)
                        .map(|bitmap| bitmap.as_image())
                })
                .map_err(|e| RasterError::Page {
                    page: page_num,
                    detail: format!("{e:?}"),
                });
            if let Ok(ref img) = image {
                debug!("Rendered page {} → {}x{} px", page_num, img.width(), img.height());
            }
            rendered.push((page_num, image));
        }
        Ok(rendered)
    }
}

/// What the rasteriser produced for one document.
#[derive(Debug, Clone)]
pub struct Rasterized {
    /// Images ready for OCR, ascending by page.
    pub images: Vec<PageImage>,
    /// Pages that were selected but could not be rendered or saved.
    pub failures: Vec<PageError>,
    /// Page count of the whole document (1 for images).
    pub total_pages: usize,
    /// Pages selected for processing after intersecting with the document.
    pub targets: Vec<usize>,
}

/// Renders selected pages of an upload to files on disk.
#[derive(Clone)]
pub struct Rasterizer {
    backend: Arc<dyn PdfRasterBackend>,
    dpi: u32,
    max_pixels: u32,
    format: RasterFormat,
    policy: RenderPolicy,
    filter: PageFilterMode,
}

impl Rasterizer {
    pub fn new(backend: Arc<dyn PdfRasterBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
            format: config.raster_format,
            policy: config.render_policy,
            filter: config.page_filter,
        }
    }

    /// Metadata-only page count of a PDF.
    pub async fn page_count(&self, path: &Path, filename: &str) -> Result<usize, GatewayError> {
        let backend = Arc::clone(&self.backend);
        let path_buf = path.to_path_buf();
        let total = tokio::task::spawn_blocking(move || backend.page_count(&path_buf))
            .await
            .map_err(|e| GatewayError::Internal(format!("Page-count task panicked: {e}")))?
            .map_err(|e| match e {
                RasterError::Binding(detail) => GatewayError::PdfiumBindingFailed(detail),
                other => GatewayError::UnreadableDocument {
                    filename: filename.to_string(),
                    detail: other.to_string(),
                },
            })?;

        if total == 0 {
            return Err(GatewayError::EmptyDocument {
                filename: filename.to_string(),
            });
        }
        Ok(total)
    }

    /// Produce one [`PageImage`] per selected page.
    ///
    /// Images are used as-is (page 1 only). PDF pages are written to
    /// `{target_dir}/{stem}_page_{n}.{ext}`. Pages that fail to render are
    /// reported in [`Rasterized::failures`] and skipped.
    pub async fn rasterize(
        &self,
        document: &Path,
        filename: &str,
        kind: DocumentKind,
        selection: &PageSelection,
        target_dir: &Path,
        stem: &str,
    ) -> Result<Rasterized, GatewayError> {
        if kind == DocumentKind::Image {
            return self.single_image(document, selection);
        }

        let total_pages = self.page_count(document, filename).await?;
        let targets = selection.resolve(total_pages, self.filter)?;
        info!(
            "{}: {} pages, rendering {:?} at {} DPI",
            filename, total_pages, targets, self.dpi
        );

        let job = RenderJob {
            backend: Arc::clone(&self.backend),
            document: document.to_path_buf(),
            target_dir: target_dir.to_path_buf(),
            stem: stem.to_string(),
            dpi: self.dpi,
            max_pixels: self.max_pixels,
            format: self.format,
            policy: self.policy,
            total_pages,
            targets: targets.clone(),
        };
        let outcomes = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| GatewayError::Internal(format!("Render task panicked: {e}")))?;

        let mut images = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(image) => images.push(image),
                Err(e) => {
                    warn!("{}", e);
                    failures.push(e);
                }
            }
        }

        Ok(Rasterized {
            images,
            failures,
            total_pages,
            targets,
        })
    }

    fn single_image(
        &self,
        document: &Path,
        selection: &PageSelection,
    ) -> Result<Rasterized, GatewayError> {
        if !selection.contains(1) {
            match self.filter {
                PageFilterMode::Strict => {
                    return Err(GatewayError::UnsupportedPageRequest {
                        requested: selection.requested(),
                    })
                }
                PageFilterMode::Lenient => warn!(
                    "Image uploads only have page 1 (requested {:?}); processing page 1",
                    selection.requested()
                ),
            }
        }

        Ok(Rasterized {
            images: vec![PageImage {
                page: 1,
                path: document.to_path_buf(),
                dpi: None,
            }],
            failures: Vec::new(),
            total_pages: 1,
            targets: vec![1],
        })
    }
}

/// Everything the blocking render thread needs, owned.
struct RenderJob {
    backend: Arc<dyn PdfRasterBackend>,
    document: PathBuf,
    target_dir: PathBuf,
    stem: String,
    dpi: u32,
    max_pixels: u32,
    format: RasterFormat,
    policy: RenderPolicy,
    total_pages: usize,
    targets: Vec<usize>,
}

impl RenderJob {
    fn run(self) -> Vec<Result<PageImage, PageError>> {
        if let Err(e) = std::fs::create_dir_all(&self.target_dir) {
            return self.fail_all(&format!("cannot create {}: {e}", self.target_dir.display()));
        }

        match self.policy {
            RenderPolicy::PerPage => self
                .targets
                .iter()
                .map(|&page| {
                    match self.backend.render_range(&self.document, page, page, self.dpi, self.max_pixels) {
                        Ok(rendered) => self.save_matching(page, rendered),
                        Err(e) => Err(PageError::RenderFailed {
                            page,
                            detail: e.to_string(),
                        }),
                    }
                })
                .collect(),
            RenderPolicy::WholeDocument => {
                match self.backend.render_range(
                    &self.document,
                    1,
                    self.total_pages,
                    self.dpi,
                    self.max_pixels,
                ) {
                    Ok(rendered) => {
                        let mut by_page: Vec<RenderedPage> = rendered
                            .into_iter()
                            .filter(|(page, _)| self.targets.binary_search(page).is_ok())
                            .collect();
                        self.targets
                            .iter()
                            .map(|&page| {
                                let idx = by_page.iter().position(|(p, _)| *p == page);
                                let rendered = idx.map(|i| by_page.swap_remove(i)).into_iter().collect();
                                self.save_matching(page, rendered)
                            })
                            .collect()
                    }
                    Err(e) => self.fail_all(&e.to_string()),
                }
            }
        }
    }

    /// Save the bitmap for `page` out of whatever the backend returned.
    fn save_matching(&self, page: usize, rendered: Vec<RenderedPage>) -> Result<PageImage, PageError> {
        let image = rendered
            .into_iter()
            .find(|(p, _)| *p == page)
            .ok_or_else(|| PageError::RenderFailed {
                page,
                detail: "backend returned no image for this page".into(),
            })?
            .1
            .map_err(|e| PageError::RenderFailed {
                page,
                detail: e.to_string(),
            })?;

        let path = self
            .target_dir
            .join(format!("{}_page_{}.{}", self.stem, page, self.format.extension()));
        encode::save_page_image(&image, &path, self.format).map_err(|e| PageError::RenderFailed {
            page,
            detail: format!("cannot write {}: {e}", path.display()),
        })?;

        Ok(PageImage {
            page,
            path,
            dpi: Some(self.dpi),
        })
    }

    fn fail_all(&self, detail: &str) -> Vec<Result<PageImage, PageError>> {
        self.targets
            .iter()
            .map(|&page| {
                Err(PageError::RenderFailed {
                    page,
                    detail: detail.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    /// Renders solid-colour pages; records every requested range.
    struct FakeBackend {
        pages: usize,
        broken_page: Option<usize>,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl FakeBackend {
        fn new(pages: usize) -> Self {
            Self {
                pages,
                broken_page: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl PdfRasterBackend for FakeBackend {
        fn page_count(&self, _path: &Path) -> Result<usize, RasterError> {
            Ok(self.pages)
        }

        fn render_range(
            &self,
            _path: &Path,
            first: usize,
            last: usize,
            _dpi: u32,
            _max_pixels: u32,
        ) -> Result<Vec<RenderedPage>, RasterError> {
            self.calls.lock().unwrap().push((first, last));
            Ok((first..=last.min(self.pages))
                .map(|p| {
                    if Some(p) == self.broken_page {
                        (p, Err(RasterError::Page { page: p, detail: "bad xref".into() }))
                    } else {
                        let shade = (p * 40) as u8;
                        (p, Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([shade; 3])))))
                    }
                })
                .collect())
        }
    }

    fn rasterizer(backend: Arc<FakeBackend>, config: PipelineConfig) -> Rasterizer {
        Rasterizer::new(backend, &config)
    }

    async fn run(r: &Rasterizer, kind: DocumentKind, sel: &PageSelection, dir: &Path) -> Result<Rasterized, GatewayError> {
        r.rasterize(Path::new("doc.pdf"), "doc.pdf", kind, sel, dir, "doc").await
    }

    #[tokio::test]
    async fn all_pages_are_numbered_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new(3));
        let r = rasterizer(backend.clone(), PipelineConfig::default());

        let out = run(&r, DocumentKind::Pdf, &PageSelection::All, dir.path()).await.unwrap();
        let pages: Vec<usize> = out.images.iter().map(|i| i.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert_eq!(out.total_pages, 3);
        assert!(out.failures.is_empty());
        assert!(dir.path().join("doc_page_2.png").exists());
        assert_eq!(out.images[0].dpi, Some(200));
        assert_eq!(*backend.calls.lock().unwrap(), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[tokio::test]
    async fn only_selected_pages_are_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new(5));
        let r = rasterizer(backend.clone(), PipelineConfig::default());
        let sel = PageSelection::Pages(vec![2, 4, 9]);

        let first = run(&r, DocumentKind::Pdf, &sel, dir.path()).await.unwrap();
        let second = run(&r, DocumentKind::Pdf, &sel, dir.path()).await.unwrap();

        assert_eq!(first.targets, vec![2, 4]);
        assert_eq!(first.images, second.images);
        assert!(!dir.path().join("doc_page_1.png").exists());
        assert!(backend.calls.lock().unwrap().iter().all(|&(a, b)| a == b && (a == 2 || a == 4)));
    }

    #[tokio::test]
    async fn whole_document_policy_filters_after_render() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new(4));
        let config = PipelineConfig::builder()
            .render_policy(RenderPolicy::WholeDocument)
            .raster_format(RasterFormat::Jpeg { quality: 90 })
            .build()
            .unwrap();
        let r = rasterizer(backend.clone(), config);

        let out = run(&r, DocumentKind::Pdf, &PageSelection::Pages(vec![3, 1]), dir.path()).await.unwrap();
        assert_eq!(out.images.iter().map(|i| i.page).collect::<Vec<_>>(), vec![1, 3]);
        assert!(dir.path().join("doc_page_3.jpg").exists());
        assert_eq!(*backend.calls.lock().unwrap(), vec![(1, 4)]);
    }

    #[tokio::test]
    async fn broken_page_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            broken_page: Some(2),
            ..FakeBackend::new(3)
        });
        let r = rasterizer(backend, PipelineConfig::default());

        let out = run(&r, DocumentKind::Pdf, &PageSelection::All, dir.path()).await.unwrap();
        assert_eq!(out.images.iter().map(|i| i.page).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].page(), 2);
    }

    #[tokio::test]
    async fn out_of_range_and_empty_documents() {
        let dir = tempfile::tempdir().unwrap();
        let r = rasterizer(Arc::new(FakeBackend::new(2)), PipelineConfig::default());
        let err = run(&r, DocumentKind::Pdf, &PageSelection::Pages(vec![7]), dir.path()).await.unwrap_err();
        assert!(matches!(err, GatewayError::PageOutOfRange { total: 2, .. }));

        let r = rasterizer(Arc::new(FakeBackend::new(0)), PipelineConfig::default());
        let err = run(&r, DocumentKind::Pdf, &PageSelection::All, dir.path()).await.unwrap_err();
        assert!(matches!(err, GatewayError::EmptyDocument { .. }));
    }

    #[tokio::test]
    async fn images_are_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let r = rasterizer(Arc::new(FakeBackend::new(0)), PipelineConfig::default());

        let out = run(&r, DocumentKind::Image, &PageSelection::All, dir.path()).await.unwrap();
        assert_eq!(out.images.len(), 1);
        assert_eq!(out.images[0].dpi, None);

        let err = run(&r, DocumentKind::Image, &PageSelection::Pages(vec![2]), dir.path()).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedPageRequest { .. }));

        let lenient = rasterizer(
            Arc::new(FakeBackend::new(0)),
            PipelineConfig::builder().page_filter(PageFilterMode::Lenient).build().unwrap(),
        );
        let out = run(&lenient, DocumentKind::Image, &PageSelection::Pages(vec![2]), dir.path()).await.unwrap();
        assert_eq!(out.images[0].page, 1);
    }
}
