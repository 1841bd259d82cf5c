//! Configuration types for the ingestion pipeline, the OCR engine and the
//! HTTP server, plus the page-selection grammar.
//!
//! Pipeline behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Engine and server settings are plain structs the
//! binary fills from CLI flags and environment variables.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

/// Configuration for one pipeline (shared by every request).
///
/// # Example
/// ```rust
/// use ocr_gateway::{PipelineConfig, RenderPolicy};
///
/// let config = PipelineConfig::builder()
///     .dpi(300)
///     .render_policy(RenderPolicy::WholeDocument)
///     .ocr_concurrency(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 300);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 200.
    ///
    /// Document-understanding engines are tuned for 200–300 DPI input; below
    /// that small print starts to blur, above it images get slow to upload.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 4000.
    ///
    /// A safety cap independent of DPI so an A0 poster cannot exhaust memory.
    pub max_rendered_pixels: u32,

    /// File format of rendered pages. Default: PNG.
    pub raster_format: RasterFormat,

    /// Whether pages are rendered one range at a time or all at once. Default: per page.
    pub render_policy: RenderPolicy,

    /// What to do when an explicit selection matches no page. Default: strict.
    pub page_filter: PageFilterMode,

    /// Number of pages sent to the OCR engine concurrently. Default: 1.
    ///
    /// Local document models usually saturate the GPU with a single page;
    /// raise this for remote engines that scale horizontally.
    pub ocr_concurrency: usize,

    /// Extra OCR attempts per page after the first failure. Default: 0.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Parent directory for per-request and per-page scratch directories.
    /// `None` uses the system temp directory.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 4000,
            raster_format: RasterFormat::default(),
            render_policy: RenderPolicy::default(),
            page_filter: PageFilterMode::default(),
            ocr_concurrency: 1,
            max_retries: 0,
            retry_backoff_ms: 500,
            scratch_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory scratch space is created in.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn raster_format(mut self, format: RasterFormat) -> Self {
        self.config.raster_format = format.normalized();
        self
    }

    pub fn render_policy(mut self, policy: RenderPolicy) -> Self {
        self.config.render_policy = policy;
        self
    }

    pub fn page_filter(mut self, mode: PageFilterMode) -> Self {
        self.config.page_filter = mode;
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, GatewayError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(GatewayError::Internal(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.ocr_concurrency == 0 {
            return Err(GatewayError::Internal(
                "OCR concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Which OCR engine implementation the process uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// A vision-language model reached through `edgequake-llm`.
    #[default]
    Vlm,
    /// A layout-parsing HTTP service (`POST {endpoint}` with a base64 image).
    LayoutParsing,
}

/// Settings for constructing the OCR engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub kind: EngineKind,

    /// Model identifier for the VLM engine, e.g. "gpt-4.1-mini".
    pub model: Option<String>,

    /// Provider name for the VLM engine (openai, anthropic, gemini, ollama, ...).
    /// `None` auto-detects from the environment.
    pub provider_name: Option<String>,

    /// Full URL of the layout-parsing endpoint.
    pub endpoint: Option<String>,

    /// Per-request timeout for the layout-parsing engine, in seconds. Default: 300.
    pub request_timeout_secs: u64,

    /// Sampling temperature for the VLM engine. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the VLM may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Custom system prompt for the VLM engine.
    pub system_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            model: None,
            provider_name: None,
            endpoint: None,
            request_timeout_secs: 300,
            temperature: 0.0,
            max_tokens: 4096,
            system_prompt: None,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Shared secret expected in the `X-API-Key` header. `None` disables the check.
    pub api_key: Option<String>,

    /// Root of the persisted artifact tree.
    pub output_dir: PathBuf,

    /// Public base URL used in download links, e.g. "https://ocr.example.org".
    /// `None` derives it from the request's `Host` header.
    pub public_base_url: Option<String>,

    /// URL prefix the output directory is served under. Default: "/outputs".
    pub outputs_mount: String,

    /// Largest accepted request body in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// Construct the OCR engine at startup instead of on first request.
    pub preload_engine: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_key: None,
            output_dir: PathBuf::from("outputs"),
            public_base_url: None,
            outputs_mount: "/outputs".to_string(),
            max_upload_bytes: 50 * 1024 * 1024,
            preload_engine: false,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Image format for rendered pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RasterFormat {
    /// Lossless; keeps text edges crisp. (default)
    #[default]
    Png,
    /// Smaller files. Quality is clamped to 75–100.
    Jpeg { quality: u8 },
}

impl RasterFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            RasterFormat::Png => "png",
            RasterFormat::Jpeg { .. } => "jpg",
        }
    }

    fn normalized(self) -> Self {
        match self {
            RasterFormat::Jpeg { quality } => RasterFormat::Jpeg {
                quality: quality.clamp(75, 100),
            },
            other => other,
        }
    }
}

/// How the rasteriser walks a PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderPolicy {
    /// Render each selected page with its own single-page range. (default)
    #[default]
    PerPage,
    /// Render the whole document once, then keep only selected pages.
    WholeDocument,
}

/// Behaviour when an explicit selection matches nothing in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageFilterMode {
    /// Reject the request (`PageOutOfRange` / `UnsupportedPageRequest`). (default)
    #[default]
    Strict,
    /// Log a warning and process every page instead.
    Lenient,
}

/// Specifies which pages of the document to process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Process all pages (default).
    #[default]
    All,
    /// Process specific pages (1-indexed, deduplicated, ascending, non-empty).
    Pages(Vec<usize>),
}

impl PageSelection {
    /// Build an explicit selection, dropping zeros, sorting and deduplicating.
    ///
    /// Returns `None` when nothing positive remains.
    pub fn from_pages(pages: impl IntoIterator<Item = usize>) -> Option<Self> {
        let mut pages: Vec<usize> = pages.into_iter().filter(|&p| p >= 1).collect();
        pages.sort_unstable();
        pages.dedup();
        if pages.is_empty() {
            None
        } else {
            Some(PageSelection::Pages(pages))
        }
    }

    /// Parse the `pages` form field.
    ///
    /// Accepts a JSON integer (`2`), a JSON array (`[1,3]`) or a comma list
    /// (`1, 3`). Absent, empty and `null` mean all pages. One layer of
    /// surrounding quotes is tolerated because some shells pass them through.
    pub fn parse(raw: Option<&str>) -> Result<Self, GatewayError> {
        let Some(raw) = raw else {
            return Ok(PageSelection::All);
        };

        let value = raw.trim();
        if is_absent(value) {
            return Ok(PageSelection::All);
        }

        let value = strip_matching_quotes(value).trim();
        if is_absent(value) {
            return Ok(PageSelection::All);
        }

        let invalid = || GatewayError::InvalidSelectionFormat {
            input: raw.to_string(),
        };

        let decoded: Vec<i64> = match serde_json::from_str::<Value>(value) {
            Ok(Value::Array(items)) => {
                if items.is_empty() {
                    return Err(invalid());
                }
                items
                    .iter()
                    .map(json_to_int)
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(invalid)?
            }
            Ok(Value::Number(n)) => vec![n.as_i64().ok_or_else(invalid)?],
            Ok(Value::Bool(b)) => vec![i64::from(b)],
            Ok(_) => return Err(invalid()),
            Err(_) => parse_comma_list(value).ok_or_else(invalid)?,
        };

        let positive = decoded
            .into_iter()
            .filter(|&p| p > 0)
            .filter_map(|p| usize::try_from(p).ok());

        PageSelection::from_pages(positive).ok_or_else(|| GatewayError::NoValidPages {
            input: raw.to_string(),
        })
    }

    /// `true` when the selection includes `page` (1-indexed).
    pub fn contains(&self, page: usize) -> bool {
        match self {
            PageSelection::All => true,
            PageSelection::Pages(pages) => pages.contains(&page),
        }
    }

    /// Explicitly requested pages, empty for `All`.
    pub fn requested(&self) -> Vec<usize> {
        match self {
            PageSelection::All => Vec::new(),
            PageSelection::Pages(pages) => pages.clone(),
        }
    }

    /// Intersect the selection with `1..=total_pages`.
    ///
    /// Returns the ascending list of 1-indexed pages to process. An empty
    /// intersection is an error in [`PageFilterMode::Strict`] and widens to
    /// every page in [`PageFilterMode::Lenient`].
    pub fn resolve(
        &self,
        total_pages: usize,
        mode: PageFilterMode,
    ) -> Result<Vec<usize>, GatewayError> {
        let pages = match self {
            PageSelection::All => return Ok((1..=total_pages).collect()),
            PageSelection::Pages(pages) => pages,
        };

        let mut targets: Vec<usize> = pages
            .iter()
            .copied()
            .filter(|&p| p >= 1 && p <= total_pages)
            .collect();
        targets.sort_unstable();
        targets.dedup();

        if targets.is_empty() {
            return match mode {
                PageFilterMode::Strict => Err(GatewayError::PageOutOfRange {
                    requested: pages.clone(),
                    total: total_pages,
                }),
                PageFilterMode::Lenient => {
                    warn!(
                        "No requested page {:?} exists (total={}); processing all pages",
                        pages, total_pages
                    );
                    Ok((1..=total_pages).collect())
                }
            };
        }

        if pages.iter().any(|&p| p < 1 || p > total_pages) {
            warn!(
                "Skipping out-of-range pages (requested={:?}, total={})",
                pages, total_pages
            );
        }
        Ok(targets)
    }
}

fn is_absent(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("null")
}

fn strip_matching_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Coerce one decoded JSON element to an integer.
///
/// Floats truncate toward zero and booleans count as 0/1. Strings must
/// hold a plain integer.
fn json_to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Comma-separated fallback: keep digit-only tokens, ignore everything else.
fn parse_comma_list(value: &str) -> Option<Vec<i64>> {
    let mut pages = Vec::new();
    for token in value.split(',').map(str::trim) {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        pages.push(token.parse().ok()?);
    }
    if pages.is_empty() {
        None
    } else {
        Some(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(v: &[usize]) -> PageSelection {
        PageSelection::Pages(v.to_vec())
    }

    #[test]
    fn absent_values_mean_all_pages() {
        for raw in [None, Some(""), Some("   "), Some("null"), Some("NULL"), Some("\"null\"")] {
            assert_eq!(PageSelection::parse(raw).unwrap(), PageSelection::All, "{raw:?}");
        }
    }

    #[test]
    fn json_and_comma_forms_agree() {
        for raw in ["[1,2]", "1,2", " 1 , 2 ", "[2, 1, 2]", "'[1,2]'", "\"1,2\""] {
            assert_eq!(PageSelection::parse(Some(raw)).unwrap(), pages(&[1, 2]), "{raw}");
        }
    }

    #[test]
    fn single_integer_is_wrapped() {
        assert_eq!(PageSelection::parse(Some("1")).unwrap(), pages(&[1]));
        assert_eq!(PageSelection::parse(Some("7")).unwrap(), pages(&[7]));
    }

    #[test]
    fn elements_are_coerced() {
        assert_eq!(
            PageSelection::parse(Some(r#"["3", 1.0, 2]"#)).unwrap(),
            pages(&[1, 2, 3])
        );
    }

    #[test]
    fn fractional_and_boolean_elements_truncate() {
        assert_eq!(PageSelection::parse(Some("[1.5]")).unwrap(), pages(&[1]));
        assert_eq!(PageSelection::parse(Some("[2.9, true]")).unwrap(), pages(&[1, 2]));
        assert_eq!(PageSelection::parse(Some("true")).unwrap(), pages(&[1]));
        for raw in ["[false, 0.4]", "false"] {
            let err = PageSelection::parse(Some(raw)).unwrap_err();
            assert!(matches!(err, GatewayError::NoValidPages { .. }), "{raw}: {err:?}");
        }
    }

    #[test]
    fn garbage_is_invalid_format() {
        for raw in ["abc", "[]", "{\"a\":1}", "2.7", "2.0", "\"hello\"", "[\"1.5\"]", "[\"x\"]", "[null]"] {
            let err = PageSelection::parse(Some(raw)).unwrap_err();
            assert!(
                matches!(err, GatewayError::InvalidSelectionFormat { .. }),
                "{raw}: {err:?}"
            );
        }
    }

    #[test]
    fn comma_list_ignores_non_digit_tokens() {
        assert_eq!(PageSelection::parse(Some("1, x, 3")).unwrap(), pages(&[1, 3]));
    }

    #[test]
    fn non_positive_pages_are_dropped() {
        assert_eq!(PageSelection::parse(Some("[0, 2, -1]")).unwrap(), pages(&[2]));
        for raw in ["[0]", "0", "[-3, 0]", "0,0"] {
            let err = PageSelection::parse(Some(raw)).unwrap_err();
            assert!(matches!(err, GatewayError::NoValidPages { .. }), "{raw}: {err:?}");
        }
    }

    #[test]
    fn resolve_all_and_explicit() {
        assert_eq!(
            PageSelection::All.resolve(3, PageFilterMode::Strict).unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(
            pages(&[2, 5]).resolve(3, PageFilterMode::Strict).unwrap(),
            vec![2]
        );
    }

    #[test]
    fn resolve_out_of_range_depends_on_mode() {
        let sel = pages(&[9]);
        let err = sel.resolve(4, PageFilterMode::Strict).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::PageOutOfRange { total: 4, .. }
        ));
        assert_eq!(
            sel.resolve(4, PageFilterMode::Lenient).unwrap(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn resolve_sorts_and_dedups_explicit_pages() {
        assert_eq!(
            pages(&[3, 1, 3, 7]).resolve(4, PageFilterMode::Strict).unwrap(),
            vec![1, 3]
        );
    }

    #[test]
    fn contains_ignores_page_order() {
        let sel = PageSelection::from_pages([3, 1, 3]).unwrap();
        assert!(sel.contains(1));
        assert!(!sel.contains(2));
        assert!(pages(&[3, 1]).contains(1));
        assert!(PageSelection::All.contains(42));
        assert!(PageSelection::from_pages([0]).is_none());
    }

    #[test]
    fn builder_clamps() {
        let c = PipelineConfig::builder()
            .dpi(1000)
            .ocr_concurrency(0)
            .raster_format(RasterFormat::Jpeg { quality: 10 })
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.ocr_concurrency, 1);
        assert_eq!(c.raster_format, RasterFormat::Jpeg { quality: 75 });
    }
}
