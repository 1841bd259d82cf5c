//! Server binary for ocr-gateway.
//!
//! Maps CLI flags (with `OCR_GATEWAY_*` env fallbacks) onto the library
//! configs, builds the pipeline and serves the router until Ctrl-C/SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use ocr_gateway::{
    create_router, AppState, ArtifactStore, ConfiguredEngineFactory, EngineConfig, EngineHandle,
    EngineKind, PageFilterMode, PdfiumBackend, Pipeline, PipelineConfig, RasterFormat,
    RenderPolicy, ServerConfig,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on :8000 with a VLM engine auto-detected from OPENAI_API_KEY
  ocr-gateway

  # Require an API key and persist artifacts under /srv/ocr
  ocr-gateway --api-key s3cret --output-dir /srv/ocr \
      --public-base-url https://ocr.example.org

  # Use a layout-parsing service instead of a VLM
  ocr-gateway --engine layout-parsing \
      --engine-endpoint http://127.0.0.1:8080/layout-parsing

  # Render whole documents once, JPEG pages, four pages in flight
  ocr-gateway --render-policy whole-document --raster-format jpeg --ocr-concurrency 4

ENDPOINTS:
  GET  /health              liveness probe
  POST /ocr                 multipart: file, pages → per-page results + Markdown
  POST /document-parsing    multipart: file, pages → persisted artifacts + URLs
  GET  /outputs/...         persisted artifacts

  `pages` accepts a JSON list ("[1,3]"), a single integer ("2"), a comma
  list ("1,3,5") or nothing/"null" for every page.

ENVIRONMENT VARIABLES:
  OCR_GATEWAY_*           Every flag below has an OCR_GATEWAY_ env fallback
  OPENAI_API_KEY          OpenAI API key (VLM engine)
  ANTHROPIC_API_KEY       Anthropic API key (VLM engine)
  GEMINI_API_KEY          Google Gemini API key (VLM engine)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Log filter, overrides --verbose/--quiet
"#;

/// Document-ingestion OCR service.
#[derive(Parser, Debug)]
#[command(
    name = "ocr-gateway",
    version,
    about = "Document-ingestion OCR service: PDF/image upload in, page-level OCR and Markdown out",
    long_about = "HTTP service that accepts PDF or image uploads, renders the selected pages, \
runs an OCR engine on each page and returns structured records plus assembled Markdown. \
The /document-parsing endpoint also persists every artifact and returns download URLs.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "OCR_GATEWAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "OCR_GATEWAY_PORT", default_value_t = 8000)]
    port: u16,

    /// Shared secret expected in X-API-Key. Unset disables the check.
    #[arg(long, env = "OCR_GATEWAY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Root directory for persisted artifacts.
    #[arg(long, env = "OCR_GATEWAY_OUTPUT_DIR", default_value = "outputs")]
    output_dir: PathBuf,

    /// URL prefix the output directory is served under.
    #[arg(long, env = "OCR_GATEWAY_OUTPUTS_MOUNT", default_value = "/outputs")]
    outputs_mount: String,

    /// Base URL for download links. Defaults to the request's Host header.
    #[arg(long, env = "OCR_GATEWAY_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// Largest accepted request body, in MiB.
    #[arg(long, env = "OCR_GATEWAY_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    /// Build the OCR engine at startup instead of on the first request.
    #[arg(long, env = "OCR_GATEWAY_PRELOAD_ENGINE")]
    preload_engine: bool,

    /// OCR engine implementation.
    #[arg(long, env = "OCR_GATEWAY_ENGINE", value_enum, default_value = "vlm")]
    engine: EngineArg,

    /// VLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// VLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Layout-parsing service URL (required with --engine layout-parsing).
    #[arg(long, env = "OCR_GATEWAY_ENGINE_ENDPOINT")]
    engine_endpoint: Option<String>,

    /// Layout-parsing request timeout in seconds.
    #[arg(long, env = "OCR_GATEWAY_ENGINE_TIMEOUT", default_value_t = 300)]
    engine_timeout: u64,

    /// Path to a text file containing a custom VLM system prompt.
    #[arg(long, env = "OCR_GATEWAY_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max VLM output tokens per page.
    #[arg(long, env = "OCR_GATEWAY_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// VLM temperature (0.0–2.0).
    #[arg(long, env = "OCR_GATEWAY_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Rendering DPI (72–400).
    #[arg(long, env = "OCR_GATEWAY_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Longest rendered edge in pixels.
    #[arg(long, env = "OCR_GATEWAY_MAX_PIXELS", default_value_t = 4000)]
    max_pixels: u32,

    /// Page image format.
    #[arg(long, env = "OCR_GATEWAY_RASTER_FORMAT", value_enum, default_value = "png")]
    raster_format: RasterArg,

    /// JPEG quality (75–100) when --raster-format jpeg.
    #[arg(long, env = "OCR_GATEWAY_JPEG_QUALITY", default_value_t = 90,
          value_parser = clap::value_parser!(u8).range(75..=100))]
    jpeg_quality: u8,

    /// Render each page separately or the whole document at once.
    #[arg(long, env = "OCR_GATEWAY_RENDER_POLICY", value_enum, default_value = "per-page")]
    render_policy: RenderPolicyArg,

    /// Fall back to all pages when a selection matches nothing.
    #[arg(long, env = "OCR_GATEWAY_LENIENT_PAGES")]
    lenient_pages: bool,

    /// Pages OCR'd concurrently per request.
    #[arg(long, env = "OCR_GATEWAY_OCR_CONCURRENCY", default_value_t = 1)]
    ocr_concurrency: usize,

    /// Retries per page on engine failure.
    #[arg(long, env = "OCR_GATEWAY_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Initial retry backoff in milliseconds (doubles each attempt).
    #[arg(long, env = "OCR_GATEWAY_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Root for per-request scratch directories. Defaults to the system temp dir.
    #[arg(long, env = "OCR_GATEWAY_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCR_GATEWAY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OCR_GATEWAY_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EngineArg {
    Vlm,
    LayoutParsing,
}

impl From<EngineArg> for EngineKind {
    fn from(v: EngineArg) -> Self {
        match v {
            EngineArg::Vlm => EngineKind::Vlm,
            EngineArg::LayoutParsing => EngineKind::LayoutParsing,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RasterArg {
    Png,
    Jpeg,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RenderPolicyArg {
    PerPage,
    WholeDocument,
}

impl From<RenderPolicyArg> for RenderPolicy {
    fn from(v: RenderPolicyArg) -> Self {
        match v {
            RenderPolicyArg::PerPage => RenderPolicy::PerPage,
            RenderPolicyArg::WholeDocument => RenderPolicy::WholeDocument,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let server = server_config(&cli);
    let pipeline_config = pipeline_config(&cli)?;
    let engine_config = engine_config(&cli).await?;

    let engine = Arc::new(EngineHandle::new(Arc::new(ConfiguredEngineFactory::new(
        engine_config,
    ))));
    if server.preload_engine {
        engine.preload().await.context("Failed to preload OCR engine")?;
    }

    let backend = match cli.pdfium_lib_path {
        Some(ref dir) => PdfiumBackend::with_library_dir(dir),
        None => PdfiumBackend::new(),
    };

    tokio::fs::create_dir_all(&server.output_dir)
        .await
        .with_context(|| format!("Failed to create output dir {:?}", server.output_dir))?;
    let store = ArtifactStore::new(&server.output_dir, server.outputs_mount.as_str());

    let pipeline = Pipeline::new(pipeline_config, engine, Arc::new(backend), store);
    let state = AppState {
        pipeline: Arc::new(pipeline),
        api_key: server.api_key.clone(),
        public_base_url: server.public_base_url.clone(),
        max_upload_bytes: server.max_upload_bytes,
    };
    if state.api_key.is_none() {
        warn!("No API key configured; /ocr and /document-parsing are open");
    }
    let app = create_router(state);

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        "ocr-gateway listening on {} (artifacts in {})",
        addr,
        server.output_dir.display()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("ocr-gateway stopped");
    Ok(())
}

fn server_config(cli: &Cli) -> ServerConfig {
    ServerConfig {
        host: cli.host.clone(),
        port: cli.port,
        api_key: cli.api_key.clone().filter(|k| !k.is_empty()),
        output_dir: cli.output_dir.clone(),
        public_base_url: cli.public_base_url.clone(),
        outputs_mount: cli.outputs_mount.clone(),
        max_upload_bytes: cli.max_upload_mb.saturating_mul(1024 * 1024),
        preload_engine: cli.preload_engine,
    }
}

fn pipeline_config(cli: &Cli) -> Result<PipelineConfig> {
    let raster_format = match cli.raster_format {
        RasterArg::Png => RasterFormat::Png,
        RasterArg::Jpeg => RasterFormat::Jpeg {
            quality: cli.jpeg_quality,
        },
    };
    let page_filter = if cli.lenient_pages {
        PageFilterMode::Lenient
    } else {
        PageFilterMode::Strict
    };

    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .max_rendered_pixels(cli.max_pixels)
        .raster_format(raster_format)
        .render_policy(cli.render_policy.into())
        .page_filter(page_filter)
        .ocr_concurrency(cli.ocr_concurrency)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms);
    if let Some(ref dir) = cli.scratch_dir {
        builder = builder.scratch_dir(dir);
    }
    builder.build().context("Invalid pipeline configuration")
}

async fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    Ok(EngineConfig {
        kind: cli.engine.into(),
        model: cli.model.clone(),
        provider_name: cli.provider.clone(),
        endpoint: cli.engine_endpoint.clone(),
        request_timeout_secs: cli.engine_timeout,
        temperature: cli.temperature,
        max_tokens: cli.max_tokens,
        system_prompt,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections...");
}
