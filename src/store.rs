//! Artifact store: the on-disk tree behind `/outputs`.
//!
//! ```text
//! {root}/
//!   2025/
//!     2025.03.14/
//!       pdf/invoice.pdf                                   original upload
//!       image/invoice_1741948800_3f2a9c1d_page_1.png      rendered pages
//!       markdown_pages/invoice_1741948800_3f2a9c1d_page_1.md
//!       invoice_1741948800_3f2a9c1d.md                    combined Markdown
//! ```
//!
//! Originals keep their (sanitised) upload name, so two uploads with the
//! same name on the same day overwrite each other. Everything derived from
//! an upload carries the request's unix-time + random suffix and never
//! collides.

use crate::error::GatewayError;
use crate::pipeline::input::DocumentKind;
use chrono::{DateTime, Datelike, Local};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    mount: String,
}

/// Relative locations for one request's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLayout {
    date_dir: PathBuf,
    kind_dir: PathBuf,
    suffix: String,
}

impl RequestLayout {
    /// Layout for a request received at `now`.
    pub fn new(now: DateTime<Local>, kind: DocumentKind) -> Self {
        let date_dir = PathBuf::from(format!("{:04}", now.year())).join(now.format("%Y.%m.%d").to_string());
        let kind_dir = date_dir.join(kind.folder());
        let id = uuid::Uuid::new_v4().simple().to_string();
        let suffix = format!("{}_{}", now.timestamp(), &id[..8]);
        Self {
            date_dir,
            kind_dir,
            suffix,
        }
    }

    /// Where the original upload goes.
    pub fn original(&self, filename: &str) -> PathBuf {
        self.kind_dir.join(filename)
    }

    /// Directory rendered pages are written to.
    pub fn images_dir(&self) -> PathBuf {
        self.date_dir.join(DocumentKind::Image.folder())
    }

    /// `stem` plus this request's suffix; prefix of every derived file.
    pub fn page_stem(&self, stem: &str) -> String {
        format!("{stem}_{}", self.suffix)
    }

    /// Per-page Markdown file.
    pub fn page_markdown(&self, stem: &str, page: usize) -> PathBuf {
        self.date_dir
            .join("markdown_pages")
            .join(format!("{}_page_{page}.md", self.page_stem(stem)))
    }

    /// Combined Markdown file.
    pub fn combined_markdown(&self, stem: &str) -> PathBuf {
        self.date_dir.join(format!("{}.md", self.page_stem(stem)))
    }
}

impl ArtifactStore {
    /// `mount` is the URL prefix the root is served under, e.g. `/outputs`.
    pub fn new(root: impl Into<PathBuf>, mount: impl Into<String>) -> Self {
        let mount = mount.into();
        Self {
            root: root.into(),
            mount: format!("/{}", mount.trim_matches('/')),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Absolute path for a relative artifact path.
    ///
    /// Rejects anything but plain components (`..`, `/`, drive prefixes).
    pub fn resolve(&self, relative: &Path) -> Result<PathBuf, GatewayError> {
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !plain || relative.as_os_str().is_empty() {
            return Err(GatewayError::PathOutsideRoot {
                path: relative.to_path_buf(),
                root: self.root.clone(),
            });
        }
        Ok(self.root.join(relative))
    }

    /// Write `bytes` to `relative`, creating parents and overwriting.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use ocr_gateway::ArtifactStore;
    /// use std::path::Path;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = ArtifactStore::new(dir.path(), "/outputs");
    /// let path = store.store(Path::new("2025/notes.md"), b"# hi").await.unwrap();
    /// assert_eq!(
    ///     store.url_for(&path, "http://localhost:8000").unwrap(),
    ///     "http://localhost:8000/outputs/2025/notes.md"
    /// );
    /// # });
    /// ```
    pub async fn store(&self, relative: &Path, bytes: &[u8]) -> Result<PathBuf, GatewayError> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GatewayError::PersistenceFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| GatewayError::PersistenceFailed {
                path: path.clone(),
                source: e,
            })?;
        debug!("Stored {} bytes → {}", bytes.len(), path.display());
        Ok(path)
    }

    /// Public URL of an artifact: `{base_url}{mount}/{relative path}`.
    pub fn url_for(&self, absolute: &Path, base_url: &str) -> Result<String, GatewayError> {
        let relative = absolute
            .strip_prefix(&self.root)
            .map_err(|_| GatewayError::PathOutsideRoot {
                path: absolute.to_path_buf(),
                root: self.root.clone(),
            })?;

        let mut url = Url::parse(base_url)
            .map_err(|e| GatewayError::Internal(format!("invalid base URL '{base_url}': {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| GatewayError::Internal(format!("base URL '{base_url}' cannot carry a path")))?;
            segments.pop_if_empty();
            segments.extend(self.mount.split('/').filter(|s| !s.is_empty()));
            for component in relative.components() {
                if let Component::Normal(part) = component {
                    segments.push(&part.to_string_lossy());
                }
            }
        }
        Ok(url.to_string())
    }
}
