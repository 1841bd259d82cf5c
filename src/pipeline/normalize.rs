//! Result normalisation: turn whatever an engine returned for one page into
//! plain JSON records plus a Markdown fragment.
//!
//! Each [`EngineOutput`] is probed in a fixed order. For the structured
//! record: direct value, serialised string, then a dump into a scratch
//! directory. For Markdown: direct string, serialised export, then a dump.
//! A tier that is missing or fails falls through to the next one. A page
//! fails only when no structured tier works; missing Markdown just leaves
//! the fragment empty.
//!
//! Dumps go into a [`tempfile::TempDir`] under the scratch root, one per
//! page, removed when it drops.

use crate::engine::EngineOutput;
use crate::error::PageError;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Structured records and Markdown for one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedPage {
    pub records: Vec<Value>,
    pub markdown: String,
}

/// Normalise every output of one page. Runs file I/O on the blocking pool.
pub async fn normalize(
    page: usize,
    outputs: Vec<Box<dyn EngineOutput>>,
    scratch_root: &Path,
) -> Result<NormalizedPage, PageError> {
    let scratch_root = scratch_root.to_path_buf();
    tokio::task::spawn_blocking(move || normalize_blocking(page, &outputs, &scratch_root))
        .await
        .map_err(|e| PageError::NormalizationFailed {
            page,
            detail: format!("normalisation task panicked: {e}"),
        })?
}

/// Blocking implementation of [`normalize`].
pub fn normalize_blocking(
    page: usize,
    outputs: &[Box<dyn EngineOutput>],
    scratch_root: &Path,
) -> Result<NormalizedPage, PageError> {
    let failed = |detail: String| PageError::NormalizationFailed { page, detail };

    fs::create_dir_all(scratch_root)
        .map_err(|e| failed(format!("cannot create {}: {e}", scratch_root.display())))?;
    let scratch = tempfile::Builder::new()
        .prefix(&format!("page_{page}_"))
        .tempdir_in(scratch_root)
        .map_err(|e| failed(format!("cannot create scratch dir: {e}")))?;

    let mut records = Vec::new();
    let mut fragments = Vec::new();
    for (idx, output) in outputs.iter().enumerate() {
        let dir = scratch.path().join(format!("output_{idx}"));
        records.extend(structured_records(output.as_ref(), &dir).map_err(failed)?);

        let markdown = markdown_of(output.as_ref(), &dir);
        if !markdown.trim().is_empty() {
            fragments.push(markdown);
        }
    }

    Ok(NormalizedPage {
        records,
        markdown: fragments.join("\n\n"),
    })
}

fn structured_records(output: &dyn EngineOutput, dir: &Path) -> Result<Vec<Value>, String> {
    if let Some(value) = output.to_value() {
        return Ok(vec![value]);
    }

    let mut last_error = None;
    match output.to_json() {
        Some(Ok(json)) => match serde_json::from_str(&json) {
            Ok(value) => return Ok(vec![value]),
            Err(e) => last_error = Some(format!("to_json returned invalid JSON: {e}")),
        },
        Some(Err(e)) => last_error = Some(format!("to_json failed: {e}")),
        None => {}
    }
    if let Some(ref e) = last_error {
        debug!("{e}; trying save_to_json");
    }

    let Some(saved) = output.save_to_json(&fresh_dir(dir, "json")?) else {
        return Err(last_error.unwrap_or_else(|| "output has no structured export".into()));
    };
    saved.map_err(|e| format!("save_to_json failed: {e}"))?;

    read_back(&dir.join("json"), "json")?
        .into_iter()
        .map(|(path, text)| {
            serde_json::from_str(&text)
                .map_err(|e| format!("{} is not valid JSON: {e}", path.display()))
        })
        .collect()
}

fn markdown_of(output: &dyn EngineOutput, dir: &Path) -> String {
    if let Some(markdown) = output.markdown() {
        return markdown;
    }

    if let Some(Ok(export)) = output.markdown_export() {
        if let Some(markdown) = markdown_from_export(&export) {
            return markdown;
        }
    }

    let Ok(md_dir) = fresh_dir(dir, "md") else {
        return String::new();
    };
    match output.save_to_markdown(&md_dir) {
        Some(Ok(())) => read_back(&md_dir, "md")
            .map(|files| {
                files
                    .into_iter()
                    .map(|(_, text)| text)
                    .collect::<Vec<_>>()
                    .join("\n\n")
            })
            .unwrap_or_default(),
        Some(Err(e)) => {
            debug!("save_to_markdown failed: {e}");
            String::new()
        }
        None => String::new(),
    }
}

/// Pull Markdown out of a serialised export object.
fn markdown_from_export(export: &str) -> Option<String> {
    let value: Value = serde_json::from_str(export).ok()?;
    let field = value.get("markdown_texts").or_else(|| value.get("text"))?;
    match field {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n\n"),
        ),
        _ => None,
    }
}

fn fresh_dir(parent: &Path, name: &str) -> Result<PathBuf, String> {
    let dir = parent.join(name);
    fs::create_dir_all(&dir).map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
    Ok(dir)
}

/// Read every `*.{ext}` file in `dir` (sorted by name), deleting each after reading.
fn read_back(dir: &Path, ext: &str) -> Result<Vec<(PathBuf, String)>, String> {
    let entries = fs::read_dir(dir).map_err(|e| format!("cannot list {}: {e}", dir.display()))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let text = fs::read_to_string(&path)
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            fs::remove_file(&path).map_err(|e| format!("cannot remove {}: {e}", path.display()))?;
            Ok((path, text))
        })
        .collect()
}
