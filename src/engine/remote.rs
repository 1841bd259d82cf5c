//! HTTP layout-parsing engine.
//!
//! Talks to a document layout-parsing service that accepts
//! `POST {endpoint}` with `{"file": <base64>, "fileType": 1}` (1 = image) and
//! answers:
//!
//! ```json
//! {
//!   "errorCode": 0,
//!   "errorMsg": "Success",
//!   "result": {
//!     "layoutParsingResults": [
//!       { "prunedResult": { ... }, "markdown": { "text": "...", "images": { ... } } }
//!     ]
//!   }
//! }
//! ```
//!
//! Each `layoutParsingResults` entry becomes one [`LayoutParsingOutput`].
//! Its structured record is only available as a serialised string and its
//! Markdown as a serialised object, which is what the normaliser's second
//! tier expects.

use super::{EngineError, EngineOutput, OcrEngine};
use crate::config::EngineConfig;
use crate::pipeline::encode;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub struct LayoutParsingEngine {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutParsingResponse {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_msg: Option<String>,
    result: Option<LayoutParsingResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutParsingResult {
    #[serde(default)]
    layout_parsing_results: Vec<LayoutParsingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutParsingEntry {
    #[serde(default)]
    pruned_result: Value,
    #[serde(default)]
    markdown: Value,
}

impl LayoutParsingEngine {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let raw = config.endpoint.as_deref().ok_or_else(|| {
            EngineError::NotConfigured("layout-parsing engine needs an endpoint URL".into())
        })?;
        let endpoint = Url::parse(raw)
            .map_err(|e| EngineError::NotConfigured(format!("invalid endpoint '{raw}': {e}")))?;
        Self::new(endpoint, Duration::from_secs(config.request_timeout_secs))
    }
}

#[async_trait]
impl OcrEngine for LayoutParsingEngine {
    fn name(&self) -> &str {
        "layout-parsing"
    }

    async fn predict(&self, image: &Path) -> Result<Vec<Box<dyn EngineOutput>>, EngineError> {
        let bytes = tokio::fs::read(image).await?;
        let body = json!({ "file": encode::base64_payload(&bytes), "fileType": 1 });

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Inference(format!(
                "HTTP {status}: {}",
                truncate(&text, 300)
            )));
        }

        let parsed: LayoutParsingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        let outputs = into_outputs(parsed)?;
        debug!("{}: {} layout result(s)", image.display(), outputs.len());
        Ok(outputs)
    }
}

fn into_outputs(parsed: LayoutParsingResponse) -> Result<Vec<Box<dyn EngineOutput>>, EngineError> {
    if parsed.error_code != 0 {
        return Err(EngineError::Inference(format!(
            "service error {}: {}",
            parsed.error_code,
            parsed.error_msg.unwrap_or_default()
        )));
    }
    let result = parsed
        .result
        .ok_or_else(|| EngineError::Protocol("missing 'result'".into()))?;

    Ok(result
        .layout_parsing_results
        .into_iter()
        .map(|entry| {
            Box::new(LayoutParsingOutput {
                pruned: entry.pruned_result,
                markdown: entry.markdown,
            }) as Box<dyn EngineOutput>
        })
        .collect())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// One layout-parsing result object.
#[derive(Debug, Clone)]
pub struct LayoutParsingOutput {
    pruned: Value,
    markdown: Value,
}

impl EngineOutput for LayoutParsingOutput {
    fn to_json(&self) -> Option<Result<String, EngineError>> {
        Some(serde_json::to_string(&self.pruned).map_err(|e| EngineError::Protocol(e.to_string())))
    }

    fn markdown_export(&self) -> Option<Result<String, EngineError>> {
        if self.markdown.is_null() {
            return None;
        }
        Some(
            serde_json::to_string(&self.markdown).map_err(|e| EngineError::Protocol(e.to_string())),
        )
    }
}
