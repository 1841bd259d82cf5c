//! Vision-language-model engine built on `edgequake-llm`.
//!
//! Each page image is sent as a single multimodal chat request: the OCR
//! system prompt, then a user turn carrying the image. The reply is cleaned
//! with [`crate::pipeline::postprocess::clean_markdown`] and exposed both as
//! Markdown and as a small structured record (model, usage, timing).
//!
//! Retries are not handled here; the OCR invoker owns the retry policy.

use super::{EngineError, EngineOutput, OcrEngine};
use crate::config::EngineConfig;
use crate::pipeline::{encode, postprocess};
use crate::prompts::{DEFAULT_OCR_PROMPT, PAGE_INSTRUCTION};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

pub struct VlmEngine {
    provider: Arc<dyn LLMProvider>,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
}

impl VlmEngine {
    /// Wrap an already-configured provider.
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_OCR_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Resolve a provider from the configuration, then the environment.
    ///
    /// Order: explicit `provider_name` (+ `model`), then the
    /// `EDGEQUAKE_LLM_PROVIDER` / `EDGEQUAKE_MODEL` pair, then OpenAI when
    /// `OPENAI_API_KEY` is set, then full auto-detection.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

        if let Some(ref name) = config.provider_name {
            let provider = create_provider(name, model)?;
            return Ok(Self::new(provider, model, config));
        }

        if let (Ok(prov), Ok(env_model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !env_model.is_empty() {
                let provider = create_provider(&prov, &env_model)?;
                return Ok(Self::new(provider, env_model, config));
            }
        }

        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            let provider = create_provider("openai", model)?;
            return Ok(Self::new(provider, model, config));
        }

        let (provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
            EngineError::NotConfigured(format!(
                "no LLM provider could be auto-detected from the environment \
                 (set OPENAI_API_KEY, ANTHROPIC_API_KEY or --provider): {e}"
            ))
        })?;
        Ok(Self::new(provider, model, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, EngineError> {
    ProviderFactory::create_llm_provider(name, model)
        .map_err(|e| EngineError::NotConfigured(format!("provider '{name}': {e}")))
}

#[async_trait]
impl OcrEngine for VlmEngine {
    fn name(&self) -> &str {
        "vlm"
    }

    async fn predict(&self, image: &Path) -> Result<Vec<Box<dyn EngineOutput>>, EngineError> {
        let bytes = tokio::fs::read(image).await?;
        let image_data = tokio::task::spawn_blocking(move || encode::vlm_image_data(&bytes))
            .await
            .map_err(|e| EngineError::Inference(format!("encode task panicked: {e}")))?
            .map_err(|e| EngineError::Inference(format!("cannot encode {}: {e}", image.display())))?;

        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(PAGE_INSTRUCTION, vec![image_data]),
        ];

        let start = Instant::now();
        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(
            "{}: {} input tokens, {} output tokens, {}ms",
            image.display(),
            response.prompt_tokens,
            response.completion_tokens,
            duration_ms
        );

        let output: Box<dyn EngineOutput> = Box::new(VlmOutput {
            markdown: postprocess::clean_markdown(&response.content),
            record: json!({
                "model": self.model,
                "usage": {
                    "prompt_tokens": response.prompt_tokens,
                    "completion_tokens": response.completion_tokens,
                },
                "duration_ms": duration_ms,
            }),
        });
        Ok(vec![output])
    }
}

/// One VLM answer.
#[derive(Debug, Clone)]
pub struct VlmOutput {
    markdown: String,
    record: Value,
}

impl EngineOutput for VlmOutput {
    fn to_value(&self) -> Option<Value> {
        let mut record = self.record.clone();
        if let Value::Object(ref mut map) = record {
            map.insert("markdown".into(), Value::String(self.markdown.clone()));
        }
        Some(record)
    }

    fn markdown(&self) -> Option<String> {
        Some(self.markdown.clone())
    }
}
