//! Model interaction: one request, one reply.
//!
//! Everything that talks to the hosted model goes through [`ModelBackend`].
//! [`ProviderBackend`] adapts an `edgequake-llm` provider; tests plug in a
//! scripted backend instead. Prompt text lives in [`crate::prompts`].
//!
//! Calls are never retried. A failure or timeout surfaces as an
//! [`AdvocateError`] and the caller decides what to report.

use crate::config::{AdvocateConfig, DEFAULT_MODEL};
use crate::error::AdvocateError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Why a request is being made. Used for logging and by test backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPurpose {
    Extraction,
    PriceResearch,
    DenialAnalysis,
}

impl fmt::Display for RequestPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestPurpose::Extraction => "extraction",
            RequestPurpose::PriceResearch => "price research",
            RequestPurpose::DenialAnalysis => "denial analysis",
        })
    }
}

/// A single prompt with optional attachments.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub purpose: RequestPurpose,
    pub system: String,
    pub prompt: String,
    pub attachments: Vec<ImageData>,
}

/// The model's text reply plus token accounting.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Something that can answer a [`ModelRequest`].
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, AdvocateError>;
}

/// [`ModelBackend`] over an `edgequake-llm` provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout: Duration,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AdvocateConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider described by `config` and wrap it.
    pub fn from_config(config: &AdvocateConfig) -> Result<Self, AdvocateError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }
}

#[async_trait]
impl ModelBackend for ProviderBackend {
    /// Message layout: the system instructions, then one user turn carrying
    /// the prompt text and every attachment.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, AdvocateError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(request.system.as_str()),
            ChatMessage::user_with_images(request.prompt.as_str(), request.attachments.clone()),
        ];

        let response = tokio::time::timeout(
            self.timeout,
            self.provider.chat(&messages, Some(&self.options)),
        )
        .await
        .map_err(|_| AdvocateError::ApiTimeout {
            purpose: request.purpose.to_string(),
            secs: self.timeout.as_secs(),
        })?
        .map_err(|e| AdvocateError::LlmApiError {
            message: e.to_string(),
        })?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            request.purpose,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(ModelReply {
            content: response.content,
            input_tokens: response.prompt_tokens as usize,
            output_tokens: response.completion_tokens as usize,
        })
    }
}

/// Build `CompletionOptions` from the config.
fn build_options(config: &AdvocateConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, AdvocateError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        AdvocateError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Provider name and model chosen by config, then environment.
///
/// The provider comes from `config.provider_name`, else `MEDBILL_PROVIDER`.
/// The model comes from `config.model`, else `MEDBILL_MODEL`, else
/// [`DEFAULT_MODEL`]. `None` when neither names a provider.
fn named_provider(
    config: &AdvocateConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Option<(String, String)> {
    let name = config
        .provider_name
        .clone()
        .or_else(|| env("MEDBILL_PROVIDER"))?;
    let model = config
        .model
        .clone()
        .or_else(|| env("MEDBILL_MODEL"))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    Some((name, model))
}

/// Resolve the LLM provider, from most to least specific:
///
/// 1. a pre-built provider in `config.provider`
/// 2. a named provider: `config.provider_name` or `MEDBILL_PROVIDER`, with
///    `config.model`, `MEDBILL_MODEL` or [`DEFAULT_MODEL`]
/// 3. Gemini when `GEMINI_API_KEY` is set
/// 4. whatever `ProviderFactory::from_env` detects
pub fn resolve_provider(config: &AdvocateConfig) -> Result<Arc<dyn LLMProvider>, AdvocateError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some((name, model)) = named_provider(config, env_non_empty) {
        info!("Using provider {name} with model {model}");
        return create_provider(&name, &model);
    }

    let model = config
        .model
        .clone()
        .or_else(|| env_non_empty("MEDBILL_MODEL"))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    if env_non_empty("GEMINI_API_KEY").is_some() {
        info!("Using provider gemini with model {model}");
        return create_provider("gemini", &model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AdvocateError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}
