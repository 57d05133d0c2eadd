//! Configuration for an advocate run.
//!
//! Every knob lives in [`AdvocateConfig`], built through
//! [`AdvocateConfigBuilder`]. The CLI maps its flags onto the builder; library
//! callers set only what they care about and keep the defaults for the rest.

use crate::error::AdvocateError;
use crate::progress::Observer;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Model used when neither the caller nor the environment names one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Configuration for extraction and analysis.
///
/// # Example
/// ```rust
/// use medbill_advocate::AdvocateConfig;
///
/// let config = AdvocateConfig::builder()
///     .model("gemini-2.5-flash")
///     .search_budget(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.search_budget, 4);
/// ```
#[derive(Clone)]
pub struct AdvocateConfig {
    /// LLM model identifier. If None, [`DEFAULT_MODEL`] or the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Extraction is transcription; low temperature keeps amounts and codes
    /// faithful to the page.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 8192.
    ///
    /// A bill with dozens of charge lines serialises to several thousand
    /// tokens of JSON; a truncated reply is unparseable.
    pub max_tokens: usize,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Web searches allowed per analysis. Default: 6. Range: 0–25.
    pub search_budget: usize,

    /// Results requested per search. Default: 5.
    pub max_search_results: usize,

    /// Characters of raw model output kept in parse-failure payloads. Default: 500.
    pub raw_excerpt_chars: usize,

    /// Ratios that map billed amounts onto price verdicts.
    pub price_thresholds: PriceThresholds,

    /// Tavily API key. If None, `TAVILY_API_KEY` is read; without either,
    /// analyses run with no web search.
    pub search_api_key: Option<String>,

    /// Receives pipeline events (state changes, analyses, searches).
    pub observer: Option<Observer>,
}

impl Default for AdvocateConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            api_timeout_secs: 120,
            search_budget: 6,
            max_search_results: 5,
            raw_excerpt_chars: 500,
            price_thresholds: PriceThresholds::default(),
            search_api_key: None,
            observer: None,
        }
    }
}

impl fmt::Debug for AdvocateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvocateConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("search_budget", &self.search_budget)
            .field("max_search_results", &self.max_search_results)
            .field("raw_excerpt_chars", &self.raw_excerpt_chars)
            .field("price_thresholds", &self.price_thresholds)
            .field("search_api_key", &self.search_api_key.as_ref().map(|_| "<redacted>"))
            .field("observer", &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"))
            .finish()
    }
}

impl AdvocateConfig {
    /// Create a new builder for `AdvocateConfig`.
    pub fn builder() -> AdvocateConfigBuilder {
        AdvocateConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AdvocateConfig`].
#[derive(Debug)]
pub struct AdvocateConfigBuilder {
    config: AdvocateConfig,
}

impl AdvocateConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn search_budget(mut self, n: usize) -> Self {
        self.config.search_budget = n.min(25);
        self
    }

    pub fn max_search_results(mut self, n: usize) -> Self {
        self.config.max_search_results = n.clamp(1, 20);
        self
    }

    pub fn raw_excerpt_chars(mut self, n: usize) -> Self {
        self.config.raw_excerpt_chars = n;
        self
    }

    pub fn price_thresholds(mut self, thresholds: PriceThresholds) -> Self {
        self.config.price_thresholds = thresholds;
        self
    }

    pub fn search_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.search_api_key = Some(key.into());
        self
    }

    pub fn observer(mut self, observer: Observer) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AdvocateConfig, AdvocateError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(AdvocateError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(AdvocateError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        c.price_thresholds.validate()?;
        Ok(self.config)
    }
}

// ── Price thresholds ─────────────────────────────────────────────────────

/// Multipliers separating the price verdict tiers.
///
/// | Condition | Verdict |
/// |-----------|---------|
/// | billed > `severe_reference_multiple` × reference rate | Significantly overpriced |
/// | billed > `overpriced_commercial_multiple` × commercial average | Overpriced |
/// | billed < lowest benchmark | Good price |
/// | otherwise | Fair |
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceThresholds {
    pub severe_reference_multiple: f64,
    pub overpriced_commercial_multiple: f64,
}

impl Default for PriceThresholds {
    fn default() -> Self {
        Self {
            severe_reference_multiple: 3.0,
            overpriced_commercial_multiple: 2.0,
        }
    }
}

impl PriceThresholds {
    fn validate(&self) -> Result<(), AdvocateError> {
        let ok = |m: f64| m.is_finite() && m >= 1.0;
        if !ok(self.severe_reference_multiple) || !ok(self.overpriced_commercial_multiple) {
            return Err(AdvocateError::InvalidConfig(format!(
                "price multiples must be finite and ≥ 1.0, got {} / {}",
                self.severe_reference_multiple, self.overpriced_commercial_multiple
            )));
        }
        Ok(())
    }
}
