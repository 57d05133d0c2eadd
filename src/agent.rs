//! Bounded research loop shared by both analyses.
//!
//! Each turn the model answers with one JSON object:
//!
//! ```text
//! {"action": "search", "query": "..."}      → run the search, log it, ask again
//! {"action": "final",  "result": {...}}     → done
//! {...}  (no "action" key)                  → treated as the final result
//! ```
//!
//! The conversation is stateless on the wire: every turn resends the task
//! together with a rendered [`ResearchLog`] of earlier searches. Searches are
//! capped by `search_budget`; once it is spent the model is told to answer,
//! and another search request ends the loop with
//! [`AdvocateError::ResearchIncomplete`]. At most `search_budget + 1` model
//! calls are made per analysis.

use crate::analysis::AnalysisKind;
use crate::config::AdvocateConfig;
use crate::error::AdvocateError;
use crate::pipeline::llm::{ModelBackend, ModelRequest};
use crate::pipeline::unwrap::{excerpt, parse_structured};
use crate::prompts;
use crate::search::{SearchHit, SearchProvider};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use tracing::{debug, info, warn};

/// Snippet length kept per hit when the log is replayed to the model.
const SNIPPET_CHARS: usize = 600;

/// One step requested by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum AgentStep {
    Search { query: String },
    Final { result: Value },
}

impl AgentStep {
    /// Interpret a parsed reply. Objects without `action` are final answers.
    fn from_value(value: Value, excerpt_chars: usize) -> Result<Self, AdvocateError> {
        let has_action = value.as_object().is_some_and(|o| o.contains_key("action"));
        if !has_action {
            return Ok(AgentStep::Final { result: value });
        }
        let raw = value.to_string();
        serde_json::from_value(value).map_err(|e| AdvocateError::MalformedResponse {
            details: format!("unrecognised research step: {e}"),
            raw_excerpt: excerpt(&raw, excerpt_chars),
        })
    }
}

/// A search the loop performed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hits: Vec<SearchHit>,
    /// Set when the search backend failed; the loop carried on without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Searches performed by one analysis, kept for source attribution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchLog {
    pub queries: Vec<SearchRecord>,
    pub budget: usize,
    /// Every allowed search was used.
    pub exhausted: bool,
}

impl ResearchLog {
    pub fn new(budget: usize) -> Self {
        Self {
            queries: Vec::new(),
            budget,
            exhausted: budget == 0,
        }
    }

    pub fn searches_used(&self) -> usize {
        self.queries.len()
    }

    pub fn searches_left(&self) -> usize {
        self.budget.saturating_sub(self.queries.len())
    }

    fn push(&mut self, record: SearchRecord) {
        self.queries.push(record);
        self.exhausted = self.searches_left() == 0;
    }

    /// Distinct result URLs, in the order they were found.
    pub fn sources(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for hit in self.queries.iter().flat_map(|q| q.hits.iter()) {
            if !urls.contains(&hit.url) {
                urls.push(hit.url.clone());
            }
        }
        urls
    }

    /// Plain-text rendering replayed to the model each turn.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, record) in self.queries.iter().enumerate() {
            let _ = writeln!(out, "{}. query: {}", i + 1, record.query);
            if let Some(ref err) = record.error {
                let _ = writeln!(out, "   search failed: {err}");
                continue;
            }
            if record.hits.is_empty() {
                let _ = writeln!(out, "   no results");
            }
            for hit in &record.hits {
                let _ = writeln!(out, "   - {} <{}>", hit.title, hit.url);
                let _ = writeln!(out, "     {}", excerpt(hit.snippet.trim(), SNIPPET_CHARS));
            }
        }
        out
    }
}

/// Drives the search-then-answer loop for one analysis.
pub struct ResearchAgent<'a> {
    backend: &'a dyn ModelBackend,
    search: &'a dyn SearchProvider,
    config: &'a AdvocateConfig,
}

impl<'a> ResearchAgent<'a> {
    pub fn new(
        backend: &'a dyn ModelBackend,
        search: &'a dyn SearchProvider,
        config: &'a AdvocateConfig,
    ) -> Self {
        Self {
            backend,
            search,
            config,
        }
    }

    /// Run the loop until the model returns a final `T`.
    ///
    /// `system` is the analysis instructions; the response protocol is
    /// appended here. `task` is the per-request data (the bill, the letters).
    pub async fn run<T: DeserializeOwned>(
        &self,
        kind: AnalysisKind,
        system: &str,
        task: &str,
    ) -> Result<(T, ResearchLog), AdvocateError> {
        let budget = self.config.search_budget;
        let excerpt_chars = self.config.raw_excerpt_chars;
        let system = format!("{system}\n{}", prompts::RESEARCH_PROTOCOL);
        let mut log = ResearchLog::new(budget);

        loop {
            let request = ModelRequest {
                purpose: kind.purpose(),
                system: system.clone(),
                prompt: prompts::research_turn(task, &log.render(), log.searches_left()),
                attachments: Vec::new(),
            };
            let reply = self.backend.complete(&request).await?;
            let value = parse_structured(&reply.content, excerpt_chars)?;

            match AgentStep::from_value(value, excerpt_chars)? {
                AgentStep::Final { result } => {
                    info!(
                        "{kind}: final answer after {} search(es)",
                        log.searches_used()
                    );
                    let raw = result.to_string();
                    let parsed = serde_json::from_value(result).map_err(|e| {
                        AdvocateError::MalformedResponse {
                            details: format!("{kind} result does not match its schema: {e}"),
                            raw_excerpt: excerpt(&raw, excerpt_chars),
                        }
                    })?;
                    return Ok((parsed, log));
                }
                AgentStep::Search { query } => {
                    if log.searches_left() == 0 {
                        return Err(AdvocateError::ResearchIncomplete {
                            purpose: kind.to_string(),
                            searches: log.searches_used(),
                        });
                    }
                    let record = self.run_search(kind, query).await;
                    log.push(record);
                }
            }
        }
    }

    async fn run_search(&self, kind: AnalysisKind, query: String) -> SearchRecord {
        debug!("{kind}: searching {query:?}");
        if let Some(ref observer) = self.config.observer {
            observer.on_search(kind, &query);
        }
        match self
            .search
            .search(&query, self.config.max_search_results)
            .await
        {
            Ok(hits) => SearchRecord {
                query,
                hits,
                error: None,
            },
            Err(e) => {
                warn!("{kind}: {e}");
                SearchRecord {
                    query,
                    hits: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
