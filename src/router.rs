//! Orchestration: extraction, then routing records to the analyses.
//!
//! ```text
//! AwaitingInput ──extract──▶ Extracted ──route──▶ Analyzing ──▶ Complete
//! ```
//!
//! Routing is an exhaustive match on [`Document`]: every medical bill gets
//! its own price analysis, and all denial letters and EOBs go to a single
//! denial analysis. When both are present price research runs first, then
//! denial analysis, one after the other. A failed analysis is recorded in
//! its slot of the [`AdvocateReport`] and the run carries on; a failed
//! extraction ends the run with that error.

use crate::analysis::denial::{self, CoverageDispute, InsuranceAnalysis};
use crate::analysis::price::{self, PriceReport};
use crate::analysis::AnalysisKind;
use crate::config::AdvocateConfig;
use crate::documents::{Document, MedicalBill};
use crate::error::AdvocateError;
use crate::extract::{self, Extraction};
use crate::pipeline::llm::{ModelBackend, ProviderBackend};
use crate::pipeline::workspace::Workspace;
use crate::report::{AdvocateReport, StageOutcome};
use crate::search::{NoopSearch, SearchProvider, TavilySearch};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    AwaitingInput,
    Extracted,
    Analyzing,
    Complete,
}

impl PipelineState {
    /// Move to `next`, rejecting anything but the forward transitions.
    ///
    /// `Extracted → Complete` is allowed for extraction-only runs.
    pub fn advance(self, next: PipelineState) -> Result<PipelineState, AdvocateError> {
        use PipelineState::*;
        match (self, next) {
            (AwaitingInput, Extracted)
            | (Extracted, Analyzing)
            | (Extracted, Complete)
            | (Analyzing, Complete) => Ok(next),
            _ => Err(AdvocateError::Internal(format!(
                "illegal pipeline transition {self} → {next}"
            ))),
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::AwaitingInput => "awaiting input",
            PipelineState::Extracted => "extracted",
            PipelineState::Analyzing => "analyzing",
            PipelineState::Complete => "complete",
        })
    }
}

/// Which analyses the extracted records call for.
#[derive(Debug, Clone, Default)]
pub struct RoutePlan<'a> {
    pub bills: Vec<&'a MedicalBill>,
    pub disputes: Vec<CoverageDispute<'a>>,
}

impl RoutePlan<'_> {
    /// Analyses in the order they will run.
    pub fn analyses(&self) -> Vec<AnalysisKind> {
        let mut kinds = vec![AnalysisKind::PriceResearch; self.bills.len()];
        if !self.disputes.is_empty() {
            kinds.push(AnalysisKind::DenialAnalysis);
        }
        kinds
    }
}

/// Sort records into analysis inputs, keeping document order.
pub fn plan_routes(documents: &[Document]) -> RoutePlan<'_> {
    let mut plan = RoutePlan::default();
    for document in documents {
        match document {
            Document::MedicalBill(bill) => plan.bills.push(bill),
            Document::DenialLetter(letter) => plan.disputes.push(CoverageDispute::Denial(letter)),
            Document::InsuranceEob(eob) => plan.disputes.push(CoverageDispute::Eob(eob)),
        }
    }
    plan
}

/// Entry point tying extraction, search and analyses together.
pub struct Advocate {
    backend: Arc<dyn ModelBackend>,
    search: Arc<dyn SearchProvider>,
    config: AdvocateConfig,
}

impl Advocate {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        search: Arc<dyn SearchProvider>,
        config: AdvocateConfig,
    ) -> Self {
        Self {
            backend,
            search,
            config,
        }
    }

    /// Resolve the LLM provider and search backend from `config` and the
    /// environment.
    ///
    /// Web search uses Tavily when `config.search_api_key` or
    /// `TAVILY_API_KEY` is set, and is disabled otherwise.
    pub fn from_config(config: AdvocateConfig) -> Result<Self, AdvocateError> {
        let backend = ProviderBackend::from_config(&config)?;
        let key = config
            .search_api_key
            .clone()
            .or_else(|| std::env::var("TAVILY_API_KEY").ok())
            .filter(|k| !k.is_empty());
        let search: Arc<dyn SearchProvider> = match key {
            Some(key) => Arc::new(TavilySearch::new(key)?),
            None => {
                warn!("No search API key configured; analyses will run without web search");
                Arc::new(NoopSearch)
            }
        };
        Ok(Self::new(Arc::new(backend), search, config))
    }

    pub fn config(&self) -> &AdvocateConfig {
        &self.config
    }

    /// Extract records from `workspace` (see [`extract::extract_documents`]).
    pub async fn extract(&self, workspace: &Workspace) -> Result<Extraction, AdvocateError> {
        extract::extract_documents(workspace, self.backend.as_ref(), &self.config).await
    }

    pub async fn research_prices(&self, bill: &MedicalBill) -> Result<PriceReport, AdvocateError> {
        price::research_prices(bill, self.backend.as_ref(), self.search.as_ref(), &self.config).await
    }

    pub async fn analyze_denial(
        &self,
        disputes: &[CoverageDispute<'_>],
    ) -> Result<InsuranceAnalysis, AdvocateError> {
        denial::analyze_denial(disputes, self.backend.as_ref(), self.search.as_ref(), &self.config)
            .await
    }

    /// Extract, route and analyze everything in `workspace`.
    ///
    /// # Errors
    /// Only extraction errors (including [`AdvocateError::MissingInput`]).
    /// Analysis failures are recorded in the report.
    pub async fn run(&self, workspace: &Workspace) -> Result<AdvocateReport, AdvocateError> {
        let mut state = StateTracker::new(&self.config);

        let extraction = self.extract(workspace).await?;
        state.advance(PipelineState::Extracted)?;

        let plan = plan_routes(&extraction.documents);
        info!("Routing to: {:?}", plan.analyses());
        state.advance(PipelineState::Analyzing)?;

        let mut price_analyses = Vec::with_capacity(plan.bills.len());
        for bill in &plan.bills {
            let outcome = self
                .stage(AnalysisKind::PriceResearch, self.research_prices(bill))
                .await;
            price_analyses.push(outcome);
        }

        let denial_analysis = if plan.disputes.is_empty() {
            None
        } else {
            Some(
                self.stage(AnalysisKind::DenialAnalysis, self.analyze_denial(&plan.disputes))
                    .await,
            )
        };

        state.advance(PipelineState::Complete)?;
        Ok(AdvocateReport {
            processed_files: extraction.processed_files,
            documents: extraction.documents,
            price_analyses,
            denial_analysis,
        })
    }

    /// Synchronous wrapper around [`Advocate::run`].
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn run_sync(&self, workspace: &Workspace) -> Result<AdvocateReport, AdvocateError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| AdvocateError::Internal(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.run(workspace))
    }

    /// Run one analysis, reporting it to the observer and capturing failure.
    async fn stage<T>(
        &self,
        kind: AnalysisKind,
        analysis: impl Future<Output = Result<T, AdvocateError>>,
    ) -> StageOutcome<T> {
        if let Some(ref observer) = self.config.observer {
            observer.on_analysis_start(kind);
        }
        let result = analysis.await;
        let error = result.as_ref().err().map(|e| e.to_string());
        match error {
            Some(ref e) => warn!("{kind} failed: {e}"),
            None => info!("{kind} complete"),
        }
        if let Some(ref observer) = self.config.observer {
            observer.on_analysis_complete(kind, error.as_deref());
        }
        StageOutcome::from_result(result)
    }
}

/// Current state plus observer notification on every move.
struct StateTracker<'a> {
    state: PipelineState,
    config: &'a AdvocateConfig,
}

impl<'a> StateTracker<'a> {
    fn new(config: &'a AdvocateConfig) -> Self {
        let tracker = Self {
            state: PipelineState::AwaitingInput,
            config,
        };
        tracker.notify();
        tracker
    }

    fn advance(&mut self, next: PipelineState) -> Result<(), AdvocateError> {
        self.state = self.state.advance(next)?;
        self.notify();
        Ok(())
    }

    fn notify(&self) {
        if let Some(ref observer) = self.config.observer {
            observer.on_state_change(self.state);
        }
    }
}
