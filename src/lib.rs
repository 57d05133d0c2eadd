//! # medbill-advocate
//!
//! Review medical bills, explanations of benefits and claim denial letters
//! with a multimodal LLM.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images / PDFs
//!  │
//!  ├─ 1. Intake    copy files into a per-request workspace
//!  ├─ 2. Extract   one VLM call → JSON → tagged Document records
//!  ├─ 3. Route     bills → price research, denials / EOBs → denial analysis
//!  ├─ 4. Analyze   bounded search-then-answer loops (Tavily web search)
//!  └─ 5. Report    one section per analysis, never merged
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medbill_advocate::{Advocate, AdvocateConfig, Workspace};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / ANTHROPIC_API_KEY
//!     let advocate = Advocate::from_config(AdvocateConfig::default())?;
//!     let workspace = Workspace::temporary()?;
//!     workspace.store_from_path("bill.png".as_ref()).await?;
//!
//!     let report = advocate.run(&workspace).await?;
//!     println!("{}", report.render_markdown());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `medbill` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! medbill-advocate = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod analysis;
pub mod config;
pub mod documents;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod router;
pub mod search;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agent::{ResearchLog, SearchRecord};
pub use analysis::denial::{
    AppealStrategy, CoverageDispute, DenialAnalysisItem, DenialVerdict, InsuranceAnalysis,
    SuccessLikelihood,
};
pub use analysis::price::{classify_price, PriceReport, PriceSummary, PriceVerdict, ProcedureAssessment};
pub use analysis::AnalysisKind;
pub use config::{AdvocateConfig, AdvocateConfigBuilder, PriceThresholds};
pub use documents::{
    Charge, CoverageLine, DenialLetter, Document, DocumentKind, InsuranceEob, MedicalBill,
};
pub use error::{AdvocateError, ErrorKind, ErrorPayload};
pub use extract::{extract_documents, Extraction};
pub use pipeline::llm::{ModelBackend, ModelReply, ModelRequest, ProviderBackend, RequestPurpose};
pub use pipeline::workspace::{IntakeSummary, StoredFile, Workspace};
pub use progress::{NoopObserver, Observer, PipelineObserver};
pub use report::{AdvocateReport, StageOutcome};
pub use router::{plan_routes, Advocate, PipelineState, RoutePlan};
pub use search::{NoopSearch, SearchHit, SearchProvider, TavilySearch};
