//! Observer trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::AdvocateConfigBuilder::observer`] to follow a run as it
//! moves from extraction into analysis. The CLI uses it to drive a spinner;
//! services can forward the events to a channel or a job record.
//!
//! # Example
//!
//! ```rust
//! use medbill_advocate::{AdvocateConfig, PipelineObserver, PipelineState};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct StateLog(Mutex<Vec<PipelineState>>);
//!
//! impl PipelineObserver for StateLog {
//!     fn on_state_change(&self, state: PipelineState) {
//!         self.0.lock().unwrap().push(state);
//!     }
//! }
//!
//! let config = AdvocateConfig::builder()
//!     .observer(Arc::new(StateLog::default()) as Arc<dyn PipelineObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::analysis::AnalysisKind;
use crate::router::PipelineState;
use std::sync::Arc;

/// Called by the pipeline as a run progresses.
///
/// All methods default to no-ops so implementors override only what they
/// need. Events arrive from one task at a time; implementations still need
/// to be `Send + Sync` because the config is shared by reference across
/// awaits.
pub trait PipelineObserver: Send + Sync {
    /// The router entered `state`.
    fn on_state_change(&self, state: PipelineState) {
        let _ = state;
    }

    /// Extraction is about to send `file_count` files to the model.
    fn on_extraction_start(&self, file_count: usize) {
        let _ = file_count;
    }

    /// An analysis component was invoked.
    fn on_analysis_start(&self, kind: AnalysisKind) {
        let _ = kind;
    }

    /// An analysis component finished; `error` is set when it failed.
    fn on_analysis_complete(&self, kind: AnalysisKind, error: Option<&str>) {
        let _ = (kind, error);
    }

    /// A research loop issued a web search.
    fn on_search(&self, kind: AnalysisKind, query: &str) {
        let _ = (kind, query);
    }
}

/// A no-op observer for callers that don't need events.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::AdvocateConfig`].
pub type Observer = Arc<dyn PipelineObserver>;
