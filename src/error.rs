//! Error types for the medbill-advocate library.
//!
//! Two shapes exist for two audiences:
//!
//! * [`AdvocateError`]: what library functions return as `Err(..)`. Every
//!   variant carries enough context to act on (the folder that was empty,
//!   the raw excerpt that failed to parse, the path that could not be read).
//!
//! * [`ErrorPayload`]: the serialisable form handed to callers that want a
//!   structured error (`error`, `details`, optional raw excerpt) instead of a
//!   Rust error value. Analysis failures inside a run are stored as payloads
//!   in [`crate::report::StageOutcome`] so one failing component does not
//!   hide the output of another.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// File extensions accepted by the extractor, for error messages.
pub const SUPPORTED_FORMATS: &str = ".jpg, .jpeg, .png, .pdf";

/// All errors returned by the medbill-advocate library.
#[derive(Debug, Error)]
pub enum AdvocateError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The workspace directory does not exist.
    #[error("Workspace folder not found: '{path}'\nCreate it and add your medical documents.")]
    WorkspaceNotFound { path: PathBuf },

    /// The workspace holds no image or PDF files.
    #[error("No supported documents found in '{path}'. Supported formats: .jpg, .jpeg, .png, .pdf")]
    MissingInput { path: PathBuf },

    /// A file name had no usable base name (empty, `..`, a bare directory).
    #[error("Invalid file name '{name}'")]
    InvalidFileName { name: String },

    // ── Model output errors ───────────────────────────────────────────────
    /// The model reply is not valid JSON (after unwrapping) or does not fit
    /// the expected record shape.
    #[error("Failed to parse JSON from model response: {details}")]
    MalformedResponse { details: String, raw_excerpt: String },

    /// A record parsed cleanly but carries no recognisable `document_type`.
    #[error("Could not determine document type: {raw}")]
    UnclassifiableDocument { raw: serde_json::Value },

    /// The research loop ran out of turns without a final answer.
    #[error("{purpose} did not produce a result within {searches} searches")]
    ResearchIncomplete { purpose: String, searches: usize },

    // ── External call errors ──────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// A model call exceeded the configured timeout.
    #[error("{purpose} call timed out after {secs}s")]
    ApiTimeout { purpose: String, secs: u64 },

    /// The web search backend failed.
    #[error("Search failed for '{query}': {reason}")]
    SearchFailed { query: String, reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading, writing or deleting a workspace file failed.
    #[error("File I/O failed on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`AdvocateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingInput,
    MalformedResponse,
    UnclassifiableDocument,
    Io,
    ExternalCall,
    Configuration,
    Internal,
}

impl AdvocateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdvocateError::WorkspaceNotFound { .. } | AdvocateError::MissingInput { .. } => {
                ErrorKind::MissingInput
            }
            AdvocateError::MalformedResponse { .. } | AdvocateError::ResearchIncomplete { .. } => {
                ErrorKind::MalformedResponse
            }
            AdvocateError::UnclassifiableDocument { .. } => ErrorKind::UnclassifiableDocument,
            AdvocateError::InvalidFileName { .. } | AdvocateError::Io { .. } => ErrorKind::Io,
            AdvocateError::LlmApiError { .. }
            | AdvocateError::ApiTimeout { .. }
            | AdvocateError::SearchFailed { .. } => ErrorKind::ExternalCall,
            AdvocateError::ProviderNotConfigured { .. } | AdvocateError::InvalidConfig(_) => {
                ErrorKind::Configuration
            }
            AdvocateError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Missing input is a condition to report, not a failure of the run.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::MissingInput
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AdvocateError::Io {
            path: path.into(),
            source,
        }
    }

    /// Short, stable headline used as the payload's `error` field.
    fn headline(&self) -> &'static str {
        match self {
            AdvocateError::WorkspaceNotFound { .. } => "Workspace folder not found",
            AdvocateError::MissingInput { .. } => "No supported documents found",
            AdvocateError::InvalidFileName { .. } => "Invalid file name",
            AdvocateError::MalformedResponse { .. } => "Failed to parse JSON from model response",
            AdvocateError::UnclassifiableDocument { .. } => "Could not determine document type",
            AdvocateError::ResearchIncomplete { .. } => "Research did not finish",
            AdvocateError::ProviderNotConfigured { .. } => "LLM provider not configured",
            AdvocateError::LlmApiError { .. } => "LLM API error",
            AdvocateError::ApiTimeout { .. } => "LLM call timed out",
            AdvocateError::SearchFailed { .. } => "Search failed",
            AdvocateError::Io { .. } => "File I/O failed",
            AdvocateError::InvalidConfig(_) => "Invalid configuration",
            AdvocateError::Internal(_) => "Internal error",
        }
    }

    /// Build the structured payload for this error.
    pub fn to_payload(&self) -> ErrorPayload {
        let details = match self {
            AdvocateError::MissingInput { path } => format!(
                "Checked folder: {}. Supported formats: {SUPPORTED_FORMATS}",
                path.display()
            ),
            AdvocateError::MalformedResponse { details, .. } => details.clone(),
            other => other.to_string(),
        };
        let raw_response = match self {
            AdvocateError::MalformedResponse { raw_excerpt, .. } => Some(raw_excerpt.clone()),
            _ => None,
        };
        let raw_data = match self {
            AdvocateError::UnclassifiableDocument { raw } => Some(raw.clone()),
            _ => None,
        };

        ErrorPayload {
            error: self.headline().to_string(),
            kind: self.kind(),
            details,
            raw_response,
            raw_data,
            processed_files: Vec::new(),
        }
    }
}

/// Caller-facing error mapping.
///
/// Serialises as `{"error": .., "kind": .., "details": .., "raw_response"?:
/// .., "raw_data"?: .., "processed_files"?: [..]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    pub kind: ErrorKind,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processed_files: Vec<String>,
}

impl ErrorPayload {
    /// Annotate the payload with the files the failed step was looking at.
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.processed_files = files;
        self
    }
}

impl From<&AdvocateError> for ErrorPayload {
    fn from(e: &AdvocateError) -> Self {
        e.to_payload()
    }
}
