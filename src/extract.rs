//! Document extraction entry point.
//!
//! Sends every supported file in a [`Workspace`] to the model in one call,
//! then unwraps, parses and classifies the reply. The files are deleted only
//! when extraction succeeds. On any failure they stay in place so the
//! caller can retry or inspect them.

use crate::config::AdvocateConfig;
use crate::documents::Document;
use crate::error::AdvocateError;
use crate::pipeline::llm::{ModelBackend, ModelRequest, RequestPurpose};
use crate::pipeline::workspace::Workspace;
use crate::pipeline::{classify, encode, unwrap};
use crate::prompts;
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, info};

/// Records extracted from one workspace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    /// One record per distinct document type, in the order the model
    /// returned them.
    pub documents: Vec<Document>,
    /// Base names of the files sent to the model.
    pub processed_files: Vec<String>,
}

impl Extraction {
    /// Caller-facing shape.
    ///
    /// A single record is flattened with `processed_files` added alongside
    /// its fields. Several records become
    /// `{"documents": [..], "count": n, "processed_files": [..]}`.
    pub fn to_payload(&self) -> Value {
        if let [single] = self.documents.as_slice() {
            let mut value = serde_json::to_value(single).unwrap_or(Value::Null);
            if let Value::Object(ref mut fields) = value {
                fields.insert("processed_files".into(), json!(self.processed_files));
                return value;
            }
        }
        json!({
            "documents": self.documents,
            "count": self.documents.len(),
            "processed_files": self.processed_files,
        })
    }
}

/// Extract records from the supported files in `workspace`.
///
/// # Errors
/// - [`AdvocateError::MissingInput`] when the workspace holds no supported
///   file; no model call is made
/// - [`AdvocateError::MalformedResponse`] when the reply is not JSON or a
///   record does not fit its schema
/// - [`AdvocateError::UnclassifiableDocument`] when a record has no known
///   `document_type`
/// - I/O and model call errors as they occur
pub async fn extract_documents(
    workspace: &Workspace,
    backend: &dyn ModelBackend,
    config: &AdvocateConfig,
) -> Result<Extraction, AdvocateError> {
    let start = Instant::now();

    // ── Step 1: List inputs ──────────────────────────────────────────────
    let files = workspace.supported_files()?;
    if files.is_empty() {
        return Err(AdvocateError::MissingInput {
            path: workspace.path().to_path_buf(),
        });
    }
    let processed_files: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
    info!("Found {} file(s) to process: {:?}", files.len(), processed_files);

    // ── Step 2: Encode attachments ───────────────────────────────────────
    let attachments = try_join_all(files.iter().map(encode::encode_file)).await?;
    debug!(
        "Encoded {} attachment(s), {} bytes base64",
        attachments.len(),
        attachments.iter().map(|a| a.data.len()).sum::<usize>()
    );

    if let Some(ref observer) = config.observer {
        observer.on_extraction_start(files.len());
    }

    // ── Step 3: One model call ───────────────────────────────────────────
    let request = ModelRequest {
        purpose: RequestPurpose::Extraction,
        system: prompts::EXTRACTION_SYSTEM_PROMPT.to_string(),
        prompt: prompts::extraction_prompt(files.len()),
        attachments,
    };
    let reply = backend.complete(&request).await?;

    // ── Step 4: Unwrap, parse, classify ──────────────────────────────────
    let value = unwrap::parse_structured(&reply.content, config.raw_excerpt_chars)?;
    let documents = classify::classify(value, config.raw_excerpt_chars)?;

    // ── Step 5: Clean up consumed files ──────────────────────────────────
    let removed = workspace.remove_files(&files).await;
    debug!("Removed {removed}/{} processed file(s)", files.len());

    info!(
        "Extracted {} record(s) [{}] in {}ms",
        documents.len(),
        documents
            .iter()
            .map(|d| d.kind().as_str())
            .collect::<Vec<_>>()
            .join(", "),
        start.elapsed().as_millis()
    );

    Ok(Extraction {
        documents,
        processed_files,
    })
}
