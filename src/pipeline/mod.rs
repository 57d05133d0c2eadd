//! Pipeline stages for document extraction.
//!
//! Each submodule implements exactly one step, so each can be tested without
//! a model behind it.
//!
//! ## Data Flow
//!
//! ```text
//! workspace ──▶ encode ──▶ llm ──▶ unwrap ──▶ classify
//! (files)       (base64)   (VLM)   (JSON)     (Document)
//! ```
//!
//! 1. [`workspace`] lists the supported files of one request and deletes them
//!    once extraction succeeds
//! 2. [`encode`] reads each file and wraps it as base64 `ImageData`
//! 3. [`llm`] sends one request through a [`llm::ModelBackend`]; the only
//!    stage with network I/O
//! 4. [`unwrap`] strips fences from the reply and parses JSON
//! 5. [`classify`] maps JSON onto the [`crate::documents::Document`] union

pub mod classify;
pub mod encode;
pub mod llm;
pub mod unwrap;
pub mod workspace;
