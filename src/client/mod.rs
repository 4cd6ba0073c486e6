// src/client/mod.rs
//
// Resilient attempt submission pipeline: the library a student-facing app
// embeds to buffer answer submissions across connectivity loss and reconcile
// them against the server's at-most-once ingestion semantics.

pub mod store;
pub mod sync;
pub mod transport;

use std::fmt;

use transport::TransportError;

/// Errors surfaced by the pipeline's public API.
#[derive(Debug)]
pub enum PipelineError {
    /// The durable store failed and the degraded direct-submit path also
    /// could not deliver the attempt.
    Storage(String),
    /// The degraded direct-submit path exhausted its retries.
    Submission(TransportError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Storage(msg) => write!(f, "queue storage error: {}", msg),
            PipelineError::Submission(err) => write!(f, "direct submission failed: {}", err),
        }
    }
}

impl std::error::Error for PipelineError {}
