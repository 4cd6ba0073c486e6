// src/models/attempt.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// Represents the 'attempts' table.
///
/// Unique on (presentation_id, answer_id): duplicate submissions are
/// detected and reported, never re-recorded. Creation time is the ordering
/// anchor for scoring.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub presentation_id: i64,
    pub answer_id: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for submitting a single attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAttemptRequest {
    pub presentation_id: i64,
    pub answer_id: i64,
}

/// Response for the single-submit endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResponse {
    pub correct: bool,
    #[serde(rename = "alreadyAttempted")]
    pub already_attempted: bool,
}

/// DTO for the bulk-submit endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkSubmitRequest {
    pub attempts: Vec<SubmitAttemptRequest>,
}

/// Per-item outcome of a bulk submission. The server has made a final
/// decision for every status here; clients drop their queued copy on any
/// of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAttemptStatus {
    Created,
    AlreadyAttempted,
    NotFound,
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkAttemptResult {
    pub presentation_id: i64,
    pub answer_id: i64,
    pub status: BulkAttemptStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkSubmitResponse {
    pub results: Vec<BulkAttemptResult>,
}
