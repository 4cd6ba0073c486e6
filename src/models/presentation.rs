// src/models/presentation.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Represents the 'presentations' table: one attempt session per
/// (assessment, student identity) pair.
///
/// `user_id` holds either a sealed identity token or, for rows created
/// before sealing was introduced, the raw plaintext identity. Readers must
/// go through `utils::identity::resolve_identity`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Presentation {
    pub id: i64,

    pub assessment_id: i64,

    pub user_id: String,

    /// Last computed total, written by the presentation scorer.
    pub score: Option<f64>,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for opening (or re-entering) a presentation.
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePresentationRequest {
    #[validate(length(min = 1, max = 100))]
    pub user_id: String,
}

/// Per-question result inside a scored presentation.
#[derive(Debug, Serialize)]
pub struct ScoredQuestionResponse {
    pub question_id: i64,
    pub sequence: i64,
    pub points_possible: i64,
    /// 0-100 partial-credit score for this question.
    pub score: f64,
    pub points_earned: f64,
}

/// DTO returned by the score endpoint.
#[derive(Debug, Serialize)]
pub struct ScoredPresentationResponse {
    pub presentation_id: i64,
    pub assessment_id: i64,
    pub student_identity: String,
    /// True when the stored identity could not be unsealed and was
    /// passed through as-is (legacy rows).
    pub legacy_plaintext_identity: bool,
    pub scheme: String,
    pub total: f64,
    pub questions: Vec<ScoredQuestionResponse>,
}
