// src/models/answer.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Represents the 'answers' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,

    pub question_id: i64,

    pub body: String,

    pub correct: bool,

    pub sequence: i64,
}

/// DTO for sending an answer choice to students (correctness hidden).
#[derive(Debug, Serialize)]
pub struct PublicAnswer {
    pub id: i64,
    pub body: String,
    pub sequence: i64,
}

/// DTO for creating an answer nested under a question.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateAnswerRequest {
    #[validate(length(min = 1, max = 500))]
    pub body: String,
    #[serde(default)]
    pub correct: bool,
    #[serde(default)]
    pub sequence: i64,
}
