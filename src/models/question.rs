// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

use crate::models::answer::{Answer, CreateAnswerRequest, PublicAnswer};

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    pub assessment_id: i64,

    /// The text content of the question.
    pub body: String,

    /// Explicit display/scoring order within the assessment.
    pub sequence: i64,

    pub points_possible: i64,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Question plus its answers in sequence order.
#[derive(Debug, Serialize)]
pub struct QuestionWithAnswers {
    #[serde(flatten)]
    pub question: Question,
    pub answers: Vec<Answer>,
}

/// DTO for sending a question to students (answer correctness hidden).
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub body: String,
    pub sequence: i64,
    pub points_possible: i64,
    pub answers: Vec<PublicAnswer>,
}

/// DTO for creating a new question with its answers in one call.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 2000))]
    pub body: String,
    pub sequence: i64,
    pub points_possible: Option<i64>,
    #[validate(nested, custom(function = validate_answers))]
    pub answers: Vec<CreateAnswerRequest>,
}

/// DTO for updating a question. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuestionRequest {
    #[validate(length(min = 1, max = 2000))]
    pub body: Option<String>,
    pub sequence: Option<i64>,
    pub points_possible: Option<i64>,
}

fn validate_answers(answers: &[CreateAnswerRequest]) -> Result<(), validator::ValidationError> {
    if answers.is_empty() {
        return Err(validator::ValidationError::new("answers_cannot_be_empty"));
    }
    if !answers.iter().any(|a| a.correct) {
        return Err(validator::ValidationError::new("no_correct_answer"));
    }
    Ok(())
}
