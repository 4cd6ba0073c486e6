// src/handlers/assessments.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        answer::{Answer, PublicAnswer},
        assessment::{
            Assessment, AssessmentDetail, CreateAssessmentRequest, UpdateAssessmentRequest,
        },
        question::{PublicQuestion, Question, QuestionWithAnswers},
    },
    utils::html::clean_html,
};

const ASSESSMENT_COLUMNS: &str =
    "id, title, active, opens_at, closes_at, created_at, updated_at, deleted_at";

/// Creates a new assessment.
pub async fn create_assessment(
    State(pool): State<SqlitePool>,
    Json(payload): Json<CreateAssessmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let now = chrono::Utc::now();
    let assessment = sqlx::query_as::<_, Assessment>(&format!(
        "INSERT INTO assessments (title, active, opens_at, closes_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING {ASSESSMENT_COLUMNS}"
    ))
    .bind(clean_html(&payload.title))
    .bind(payload.active.unwrap_or(false))
    .bind(payload.opens_at)
    .bind(payload.closes_at)
    .bind(now)
    .bind(now)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create assessment: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok((StatusCode::CREATED, Json(assessment)))
}

/// Lists all assessments that have not been soft-deleted, newest first.
pub async fn list_assessments(
    State(pool): State<SqlitePool>,
) -> Result<impl IntoResponse, AppError> {
    let assessments = sqlx::query_as::<_, Assessment>(&format!(
        "SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE deleted_at IS NULL ORDER BY id DESC"
    ))
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list assessments: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(assessments))
}

/// Fetches one assessment with its questions and answers, in sequence order.
pub async fn get_assessment(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let assessment = fetch_assessment(&pool, id).await?;
    let questions = fetch_questions_with_answers(&pool, id).await?;

    Ok(Json(AssessmentDetail {
        assessment,
        questions,
    }))
}

/// Student-facing view of an active assessment: answer correctness hidden.
pub async fn get_public_assessment(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let assessment = fetch_assessment(&pool, id).await?;
    if !assessment.active {
        return Err(AppError::NotFound("Assessment not found".to_string()));
    }

    let questions = fetch_questions_with_answers(&pool, id).await?;
    let public: Vec<PublicQuestion> = questions
        .into_iter()
        .map(|qa| PublicQuestion {
            id: qa.question.id,
            body: qa.question.body,
            sequence: qa.question.sequence,
            points_possible: qa.question.points_possible,
            answers: qa
                .answers
                .into_iter()
                .map(|a| PublicAnswer {
                    id: a.id,
                    body: a.body,
                    sequence: a.sequence,
                })
                .collect(),
        })
        .collect();

    Ok(Json(public))
}

/// Updates assessment fields. Fields are optional; absent fields are untouched.
pub async fn update_assessment(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateAssessmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    // Check existence
    fetch_assessment(&pool, id).await?;

    if let Some(title) = payload.title {
        sqlx::query("UPDATE assessments SET title = ? WHERE id = ?")
            .bind(clean_html(&title))
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(active) = payload.active {
        sqlx::query("UPDATE assessments SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(opens_at) = payload.opens_at {
        sqlx::query("UPDATE assessments SET opens_at = ? WHERE id = ?")
            .bind(opens_at)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(closes_at) = payload.closes_at {
        sqlx::query("UPDATE assessments SET closes_at = ? WHERE id = ?")
            .bind(closes_at)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    sqlx::query("UPDATE assessments SET updated_at = ? WHERE id = ?")
        .bind(chrono::Utc::now())
        .bind(id)
        .execute(&pool)
        .await?;

    let updated = fetch_assessment(&pool, id).await?;
    Ok(Json(updated))
}

/// Soft-deletes an assessment. The row survives for scoring history.
pub async fn delete_assessment(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query(
        "UPDATE assessments SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(&pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Assessment not found".to_string()));
    }

    Ok(Json(serde_json::json!({ "message": "Assessment deleted" })))
}

/// Fetches a live (non-deleted) assessment row or returns 404.
pub(crate) async fn fetch_assessment(
    pool: &SqlitePool,
    id: i64,
) -> Result<Assessment, AppError> {
    sqlx::query_as::<_, Assessment>(&format!(
        "SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Assessment not found".to_string()))
}

pub(crate) async fn fetch_questions_with_answers(
    pool: &SqlitePool,
    assessment_id: i64,
) -> Result<Vec<QuestionWithAnswers>, AppError> {
    let questions = sqlx::query_as::<_, Question>(
        "SELECT id, assessment_id, body, sequence, points_possible, created_at
         FROM questions WHERE assessment_id = ? ORDER BY sequence, id",
    )
    .bind(assessment_id)
    .fetch_all(pool)
    .await?;

    let answers = sqlx::query_as::<_, Answer>(
        "SELECT a.id, a.question_id, a.body, a.correct, a.sequence
         FROM answers a
         JOIN questions q ON q.id = a.question_id
         WHERE q.assessment_id = ?
         ORDER BY a.sequence, a.id",
    )
    .bind(assessment_id)
    .fetch_all(pool)
    .await?;

    let mut grouped: std::collections::HashMap<i64, Vec<Answer>> = std::collections::HashMap::new();
    for answer in answers {
        grouped.entry(answer.question_id).or_default().push(answer);
    }

    Ok(questions
        .into_iter()
        .map(|question| {
            let answers = grouped.remove(&question.id).unwrap_or_default();
            QuestionWithAnswers { question, answers }
        })
        .collect())
}
