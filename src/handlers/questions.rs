// src/handlers/questions.rs

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
    handlers::assessments::fetch_assessment,
    models::{
        answer::Answer,
        question::{CreateQuestionRequest, Question, QuestionWithAnswers, UpdateQuestionRequest},
    },
    utils::html::clean_html,
};

/// Creates a question with its answers in one call.
pub async fn create_question(
    State(pool): State<SqlitePool>,
    Path(assessment_id): Path<i64>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    // The parent must exist and be live.
    fetch_assessment(&pool, assessment_id).await?;

    let now = chrono::Utc::now();
    let question = sqlx::query_as::<_, Question>(
        "INSERT INTO questions (assessment_id, body, sequence, points_possible, created_at)
         VALUES (?, ?, ?, ?, ?)
         RETURNING id, assessment_id, body, sequence, points_possible, created_at",
    )
    .bind(assessment_id)
    .bind(clean_html(&payload.body))
    .bind(payload.sequence)
    .bind(payload.points_possible.unwrap_or(1))
    .bind(now)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create question: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let mut answers = Vec::with_capacity(payload.answers.len());
    for answer in &payload.answers {
        let row = sqlx::query_as::<_, Answer>(
            "INSERT INTO answers (question_id, body, correct, sequence)
             VALUES (?, ?, ?, ?)
             RETURNING id, question_id, body, correct, sequence",
        )
        .bind(question.id)
        .bind(clean_html(&answer.body))
        .bind(answer.correct)
        .bind(answer.sequence)
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create answer: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;
        answers.push(row);
    }

    Ok((
        StatusCode::CREATED,
        Json(QuestionWithAnswers { question, answers }),
    ))
}

/// Updates question fields. Fields are optional.
pub async fn update_question(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    // Check existence
    sqlx::query_scalar::<_, i64>("SELECT id FROM questions WHERE id = ?")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    if let Some(body) = payload.body {
        sqlx::query("UPDATE questions SET body = ? WHERE id = ?")
            .bind(clean_html(&body))
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(sequence) = payload.sequence {
        sqlx::query("UPDATE questions SET sequence = ? WHERE id = ?")
            .bind(sequence)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(points_possible) = payload.points_possible {
        sqlx::query("UPDATE questions SET points_possible = ? WHERE id = ?")
            .bind(points_possible)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    let updated = sqlx::query_as::<_, Question>(
        "SELECT id, assessment_id, body, sequence, points_possible, created_at
         FROM questions WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(updated))
}

/// Deletes a question and, via cascade, its answers.
pub async fn delete_question(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM questions WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    Ok(Json(serde_json::json!({ "message": "Question deleted" })))
}
