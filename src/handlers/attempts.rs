// src/handlers/attempts.rs

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::attempt::{
        AttemptResponse, BulkAttemptResult, BulkAttemptStatus, BulkSubmitRequest,
        BulkSubmitResponse, SubmitAttemptRequest,
    },
};

/// Helper struct for resolving an answer together with its assessment.
#[derive(sqlx::FromRow)]
struct AnswerTarget {
    correct: bool,
    assessment_id: i64,
}

async fn fetch_answer_target(
    pool: &SqlitePool,
    answer_id: i64,
) -> Result<Option<AnswerTarget>, sqlx::Error> {
    sqlx::query_as::<_, AnswerTarget>(
        "SELECT a.correct, q.assessment_id
         FROM answers a
         JOIN questions q ON q.id = a.question_id
         WHERE a.id = ?",
    )
    .bind(answer_id)
    .fetch_optional(pool)
    .await
}

async fn fetch_presentation_assessment(
    pool: &SqlitePool,
    presentation_id: i64,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT assessment_id FROM presentations WHERE id = ?")
        .bind(presentation_id)
        .fetch_optional(pool)
        .await
}

/// Records the attempt unless the (presentation, answer) pair already has
/// one. The unique constraint makes the insert-or-detect atomic, so retries
/// and concurrent duplicates record at most one row.
async fn insert_attempt(
    pool: &SqlitePool,
    presentation_id: i64,
    answer_id: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO attempts (presentation_id, answer_id, created_at)
         VALUES (?, ?, ?)",
    )
    .bind(presentation_id)
    .bind(answer_id)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Accepts a single (presentation, answer) attempt.
///
/// * 201 with `alreadyAttempted: false` on first creation.
/// * 200 with `alreadyAttempted: true` on a duplicate — idempotent, no second row.
/// * 404 when the presentation or answer does not exist.
/// * 422 when the answer does not belong to the presentation's assessment.
pub async fn submit_attempt(
    State(pool): State<SqlitePool>,
    Json(req): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let answer = fetch_answer_target(&pool, req.answer_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to resolve answer: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?
        .ok_or_else(|| AppError::NotFound("Answer not found".to_string()))?;

    let assessment_id = fetch_presentation_assessment(&pool, req.presentation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Presentation not found".to_string()))?;

    if answer.assessment_id != assessment_id {
        return Err(AppError::Unprocessable(
            "Answer does not belong to the presentation's assessment".to_string(),
        ));
    }

    let created = insert_attempt(&pool, req.presentation_id, req.answer_id).await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(AttemptResponse {
            correct: answer.correct,
            already_attempted: !created,
        }),
    ))
}

/// Accepts a batch of attempts and reports one result per input pair, in
/// input order. The request itself succeeds whenever the body parses;
/// partial failure is the normal case and rides in `results`.
pub async fn submit_attempts_bulk(
    State(pool): State<SqlitePool>,
    Json(req): Json<BulkSubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut results = Vec::with_capacity(req.attempts.len());

    for item in &req.attempts {
        let status = resolve_bulk_item(&pool, item).await?;
        results.push(BulkAttemptResult {
            presentation_id: item.presentation_id,
            answer_id: item.answer_id,
            status,
        });
    }

    Ok(Json(BulkSubmitResponse { results }))
}

async fn resolve_bulk_item(
    pool: &SqlitePool,
    item: &SubmitAttemptRequest,
) -> Result<BulkAttemptStatus, AppError> {
    if item.presentation_id <= 0 || item.answer_id <= 0 {
        return Ok(BulkAttemptStatus::Invalid);
    }

    let answer = match fetch_answer_target(pool, item.answer_id).await? {
        Some(answer) => answer,
        None => return Ok(BulkAttemptStatus::NotFound),
    };

    let assessment_id = match fetch_presentation_assessment(pool, item.presentation_id).await? {
        Some(assessment_id) => assessment_id,
        None => return Ok(BulkAttemptStatus::NotFound),
    };

    if answer.assessment_id != assessment_id {
        return Ok(BulkAttemptStatus::Invalid);
    }

    let created = insert_attempt(pool, item.presentation_id, item.answer_id).await?;

    Ok(if created {
        BulkAttemptStatus::Created
    } else {
        BulkAttemptStatus::AlreadyAttempted
    })
}
