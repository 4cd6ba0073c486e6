// src/handlers/presentations.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    handlers::assessments::fetch_assessment,
    models::presentation::{
        CreatePresentationRequest, Presentation, ScoredPresentationResponse,
        ScoredQuestionResponse,
    },
    scoring::{ScoringManager, scorer},
    utils::identity::{resolve_identity, seal_identity},
};

const PRESENTATION_COLUMNS: &str = "id, assessment_id, user_id, score, created_at";

/// Opens a presentation for a student identity, or returns the existing one.
///
/// Identities are sealed before storage, so equality cannot be checked in
/// SQL; existing rows are resolved and compared one by one. This is also what
/// keeps legacy plaintext rows reachable.
pub async fn find_or_create_presentation(
    State(pool): State<SqlitePool>,
    State(config): State<Config>,
    Path(assessment_id): Path<i64>,
    Json(payload): Json<CreatePresentationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let assessment = fetch_assessment(&pool, assessment_id).await?;
    if !assessment.active {
        return Err(AppError::Unprocessable(
            "Assessment is not accepting presentations".to_string(),
        ));
    }

    let existing = sqlx::query_as::<_, Presentation>(&format!(
        "SELECT {PRESENTATION_COLUMNS} FROM presentations WHERE assessment_id = ?"
    ))
    .bind(assessment_id)
    .fetch_all(&pool)
    .await?;

    for presentation in existing {
        let identity = resolve_identity(&presentation.user_id, &config.app_key);
        if identity.value == payload.user_id {
            return Ok((StatusCode::OK, Json(presentation)));
        }
    }

    let sealed = seal_identity(&payload.user_id, &config.app_key)?;
    let presentation = sqlx::query_as::<_, Presentation>(&format!(
        "INSERT INTO presentations (assessment_id, user_id, created_at)
         VALUES (?, ?, ?)
         RETURNING {PRESENTATION_COLUMNS}"
    ))
    .bind(assessment_id)
    .bind(sealed)
    .bind(chrono::Utc::now())
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create presentation: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok((StatusCode::CREATED, Json(presentation)))
}

#[derive(Debug, Deserialize)]
pub struct ScoreParams {
    pub scheme: Option<String>,
}

/// Scores a presentation and returns the per-question breakdown.
///
/// An unknown scheme name is fatal to the call (400); queued-but-unsynced
/// attempts are invisible here by construction — only ingested rows score.
pub async fn score_presentation(
    State(pool): State<SqlitePool>,
    State(config): State<Config>,
    Path(id): Path<i64>,
    Query(params): Query<ScoreParams>,
) -> Result<impl IntoResponse, AppError> {
    let manager = ScoringManager::new(&config.scoring_scheme);

    let scored = scorer::score_presentation(
        &pool,
        &manager,
        &config.app_key,
        id,
        params.scheme.as_deref(),
    )
    .await?;

    let questions = scored
        .questions
        .iter()
        .map(|sq| ScoredQuestionResponse {
            question_id: sq.question.id,
            sequence: sq.question.sequence,
            points_possible: sq.question.points_possible,
            score: sq.score,
            points_earned: sq.score / 100.0 * sq.question.points_possible as f64,
        })
        .collect();

    Ok(Json(ScoredPresentationResponse {
        presentation_id: scored.presentation.id,
        assessment_id: scored.presentation.assessment_id,
        student_identity: scored.student_identity,
        legacy_plaintext_identity: scored.legacy_plaintext_identity,
        scheme: scored.scheme,
        total: scored.total,
        questions,
    }))
}
