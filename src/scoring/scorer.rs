// src/scoring/scorer.rs

use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::{answer::Answer, attempt::Attempt, presentation::Presentation, question::Question},
    scoring::ScoringManager,
    scoring::strategy::{AttemptOutcome, QuestionAttempts},
    utils::identity::resolve_identity,
};

/// A question with the 0-100 score the strategy assigned to it.
#[derive(Debug)]
pub struct ScoredQuestion {
    pub question: Question,
    pub score: f64,
}

/// Result of scoring one presentation against its assessment.
#[derive(Debug)]
pub struct ScoredPresentation {
    pub presentation: Presentation,
    pub student_identity: String,
    pub legacy_plaintext_identity: bool,
    pub scheme: String,
    pub total: f64,
    pub questions: Vec<ScoredQuestion>,
}

/// Scores a presentation.
///
/// * Groups the presentation's attempts by the question of their underlying
///   answer; attempts whose answer no longer resolves are dropped silently.
/// * Each question receives its chronologically-ordered attempt subset.
/// * The strategy for the requested (or default) scheme computes per-question
///   scores and the total; an unknown scheme is fatal to the call.
/// * The total is persisted back onto the presentation row.
pub async fn score_presentation(
    pool: &SqlitePool,
    manager: &ScoringManager,
    app_key: &str,
    presentation_id: i64,
    scheme: Option<&str>,
) -> Result<ScoredPresentation, AppError> {
    let presentation = sqlx::query_as::<_, Presentation>(
        "SELECT id, assessment_id, user_id, score, created_at FROM presentations WHERE id = ?",
    )
    .bind(presentation_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Presentation not found".to_string()))?;

    // Resolve the strategy before touching any attempt data so a
    // misconfigured scheme fails the whole call up front.
    let strategy = manager.for_scheme(scheme)?;

    let questions = sqlx::query_as::<_, Question>(
        "SELECT id, assessment_id, body, sequence, points_possible, created_at
         FROM questions WHERE assessment_id = ? ORDER BY sequence, id",
    )
    .bind(presentation.assessment_id)
    .fetch_all(pool)
    .await?;

    let answers = sqlx::query_as::<_, Answer>(
        "SELECT a.id, a.question_id, a.body, a.correct, a.sequence
         FROM answers a
         JOIN questions q ON q.id = a.question_id
         WHERE q.assessment_id = ?",
    )
    .bind(presentation.assessment_id)
    .fetch_all(pool)
    .await?;

    let attempts = sqlx::query_as::<_, Attempt>(
        "SELECT id, presentation_id, answer_id, created_at
         FROM attempts WHERE presentation_id = ? ORDER BY created_at, id",
    )
    .bind(presentation.id)
    .fetch_all(pool)
    .await?;

    // answer id -> (question id, correctness); plus choice counts per question.
    let mut answer_lookup: HashMap<i64, (i64, bool)> = HashMap::with_capacity(answers.len());
    let mut answer_counts: HashMap<i64, usize> = HashMap::new();
    for answer in &answers {
        answer_lookup.insert(answer.id, (answer.question_id, answer.correct));
        *answer_counts.entry(answer.question_id).or_insert(0) += 1;
    }

    // Group attempts by question, preserving chronological order.
    let mut attempts_by_question: HashMap<i64, Vec<AttemptOutcome>> = HashMap::new();
    for attempt in &attempts {
        match answer_lookup.get(&attempt.answer_id) {
            Some(&(question_id, correct)) => {
                attempts_by_question
                    .entry(question_id)
                    .or_default()
                    .push(AttemptOutcome { correct });
            }
            None => {
                // Orphaned attempt (answer deleted since): excluded, not an error.
                tracing::debug!(
                    "Dropping attempt {} with unresolved answer {}",
                    attempt.id,
                    attempt.answer_id
                );
            }
        }
    }

    let inputs: Vec<QuestionAttempts> = questions
        .iter()
        .map(|q| QuestionAttempts {
            question_id: q.id,
            answer_count: answer_counts.get(&q.id).copied().unwrap_or(0),
            attempts: attempts_by_question.remove(&q.id).unwrap_or_default(),
        })
        .collect();

    let outcome = strategy.score_questions(&inputs);

    sqlx::query("UPDATE presentations SET score = ? WHERE id = ?")
        .bind(outcome.total)
        .bind(presentation.id)
        .execute(pool)
        .await?;

    let identity = resolve_identity(&presentation.user_id, app_key);

    let scored_questions = questions
        .into_iter()
        .map(|question| {
            let score = outcome
                .question_scores
                .get(&question.id)
                .copied()
                .unwrap_or(0.0);
            ScoredQuestion { question, score }
        })
        .collect();

    Ok(ScoredPresentation {
        presentation: Presentation {
            score: Some(outcome.total),
            ..presentation
        },
        student_identity: identity.value,
        legacy_plaintext_identity: identity.legacy_plaintext,
        scheme: strategy.name().to_string(),
        total: outcome.total,
        questions: scored_questions,
    })
}
