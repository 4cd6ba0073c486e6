// src/routes.rs

use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{assessments, attempts, presentations, questions},
    state::AppState,
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (assessments, questions, presentations, attempts).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (Database Pool + Config).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let assessment_routes = Router::new()
        .route(
            "/",
            get(assessments::list_assessments).post(assessments::create_assessment),
        )
        .route(
            "/{id}",
            get(assessments::get_assessment)
                .put(assessments::update_assessment)
                .delete(assessments::delete_assessment),
        )
        .route("/{id}/public", get(assessments::get_public_assessment))
        .route("/{id}/questions", post(questions::create_question))
        .route(
            "/{id}/presentations",
            post(presentations::find_or_create_presentation),
        );

    let question_routes = Router::new().route(
        "/{id}",
        axum::routing::put(questions::update_question).delete(questions::delete_question),
    );

    let presentation_routes = Router::new().route(
        "/{id}/score",
        get(presentations::score_presentation),
    );

    let attempt_routes = Router::new()
        .route("/", post(attempts::submit_attempt))
        .route("/bulk", post(attempts::submit_attempts_bulk));

    Router::new()
        .nest("/api/assessments", assessment_routes)
        .nest("/api/questions", question_routes)
        .nest("/api/presentations", presentation_routes)
        .nest("/api/attempts", attempt_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
