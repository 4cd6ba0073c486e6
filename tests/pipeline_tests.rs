// tests/pipeline_tests.rs
//
// End-to-end: the client pipeline drains a real queue into a real server,
// and the scorer sees exactly what was ingested.

use std::sync::Arc;

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tbl_assess::client::store::QueueStore;
use tbl_assess::client::sync::{AttemptSyncer, SyncOptions};
use tbl_assess::client::transport::HttpTransport;
use tbl_assess::{config::Config, routes, state::AppState};

async fn spawn_app() -> (String, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory sqlite");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        app_key: "pipeline_test_key".to_string(),
        scoring_scheme: "geometric-decay".to_string(),
        rust_log: "error".to_string(),
    };

    let state = AppState {
        pool: pool.clone(),
        config,
    };

    let app = routes::create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (address, pool)
}

/// Seeds an active assessment with one 4-choice question (correct answer at
/// index 2) and opens a presentation. Returns (presentation_id, answer_ids).
async fn seed(address: &str) -> (i64, Vec<i64>) {
    let client = reqwest::Client::new();

    let assessment: serde_json::Value = client
        .post(format!("{}/api/assessments", address))
        .json(&serde_json::json!({ "title": "Pipeline quiz", "active": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let assessment_id = assessment["id"].as_i64().unwrap();

    let question: serde_json::Value = client
        .post(format!("{}/api/assessments/{}/questions", address, assessment_id))
        .json(&serde_json::json!({
            "body": "Which layer owns delivery?",
            "sequence": 1,
            "answers": [
                { "body": "The handler", "correct": false, "sequence": 0 },
                { "body": "The router", "correct": false, "sequence": 1 },
                { "body": "The queue", "correct": true, "sequence": 2 },
                { "body": "The view", "correct": false, "sequence": 3 }
            ]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let answer_ids: Vec<i64> = question["answers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_i64().unwrap())
        .collect();

    let presentation: serde_json::Value = client
        .post(format!(
            "{}/api/assessments/{}/presentations",
            address, assessment_id
        ))
        .json(&serde_json::json!({ "user_id": "alice" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let presentation_id = presentation["id"].as_i64().unwrap();

    (presentation_id, answer_ids)
}

#[tokio::test]
async fn queued_attempts_reach_the_server_and_score() {
    let (address, pool) = spawn_app().await;
    let (presentation_id, answer_ids) = seed(&address).await;

    let store = QueueStore::in_memory().await.unwrap();
    let transport = Arc::new(HttpTransport::new(address.clone()));
    let syncer = AttemptSyncer::new(store.clone(), transport, SyncOptions::default());

    let key = "pw|alice";
    // Two wrong guesses, then the correct one — enqueued in answer order.
    for answer_id in [answer_ids[0], answer_ids[1], answer_ids[2]] {
        syncer
            .queue_attempt(presentation_id, answer_id, 1, key)
            .await
            .unwrap();
        // Drain after each enqueue so the server records them in guess order.
        syncer.sync_now(key).await;
    }

    assert!(store.pending_for_key(key).await.unwrap().is_empty());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE presentation_id = ?")
        .bind(presentation_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 3);

    // Re-queueing an already-ingested pair drains as already_attempted and
    // leaves the server at one row per pair.
    syncer
        .queue_attempt(presentation_id, answer_ids[2], 1, key)
        .await
        .unwrap();
    syncer.sync_now(key).await;
    assert!(store.pending_for_key(key).await.unwrap().is_empty());

    let count_after: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE presentation_id = ?")
            .bind(presentation_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count_after, 3);

    // The instructor's view scores only what actually landed: 100 -> 50 -> 25.
    let scored: serde_json::Value = reqwest::Client::new()
        .get(format!("{}/api/presentations/{}/score", address, presentation_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(scored["total"], 25.0);
}
