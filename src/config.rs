// src/config.rs

use dotenvy::dotenv;
use std::env;

/// Default scoring scheme applied when a request does not name one.
pub const DEFAULT_SCORING_SCHEME: &str = "geometric-decay";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Key used to seal student identities stored on presentations.
    pub app_key: String,
    /// Scheme name resolved through the scoring registry.
    pub scoring_scheme: String,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let app_key = env::var("APP_KEY").expect("APP_KEY must be set");

        let scoring_scheme =
            env::var("SCORING_SCHEME").unwrap_or_else(|_| DEFAULT_SCORING_SCHEME.to_string());

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            app_key,
            scoring_scheme,
            rust_log,
        }
    }
}
