//! Environment configuration.
//!
//! Read once at boot from `STAGETRACK_*` variables (a `.env` file is
//! honored). Only the database DSN changes the wiring: without one the
//! server runs on the in-memory stores.

use std::time::Duration;

use tracing::warn;

/// Development fallback; never meant for production traffic.
const PLACEHOLDER_JWT_SECRET: &str = "stagetrack-dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub base_path: String,
    pub request_timeout: Duration,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub stages_path: String,
}

impl Config {
    pub fn from_env() -> Self {
        let bind_addr =
            std::env::var("STAGETRACK_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
        let base_path = std::env::var("STAGETRACK_BASE_PATH").unwrap_or_default();
        let request_timeout = std::env::var("STAGETRACK_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));
        let database_url = std::env::var("STAGETRACK_DATABASE_URL").ok();
        let stages_path =
            std::env::var("STAGETRACK_STAGES_PATH").unwrap_or_else(|_| "stages.yaml".into());

        let jwt_secret = match std::env::var("STAGETRACK_JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("STAGETRACK_JWT_SECRET is not set, using a non-production placeholder");
                PLACEHOLDER_JWT_SECRET.into()
            }
        };

        Self {
            bind_addr,
            base_path,
            request_timeout,
            database_url,
            jwt_secret,
            stages_path,
        }
    }
}
