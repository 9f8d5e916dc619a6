//! Postgres implementations of the stagetrack-core port traits.
//!
//! Each adapter is a newtype wrapping `PgPool`. All SQL is
//! runtime-checked (`sqlx::query`, not `sqlx::query!`) to avoid a
//! compile-time database requirement. Embedded contracts and metric
//! metadata live in JSONB columns.

mod client_store;
mod metric_store;
mod user_store;

pub use client_store::PgClientStore;
pub use metric_store::PgMetricStore;
pub use user_store::PgUserStore;

use sqlx::PgPool;
use stagetrack_core::error::{Result, TrackError};

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// All Postgres-backed stores over one shared pool.
pub struct PgStores {
    pub clients: PgClientStore,
    pub metrics: PgMetricStore,
    pub users: PgUserStore,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            clients: PgClientStore::new(pool.clone()),
            metrics: PgMetricStore::new(pool.clone()),
            users: PgUserStore::new(pool),
        }
    }
}

/// Apply the idempotent schema at boot.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| TrackError::Internal(anyhow::anyhow!("schema migration failed: {e}")))?;
    tracing::info!("database schema ensured");
    Ok(())
}

/// Map a sqlx error onto the shared error kinds: unique violations are
/// conflicts, everything else is internal. Row absence is handled at the
/// call sites via `fetch_optional`.
pub(crate) fn map_db_err(e: sqlx::Error) -> TrackError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return TrackError::Conflict(db.message().to_string());
        }
    }
    TrackError::Internal(anyhow::anyhow!(e))
}
