//! Persistence and cache contracts.
//!
//! The engine and services operate exclusively through these traits,
//! enabling pluggable backends: the in-memory implementations in
//! [`crate::store`] for boot-without-a-database and tests, Postgres in
//! the `stagetrack-postgres` crate for production.

use async_trait::async_trait;

use crate::domain::client::{Client, ClientFilters};
use crate::domain::metric::{Metric, MetricFilters};
use crate::domain::user::User;
use crate::error::Result;

/// Client persistence. "Not found" is normalized to
/// [`crate::error::TrackError::NotFound`] by every implementation.
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Filtered page plus the total count matching the filter set.
    /// `limit <= 0` means unbounded.
    async fn list(
        &self,
        filters: &ClientFilters,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Client>, i64)>;

    async fn get(&self, id: &str) -> Result<Client>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Client>>;

    async fn insert(&self, client: &Client) -> Result<()>;

    /// Full-row replacement; returns the stored row.
    async fn update(&self, id: &str, client: &Client) -> Result<Client>;

    /// Soft delete: clears `is_active` and stamps `last_updated`.
    async fn deactivate(&self, id: &str) -> Result<()>;

    async fn count(&self, filters: &ClientFilters) -> Result<i64>;
}

/// Metric persistence keyed by (type, interval, timestamp).
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn list(&self, filters: &MetricFilters) -> Result<Vec<Metric>>;

    async fn insert(&self, metric: &Metric) -> Result<String>;

    async fn update(&self, id: &str, metric: &Metric) -> Result<Metric>;
}

/// Read-through cache in front of [`MetricStore`] list queries and
/// per-entity lookups. Entries expire after five minutes; writers
/// invalidate the affected list key after successful store writes.
#[async_trait]
pub trait MetricCache: Send + Sync {
    /// `Ok(None)` is a miss.
    async fn list(&self, filters: &MetricFilters) -> Result<Option<Vec<Metric>>>;

    async fn store_list(&self, filters: &MetricFilters, metrics: &[Metric]) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Metric>>;

    async fn set(&self, id: &str, metric: &Metric) -> Result<()>;

    async fn invalidate_list(&self, filters: &MetricFilters) -> Result<()>;
}

/// User persistence. Users are hard-deleted.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<User>, i64)>;

    async fn get(&self, id: &str) -> Result<User>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn insert(&self, user: &User) -> Result<()>;

    async fn update(&self, id: &str, user: &User) -> Result<User>;

    async fn delete(&self, id: &str) -> Result<()>;
}
