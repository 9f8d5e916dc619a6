//! `tokio::sync::RwLock`-backed stores keyed by entity id.
//!
//! List results are ordered deterministically (clients and users by
//! creation order, metrics by `created_at`) so pagination is stable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::client::{Client, ClientFilters};
use crate::domain::metric::{Metric, MetricFilters};
use crate::domain::user::User;
use crate::error::{Result, TrackError};
use crate::ports::{ClientStore, MetricCache, MetricStore, UserStore};

fn page<T: Clone>(items: Vec<T>, limit: i64, offset: i64) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let offset = offset.max(0) as usize;
    let iter = items.into_iter().skip(offset);
    let page = if limit > 0 {
        iter.take(limit as usize).collect()
    } else {
        iter.collect()
    };
    (page, total)
}

// ── Clients ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryClientStore {
    rows: RwLock<Vec<Client>>,
}

impl MemoryClientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStore for MemoryClientStore {
    async fn list(
        &self,
        filters: &ClientFilters,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Client>, i64)> {
        let rows = self.rows.read().await;
        let matching: Vec<Client> = rows.iter().filter(|c| filters.matches(c)).cloned().collect();
        Ok(page(matching, limit, offset))
    }

    async fn get(&self, id: &str) -> Result<Client> {
        let rows = self.rows.read().await;
        rows.iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| TrackError::NotFound(format!("client {id}")))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Client>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|c| c.email.as_deref() == Some(email))
            .cloned())
    }

    async fn insert(&self, client: &Client) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.iter().any(|c| c.id == client.id) {
            return Err(TrackError::Conflict(format!("client {} exists", client.id)));
        }
        rows.push(client.clone());
        Ok(())
    }

    async fn update(&self, id: &str, client: &Client) -> Result<Client> {
        let mut rows = self.rows.write().await;
        let slot = rows
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| TrackError::NotFound(format!("client {id}")))?;
        *slot = client.clone();
        Ok(slot.clone())
    }

    async fn deactivate(&self, id: &str) -> Result<()> {
        let mut rows = self.rows.write().await;
        let slot = rows
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| TrackError::NotFound(format!("client {id}")))?;
        slot.is_active = false;
        slot.last_updated = Utc::now();
        Ok(())
    }

    async fn count(&self, filters: &ClientFilters) -> Result<i64> {
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|c| filters.matches(c)).count() as i64)
    }
}

// ── Metrics ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryMetricStore {
    rows: RwLock<Vec<Metric>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricStore for MemoryMetricStore {
    async fn list(&self, filters: &MetricFilters) -> Result<Vec<Metric>> {
        let rows = self.rows.read().await;
        let mut matching: Vec<Metric> =
            rows.iter().filter(|m| filters.matches(m)).cloned().collect();
        matching.sort_by_key(|m| m.created_at);
        Ok(matching)
    }

    async fn insert(&self, metric: &Metric) -> Result<String> {
        let mut rows = self.rows.write().await;
        rows.push(metric.clone());
        Ok(metric.id.clone())
    }

    async fn update(&self, id: &str, metric: &Metric) -> Result<Metric> {
        let mut rows = self.rows.write().await;
        let slot = rows
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| TrackError::NotFound(format!("metric {id}")))?;
        *slot = Metric {
            id: id.to_string(),
            ..metric.clone()
        };
        Ok(slot.clone())
    }
}

// ── Metric cache ──────────────────────────────────────────────

/// Five minutes, matching the contract of [`MetricCache`].
const CACHE_TTL: Duration = Duration::from_secs(300);

struct CacheSlot<T> {
    value: T,
    stored_at: Instant,
}

impl<T> CacheSlot<T> {
    fn fresh(value: T) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    fn expired(&self) -> bool {
        self.stored_at.elapsed() >= CACHE_TTL
    }
}

/// TTL-bounded in-memory cache for metric lists and entities.
#[derive(Default)]
pub struct MemoryMetricCache {
    lists: RwLock<HashMap<String, CacheSlot<Vec<Metric>>>>,
    entities: RwLock<HashMap<String, CacheSlot<Metric>>>,
}

impl MemoryMetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl MetricCache for MemoryMetricCache {
    async fn list(&self, filters: &MetricFilters) -> Result<Option<Vec<Metric>>> {
        let key = filters.list_key();
        {
            let lists = self.lists.read().await;
            match lists.get(&key) {
                Some(slot) if !slot.expired() => return Ok(Some(slot.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired entry: drop it so the next read is a clean miss.
        self.lists.write().await.remove(&key);
        Ok(None)
    }

    async fn store_list(&self, filters: &MetricFilters, metrics: &[Metric]) -> Result<()> {
        self.lists
            .write()
            .await
            .insert(filters.list_key(), CacheSlot::fresh(metrics.to_vec()));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Metric>> {
        let entities = self.entities.read().await;
        Ok(entities
            .get(id)
            .filter(|slot| !slot.expired())
            .map(|slot| slot.value.clone()))
    }

    async fn set(&self, id: &str, metric: &Metric) -> Result<()> {
        self.entities
            .write()
            .await
            .insert(id.to_string(), CacheSlot::fresh(metric.clone()));
        Ok(())
    }

    async fn invalidate_list(&self, filters: &MetricFilters) -> Result<()> {
        self.lists.write().await.remove(&filters.list_key());
        Ok(())
    }
}

// ── Users ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryUserStore {
    rows: RwLock<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<User>, i64)> {
        let rows = self.rows.read().await;
        Ok(page(rows.clone(), limit, offset))
    }

    async fn get(&self, id: &str) -> Result<User> {
        let rows = self.rows.read().await;
        rows.iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| TrackError::NotFound(format!("user {id}")))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, user: &User) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.iter().any(|u| u.id == user.id) {
            return Err(TrackError::Conflict(format!("user {} exists", user.id)));
        }
        rows.push(user.clone());
        Ok(())
    }

    async fn update(&self, id: &str, user: &User) -> Result<User> {
        let mut rows = self.rows.write().await;
        let slot = rows
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| TrackError::NotFound(format!("user {id}")))?;
        *slot = user.clone();
        Ok(slot.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|u| u.id != id);
        if rows.len() == before {
            return Err(TrackError::NotFound(format!("user {id}")));
        }
        Ok(())
    }
}
