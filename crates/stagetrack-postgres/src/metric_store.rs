//! Postgres-backed metric store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use stagetrack_core::domain::metric::{Interval, Metric, MetricFilters, MetricType};
use stagetrack_core::error::{Result, TrackError};
use stagetrack_core::ports::MetricStore;

use crate::map_db_err;

pub struct PgMetricStore {
    pool: PgPool,
}

impl PgMetricStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MetricRow {
    id: String,
    metric_type: String,
    value: f64,
    interval_tag: Option<String>,
    created_at: DateTime<Utc>,
    metadata: Json<BTreeMap<String, String>>,
}

impl TryFrom<MetricRow> for Metric {
    type Error = TrackError;

    fn try_from(row: MetricRow) -> Result<Metric> {
        let metric_type: MetricType = row
            .metric_type
            .parse()
            .map_err(|e: String| TrackError::Internal(anyhow::anyhow!(e)))?;
        let interval: Option<Interval> = row
            .interval_tag
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e: String| TrackError::Internal(anyhow::anyhow!(e)))?;
        Ok(Metric {
            id: row.id,
            metric_type,
            value: row.value,
            interval,
            created_at: row.created_at,
            metadata: row.metadata.0,
        })
    }
}

const COLUMNS: &str = "id, metric_type, value, interval_tag, created_at, metadata";

#[async_trait]
impl MetricStore for PgMetricStore {
    async fn list(&self, filters: &MetricFilters) -> Result<Vec<Metric>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM metrics WHERE TRUE"));
        if let Some(metric_type) = filters.metric_type {
            qb.push(" AND metric_type = ").push_bind(metric_type.as_str());
        }
        if let Some(interval) = filters.interval {
            qb.push(" AND interval_tag = ").push_bind(interval.as_str());
        }
        qb.push(" ORDER BY created_at");

        let rows: Vec<MetricRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.into_iter().map(Metric::try_from).collect()
    }

    async fn insert(&self, metric: &Metric) -> Result<String> {
        sqlx::query(
            "INSERT INTO metrics (id, metric_type, value, interval_tag, created_at, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&metric.id)
        .bind(metric.metric_type.as_str())
        .bind(metric.value)
        .bind(metric.interval.map(|i| i.as_str()))
        .bind(metric.created_at)
        .bind(Json(&metric.metadata))
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(metric.id.clone())
    }

    async fn update(&self, id: &str, metric: &Metric) -> Result<Metric> {
        let row: Option<MetricRow> = sqlx::query_as(&format!(
            "UPDATE metrics SET metric_type = $2, value = $3, interval_tag = $4, \
             created_at = $5, metadata = $6 WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(metric.metric_type.as_str())
        .bind(metric.value)
        .bind(metric.interval.map(|i| i.as_str()))
        .bind(metric.created_at)
        .bind(Json(&metric.metadata))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.ok_or_else(|| TrackError::NotFound(format!("metric {id}")))?
            .try_into()
    }
}
