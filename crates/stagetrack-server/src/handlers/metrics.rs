//! Metric catalog queries, on-demand calculation and the scrape endpoint.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use stagetrack_core::domain::metric::{Interval, MetricFilters, MetricType};
use stagetrack_core::error::TrackError;

use crate::authz::{self, Operation};
use crate::error::AppError;
use crate::middleware::jwt::Claims;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MetricListQuery {
    #[serde(rename = "type")]
    pub metric_type: Option<String>,
    pub interval: Option<String>,
}

/// GET /metrics?type=&interval=
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<MetricListQuery>,
) -> Result<Json<Value>, AppError> {
    authz::require(&claims, Operation::ListMetrics)?;

    let metric_type = query
        .metric_type
        .as_deref()
        .map(str::parse::<MetricType>)
        .transpose()
        .map_err(TrackError::InvalidInput)?;
    let interval = query
        .interval
        .as_deref()
        .map(str::parse::<Interval>)
        .transpose()
        .map_err(TrackError::InvalidInput)?;

    let rows = state
        .engine
        .list_metrics(&MetricFilters {
            metric_type,
            interval,
        })
        .await?;
    Ok(Json(json!({ "data": rows })))
}

#[derive(Debug, Deserialize)]
pub struct CalculateQuery {
    pub interval: String,
}

/// GET /metrics/calculate?interval=<iv> — run the whole catalog now.
pub async fn calculate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<CalculateQuery>,
) -> Result<Json<Value>, AppError> {
    authz::require(&claims, Operation::CalculateMetrics)?;

    let interval: Interval = query
        .interval
        .parse()
        .map_err(TrackError::InvalidInput)?;
    state.engine.calculate_all(interval).await?;
    Ok(Json(json!({
        "message": format!("metrics calculated for interval {interval}"),
    })))
}

/// GET /metrics/prometheus — text exposition for the operational scraper.
pub async fn prometheus(State(state): State<AppState>) -> Result<String, AppError> {
    Ok(state.sink.gather()?)
}
