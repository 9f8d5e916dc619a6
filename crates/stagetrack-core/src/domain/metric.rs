//! Metric rows produced by the aggregation engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed catalog of business metric types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricType {
    ClientsPerStage,
    StageDuration,
    RollbackCount,
    Dropout,
    Conversion,
    TotalDuration,
    StatusUpdates,
    Mau,
    Dau,
    SourceConversion,
    ChannelConversion,
    AppInstallRate,
    AutopaymentRate,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientsPerStage => "clients-per-stage",
            Self::StageDuration => "stage-duration",
            Self::RollbackCount => "rollback-count",
            Self::Dropout => "dropout",
            Self::Conversion => "conversion",
            Self::TotalDuration => "total-duration",
            Self::StatusUpdates => "status-updates",
            Self::Mau => "mau",
            Self::Dau => "dau",
            Self::SourceConversion => "source-conversion",
            Self::ChannelConversion => "channel-conversion",
            Self::AppInstallRate => "app-install-rate",
            Self::AutopaymentRate => "autopayment-rate",
        }
    }
}

impl std::str::FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clients-per-stage" => Ok(Self::ClientsPerStage),
            "stage-duration" => Ok(Self::StageDuration),
            "rollback-count" => Ok(Self::RollbackCount),
            "dropout" => Ok(Self::Dropout),
            "conversion" => Ok(Self::Conversion),
            "total-duration" => Ok(Self::TotalDuration),
            "status-updates" => Ok(Self::StatusUpdates),
            "mau" => Ok(Self::Mau),
            "dau" => Ok(Self::Dau),
            "source-conversion" => Ok(Self::SourceConversion),
            "channel-conversion" => Ok(Self::ChannelConversion),
            "app-install-rate" => Ok(Self::AppInstallRate),
            "autopayment-rate" => Ok(Self::AutopaymentRate),
            other => Err(format!("unknown metric type: {other}")),
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation window tag. Instantaneous gauges carry no interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Day,
    Week,
    Month,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(format!("unknown interval: {other}")),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored metric row.
///
/// Uniqueness is by (type, interval, window of `created_at`, metadata);
/// writers either append or upsert into that slot depending on the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub value: f64,
    /// `None` for instantaneous gauges such as `total-duration`.
    pub interval: Option<Interval>,
    /// Timestamp of the window the value describes.
    pub created_at: DateTime<Utc>,
    /// Dimensional breakdown, e.g. `{"stage": "onboarding"}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Metric {
    pub fn new(
        metric_type: MetricType,
        value: f64,
        interval: Option<Interval>,
        created_at: DateTime<Utc>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            metric_type,
            value,
            interval,
            created_at,
            metadata,
        }
    }
}

/// Filter set for metric list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MetricFilters {
    pub metric_type: Option<MetricType>,
    pub interval: Option<Interval>,
}

impl MetricFilters {
    pub fn new(metric_type: MetricType, interval: Option<Interval>) -> Self {
        Self {
            metric_type: Some(metric_type),
            interval,
        }
    }

    /// Cache key for the list this filter selects.
    pub fn list_key(&self) -> String {
        format!(
            "metrics:list:{}:{}",
            self.metric_type.map(|t| t.as_str()).unwrap_or(""),
            self.interval.map(|i| i.as_str()).unwrap_or(""),
        )
    }

    pub fn matches(&self, metric: &Metric) -> bool {
        if let Some(t) = self.metric_type {
            if metric.metric_type != t {
                return false;
            }
        }
        if let Some(iv) = self.interval {
            if metric.interval != Some(iv) {
                return false;
            }
        }
        true
    }
}
