//! Metric aggregation engine.
//!
//! Computes the fixed catalog of business indicators for a requested
//! interval, maintains the day → week → month rollup of the rollback
//! counter, and pushes the latest values into the [`MetricSink`].
//!
//! A `calculate_all` run observes one start instant `t`; sub-computations
//! execute sequentially in catalog order. Individual failures are logged
//! and do not abort the rest of the run; the run reports them as an
//! aggregate [`TrackError::Calculation`].

pub mod window;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::domain::client::{AppStatus, ClientFilters};
use crate::domain::metric::{Interval, Metric, MetricFilters, MetricType};
use crate::error::{Result, TrackError};
use crate::graph::StageGraph;
use crate::ports::{ClientStore, MetricCache, MetricStore};
use crate::sink::MetricSink;
use self::window::Window;

pub struct MetricEngine {
    clients: Arc<dyn ClientStore>,
    metrics: Arc<dyn MetricStore>,
    cache: Option<Arc<dyn MetricCache>>,
    graph: Arc<StageGraph>,
    sink: Arc<MetricSink>,
}

impl MetricEngine {
    pub fn new(
        clients: Arc<dyn ClientStore>,
        metrics: Arc<dyn MetricStore>,
        graph: Arc<StageGraph>,
        sink: Arc<MetricSink>,
    ) -> Self {
        Self {
            clients,
            metrics,
            cache: None,
            graph,
            sink,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn MetricCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    // ── Reads ─────────────────────────────────────────────────

    /// List metrics through the read-through cache.
    pub async fn list_metrics(&self, filters: &MetricFilters) -> Result<Vec<Metric>> {
        if let Some(cache) = &self.cache {
            match cache.list(filters).await {
                Ok(Some(hit)) => {
                    self.sink.cache_hits_total.with_label_values(&["metrics"]).inc();
                    debug!(key = %filters.list_key(), "metric list served from cache");
                    return Ok(hit);
                }
                Ok(None) => {
                    self.sink.cache_misses_total.with_label_values(&["metrics"]).inc();
                }
                Err(e) => {
                    warn!(error = %e, "metric cache read failed, falling back to store");
                }
            }
        }

        let rows = self.metrics.list(filters).await?;
        if let Some(cache) = &self.cache {
            if !rows.is_empty() {
                if let Err(e) = cache.store_list(filters, &rows).await {
                    warn!(error = %e, "failed to populate metric list cache");
                }
            }
        }
        Ok(rows)
    }

    // ── Batch computation ─────────────────────────────────────

    /// Compute the whole catalog for `interval` at the current instant.
    pub async fn calculate_all(&self, interval: Interval) -> Result<()> {
        self.calculate_all_at(Utc::now(), interval).await
    }

    /// Deterministic entry point: every sub-computation observes `t`.
    pub async fn calculate_all_at(&self, t: DateTime<Utc>, interval: Interval) -> Result<()> {
        info!(interval = %interval, "metric calculation run started");
        let mut failed = Vec::new();

        note(&mut failed, MetricType::ClientsPerStage, self.clients_per_stage(t).await);
        note(&mut failed, MetricType::StageDuration, self.stage_duration(t).await);
        note(&mut failed, MetricType::Dau, self.dau(t).await);
        note(&mut failed, MetricType::Mau, self.mau(t).await);
        note(&mut failed, MetricType::AppInstallRate, self.app_install_rate(t).await);
        note(&mut failed, MetricType::AutopaymentRate, self.autopayment_rate(t).await);
        note(
            &mut failed,
            MetricType::SourceConversion,
            self.source_conversion(t, interval).await,
        );
        note(
            &mut failed,
            MetricType::ChannelConversion,
            self.channel_conversion(t, interval).await,
        );
        note(&mut failed, MetricType::Conversion, self.conversion(t, interval).await);
        note(&mut failed, MetricType::Dropout, self.dropout(t, interval).await);
        note(&mut failed, MetricType::TotalDuration, self.total_duration(t).await);
        note(&mut failed, MetricType::StatusUpdates, self.status_updates(t, interval).await);

        if matches!(interval, Interval::Week | Interval::Month) {
            note(
                &mut failed,
                MetricType::RollbackCount,
                self.aggregate_rollback(t, interval).await,
            );
        }

        self.invalidate_after_run(interval).await;

        if failed.is_empty() {
            info!(interval = %interval, "metric calculation run finished");
            Ok(())
        } else {
            Err(TrackError::Calculation(failed))
        }
    }

    async fn invalidate_after_run(&self, interval: Interval) {
        let Some(cache) = &self.cache else { return };

        let affected = [
            MetricFilters::new(MetricType::ClientsPerStage, None),
            MetricFilters::new(MetricType::StageDuration, None),
            MetricFilters::new(MetricType::Dau, Some(Interval::Day)),
            MetricFilters::new(MetricType::Mau, Some(Interval::Day)),
            MetricFilters::new(MetricType::AppInstallRate, None),
            MetricFilters::new(MetricType::AutopaymentRate, None),
            MetricFilters::new(MetricType::SourceConversion, Some(interval)),
            MetricFilters::new(MetricType::ChannelConversion, Some(interval)),
            MetricFilters::new(MetricType::Conversion, Some(interval)),
            MetricFilters::new(MetricType::Dropout, Some(interval)),
            MetricFilters::new(MetricType::TotalDuration, None),
            MetricFilters::new(MetricType::StatusUpdates, Some(interval)),
            MetricFilters::new(MetricType::RollbackCount, Some(Interval::Day)),
            MetricFilters::new(MetricType::RollbackCount, Some(interval)),
        ];
        for filters in affected {
            if let Err(e) = cache.invalidate_list(&filters).await {
                warn!(key = %filters.list_key(), error = %e, "failed to invalidate metric cache");
            }
        }
    }

    // ── Rollback accounting ───────────────────────────────────

    /// Count one rollback transition into the day window containing `t`.
    ///
    /// Upserts the daily `rollback-count` row: an existing row in the
    /// window gets `value += 1`, otherwise a new row starts at 1.
    pub async fn record_rollback(&self, t: DateTime<Utc>) -> Result<()> {
        let day = window::day_window(t);
        let filters = MetricFilters::new(MetricType::RollbackCount, Some(Interval::Day));
        let rows = self.metrics.list(&filters).await?;

        let stored = match upsert_candidate(&rows, day) {
            Some(existing) => {
                let mut updated = existing.clone();
                updated.value += 1.0;
                self.metrics.update(&existing.id, &updated).await?
            }
            None => {
                let row = Metric::new(
                    MetricType::RollbackCount,
                    1.0,
                    Some(Interval::Day),
                    t,
                    BTreeMap::new(),
                );
                self.metrics.insert(&row).await?;
                row
            }
        };

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&stored.id, &stored).await {
                warn!(error = %e, "failed to refresh cached rollback entity");
            }
            if let Err(e) = cache.invalidate_list(&filters).await {
                warn!(error = %e, "failed to invalidate rollback cache");
            }
        }
        self.sink.rollbacks_total.inc();
        Ok(())
    }

    /// Roll daily rollback counts up into the week or month containing `t`.
    ///
    /// The target row is upserted: updated in place when one already
    /// exists in the window, otherwise inserted stamped at the window
    /// start.
    pub async fn aggregate_rollback(&self, t: DateTime<Utc>, target: Interval) -> Result<()> {
        if target == Interval::Day {
            return Err(TrackError::InvalidInput(
                "rollback aggregation targets week or month".into(),
            ));
        }
        let win = Window::containing(t, target);

        let daily = self
            .metrics
            .list(&MetricFilters::new(MetricType::RollbackCount, Some(Interval::Day)))
            .await?;
        let sum: f64 = daily
            .iter()
            .filter(|m| win.contains(m.created_at))
            .map(|m| m.value)
            .sum();

        let target_filters = MetricFilters::new(MetricType::RollbackCount, Some(target));
        let existing_rows = self.metrics.list(&target_filters).await?;

        match upsert_candidate(&existing_rows, win) {
            Some(existing) => {
                let mut updated = existing.clone();
                updated.value = sum;
                self.metrics.update(&existing.id, &updated).await?;
                info!(interval = %target, value = sum, "updated rollback rollup");
            }
            None => {
                let row = Metric::new(
                    MetricType::RollbackCount,
                    sum,
                    Some(target),
                    win.start,
                    BTreeMap::new(),
                );
                self.metrics.insert(&row).await?;
                info!(interval = %target, value = sum, "created rollback rollup");
            }
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate_list(&target_filters).await {
                warn!(error = %e, "failed to invalidate rollback rollup cache");
            }
        }
        Ok(())
    }

    // ── Catalog formulas ──────────────────────────────────────

    async fn clients_per_stage(&self, t: DateTime<Utc>) -> Result<()> {
        for stage in self.graph.list() {
            let count = self.clients.count(&ClientFilters::stage(&stage.id)).await? as f64;
            self.append(
                MetricType::ClientsPerStage,
                count,
                None,
                t,
                [("stage", stage.id.as_str())],
            )
            .await?;
            self.sink
                .clients_per_stage
                .with_label_values(&[&stage.id])
                .set(count);
        }
        Ok(())
    }

    async fn stage_duration(&self, t: DateTime<Utc>) -> Result<()> {
        let (active, _) = self.clients.list(&ClientFilters::active(), 0, 0).await?;

        let mut per_stage: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for client in &active {
            let Some(registered) = client.registration_date else { continue };
            let hours = (client.last_updated - registered).num_seconds() as f64 / 3600.0;
            per_stage.entry(client.current_stage.as_str()).or_default().push(hours);
        }

        for (stage, samples) in per_stage {
            let avg = samples.iter().sum::<f64>() / samples.len() as f64;
            self.append(MetricType::StageDuration, avg, None, t, [("stage", stage)])
                .await?;
            self.sink.stage_duration_hours.with_label_values(&[stage]).set(avg);
        }
        Ok(())
    }

    async fn dau(&self, t: DateTime<Utc>) -> Result<()> {
        let filters = ClientFilters {
            last_login_after: Some(t - Duration::hours(24)),
            ..Default::default()
        };
        let count = self.clients.count(&filters).await? as f64;
        self.append(MetricType::Dau, count, Some(Interval::Day), t, []).await?;
        self.sink.dau.set(count);
        Ok(())
    }

    async fn mau(&self, t: DateTime<Utc>) -> Result<()> {
        let filters = ClientFilters {
            last_login_after: Some(t - Duration::days(30)),
            ..Default::default()
        };
        let count = self.clients.count(&filters).await? as f64;
        self.append(MetricType::Mau, count, Some(Interval::Day), t, []).await?;
        self.sink.mau.set(count);
        Ok(())
    }

    async fn app_install_rate(&self, t: DateTime<Utc>) -> Result<()> {
        let installed = self
            .clients
            .count(&ClientFilters {
                app: Some(AppStatus::Installed),
                ..Default::default()
            })
            .await?;
        let not_installed = self
            .clients
            .count(&ClientFilters {
                app: Some(AppStatus::NotInstalled),
                ..Default::default()
            })
            .await?;

        let known = installed + not_installed;
        let rate = if known > 0 {
            installed as f64 / known as f64
        } else {
            0.0
        };
        self.append(MetricType::AppInstallRate, rate, None, t, []).await?;
        self.sink.app_install_rate.set(rate);
        Ok(())
    }

    async fn autopayment_rate(&self, t: DateTime<Utc>) -> Result<()> {
        let (all, _) = self.clients.list(&ClientFilters::default(), 0, 0).await?;

        let mut total = 0usize;
        let mut enabled = 0usize;
        for client in &all {
            for contract in &client.contracts {
                total += 1;
                if contract.auto_payment == crate::domain::client::AutoPayment::Enabled {
                    enabled += 1;
                }
            }
        }

        let rate = if total > 0 {
            enabled as f64 / total as f64
        } else {
            0.0
        };
        self.append(MetricType::AutopaymentRate, rate, None, t, []).await?;
        self.sink.autopayment_rate.set(rate);
        Ok(())
    }

    async fn source_conversion(&self, t: DateTime<Utc>, interval: Interval) -> Result<()> {
        self.dimensional_conversion(t, interval, MetricType::SourceConversion).await
    }

    async fn channel_conversion(&self, t: DateTime<Utc>, interval: Interval) -> Result<()> {
        self.dimensional_conversion(t, interval, MetricType::ChannelConversion).await
    }

    /// Shared body of `source-conversion` and `channel-conversion`:
    /// conversion rate per distinct value of the chosen acquisition
    /// dimension, over clients updated inside the window.
    async fn dimensional_conversion(
        &self,
        t: DateTime<Utc>,
        interval: Interval,
        metric_type: MetricType,
    ) -> Result<()> {
        let Some(last) = self.graph.last_stage() else {
            debug!(metric = %metric_type, "stage graph empty, skipping");
            return Ok(());
        };
        let last = last.id.clone();
        let win = Window::containing(t, interval);

        let (all, _) = self.clients.list(&ClientFilters::default(), 0, 0).await?;
        let mut values: Vec<String> = all
            .iter()
            .filter(|c| win.start <= c.last_updated && c.last_updated <= t)
            .filter_map(|c| match metric_type {
                MetricType::SourceConversion => c.source.clone(),
                _ => c.channel.clone(),
            })
            .filter(|v| !v.is_empty())
            .collect();
        values.sort();
        values.dedup();

        for value in values {
            let dimension = |filters: ClientFilters| match metric_type {
                MetricType::SourceConversion => ClientFilters {
                    source: Some(value.clone()),
                    ..filters
                },
                _ => ClientFilters {
                    channel: Some(value.clone()),
                    ..filters
                },
            };

            let total = self
                .clients
                .count(&dimension(ClientFilters::updated_within(win.start, t)))
                .await?;
            let completed = self
                .clients
                .count(&dimension(ClientFilters {
                    stage: Some(last.clone()),
                    ..ClientFilters::updated_within(win.start, t)
                }))
                .await?;

            let rate = if total > 0 {
                completed as f64 / total as f64
            } else {
                0.0
            };

            let label = match metric_type {
                MetricType::SourceConversion => "source",
                _ => "channel",
            };
            self.append(metric_type, rate, Some(interval), t, [(label, value.as_str())])
                .await?;
            match metric_type {
                MetricType::SourceConversion => {
                    self.sink.source_conversion.with_label_values(&[&value]).set(rate)
                }
                _ => self.sink.channel_conversion.with_label_values(&[&value]).set(rate),
            }
        }
        Ok(())
    }

    async fn conversion(&self, t: DateTime<Utc>, interval: Interval) -> Result<()> {
        let Some(last) = self.graph.last_stage() else {
            debug!("stage graph empty, skipping conversion");
            return Ok(());
        };
        let win = Window::containing(t, interval);

        let total = self
            .clients
            .count(&ClientFilters::updated_within(win.start, t))
            .await?;
        let converted = self
            .clients
            .count(&ClientFilters {
                stage: Some(last.id.clone()),
                ..ClientFilters::updated_within(win.start, t)
            })
            .await?;

        let rate = if total > 0 {
            converted as f64 / total as f64
        } else {
            0.0
        };
        self.append(MetricType::Conversion, rate, Some(interval), t, []).await?;
        self.sink.conversion.set(rate);
        Ok(())
    }

    async fn dropout(&self, t: DateTime<Utc>, interval: Interval) -> Result<()> {
        let win = Window::containing(t, interval);
        let count = self
            .clients
            .count(&ClientFilters {
                is_active: Some(false),
                ..ClientFilters::updated_within(win.start, t)
            })
            .await? as f64;
        self.append(MetricType::Dropout, count, Some(interval), t, []).await?;
        self.sink.dropout.set(count);
        Ok(())
    }

    async fn total_duration(&self, t: DateTime<Utc>) -> Result<()> {
        let Some(last) = self.graph.last_stage() else {
            debug!("stage graph empty, skipping total duration");
            return Ok(());
        };

        let (converted, _) = self
            .clients
            .list(
                &ClientFilters {
                    stage: Some(last.id.clone()),
                    is_active: Some(true),
                    ..Default::default()
                },
                0,
                0,
            )
            .await?;

        let mut days = Vec::new();
        for client in &converted {
            if let Some(registered) = client.registration_date {
                days.push((client.last_updated - registered).num_seconds() as f64 / 86_400.0);
            }
        }

        let avg = if days.is_empty() {
            0.0
        } else {
            days.iter().sum::<f64>() / days.len() as f64
        };
        self.append(MetricType::TotalDuration, avg, None, t, []).await?;
        self.sink.total_duration_days.set(avg);
        Ok(())
    }

    async fn status_updates(&self, t: DateTime<Utc>, interval: Interval) -> Result<()> {
        let win = Window::containing(t, interval);
        let count = self
            .clients
            .count(&ClientFilters::updated_within(win.start, t))
            .await? as f64;
        self.append(MetricType::StatusUpdates, count, Some(interval), t, []).await?;
        self.sink.status_updates.set(count);
        Ok(())
    }

    async fn append<'a>(
        &self,
        metric_type: MetricType,
        value: f64,
        interval: Option<Interval>,
        t: DateTime<Utc>,
        metadata: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<()> {
        let metadata: BTreeMap<String, String> = metadata
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let row = Metric::new(metric_type, value, interval, t, metadata);
        self.metrics.insert(&row).await?;
        Ok(())
    }
}

fn note(failed: &mut Vec<MetricType>, metric_type: MetricType, result: Result<()>) {
    if let Err(e) = result {
        warn!(metric = %metric_type, error = %e, "metric computation failed");
        failed.push(metric_type);
    }
}

/// The row an upsert should operate on: the earliest row inside the
/// window. More than one candidate means corrupted data; the anomaly is
/// logged and the earliest wins.
fn upsert_candidate(rows: &[Metric], win: Window) -> Option<&Metric> {
    let mut in_window: Vec<&Metric> = rows.iter().filter(|m| win.contains(m.created_at)).collect();
    if in_window.len() > 1 {
        warn!(
            count = in_window.len(),
            window_start = %win.start,
            "multiple upsert candidates in one window, using the earliest"
        );
    }
    in_window.sort_by_key(|m| m.created_at);
    in_window.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::client::{AutoPayment, Client, Contract};
    use crate::domain::stage::StageRecord;
    use crate::store::{MemoryClientStore, MemoryMetricCache, MemoryMetricStore};
    use chrono::TimeZone;

    fn graph() -> Arc<StageGraph> {
        let records = [
            ("registration", 1, vec!["registration", "onboarding"]),
            ("onboarding", 2, vec!["registration", "active"]),
            ("active", 3, vec!["onboarding", "active"]),
        ];
        Arc::new(
            StageGraph::new(
                records
                    .into_iter()
                    .map(|(id, order, transitions)| {
                        crate::domain::stage::Stage::from(StageRecord {
                            id: id.into(),
                            name: id.to_uppercase(),
                            order,
                            transitions: transitions.into_iter().map(String::from).collect(),
                        })
                    })
                    .collect(),
            )
            .unwrap(),
        )
    }

    struct Fixture {
        clients: Arc<MemoryClientStore>,
        metrics: Arc<MemoryMetricStore>,
        engine: MetricEngine,
    }

    fn fixture() -> Fixture {
        let clients = Arc::new(MemoryClientStore::new());
        let metrics = Arc::new(MemoryMetricStore::new());
        let sink = Arc::new(MetricSink::new().unwrap());
        let engine = MetricEngine::new(
            clients.clone(),
            metrics.clone(),
            graph(),
            sink,
        )
        .with_cache(Arc::new(MemoryMetricCache::new()));
        Fixture {
            clients,
            metrics,
            engine,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn client(id: &str, stage: &str, updated: DateTime<Utc>) -> Client {
        Client {
            id: id.into(),
            name: Some(id.into()),
            email: Some(format!("{id}@example.com")),
            current_stage: stage.into(),
            registration_date: Some(updated - Duration::days(10)),
            last_updated: updated,
            is_active: true,
            source: None,
            channel: None,
            app: AppStatus::Unknown,
            last_login: None,
            contracts: vec![],
        }
    }

    async fn rollback_rows(metrics: &MemoryMetricStore, interval: Interval) -> Vec<Metric> {
        metrics
            .list(&MetricFilters::new(MetricType::RollbackCount, Some(interval)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn record_rollback_creates_then_increments() {
        let f = fixture();
        let t = at(2024, 3, 15, 10);

        f.engine.record_rollback(t).await.unwrap();
        let rows = rollback_rows(&f.metrics, Interval::Day).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 1.0);
        assert!(window::day_window(t).contains(rows[0].created_at));

        f.engine.record_rollback(at(2024, 3, 15, 18)).await.unwrap();
        let rows = rollback_rows(&f.metrics, Interval::Day).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 2.0);
    }

    #[tokio::test]
    async fn record_rollback_starts_fresh_row_next_day() {
        let f = fixture();
        f.engine.record_rollback(at(2024, 3, 15, 23)).await.unwrap();
        f.engine.record_rollback(at(2024, 3, 16, 1)).await.unwrap();
        let rows = rollback_rows(&f.metrics, Interval::Day).await;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|m| m.value == 1.0));
    }

    #[tokio::test]
    async fn weekly_rollup_sums_daily_rows() {
        let f = fixture();
        // Three daily rows inside ISO week 11 of 2024 (Mon 03-11 .. Sun 03-17).
        for (day, value) in [(11, 1.0), (13, 2.0), (15, 3.0)] {
            f.metrics
                .insert(&Metric::new(
                    MetricType::RollbackCount,
                    value,
                    Some(Interval::Day),
                    at(2024, 3, day, 12),
                    BTreeMap::new(),
                ))
                .await
                .unwrap();
        }

        f.engine
            .aggregate_rollback(at(2024, 3, 15, 10), Interval::Week)
            .await
            .unwrap();

        let rows = rollback_rows(&f.metrics, Interval::Week).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 6.0);
        assert_eq!(rows[0].created_at, at(2024, 3, 11, 0));
    }

    #[tokio::test]
    async fn rollup_updates_existing_row_in_window() {
        let f = fixture();
        f.metrics
            .insert(&Metric::new(
                MetricType::RollbackCount,
                4.0,
                Some(Interval::Day),
                at(2024, 3, 12, 9),
                BTreeMap::new(),
            ))
            .await
            .unwrap();

        f.engine
            .aggregate_rollback(at(2024, 3, 12, 10), Interval::Week)
            .await
            .unwrap();
        f.metrics
            .insert(&Metric::new(
                MetricType::RollbackCount,
                2.0,
                Some(Interval::Day),
                at(2024, 3, 14, 9),
                BTreeMap::new(),
            ))
            .await
            .unwrap();
        f.engine
            .aggregate_rollback(at(2024, 3, 14, 10), Interval::Week)
            .await
            .unwrap();

        let rows = rollback_rows(&f.metrics, Interval::Week).await;
        assert_eq!(rows.len(), 1, "second rollup must update, not append");
        assert_eq!(rows[0].value, 6.0);
    }

    #[tokio::test]
    async fn rollup_rejects_day_target() {
        let f = fixture();
        let err = f
            .engine
            .aggregate_rollback(at(2024, 3, 15, 10), Interval::Day)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn rollback_rows_outside_window_are_ignored() {
        let f = fixture();
        // Week 10 row must not leak into the week 11 rollup.
        f.metrics
            .insert(&Metric::new(
                MetricType::RollbackCount,
                9.0,
                Some(Interval::Day),
                at(2024, 3, 8, 12),
                BTreeMap::new(),
            ))
            .await
            .unwrap();
        f.metrics
            .insert(&Metric::new(
                MetricType::RollbackCount,
                5.0,
                Some(Interval::Day),
                at(2024, 3, 12, 12),
                BTreeMap::new(),
            ))
            .await
            .unwrap();

        f.engine
            .aggregate_rollback(at(2024, 3, 15, 0), Interval::Week)
            .await
            .unwrap();
        let rows = rollback_rows(&f.metrics, Interval::Week).await;
        assert_eq!(rows[0].value, 5.0);
    }

    #[tokio::test]
    async fn upsert_tie_break_prefers_earliest_row() {
        let f = fixture();
        let late = Metric::new(
            MetricType::RollbackCount,
            7.0,
            Some(Interval::Day),
            at(2024, 3, 15, 14),
            BTreeMap::new(),
        );
        let early = Metric::new(
            MetricType::RollbackCount,
            3.0,
            Some(Interval::Day),
            at(2024, 3, 15, 8),
            BTreeMap::new(),
        );
        f.metrics.insert(&late).await.unwrap();
        f.metrics.insert(&early).await.unwrap();

        f.engine.record_rollback(at(2024, 3, 15, 20)).await.unwrap();

        let rows = rollback_rows(&f.metrics, Interval::Day).await;
        let bumped = rows.iter().find(|m| m.id == early.id).unwrap();
        let untouched = rows.iter().find(|m| m.id == late.id).unwrap();
        assert_eq!(bumped.value, 4.0);
        assert_eq!(untouched.value, 7.0);
    }

    #[tokio::test]
    async fn conversion_counts_last_stage_share() {
        let f = fixture();
        let t = at(2024, 3, 15, 12);
        for i in 0..10 {
            let stage = if i < 3 { "active" } else { "onboarding" };
            f.clients
                .insert(&client(&format!("c-{i}"), stage, t - Duration::hours(2)))
                .await
                .unwrap();
        }

        f.engine.calculate_all_at(t, Interval::Day).await.unwrap();

        let rows = f
            .engine
            .list_metrics(&MetricFilters::new(MetricType::Conversion, Some(Interval::Day)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].value - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn calculate_all_writes_every_metric_type() {
        let f = fixture();
        let t = at(2024, 3, 15, 12);
        let mut c = client("c-1", "active", t - Duration::hours(1));
        c.source = Some("website".into());
        c.channel = Some("organic".into());
        c.app = AppStatus::Installed;
        c.last_login = Some(t - Duration::hours(3));
        c.contracts = vec![Contract {
            id: "ct-1".into(),
            auto_payment: AutoPayment::Enabled,
            ..Default::default()
        }];
        f.clients.insert(&c).await.unwrap();

        let mut dropped = client("c-2", "onboarding", t - Duration::hours(1));
        dropped.is_active = false;
        f.clients.insert(&dropped).await.unwrap();

        f.engine.calculate_all_at(t, Interval::Week).await.unwrap();

        let all = f.metrics.list(&MetricFilters::default()).await.unwrap();
        let written: std::collections::HashSet<MetricType> =
            all.iter().map(|m| m.metric_type).collect();
        for expected in [
            MetricType::ClientsPerStage,
            MetricType::StageDuration,
            MetricType::Dau,
            MetricType::Mau,
            MetricType::AppInstallRate,
            MetricType::AutopaymentRate,
            MetricType::SourceConversion,
            MetricType::ChannelConversion,
            MetricType::Conversion,
            MetricType::Dropout,
            MetricType::TotalDuration,
            MetricType::StatusUpdates,
            MetricType::RollbackCount,
        ] {
            assert!(written.contains(&expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn clients_per_stage_writes_one_row_per_stage() {
        let f = fixture();
        let t = at(2024, 3, 15, 12);
        f.clients.insert(&client("c-1", "registration", t)).await.unwrap();
        f.clients.insert(&client("c-2", "registration", t)).await.unwrap();

        f.engine.calculate_all_at(t, Interval::Day).await.unwrap();

        let rows = f
            .metrics
            .list(&MetricFilters::new(MetricType::ClientsPerStage, None))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        let registration = rows
            .iter()
            .find(|m| m.metadata.get("stage").map(String::as_str) == Some("registration"))
            .unwrap();
        assert_eq!(registration.value, 2.0);
    }

    #[tokio::test]
    async fn source_conversion_is_split_per_source() {
        let f = fixture();
        let t = at(2024, 3, 15, 12);
        for (id, source, stage) in [
            ("c-1", "website", "active"),
            ("c-2", "website", "onboarding"),
            ("c-3", "referral", "active"),
        ] {
            let mut c = client(id, stage, t - Duration::hours(1));
            c.source = Some(source.into());
            f.clients.insert(&c).await.unwrap();
        }

        f.engine.calculate_all_at(t, Interval::Day).await.unwrap();

        let rows = f
            .metrics
            .list(&MetricFilters::new(MetricType::SourceConversion, Some(Interval::Day)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let website = rows
            .iter()
            .find(|m| m.metadata.get("source").map(String::as_str) == Some("website"))
            .unwrap();
        assert!((website.value - 0.5).abs() < 1e-9);
        let referral = rows
            .iter()
            .find(|m| m.metadata.get("source").map(String::as_str) == Some("referral"))
            .unwrap();
        assert!((referral.value - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn dropout_counts_deactivated_in_window() {
        let f = fixture();
        let t = at(2024, 3, 15, 12);
        let mut gone = client("c-1", "onboarding", t - Duration::hours(2));
        gone.is_active = false;
        f.clients.insert(&gone).await.unwrap();

        let mut old = client("c-2", "onboarding", t - Duration::days(40));
        old.is_active = false;
        f.clients.insert(&old).await.unwrap();

        f.engine.calculate_all_at(t, Interval::Day).await.unwrap();

        let rows = f
            .metrics
            .list(&MetricFilters::new(MetricType::Dropout, Some(Interval::Day)))
            .await
            .unwrap();
        assert_eq!(rows[0].value, 1.0);
    }

    #[tokio::test]
    async fn stage_duration_averages_dwell_hours() {
        let f = fixture();
        let t = at(2024, 3, 15, 12);
        // Two clients in onboarding: 24h and 48h since registration.
        for (id, hours) in [("c-1", 24), ("c-2", 48)] {
            let mut c = client(id, "onboarding", t);
            c.registration_date = Some(t - Duration::hours(hours));
            f.clients.insert(&c).await.unwrap();
        }

        f.engine.calculate_all_at(t, Interval::Day).await.unwrap();

        let rows = f
            .metrics
            .list(&MetricFilters::new(MetricType::StageDuration, None))
            .await
            .unwrap();
        let onboarding = rows
            .iter()
            .find(|m| m.metadata.get("stage").map(String::as_str) == Some("onboarding"))
            .unwrap();
        assert!((onboarding.value - 36.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn app_install_rate_ignores_unknown() {
        let f = fixture();
        let t = at(2024, 3, 15, 12);
        for (id, app) in [
            ("c-1", AppStatus::Installed),
            ("c-2", AppStatus::NotInstalled),
            ("c-3", AppStatus::Unknown),
            ("c-4", AppStatus::Installed),
        ] {
            let mut c = client(id, "onboarding", t);
            c.app = app;
            f.clients.insert(&c).await.unwrap();
        }

        f.engine.calculate_all_at(t, Interval::Day).await.unwrap();

        let rows = f
            .metrics
            .list(&MetricFilters::new(MetricType::AppInstallRate, None))
            .await
            .unwrap();
        // 2 installed out of 3 with a known status; the unknown one is excluded.
        assert!((rows[0].value - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn autopayment_rate_spans_all_contracts() {
        let f = fixture();
        let t = at(2024, 3, 15, 12);
        let mut a = client("c-1", "active", t);
        a.contracts = vec![
            Contract {
                id: "ct-1".into(),
                auto_payment: AutoPayment::Enabled,
                ..Default::default()
            },
            Contract {
                id: "ct-2".into(),
                auto_payment: AutoPayment::Disabled,
                ..Default::default()
            },
        ];
        let mut b = client("c-2", "onboarding", t);
        b.contracts = vec![Contract {
            id: "ct-3".into(),
            auto_payment: AutoPayment::Enabled,
            ..Default::default()
        }];
        f.clients.insert(&a).await.unwrap();
        f.clients.insert(&b).await.unwrap();

        f.engine.calculate_all_at(t, Interval::Day).await.unwrap();

        let rows = f
            .metrics
            .list(&MetricFilters::new(MetricType::AutopaymentRate, None))
            .await
            .unwrap();
        assert!((rows[0].value - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn dau_and_mau_window_on_last_login() {
        let f = fixture();
        let t = at(2024, 3, 15, 12);
        let logins = [
            ("c-1", t - Duration::hours(2)),   // dau + mau
            ("c-2", t - Duration::days(3)),    // mau only
            ("c-3", t - Duration::days(45)),   // neither
        ];
        for (id, login) in logins {
            let mut c = client(id, "onboarding", t);
            c.last_login = Some(login);
            f.clients.insert(&c).await.unwrap();
        }

        f.engine.calculate_all_at(t, Interval::Day).await.unwrap();

        let dau = f
            .metrics
            .list(&MetricFilters::new(MetricType::Dau, Some(Interval::Day)))
            .await
            .unwrap();
        assert_eq!(dau[0].value, 1.0);
        let mau = f
            .metrics
            .list(&MetricFilters::new(MetricType::Mau, Some(Interval::Day)))
            .await
            .unwrap();
        assert_eq!(mau[0].value, 2.0);
    }

    #[tokio::test]
    async fn status_updates_counts_window_touches() {
        let f = fixture();
        let t = at(2024, 3, 15, 12);
        f.clients.insert(&client("c-1", "onboarding", t - Duration::hours(1))).await.unwrap();
        f.clients.insert(&client("c-2", "onboarding", t - Duration::days(2))).await.unwrap();

        f.engine.calculate_all_at(t, Interval::Day).await.unwrap();
        let day = f
            .metrics
            .list(&MetricFilters::new(MetricType::StatusUpdates, Some(Interval::Day)))
            .await
            .unwrap();
        assert_eq!(day[0].value, 1.0);

        f.engine.calculate_all_at(t, Interval::Week).await.unwrap();
        let week = f
            .metrics
            .list(&MetricFilters::new(MetricType::StatusUpdates, Some(Interval::Week)))
            .await
            .unwrap();
        assert_eq!(week[0].value, 2.0);
    }

    #[tokio::test]
    async fn monthly_rollup_covers_the_calendar_month() {
        let f = fixture();
        for (day, value) in [(1, 2.0), (15, 3.0), (29, 4.0)] {
            f.metrics
                .insert(&Metric::new(
                    MetricType::RollbackCount,
                    value,
                    Some(Interval::Day),
                    at(2024, 2, day, 12),
                    BTreeMap::new(),
                ))
                .await
                .unwrap();
        }
        // A March row stays out of the February rollup.
        f.metrics
            .insert(&Metric::new(
                MetricType::RollbackCount,
                9.0,
                Some(Interval::Day),
                at(2024, 3, 1, 0),
                BTreeMap::new(),
            ))
            .await
            .unwrap();

        f.engine
            .aggregate_rollback(at(2024, 2, 20, 10), Interval::Month)
            .await
            .unwrap();

        let rows = rollback_rows(&f.metrics, Interval::Month).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 9.0);
        assert_eq!(rows[0].created_at, at(2024, 2, 1, 0));
    }

    #[tokio::test]
    async fn failures_are_collected_not_fatal() {
        // A store that fails every count makes most computations fail,
        // while list-based ones still succeed.
        struct FailingCounts(MemoryClientStore);

        #[async_trait::async_trait]
        impl crate::ports::ClientStore for FailingCounts {
            async fn list(
                &self,
                filters: &ClientFilters,
                limit: i64,
                offset: i64,
            ) -> crate::error::Result<(Vec<crate::domain::client::Client>, i64)> {
                self.0.list(filters, limit, offset).await
            }
            async fn get(&self, id: &str) -> crate::error::Result<crate::domain::client::Client> {
                self.0.get(id).await
            }
            async fn find_by_email(
                &self,
                email: &str,
            ) -> crate::error::Result<Option<crate::domain::client::Client>> {
                self.0.find_by_email(email).await
            }
            async fn insert(&self, client: &crate::domain::client::Client) -> crate::error::Result<()> {
                self.0.insert(client).await
            }
            async fn update(
                &self,
                id: &str,
                client: &crate::domain::client::Client,
            ) -> crate::error::Result<crate::domain::client::Client> {
                self.0.update(id, client).await
            }
            async fn deactivate(&self, id: &str) -> crate::error::Result<()> {
                self.0.deactivate(id).await
            }
            async fn count(&self, _filters: &ClientFilters) -> crate::error::Result<i64> {
                Err(TrackError::Internal(anyhow::anyhow!("count unavailable")))
            }
        }

        let clients = Arc::new(FailingCounts(MemoryClientStore::new()));
        let metrics = Arc::new(MemoryMetricStore::new());
        let engine = MetricEngine::new(
            clients,
            metrics.clone(),
            graph(),
            Arc::new(MetricSink::new().unwrap()),
        );

        let err = engine
            .calculate_all_at(at(2024, 3, 15, 12), Interval::Day)
            .await
            .unwrap_err();
        let TrackError::Calculation(failed) = err else {
            panic!("expected an aggregate calculation error");
        };
        // Count-based computations failed...
        assert!(failed.contains(&MetricType::ClientsPerStage));
        assert!(failed.contains(&MetricType::Conversion));
        assert!(failed.contains(&MetricType::Dau));
        // ...but list-based ones ran to completion and wrote rows.
        assert!(!failed.contains(&MetricType::AutopaymentRate));
        let rows = metrics
            .list(&MetricFilters::new(MetricType::AutopaymentRate, None))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn list_metrics_populates_and_serves_cache() {
        let clients = Arc::new(MemoryClientStore::new());
        let metrics = Arc::new(MemoryMetricStore::new());
        let cache = Arc::new(MemoryMetricCache::new());
        let sink = Arc::new(MetricSink::new().unwrap());
        let engine = MetricEngine::new(clients, metrics.clone(), graph(), sink)
            .with_cache(cache.clone());

        let row = Metric::new(
            MetricType::Conversion,
            0.5,
            Some(Interval::Day),
            at(2024, 3, 15, 12),
            BTreeMap::new(),
        );
        metrics.insert(&row).await.unwrap();

        let filters = MetricFilters::new(MetricType::Conversion, Some(Interval::Day));
        let first = engine.list_metrics(&filters).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(cache.list(&filters).await.unwrap().is_some());

        // A second store write is invisible until the cache is invalidated.
        metrics
            .insert(&Metric::new(
                MetricType::Conversion,
                0.7,
                Some(Interval::Day),
                at(2024, 3, 15, 13),
                BTreeMap::new(),
            ))
            .await
            .unwrap();
        assert_eq!(engine.list_metrics(&filters).await.unwrap().len(), 1);

        cache.invalidate_list(&filters).await.unwrap();
        assert_eq!(engine.list_metrics(&filters).await.unwrap().len(), 2);
    }
}
