//! Process-wide gauge/counter registry for the latest metric values.
//!
//! Injected into the engine and the HTTP layer explicitly — there is no
//! global registry. `rollback-count` is cumulative (counter); every other
//! type is an instantaneous gauge. The scrape endpoint renders the
//! registry with the Prometheus text encoder.

use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::error::{Result, TrackError};

/// Latest-value sink for the business metric catalog plus a handful of
/// operational counters.
pub struct MetricSink {
    registry: Registry,

    pub clients_per_stage: GaugeVec,
    pub stage_duration_hours: GaugeVec,
    pub dau: Gauge,
    pub mau: Gauge,
    pub app_install_rate: Gauge,
    pub autopayment_rate: Gauge,
    pub source_conversion: GaugeVec,
    pub channel_conversion: GaugeVec,
    pub conversion: Gauge,
    pub dropout: Gauge,
    pub total_duration_days: Gauge,
    pub status_updates: Gauge,
    pub rollbacks_total: IntCounter,

    pub login_attempts_total: IntCounterVec,
    pub cache_hits_total: IntCounterVec,
    pub cache_misses_total: IntCounterVec,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge> {
    let g = Gauge::new(name, help).map_err(anyhow::Error::from)?;
    registry.register(Box::new(g.clone())).map_err(anyhow::Error::from)?;
    Ok(g)
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
    let g = GaugeVec::new(Opts::new(name, help), labels).map_err(anyhow::Error::from)?;
    registry.register(Box::new(g.clone())).map_err(anyhow::Error::from)?;
    Ok(g)
}

impl MetricSink {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let clients_per_stage = gauge_vec(
            &registry,
            "stagetrack_clients_per_stage",
            "Current number of clients in each stage",
            &["stage"],
        )?;
        let stage_duration_hours = gauge_vec(
            &registry,
            "stagetrack_stage_duration_hours",
            "Average dwell time of active clients per stage, in hours",
            &["stage"],
        )?;
        let dau = gauge(&registry, "stagetrack_dau", "Clients seen in the last 24 hours")?;
        let mau = gauge(&registry, "stagetrack_mau", "Clients seen in the last 30 days")?;
        let app_install_rate = gauge(
            &registry,
            "stagetrack_app_install_rate",
            "Share of clients with the app installed",
        )?;
        let autopayment_rate = gauge(
            &registry,
            "stagetrack_autopayment_rate",
            "Share of contracts with auto-payment enabled",
        )?;
        let source_conversion = gauge_vec(
            &registry,
            "stagetrack_source_conversion_ratio",
            "Conversion rate per acquisition source",
            &["source"],
        )?;
        let channel_conversion = gauge_vec(
            &registry,
            "stagetrack_channel_conversion_ratio",
            "Conversion rate per acquisition channel",
            &["channel"],
        )?;
        let conversion = gauge(
            &registry,
            "stagetrack_conversion_ratio",
            "Share of recently updated clients that reached the last stage",
        )?;
        let dropout = gauge(
            &registry,
            "stagetrack_dropout",
            "Clients deactivated in the current window",
        )?;
        let total_duration_days = gauge(
            &registry,
            "stagetrack_total_duration_days",
            "Average days from registration to the last stage",
        )?;
        let status_updates = gauge(
            &registry,
            "stagetrack_status_updates",
            "Clients updated in the current window",
        )?;

        let rollbacks_total = IntCounter::new(
            "stagetrack_rollbacks_total",
            "Total number of rollback transitions",
        )
        .map_err(anyhow::Error::from)?;
        registry
            .register(Box::new(rollbacks_total.clone()))
            .map_err(anyhow::Error::from)?;

        let login_attempts_total = IntCounterVec::new(
            Opts::new("stagetrack_login_attempts_total", "Login attempts by outcome"),
            &["status"],
        )
        .map_err(anyhow::Error::from)?;
        registry
            .register(Box::new(login_attempts_total.clone()))
            .map_err(anyhow::Error::from)?;

        let cache_hits_total = IntCounterVec::new(
            Opts::new("stagetrack_cache_hits_total", "Cache hits by cache name"),
            &["cache"],
        )
        .map_err(anyhow::Error::from)?;
        registry
            .register(Box::new(cache_hits_total.clone()))
            .map_err(anyhow::Error::from)?;

        let cache_misses_total = IntCounterVec::new(
            Opts::new("stagetrack_cache_misses_total", "Cache misses by cache name"),
            &["cache"],
        )
        .map_err(anyhow::Error::from)?;
        registry
            .register(Box::new(cache_misses_total.clone()))
            .map_err(anyhow::Error::from)?;

        Ok(Self {
            registry,
            clients_per_stage,
            stage_duration_hours,
            dau,
            mau,
            app_install_rate,
            autopayment_rate,
            source_conversion,
            channel_conversion,
            conversion,
            dropout,
            total_duration_days,
            status_updates,
            rollbacks_total,
            login_attempts_total,
            cache_hits_total,
            cache_misses_total,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buf)
            .map_err(anyhow::Error::from)?;
        String::from_utf8(buf)
            .map_err(|e| TrackError::Internal(anyhow::anyhow!("non-utf8 exposition: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_registers_and_renders() {
        let sink = MetricSink::new().unwrap();
        sink.conversion.set(0.3);
        sink.clients_per_stage.with_label_values(&["onboarding"]).set(7.0);
        sink.rollbacks_total.inc();

        let text = sink.gather().unwrap();
        assert!(text.contains("stagetrack_conversion_ratio 0.3"));
        assert!(text.contains("stagetrack_clients_per_stage{stage=\"onboarding\"} 7"));
        assert!(text.contains("stagetrack_rollbacks_total 1"));
    }

    #[test]
    fn rollback_counter_is_cumulative() {
        let sink = MetricSink::new().unwrap();
        sink.rollbacks_total.inc();
        sink.rollbacks_total.inc();
        assert_eq!(sink.rollbacks_total.get(), 2);
    }

    #[test]
    fn two_sinks_do_not_share_state() {
        let a = MetricSink::new().unwrap();
        let b = MetricSink::new().unwrap();
        a.dau.set(10.0);
        assert_eq!(b.dau.get(), 0.0);
    }
}
