//! Cron-driven metric calculation worker.
//!
//! Three triggers, fixed at startup:
//!
//! ```text
//! 0 0 0 * * *   calculate_all(day)
//! 0 0 0 * * 0   calculate_all(week)     (Sunday)
//! 0 0 0 1 * *   calculate_all(month)    (1st)
//! ```
//!
//! Each firing runs in its own task under a five-minute timeout; a
//! process-wide shutdown signal cancels pending jobs, and shutdown waits
//! up to thirty seconds for in-flight jobs to drain. Failed runs are
//! logged, never retried — the next firing retries naturally.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Utc, Weekday};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::domain::metric::Interval;
use crate::engine::MetricEngine;
use crate::error::TrackError;

/// Per-job deadline.
const JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// How long shutdown waits for in-flight jobs.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// The three configured firing shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Daily,
    Weekly,
    Monthly,
}

impl Trigger {
    pub const ALL: [Trigger; 3] = [Trigger::Daily, Trigger::Weekly, Trigger::Monthly];

    pub fn interval(&self) -> Interval {
        match self {
            Self::Daily => Interval::Day,
            Self::Weekly => Interval::Week,
            Self::Monthly => Interval::Month,
        }
    }

    pub fn cron(&self) -> &'static str {
        match self {
            Self::Daily => "0 0 0 * * *",
            Self::Weekly => "0 0 0 * * 0",
            Self::Monthly => "0 0 0 1 * *",
        }
    }
}

/// The first firing instant strictly after `after`.
pub fn next_fire(trigger: Trigger, after: DateTime<Utc>) -> DateTime<Utc> {
    let midnight =
        |date: chrono::NaiveDate| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));

    match trigger {
        Trigger::Daily => midnight(after.date_naive() + Days::new(1)),
        Trigger::Weekly => {
            let mut date = after.date_naive();
            loop {
                date = date + Days::new(1);
                if date.weekday() == Weekday::Sun {
                    return midnight(date);
                }
            }
        }
        Trigger::Monthly => {
            let first = after.date_naive().with_day(1).expect("day 1 always exists");
            midnight(first + chrono::Months::new(1))
        }
    }
}

/// Runs the engine on the trigger set. Created during boot, torn down by
/// [`MetricScheduler::shutdown`] during process shutdown.
pub struct MetricScheduler {
    shutdown_tx: watch::Sender<bool>,
    triggers: Vec<JoinHandle<()>>,
    // Wait-group: every job holds a clone of the sender; the receiver
    // closes when the last in-flight job finishes.
    job_guard: mpsc::Sender<()>,
    drain_rx: mpsc::Receiver<()>,
}

impl MetricScheduler {
    pub fn start(engine: Arc<MetricEngine>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (job_guard, drain_rx) = mpsc::channel(1);

        let triggers = Trigger::ALL
            .iter()
            .map(|&trigger| {
                info!(cron = trigger.cron(), interval = %trigger.interval(), "trigger armed");
                tokio::spawn(trigger_loop(
                    trigger,
                    engine.clone(),
                    shutdown_rx.clone(),
                    job_guard.clone(),
                ))
            })
            .collect();

        Self {
            shutdown_tx,
            triggers,
            job_guard,
            drain_rx,
        }
    }

    /// Signal cancellation and wait for in-flight jobs to drain.
    pub async fn shutdown(mut self) {
        info!("stopping metric scheduler");
        let _ = self.shutdown_tx.send(true);

        for handle in self.triggers {
            let _ = handle.await;
        }

        drop(self.job_guard);
        match timeout(DRAIN_TIMEOUT, self.drain_rx.recv()).await {
            Ok(_) => info!("all metric jobs completed"),
            Err(_) => warn!("some metric jobs did not complete before the drain timeout"),
        }
    }
}

async fn trigger_loop(
    trigger: Trigger,
    engine: Arc<MetricEngine>,
    mut shutdown_rx: watch::Receiver<bool>,
    job_guard: mpsc::Sender<()>,
) {
    loop {
        let now = Utc::now();
        let at = next_fire(trigger, now);
        let delay = (at - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = sleep(delay) => {}
        }

        let engine = engine.clone();
        let mut job_shutdown = shutdown_rx.clone();
        let guard = job_guard.clone();
        tokio::spawn(async move {
            let _guard = guard;
            run_job(trigger, &engine, &mut job_shutdown).await;
        });
    }
}

async fn run_job(trigger: Trigger, engine: &MetricEngine, shutdown_rx: &mut watch::Receiver<bool>) {
    let interval = trigger.interval();
    info!(interval = %interval, "scheduled metric job started");

    let result = tokio::select! {
        _ = shutdown_rx.changed() => Err(TrackError::Cancelled),
        outcome = timeout(JOB_TIMEOUT, engine.calculate_all(interval)) => match outcome {
            Ok(inner) => inner,
            Err(_) => Err(TrackError::Timeout(JOB_TIMEOUT.as_secs())),
        },
    };

    match result {
        Ok(()) => info!(interval = %interval, "scheduled metric job finished"),
        Err(e) => error!(interval = %interval, error = %e, "scheduled metric job failed"),
    }
}
