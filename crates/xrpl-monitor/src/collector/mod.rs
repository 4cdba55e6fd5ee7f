//! Polling loops that turn rippled responses into stored samples.
//!
//! Both collectors share the same tick shape: poll, validate, update
//! in-memory state, persist. A failed tick is logged and recorded as a
//! poll gap; it never ends the loop.

pub mod fast;
pub mod slow;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::alert::{Alert, AlertKind, AlertSink, Severity};
use crate::db::{Database, PollGap};
use crate::error::StoreError;
use crate::metrics::Counters;

pub use fast::FastCollector;
pub use slow::SlowCollector;

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Result of a single tick, mostly for tests and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Recorded,
    /// An upstream call failed; the kind is `unreachable`, `timeout` or `malformed`.
    UpstreamFailed(&'static str),
    /// The response was rejected by validation.
    Discarded,
}

/// Handles shared by every collector.
#[derive(Clone)]
pub struct CollectorContext {
    pub db: Database,
    pub counters: Arc<Counters>,
    pub alerts: Arc<dyn AlertSink>,
}

impl CollectorContext {
    pub fn new(db: Database, counters: Arc<Counters>, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            db,
            counters,
            alerts,
        }
    }

    pub fn dispatch(&self, alert: &Alert) {
        self.counters
            .alerts_fired
            .with_label_values(&[alert.kind.as_str(), alert.severity.as_str()])
            .inc();
        self.alerts.notify(alert);
    }
}

/// Per-collector write path: bounded retry on contention, counted drops,
/// and a single alert per corruption episode.
pub(crate) struct StoreWriter {
    ctx: CollectorContext,
    collector: &'static str,
    corruption_alerted: bool,
}

impl StoreWriter {
    pub(crate) fn new(ctx: CollectorContext, collector: &'static str) -> Self {
        Self {
            ctx,
            collector,
            corruption_alerted: false,
        }
    }

    pub(crate) fn ctx(&self) -> &CollectorContext {
        &self.ctx
    }

    /// Run `op` against the store. Returns `None` when the write was dropped.
    pub(crate) async fn write<T, F>(&mut self, table: &'static str, now_ms: i64, mut op: F) -> Option<T>
    where
        F: FnMut(&Database) -> Result<T, StoreError>,
    {
        match with_retry(|| op(&self.ctx.db)).await {
            Ok(value) => {
                self.corruption_alerted = false;
                Some(value)
            }
            Err(e) => {
                tracing::error!(
                    collector = self.collector,
                    table,
                    error = %e,
                    "Store write dropped"
                );
                self.ctx.counters.store_write_failures.with_label_values(&[table]).inc();
                if e.is_corruption() && !self.corruption_alerted {
                    self.corruption_alerted = true;
                    self.ctx.dispatch(&Alert::firing(
                        AlertKind::StoreCorruption,
                        Severity::Critical,
                        "Metrics store corrupted",
                        format!("write to {table} failed: {e}"),
                        now_ms,
                    ));
                }
                None
            }
        }
    }

    pub(crate) async fn record_gap(&mut self, kind: &str, detail: String, now_ms: i64) {
        let gap = PollGap {
            timestamp_ms: now_ms,
            collector: self.collector.to_string(),
            kind: kind.to_string(),
            detail,
        };
        self.write("poll_gaps", now_ms, |db| db.insert_poll_gap(&gap)).await;
    }
}

/// Retry contention errors with exponential backoff; anything else fails fast.
pub(crate) async fn with_retry<T, F>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let mut delay = WRITE_BACKOFF;
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_contention() && attempt < WRITE_ATTEMPTS => {
                tracing::debug!(attempt, error = %e, "Store busy, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Next sample timestamp: wall clock, nudged forward so it always increases.
pub(crate) fn next_timestamp(last: Option<i64>, now_ms: i64) -> i64 {
    match last {
        Some(last) if now_ms <= last => last + 1,
        _ => now_ms,
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Something [`run_every`] can drive.
pub trait Collector: Send {
    fn tick(&mut self) -> impl Future<Output = TickOutcome> + Send;
}

/// Tick `collector` on a fixed cadence until `shutdown` flips or its sender
/// drops. An in-flight tick always runs to completion.
pub(crate) async fn run_every<C: Collector>(
    name: &'static str,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut collector: C,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(collector = name, interval_secs = every.as_secs(), "Collector started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = collector.tick().await;
                tracing::debug!(collector = name, ?outcome, "Tick finished");
            }
            _ = shutdown.changed() => {}
        }
        if shutdown.has_changed().is_err() {
            break;
        }
    }

    tracing::info!(collector = name, "Collector stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MemorySink;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn busy() -> StoreError {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY), None).into()
    }

    fn corrupt() -> StoreError {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT), None).into()
    }

    fn writer() -> (tempfile::TempDir, StoreWriter, Arc<Counters>, Arc<MemorySink>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("monitor.db"), Duration::from_millis(100)).unwrap();
        let counters = Arc::new(Counters::new().unwrap());
        let alerts = Arc::new(MemorySink::default());
        let ctx = CollectorContext::new(db, counters.clone(), alerts.clone());
        (dir, StoreWriter::new(ctx, "fast"), counters, alerts)
    }

    fn corruption_alerts(alerts: &MemorySink) -> usize {
        alerts
            .alerts()
            .iter()
            .filter(|a| a.kind == AlertKind::StoreCorruption)
            .count()
    }

    #[tokio::test]
    async fn test_dropped_writes_alert_once_per_corruption_episode() {
        let (_dir, mut writer, counters, alerts) = writer();
        let dropped = || counters.store_write_failures.with_label_values(&["snapshots"]).get();

        let calls = Cell::new(0);
        for now in [1, 2] {
            let result: Option<()> = writer
                .write("snapshots", now, |_| {
                    calls.set(calls.get() + 1);
                    Err(corrupt())
                })
                .await;
            assert!(result.is_none());
        }
        // Corruption is not retried.
        assert_eq!(calls.get(), 2);
        assert_eq!(dropped(), 2);
        assert_eq!(corruption_alerts(&alerts), 1);
        let alert = &alerts.alerts()[0];
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.timestamp_ms, 1);
        assert_eq!(
            counters
                .alerts_fired
                .with_label_values(&["store_corruption", "CRITICAL"])
                .get(),
            1
        );

        // A successful write ends the episode; the next failure alerts again.
        assert_eq!(writer.write("snapshots", 3, |_| Ok(5)).await, Some(5));
        let _: Option<()> = writer.write("snapshots", 4, |_| Err(corrupt())).await;
        assert_eq!(dropped(), 3);
        assert_eq!(corruption_alerts(&alerts), 2);
    }

    #[tokio::test]
    async fn test_exhausted_contention_is_counted_without_alert() {
        let (_dir, mut writer, counters, alerts) = writer();
        let result: Option<()> = writer.write("aggregates", 1, |_| Err(busy())).await;
        assert!(result.is_none());
        assert_eq!(
            counters.store_write_failures.with_label_values(&["aggregates"]).get(),
            1
        );
        assert!(alerts.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_write_against_real_store() {
        let (_dir, mut writer, counters, _alerts) = writer();
        let gap_written = writer
            .write("poll_gaps", 10, |db| {
                db.insert_poll_gap(&PollGap {
                    timestamp_ms: 10,
                    collector: "fast".to_string(),
                    kind: "timeout".to_string(),
                    detail: String::new(),
                })
            })
            .await;
        assert!(gap_written.is_some());
        assert_eq!(writer.ctx().db.poll_gaps_since(0).unwrap().len(), 1);
        assert_eq!(
            counters.store_write_failures.with_label_values(&["poll_gaps"]).get(),
            0
        );
    }

    #[tokio::test]
    async fn test_retry_recovers_from_contention() {
        let calls = Cell::new(0);
        let result = with_retry(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(busy())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(|| {
            calls.set(calls.get() + 1);
            Err(busy())
        })
        .await;
        assert!(result.unwrap_err().is_contention());
        assert_eq!(calls.get(), WRITE_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_non_contention_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(|| {
            calls.set(calls.get() + 1);
            Err(StoreError::LockPoisoned)
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_next_timestamp_strictly_increases() {
        assert_eq!(next_timestamp(None, 100), 100);
        assert_eq!(next_timestamp(Some(100), 100), 101);
        assert_eq!(next_timestamp(Some(100), 50), 101);
        assert_eq!(next_timestamp(Some(100), 200), 200);
    }

    struct Counting(Arc<AtomicU32>);

    impl Collector for Counting {
        async fn tick(&mut self) -> TickOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            TickOutcome::Recorded
        }
    }

    #[tokio::test]
    async fn test_run_every_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let ticks = Arc::new(AtomicU32::new(0));
        let handle = tokio::spawn(run_every(
            "test",
            Duration::from_millis(10),
            rx,
            Counting(ticks.clone()),
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_run_every_stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_every(
            "test",
            Duration::from_secs(3600),
            rx,
            Counting(Arc::new(AtomicU32::new(0))),
        ));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
