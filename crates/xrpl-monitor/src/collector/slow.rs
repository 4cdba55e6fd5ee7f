use std::sync::{Arc, Mutex};
use std::time::Duration;

use rippled_client::{RippledApi, UpstreamError};
use tokio::sync::watch;

use super::{next_timestamp, now_ms, run_every, Collector, CollectorContext, StoreWriter, TickOutcome};
use crate::db::NodeInfo;
use crate::probe::ResourceProbe;
use crate::sample::{AggregateSample, StateAccountingEntry};

const NAME: &str = "slow";

/// Low-frequency collector: host resources, I/O latency, queue depth, state
/// accounting and node identity. Also applies the retention policy.
pub struct SlowCollector<A, P> {
    api: Arc<A>,
    probe: Arc<Mutex<P>>,
    writer: StoreWriter,
    retention: Duration,
    last_timestamp_ms: Option<i64>,
}

impl<A: RippledApi, P: ResourceProbe + 'static> SlowCollector<A, P> {
    pub fn new(api: Arc<A>, ctx: CollectorContext, probe: P, retention: Duration) -> Self {
        Self {
            api,
            probe: Arc::new(Mutex::new(probe)),
            writer: StoreWriter::new(ctx, NAME),
            retention,
            last_timestamp_ms: None,
        }
    }

    /// Host readings are always recorded; upstream-derived fields are left
    /// empty when rippled does not answer.
    pub async fn tick_at(&mut self, now_ms: i64) -> TickOutcome {
        let ctx = self.writer.ctx().clone();
        ctx.counters.polls.with_label_values(&[NAME]).inc();

        let mut failure: Option<&'static str> = None;

        let info = match self.api.fetch_server_state().await {
            Ok(info) => Some(info),
            Err(e) => {
                failure = Some(e.kind());
                self.on_upstream_failure("server_info", &e, now_ms).await;
                None
            }
        };
        let fee = match self.api.fetch_fee().await {
            Ok(fee) => Some(fee),
            Err(e) => {
                failure.get_or_insert(e.kind());
                self.on_upstream_failure("fee", &e, now_ms).await;
                None
            }
        };

        // Sizing a large data directory can take seconds; keep it off the
        // async workers.
        let probe = Arc::clone(&self.probe);
        let host = match tokio::task::spawn_blocking(move || {
            probe.lock().map(|mut probe| probe.sample()).ok()
        })
        .await
        {
            Ok(Some(host)) => host,
            Ok(None) => {
                tracing::error!("host sampler lock poisoned, skipping aggregate sample");
                return TickOutcome::Discarded;
            }
            Err(e) => {
                tracing::error!(error = %e, "host sampling task failed, skipping aggregate sample");
                return TickOutcome::Discarded;
            }
        };
        let timestamp_ms = next_timestamp(self.last_timestamp_ms, now_ms);
        let sample = match AggregateSample::collect(timestamp_ms, &host, info.as_ref(), fee.as_ref()) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed aggregate sample");
                ctx.counters.malformed_responses.with_label_values(&[NAME]).inc();
                self.writer.record_gap("malformed", e.to_string(), now_ms).await;
                return TickOutcome::Discarded;
            }
        };

        self.writer
            .write("aggregates", timestamp_ms, |db| db.insert_aggregate(&sample))
            .await;
        self.last_timestamp_ms = Some(timestamp_ms);

        if let Some(info) = &info {
            let node = NodeInfo {
                build_version: info.build_version.clone(),
                pubkey_validator: info.pubkey_validator.clone(),
                node_size: info.node_size.clone(),
                complete_ledgers: info.complete_ledgers.clone(),
                updated_at_ms: timestamp_ms,
            };
            self.writer
                .write("node_info", timestamp_ms, |db| db.upsert_node_info(&node))
                .await;

            let accounting = StateAccountingEntry::from_server_info(info);
            self.writer
                .write("state_accounting", timestamp_ms, |db| {
                    db.replace_state_accounting(&accounting, timestamp_ms)
                })
                .await;
        }

        let cutoff = now_ms - self.retention.as_millis() as i64;
        if let Some(report) = self
            .writer
            .write("retention", now_ms, |db| db.prune_older_than(cutoff))
            .await
        {
            if report.total() > 0 {
                tracing::info!(
                    snapshots = report.snapshots,
                    aggregates = report.aggregates,
                    validation_events = report.validation_events,
                    poll_gaps = report.poll_gaps,
                    "Pruned rows past retention"
                );
            }
        }

        match failure {
            Some(kind) => TickOutcome::UpstreamFailed(kind),
            None => TickOutcome::Recorded,
        }
    }

    async fn on_upstream_failure(&mut self, call: &str, error: &UpstreamError, now_ms: i64) {
        tracing::warn!(call, error = %error, "rippled slow poll failed");
        let counters = &self.writer.ctx().counters;
        counters
            .upstream_errors
            .with_label_values(&[NAME, error.kind()])
            .inc();
        if matches!(error, UpstreamError::MalformedResponse(_)) {
            counters.malformed_responses.with_label_values(&[NAME]).inc();
        }
        self.writer
            .record_gap(error.kind(), format!("{call}: {error}"), now_ms)
            .await;
    }

    pub async fn run(self, every: Duration, shutdown: watch::Receiver<bool>) {
        run_every(NAME, every, shutdown, self).await
    }
}

impl<A: RippledApi, P: ResourceProbe + 'static> Collector for SlowCollector<A, P> {
    async fn tick(&mut self) -> TickOutcome {
        self.tick_at(now_ms()).await
    }
}
