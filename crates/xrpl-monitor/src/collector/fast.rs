use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rippled_client::{RippledApi, ServerState, UpstreamError};
use tokio::sync::watch;

use super::{next_timestamp, now_ms, run_every, Collector, CollectorContext, StoreWriter, TickOutcome};
use crate::config::AlertThresholds;
use crate::error::StoreError;
use crate::monitor::{CurrentState, MonitorInput, StateMonitor, StateTransition};
use crate::sample::Snapshot;
use crate::tracker::{TrackerConfig, ValidationEvent, ValidationTracker, DAY, HOUR};

const NAME: &str = "fast";

/// State records held back by failed writes before the oldest is given up.
const PENDING_STATE_LIMIT: usize = 256;

/// Lifecycle phase of the current tick, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Polling,
    Parsing,
    Persisting,
}

/// High-frequency collector: server state, ledger progress and peers.
///
/// Owns the validation tracker and the state monitor; nothing else
/// mutates them.
pub struct FastCollector<A> {
    api: Arc<A>,
    writer: StoreWriter,
    tracker: ValidationTracker,
    monitor: StateMonitor,
    phase: Phase,
    last_timestamp_ms: Option<i64>,
    last_seq: Option<u32>,
    last_state: Option<ServerState>,
    /// State records the store has not accepted yet, oldest first. They are
    /// written in order so the transition log never skips a state.
    pending_states: VecDeque<(Option<StateTransition>, CurrentState)>,
}

impl<A: RippledApi> FastCollector<A> {
    /// Build the collector, restoring the current state and the last day of
    /// validation history from the store.
    pub fn new(
        api: Arc<A>,
        ctx: CollectorContext,
        tracker_config: TrackerConfig,
        thresholds: AlertThresholds,
    ) -> Result<Self, StoreError> {
        let current = ctx.db.current_state()?;
        let mut tracker = ValidationTracker::new(tracker_config);
        tracker.seed(ctx.db.validation_events_since(now_ms() - DAY.as_millis() as i64)?);

        if let Some(current) = current {
            tracing::info!(
                state = %current.state,
                entered_at_ms = current.entered_at_ms,
                "Resuming from stored validator state"
            );
        }

        Ok(Self {
            api,
            writer: StoreWriter::new(ctx, NAME),
            tracker,
            monitor: StateMonitor::resume(thresholds, current),
            phase: Phase::Idle,
            last_timestamp_ms: None,
            last_seq: None,
            last_state: current.map(|c| c.state),
            pending_states: VecDeque::new(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tracker(&self) -> &ValidationTracker {
        &self.tracker
    }

    pub fn monitor(&self) -> &StateMonitor {
        &self.monitor
    }

    /// One poll-validate-update-persist cycle at the given wall-clock time.
    pub async fn tick_at(&mut self, now_ms: i64) -> TickOutcome {
        let outcome = self.poll(now_ms).await;
        self.phase = Phase::Idle;
        outcome
    }

    async fn poll(&mut self, now_ms: i64) -> TickOutcome {
        let ctx = self.writer.ctx().clone();
        ctx.counters.polls.with_label_values(&[NAME]).inc();

        self.phase = Phase::Polling;
        let info = match self.api.fetch_server_state().await {
            Ok(info) => info,
            Err(e) => {
                let kind = e.kind();
                self.on_upstream_failure(&e, now_ms).await;
                return TickOutcome::UpstreamFailed(kind);
            }
        };

        let peers = match self.api.fetch_peers().await {
            Ok(peers) => Some(peers),
            Err(e) => {
                tracing::warn!(error = %e, "Peer listing failed, recording snapshot without peer detail");
                ctx.counters
                    .upstream_errors
                    .with_label_values(&[NAME, e.kind()])
                    .inc();
                None
            }
        };

        self.phase = Phase::Parsing;
        let timestamp_ms = next_timestamp(self.last_timestamp_ms, now_ms);
        let snapshot = match Snapshot::from_server_info(&info, peers.as_ref(), self.last_seq, timestamp_ms) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed server_info");
                ctx.counters.malformed_responses.with_label_values(&[NAME]).inc();
                self.writer.record_gap("malformed", e.to_string(), now_ms).await;
                return TickOutcome::Discarded;
            }
        };

        self.phase = Phase::Persisting;
        let events = self.track_ledgers(&snapshot);
        self.persist_events(&events, timestamp_ms).await;

        let agreement = self.tracker.agreement_rate(HOUR, timestamp_ms);
        let observation = self.monitor.observe(
            MonitorInput {
                state: snapshot.state,
                ledger_seq: snapshot.ledger_seq,
                peers: snapshot.peers_total,
                agreement,
            },
            timestamp_ms,
        );

        if let Some(t) = &observation.transition {
            ctx.counters.state_transitions.inc();
            tracing::info!(
                from = %t.from,
                to = %t.to,
                duration_in_from_ms = t.duration_in_from_ms,
                "Validator state changed"
            );
        }
        if let Some(current) = observation.entered {
            self.queue_state(observation.transition, current);
        }
        self.persist_states(timestamp_ms).await;
        for alert in &observation.alerts {
            ctx.dispatch(alert);
        }

        self.writer
            .write("snapshots", timestamp_ms, |db| db.insert_snapshot(&snapshot))
            .await;

        self.last_timestamp_ms = Some(timestamp_ms);
        self.last_state = Some(snapshot.state);
        if let Some(seq) = snapshot.ledger_seq {
            self.last_seq = Some(self.last_seq.map_or(seq, |prev| prev.max(seq)));
        }

        tracing::debug!(
            state = %snapshot.state,
            ledger_seq = ?snapshot.ledger_seq,
            peers = snapshot.peers_total,
            "Fast tick recorded"
        );
        TickOutcome::Recorded
    }

    /// Classify newly validated ledgers. Ledgers closed while the node was
    /// proposing count as agreed; a stalled sequence is swept for misses.
    fn track_ledgers(&mut self, snapshot: &Snapshot) -> Vec<ValidationEvent> {
        let ts = snapshot.timestamp_ms;
        let Some(seq) = snapshot.ledger_seq else {
            return self.tracker.sweep_overdue(ts);
        };

        let advanced = self.last_seq.map_or(true, |prev| seq > prev);
        if !advanced {
            return self.tracker.sweep_overdue(ts);
        }

        let agreed = self.last_state.unwrap_or(snapshot.state) == ServerState::Proposing;
        match self.last_seq {
            Some(_) => self.tracker.observe_advance(seq, agreed, ts),
            // First sample since start: no interval to attribute.
            None => self.tracker.record_ledger(seq, agreed, ts).into_iter().collect(),
        }
    }

    async fn persist_events(&mut self, events: &[ValidationEvent], now_ms: i64) {
        if events.is_empty() {
            return;
        }
        let counters = self.writer.ctx().counters.clone();
        for event in events {
            counters.validations_checked.inc();
            if !event.agreed {
                tracing::warn!(ledger_seq = event.ledger_seq, "Ledger not validated by this node");
            }
            self.writer
                .write("validation_events", now_ms, |db| db.insert_validation_event(event))
                .await;
        }
    }

    fn queue_state(&mut self, transition: Option<StateTransition>, current: CurrentState) {
        if self.pending_states.len() >= PENDING_STATE_LIMIT {
            if let Some((Some(lost), _)) = self.pending_states.pop_front() {
                tracing::error!(
                    from = %lost.from,
                    to = %lost.to,
                    timestamp_ms = lost.timestamp_ms,
                    "Giving up on unwritten state transition"
                );
            }
        }
        self.pending_states.push_back((transition, current));
    }

    /// Write queued state records oldest first, stopping at the first one
    /// the store rejects so later records never overtake it.
    async fn persist_states(&mut self, now_ms: i64) {
        while let Some(&(transition, current)) = self.pending_states.front() {
            let written = self
                .writer
                .write("state_transitions", now_ms, |db| {
                    db.record_state(transition.as_ref(), &current)
                })
                .await;
            if written.is_none() {
                tracing::warn!(
                    pending = self.pending_states.len(),
                    "State record kept for the next tick"
                );
                break;
            }
            self.pending_states.pop_front();
        }
    }

    pub fn pending_states(&self) -> usize {
        self.pending_states.len()
    }

    async fn on_upstream_failure(&mut self, error: &UpstreamError, now_ms: i64) {
        let ctx = self.writer.ctx().clone();
        tracing::warn!(error = %error, kind = error.kind(), "rippled poll failed");
        ctx.counters
            .upstream_errors
            .with_label_values(&[NAME, error.kind()])
            .inc();
        if matches!(error, UpstreamError::MalformedResponse(_)) {
            ctx.counters.malformed_responses.with_label_values(&[NAME]).inc();
        }

        self.writer.record_gap(error.kind(), error.to_string(), now_ms).await;

        let missed = self.tracker.sweep_overdue(now_ms);
        self.persist_events(&missed, now_ms).await;
        self.persist_states(now_ms).await;

        for alert in self.monitor.observe_failure(error.kind(), now_ms) {
            ctx.dispatch(&alert);
        }
    }

    /// Poll every `every` until `shutdown` is signalled.
    pub async fn run(self, every: Duration, shutdown: watch::Receiver<bool>) {
        run_every(NAME, every, shutdown, self).await
    }
}

impl<A: RippledApi> Collector for FastCollector<A> {
    async fn tick(&mut self) -> TickOutcome {
        self.tick_at(now_ms()).await
    }
}
