//! Sliding-window agreement tracking over validated ledgers.
//!
//! Each validated ledger the node should have taken part in produces exactly
//! one [`ValidationEvent`]. Ledgers that never show up within the expected
//! close cadence plus a grace period are recorded as missed.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const HOUR: Duration = Duration::from_secs(3600);
pub const DAY: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationEvent {
    pub ledger_seq: u32,
    pub agreed: bool,
    pub timestamp_ms: i64,
}

/// Agreement over a window. `NoData` is distinct from 0%.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgreementRate {
    Percent(f64),
    NoData,
}

impl AgreementRate {
    pub fn percent(self) -> Option<f64> {
        match self {
            AgreementRate::Percent(p) => Some(p),
            AgreementRate::NoData => None,
        }
    }

    /// Export form: `NaN` when there is nothing to measure.
    pub fn as_gauge(self) -> f64 {
        self.percent().unwrap_or(f64::NAN)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCounts {
    pub agreed: u64,
    pub missed: u64,
}

impl ValidationCounts {
    pub fn total(&self) -> u64 {
        self.agreed + self.missed
    }

    pub fn rate(&self) -> AgreementRate {
        match self.total() {
            0 => AgreementRate::NoData,
            total => AgreementRate::Percent(self.agreed as f64 * 100.0 / total as f64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Nominal ledger close interval.
    pub expected_close: Duration,
    /// Extra time a ledger may take before it is declared missed.
    pub grace: Duration,
    /// Events older than this are dropped from memory.
    pub horizon: Duration,
    /// Upper bound on ledgers recorded by a single advance or sweep.
    pub max_backfill: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            expected_close: Duration::from_secs(4),
            grace: Duration::from_secs(30),
            horizon: DAY,
            max_backfill: 256,
        }
    }
}

#[derive(Debug)]
pub struct ValidationTracker {
    config: TrackerConfig,
    events: VecDeque<ValidationEvent>,
    highest: Option<u32>,
    /// When `highest` was recorded, or the expected close of the last swept ledger.
    last_progress_ms: Option<i64>,
}

impl ValidationTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            events: VecDeque::new(),
            highest: None,
            last_progress_ms: None,
        }
    }

    /// Restore recent history (oldest first), e.g. from the store after a restart.
    pub fn seed(&mut self, events: impl IntoIterator<Item = ValidationEvent>) {
        for event in events {
            if self.highest.is_some_and(|h| event.ledger_seq <= h) {
                continue;
            }
            self.highest = Some(event.ledger_seq);
            self.last_progress_ms = Some(event.timestamp_ms);
            self.events.push_back(event);
        }
    }

    pub fn highest_recorded(&self) -> Option<u32> {
        self.highest
    }

    /// Record a single ledger. Sequences at or below the highest recorded one
    /// are ignored, so each ledger yields at most one event.
    pub fn record_ledger(&mut self, seq: u32, agreed: bool, at_ms: i64) -> Option<ValidationEvent> {
        if self.highest.is_some_and(|h| seq <= h) {
            return None;
        }
        let event = ValidationEvent {
            ledger_seq: seq,
            agreed,
            timestamp_ms: at_ms,
        };
        self.events.push_back(event);
        self.highest = Some(seq);
        self.last_progress_ms = Some(at_ms);
        self.prune(at_ms);
        Some(event)
    }

    /// Record every ledger in `(highest, seq]`, keeping only the most recent
    /// `max_backfill` of them when the jump is large.
    pub fn observe_advance(&mut self, seq: u32, agreed: bool, at_ms: i64) -> Vec<ValidationEvent> {
        let start = match self.highest {
            Some(h) if seq <= h => return Vec::new(),
            Some(h) => (h + 1).max(seq.saturating_sub(self.config.max_backfill.saturating_sub(1))),
            None => seq,
        };
        (start..=seq)
            .filter_map(|s| self.record_ledger(s, agreed, at_ms))
            .collect()
    }

    /// Declare ledgers missed once they are overdue by the grace period.
    pub fn sweep_overdue(&mut self, now_ms: i64) -> Vec<ValidationEvent> {
        let (Some(mut highest), Some(mut progress)) = (self.highest, self.last_progress_ms) else {
            return Vec::new();
        };
        let close_ms = self.config.expected_close.as_millis() as i64;
        let grace_ms = self.config.grace.as_millis() as i64;

        let mut missed = Vec::new();
        while progress + close_ms + grace_ms <= now_ms && (missed.len() as u32) < self.config.max_backfill {
            let Some(next) = highest.checked_add(1) else {
                break;
            };
            highest = next;
            progress += close_ms;
            let event = ValidationEvent {
                ledger_seq: next,
                agreed: false,
                timestamp_ms: now_ms,
            };
            self.events.push_back(event);
            missed.push(event);
        }

        if !missed.is_empty() {
            self.highest = Some(highest);
            self.last_progress_ms = Some(progress);
            self.prune(now_ms);
        }
        missed
    }

    pub fn counts(&self, window: Duration, now_ms: i64) -> ValidationCounts {
        let cutoff = now_ms - window.as_millis() as i64;
        self.events
            .iter()
            .filter(|e| e.timestamp_ms >= cutoff && e.timestamp_ms <= now_ms)
            .fold(ValidationCounts::default(), |mut acc, e| {
                if e.agreed {
                    acc.agreed += 1;
                } else {
                    acc.missed += 1;
                }
                acc
            })
    }

    pub fn agreement_rate(&self, window: Duration, now_ms: i64) -> AgreementRate {
        self.counts(window, now_ms).rate()
    }

    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.config.horizon.as_millis() as i64;
        while self.events.front().is_some_and(|e| e.timestamp_ms < cutoff) {
            self.events.pop_front();
        }
    }
}
