//! Validator state machine and threshold alerting.
//!
//! Every condition is edge-triggered: one alert when it starts holding
//! (after its sustain period), one recovery notice when it stops.

use std::time::Duration;

use rippled_client::ServerState;
use serde::Serialize;

use crate::alert::{Alert, AlertKind, Severity};
use crate::config::AlertThresholds;
use crate::tracker::AgreementRate;

/// The state the validator is in now and since when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CurrentState {
    pub state: ServerState,
    pub entered_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub timestamp_ms: i64,
    pub from: ServerState,
    pub to: ServerState,
    /// Time spent in `from` before this transition.
    pub duration_in_from_ms: i64,
    pub ledger_seq: Option<u32>,
}

/// What a successful poll tells the monitor.
#[derive(Debug, Clone, Copy)]
pub struct MonitorInput {
    pub state: ServerState,
    pub ledger_seq: Option<u32>,
    pub peers: u32,
    pub agreement: AgreementRate,
}

#[derive(Debug, Default)]
pub struct Observation {
    pub transition: Option<StateTransition>,
    /// Set whenever the current-state record changed and must be persisted.
    pub entered: Option<CurrentState>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Steady,
    Fired,
    Cleared,
}

#[derive(Debug)]
struct SustainedCondition {
    sustain_ms: i64,
    since_ms: Option<i64>,
    fired: bool,
}

impl SustainedCondition {
    fn new(sustain: Duration) -> Self {
        Self {
            sustain_ms: sustain.as_millis() as i64,
            since_ms: None,
            fired: false,
        }
    }

    fn update(&mut self, holds: bool, now_ms: i64) -> Edge {
        if holds {
            let since = *self.since_ms.get_or_insert(now_ms);
            if !self.fired && now_ms - since > self.sustain_ms {
                self.fired = true;
                return Edge::Fired;
            }
            Edge::Steady
        } else {
            let was_fired = self.fired;
            self.since_ms = None;
            self.fired = false;
            if was_fired {
                Edge::Cleared
            } else {
                Edge::Steady
            }
        }
    }
}

#[derive(Debug)]
pub struct StateMonitor {
    thresholds: AlertThresholds,
    current: Option<CurrentState>,
    not_proposing: SustainedCondition,
    low_agreement: SustainedCondition,
    low_peers: SustainedCondition,
    consecutive_failures: u32,
    unreachable_fired: bool,
}

fn severity_for(state: ServerState) -> Severity {
    match state {
        ServerState::Disconnected | ServerState::Syncing => Severity::Critical,
        ServerState::Proposing => Severity::Info,
        _ => Severity::Warning,
    }
}

fn humanize(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}

impl StateMonitor {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self::resume(thresholds, None)
    }

    /// Start from a previously persisted state so a restart does not
    /// report a spurious transition.
    pub fn resume(thresholds: AlertThresholds, current: Option<CurrentState>) -> Self {
        Self {
            not_proposing: SustainedCondition::new(thresholds.not_proposing_sustain),
            low_agreement: SustainedCondition::new(thresholds.agreement_sustain),
            low_peers: SustainedCondition::new(thresholds.peer_sustain),
            thresholds,
            current,
            consecutive_failures: 0,
            unreachable_fired: false,
        }
    }

    pub fn current(&self) -> Option<CurrentState> {
        self.current
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn observe(&mut self, input: MonitorInput, now_ms: i64) -> Observation {
        let mut obs = Observation::default();

        if self.consecutive_failures > 0 {
            if self.unreachable_fired {
                obs.alerts.push(Alert::resolved(
                    AlertKind::Unreachable,
                    "Validator reachable again",
                    format!(
                        "rippled answered after {} failed polls",
                        self.consecutive_failures
                    ),
                    now_ms,
                ));
            }
            self.consecutive_failures = 0;
            self.unreachable_fired = false;
        }

        match self.current {
            Some(current) if current.state == input.state => {}
            Some(current) => {
                let transition = StateTransition {
                    timestamp_ms: now_ms,
                    from: current.state,
                    to: input.state,
                    duration_in_from_ms: now_ms - current.entered_at_ms,
                    ledger_seq: input.ledger_seq,
                };
                obs.alerts.push(Alert::firing(
                    AlertKind::StateChange,
                    severity_for(input.state),
                    format!("Validator state changed to {}", input.state),
                    format!(
                        "{} -> {} after {} in {}",
                        transition.from,
                        transition.to,
                        humanize(transition.duration_in_from_ms),
                        transition.from
                    ),
                    now_ms,
                ));
                obs.transition = Some(transition);
                self.enter(input.state, now_ms, &mut obs);
            }
            None => self.enter(input.state, now_ms, &mut obs),
        }

        match self
            .not_proposing
            .update(input.state != ServerState::Proposing, now_ms)
        {
            Edge::Fired => obs.alerts.push(Alert::firing(
                AlertKind::NotProposing,
                Severity::Warning,
                "Validator not proposing",
                format!(
                    "state has been {} for at least {}",
                    input.state,
                    humanize(self.not_proposing.sustain_ms)
                ),
                now_ms,
            )),
            Edge::Cleared => obs.alerts.push(Alert::resolved(
                AlertKind::NotProposing,
                "Validator proposing again",
                "state is proposing",
                now_ms,
            )),
            Edge::Steady => {}
        }

        let min_pct = self.thresholds.agreement_min_pct;
        let low = input.agreement.percent().is_some_and(|p| p < min_pct);
        match self.low_agreement.update(low, now_ms) {
            Edge::Fired => obs.alerts.push(Alert::firing(
                AlertKind::LowAgreement,
                Severity::Critical,
                "Low validation agreement",
                format!(
                    "1h agreement {:.1}% below {:.1}%",
                    input.agreement.as_gauge(),
                    min_pct
                ),
                now_ms,
            )),
            Edge::Cleared => obs.alerts.push(Alert::resolved(
                AlertKind::LowAgreement,
                "Validation agreement recovered",
                match input.agreement.percent() {
                    Some(p) => format!("1h agreement {p:.1}%"),
                    None => "no validations in window".to_string(),
                },
                now_ms,
            )),
            Edge::Steady => {}
        }

        let peer_min = self.thresholds.peer_min;
        match self.low_peers.update(input.peers < peer_min, now_ms) {
            Edge::Fired => obs.alerts.push(Alert::firing(
                AlertKind::LowPeers,
                Severity::Warning,
                "Low peer count",
                format!("{} peers connected, threshold {}", input.peers, peer_min),
                now_ms,
            )),
            Edge::Cleared => obs.alerts.push(Alert::resolved(
                AlertKind::LowPeers,
                "Peer count recovered",
                format!("{} peers connected", input.peers),
                now_ms,
            )),
            Edge::Steady => {}
        }

        obs
    }

    /// Record a failed poll. Fires once when the failure streak reaches the
    /// configured threshold.
    pub fn observe_failure(&mut self, reason: &str, now_ms: i64) -> Vec<Alert> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.unreachable_fired || self.consecutive_failures < self.thresholds.unreachable_after {
            return Vec::new();
        }
        self.unreachable_fired = true;
        vec![Alert::firing(
            AlertKind::Unreachable,
            Severity::Critical,
            "Validator unreachable",
            format!(
                "{} consecutive polls failed, last error: {}",
                self.consecutive_failures, reason
            ),
            now_ms,
        )]
    }

    fn enter(&mut self, state: ServerState, now_ms: i64, obs: &mut Observation) {
        let current = CurrentState {
            state,
            entered_at_ms: now_ms,
        };
        self.current = Some(current);
        obs.entered = Some(current);
    }
}
