use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Process-lifetime counters. These reset when the monitor restarts; the
/// gauges derived from the store do not.
#[derive(Clone)]
pub struct Counters {
    registry: Registry,
    pub polls: IntCounterVec,
    pub upstream_errors: IntCounterVec,
    pub malformed_responses: IntCounterVec,
    pub validations_checked: IntCounter,
    pub state_transitions: IntCounter,
    pub store_write_failures: IntCounterVec,
    pub alerts_fired: IntCounterVec,
}

impl Counters {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let polls = IntCounterVec::new(
            Opts::new("xrpl_monitor_polls_total", "Polls attempted since monitor start"),
            &["collector"],
        )?;
        let upstream_errors = IntCounterVec::new(
            Opts::new(
                "xrpl_api_errors_total",
                "Failed rippled calls since monitor start (resets on restart)",
            ),
            &["collector", "kind"],
        )?;
        let malformed_responses = IntCounterVec::new(
            Opts::new(
                "xrpl_malformed_responses_total",
                "rippled responses rejected by sample validation",
            ),
            &["collector"],
        )?;
        let validations_checked = IntCounter::new(
            "xrpl_validations_checked_total",
            "Validated ledgers classified as agreed or missed",
        )?;
        let state_transitions = IntCounter::new(
            "xrpl_state_changes_total",
            "Validator state transitions observed since monitor start",
        )?;
        let store_write_failures = IntCounterVec::new(
            Opts::new(
                "xrpl_store_write_failures_total",
                "Store writes dropped after retries were exhausted",
            ),
            &["table"],
        )?;
        let alerts_fired = IntCounterVec::new(
            Opts::new("xrpl_alerts_sent_total", "Alerts dispatched, including recoveries"),
            &["kind", "severity"],
        )?;

        registry.register(Box::new(polls.clone()))?;
        registry.register(Box::new(upstream_errors.clone()))?;
        registry.register(Box::new(malformed_responses.clone()))?;
        registry.register(Box::new(validations_checked.clone()))?;
        registry.register(Box::new(state_transitions.clone()))?;
        registry.register(Box::new(store_write_failures.clone()))?;
        registry.register(Box::new(alerts_fired.clone()))?;

        Ok(Self {
            registry,
            polls,
            upstream_errors,
            malformed_responses,
            validations_checked,
            state_transitions,
            store_write_failures,
            alerts_fired,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
