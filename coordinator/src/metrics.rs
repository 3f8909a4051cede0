//! Prometheus metrics for the voting coordinator.
//!
//! The [`VotingMetrics`] struct owns a dedicated [`Registry`] that the RPC
//! `/metrics` endpoint encodes into the Prometheus text exposition format.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

/// Central collection of coordinator-level Prometheus metrics.
pub struct VotingMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Sessions that entered introduction.
    pub sessions_started: IntCounter,
    /// Sessions completed, labelled by close reason.
    pub sessions_closed: IntCounterVec,
    /// Accepted votes, labelled by kind (binding, changed, indication).
    pub votes_cast: IntCounterVec,
    /// Rejected vote commands, labelled by error kind.
    pub votes_rejected: IntCounterVec,
    /// Downstream calls that failed after every retry.
    pub notification_failures: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Sessions in introduction or voting.
    pub active_sessions: IntGauge,
    /// Running session timers.
    pub active_timers: IntGauge,
}

impl VotingMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let sessions_started = register_int_counter_with_registry!(
            Opts::new(
                "polity_sessions_started_total",
                "Voting sessions opened for introduction"
            ),
            registry
        )
        .expect("failed to register sessions_started counter");

        let sessions_closed = register_int_counter_vec_with_registry!(
            Opts::new("polity_sessions_closed_total", "Voting sessions completed"),
            &["reason"],
            registry
        )
        .expect("failed to register sessions_closed counter");

        let votes_cast = register_int_counter_vec_with_registry!(
            Opts::new("polity_votes_cast_total", "Votes accepted"),
            &["kind"],
            registry
        )
        .expect("failed to register votes_cast counter");

        let votes_rejected = register_int_counter_vec_with_registry!(
            Opts::new("polity_votes_rejected_total", "Vote commands rejected"),
            &["reason"],
            registry
        )
        .expect("failed to register votes_rejected counter");

        let notification_failures = register_int_counter_with_registry!(
            Opts::new(
                "polity_notification_failures_total",
                "Downstream deliveries abandoned after retries"
            ),
            registry
        )
        .expect("failed to register notification_failures counter");

        let active_sessions = register_int_gauge_with_registry!(
            Opts::new(
                "polity_active_sessions",
                "Sessions in introduction or voting"
            ),
            registry
        )
        .expect("failed to register active_sessions gauge");

        let active_timers = register_int_gauge_with_registry!(
            Opts::new("polity_active_timers", "Running session timers"),
            registry
        )
        .expect("failed to register active_timers gauge");

        Self {
            registry,
            sessions_started,
            sessions_closed,
            votes_cast,
            votes_rejected,
            notification_failures,
            active_sessions,
            active_timers,
        }
    }

    /// Encode every registered metric in the text exposition format.
    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for VotingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_counters_appear_in_text_output() {
        let metrics = VotingMetrics::new();
        metrics.sessions_started.inc();
        metrics.sessions_closed.with_label_values(&["timeout"]).inc();
        metrics.votes_cast.with_label_values(&["binding"]).inc_by(3);
        metrics.active_sessions.set(2);

        let text = metrics.encode_text();
        assert!(text.contains("polity_sessions_started_total 1"));
        assert!(text.contains("polity_sessions_closed_total{reason=\"timeout\"} 1"));
        assert!(text.contains("polity_votes_cast_total{kind=\"binding\"} 3"));
        assert!(text.contains("polity_active_sessions 2"));
    }

    #[test]
    fn separate_instances_do_not_share_registries() {
        let a = VotingMetrics::new();
        let b = VotingMetrics::new();
        a.sessions_started.inc();
        assert_eq!(b.sessions_started.get(), 0);
    }
}
