//! Run-scoped observation of the detection cycle.
//!
//! The cycle reports progress through a [`CycleObserver`] passed to
//! [`DetectionCycle::run`](crate::orchestrator::DetectionCycle::run).
//! Every callback is invoked from the coordinating task, never from a
//! worker, so implementations need no interior locking.

use monitor_core::models::Incident;
use monitor_data::aggregator::SeverityTotals;
use tracing::{debug, info, warn};

/// Why dispatch stopped before every source ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    DeadlineElapsed,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::DeadlineElapsed => f.write_str("deadline elapsed"),
        }
    }
}

/// Callbacks fired during one detection run. All methods default to no-ops.
pub trait CycleObserver: Send {
    fn source_started(&mut self, _source_id: &str) {}

    /// The profile was unparseable; no rule ran.
    fn source_skipped(&mut self, _source_id: &str) {}

    fn source_finished(&mut self, _source_id: &str, _incidents: &[Incident]) {}

    /// Dispatch stopped; `not_run` sources never produced a result.
    fn stopped(&mut self, _reason: StopReason, _not_run: usize) {}

    fn run_finished(&mut self, _complete: bool) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl CycleObserver for NoopObserver {}

// ── TracingObserver ───────────────────────────────────────────────────────────

/// Logs each event and keeps per-run counters.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver {
    pub sources_started: usize,
    pub sources_analyzed: usize,
    pub sources_skipped: usize,
    pub totals: SeverityTotals,
    pub stop_reason: Option<StopReason>,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CycleObserver for TracingObserver {
    fn source_started(&mut self, source_id: &str) {
        self.sources_started += 1;
        debug!(source_id = %source_id, "Source analysis started");
    }

    fn source_skipped(&mut self, source_id: &str) {
        self.sources_skipped += 1;
        debug!(source_id = %source_id, "Source skipped");
    }

    fn source_finished(&mut self, source_id: &str, incidents: &[Incident]) {
        self.sources_analyzed += 1;
        for incident in incidents {
            self.totals.add(incident);
        }
        debug!(
            source_id = %source_id,
            incidents = incidents.len(),
            "Source analysis finished"
        );
    }

    fn stopped(&mut self, reason: StopReason, not_run: usize) {
        self.stop_reason = Some(reason);
        warn!(reason = %reason, not_run, "Detection cycle stopped early");
    }

    fn run_finished(&mut self, complete: bool) {
        info!(
            complete,
            analyzed = self.sources_analyzed,
            skipped = self.sources_skipped,
            urgent = self.totals.urgent,
            needs_attention = self.totals.needs_attention,
            warning = self.totals.warning,
            "Detection cycle finished"
        );
    }
}
