//! Concurrent detection cycle.
//!
//! [`DetectionCycle::run`] analyses every source of a [`RunInputs`] in its
//! own tokio task, with at most `concurrency` tasks in flight. Dispatch stops
//! when the run's [`CancelHandle`] fires or its deadline elapses. Results
//! already collected are returned with `complete = false`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use monitor_core::error::{MonitorError, Result};
use monitor_core::models::Incident;
use monitor_core::settings::DetectionConfig;
use monitor_data::analysis::{analyze_source, SourceAnalysis};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::collector::RunInputs;
use crate::observer::{CycleObserver, StopReason};

// ── CycleOutcome ──────────────────────────────────────────────────────────────

/// Everything one detection run produced.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    /// Incidents in completion order; rule order holds within a source.
    pub incidents: Vec<Incident>,
    /// `false` when cancellation or the deadline cut the run short.
    pub complete: bool,
    pub sources_analyzed: usize,
    pub sources_skipped: usize,
    pub sources_not_run: usize,
}

impl CycleOutcome {
    /// Stable sort by source id, keeping rule order inside a source.
    pub fn sort_by_source(&mut self) {
        self.incidents.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    }
}

// ── CancelHandle ──────────────────────────────────────────────────────────────

/// Cooperative cancellation for one run. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request the run to stop dispatching.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

// ── DetectionCycle ────────────────────────────────────────────────────────────

/// Bounded fan-out of per-source analysis.
#[derive(Debug, Clone)]
pub struct DetectionCycle {
    concurrency: usize,
    deadline: Option<Duration>,
    config: DetectionConfig,
}

impl DetectionCycle {
    pub fn new(concurrency: usize, config: DetectionConfig) -> Self {
        Self {
            concurrency,
            deadline: None,
            config,
        }
    }

    /// Stop dispatching once `deadline` has passed since the run started.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run to completion unless the deadline elapses.
    pub async fn run(
        &self,
        inputs: RunInputs,
        observer: &mut dyn CycleObserver,
    ) -> Result<CycleOutcome> {
        self.run_until_cancelled(inputs, observer, &CancelHandle::new())
            .await
    }

    /// Same as [`run`](Self::run), also stopping when `cancel` fires.
    ///
    /// In-flight tasks are aborted on stop; results that were already
    /// finished are kept.
    pub async fn run_until_cancelled(
        &self,
        inputs: RunInputs,
        observer: &mut dyn CycleObserver,
        cancel: &CancelHandle,
    ) -> Result<CycleOutcome> {
        if self.concurrency == 0 {
            return Err(MonitorError::InvariantViolation(
                "detection cycle needs a concurrency of at least 1".to_string(),
            ));
        }

        let date = inputs.date;
        let total = inputs.source_count();
        let mut queue: VecDeque<_> = inputs.source_inputs().into();
        drop(inputs);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<(String, Result<SourceAnalysis>)> = JoinSet::new();
        let mut cancel_rx = cancel.subscribe();
        let deadline_at = self.deadline.map(|d| Instant::now() + d);
        let deadline = deadline_elapsed(deadline_at);
        tokio::pin!(deadline);

        let mut outcome = CycleOutcome {
            incidents: Vec::new(),
            complete: true,
            sources_analyzed: 0,
            sources_skipped: 0,
            sources_not_run: 0,
        };
        let mut stop = None;

        debug!(sources = total, concurrency = self.concurrency, "Detection cycle started");

        while !(queue.is_empty() && tasks.is_empty()) {
            // The timer only fires once the runtime parks, so check the
            // clock before every dispatch as well.
            if let Some(reason) = stop_reason(cancel, deadline_at) {
                stop = Some(reason);
                break;
            }
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => {
                    stop = Some(StopReason::Cancelled);
                    break;
                }
                _ = &mut deadline => {
                    stop = Some(StopReason::DeadlineElapsed);
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = record(joined, &mut outcome, observer) {
                        tasks.shutdown().await;
                        return Err(e);
                    }
                }
                Ok(permit) = semaphore.clone().acquire_owned(), if !queue.is_empty() => {
                    if let Some(reason) = stop_reason(cancel, deadline_at) {
                        stop = Some(reason);
                        break;
                    }
                    if let Some(input) = queue.pop_front() {
                        let config = self.config.clone();
                        observer.source_started(input.source_id());
                        tasks.spawn(async move {
                            let _permit = permit;
                            let id = input.source_id().to_string();
                            (id, analyze_source(&input, date, &config))
                        });
                    }
                }
            }
        }

        if let Some(reason) = stop {
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                if matches!(&joined, Err(e) if e.is_cancelled()) {
                    continue;
                }
                record(joined, &mut outcome, observer)?;
            }
            outcome.complete = false;
            outcome.sources_not_run = total - outcome.sources_analyzed - outcome.sources_skipped;
            observer.stopped(reason, outcome.sources_not_run);
        }

        observer.run_finished(outcome.complete);
        Ok(outcome)
    }
}

/// Why dispatch must stop now, if it must.
fn stop_reason(cancel: &CancelHandle, deadline_at: Option<Instant>) -> Option<StopReason> {
    if cancel.is_cancelled() {
        Some(StopReason::Cancelled)
    } else if deadline_at.is_some_and(|at| Instant::now() >= at) {
        Some(StopReason::DeadlineElapsed)
    } else {
        None
    }
}

/// Fold one joined task into the outcome.
fn record(
    joined: std::result::Result<(String, Result<SourceAnalysis>), tokio::task::JoinError>,
    outcome: &mut CycleOutcome,
    observer: &mut dyn CycleObserver,
) -> Result<()> {
    let (source_id, analysis) = joined.map_err(|e| {
        MonitorError::InvariantViolation(format!("source analysis task failed: {e}"))
    })?;
    let analysis = analysis?;

    if analysis.skipped {
        outcome.sources_skipped += 1;
        observer.source_skipped(&source_id);
    } else {
        outcome.sources_analyzed += 1;
        observer.source_finished(&source_id, &analysis.incidents);
        outcome.incidents.extend(analysis.incidents);
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{NoopObserver, TracingObserver};
    use chrono::{NaiveDate, TimeZone, Utc};
    use monitor_core::models::{FileRecord, IncidentType, SourceProfile};
    use monitor_data::analysis::analyze_sources;
    use monitor_data::profile::parse_profile;
    use monitor_data::reader::TelemetryBatch;
    use std::collections::BTreeMap;

    const PROFILE_DOC: &str = "\
| Day | Mean Files |
|---|---|
| Monday | 10 |

| Day | Upload Hour Slot Mean |
|---|---|
| Monday | 08:00-10:00 |
";

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 8).unwrap()
    }

    fn record(source: &str, name: &str, hour: u32) -> FileRecord {
        FileRecord {
            source_id: source.to_string(),
            filename: name.to_string(),
            uploaded_at: Utc.with_ymd_and_hms(2025, 9, 8, hour, 0, 0).unwrap(),
            row_count: 100,
            status: "processed".to_string(),
            status_message: None,
            is_duplicate_flag: false,
        }
    }

    fn inputs(sources: usize) -> RunInputs {
        let mut profiles: BTreeMap<String, SourceProfile> = (0..sources)
            .map(|i| {
                let id = format!("s{i:02}");
                let profile = parse_profile(&id, PROFILE_DOC);
                (id, profile)
            })
            .collect();
        profiles.insert("zz".to_string(), parse_profile("zz", ""));

        let mut records = Vec::new();
        for i in 0..sources {
            let id = format!("s{i:02}");
            for f in 0..7 {
                records.push(record(&id, &format!("f{f}.csv"), 9));
            }
            records.push(record(&id, "f0.csv", 20));
        }

        RunInputs::new(
            monday(),
            profiles,
            TelemetryBatch::from_records(monday(), records),
            TelemetryBatch::empty(monday()),
        )
    }

    #[tokio::test]
    async fn test_run_rejects_zero_concurrency() {
        let cycle = DetectionCycle::new(0, DetectionConfig::default());
        let result = cycle.run(inputs(1), &mut NoopObserver).await;
        assert!(matches!(result, Err(MonitorError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn test_run_matches_sequential_cycle() {
        let input = inputs(12);
        let sequential = analyze_sources(
            &input.profiles,
            &input.today,
            &input.history,
            monday(),
            &DetectionConfig::default(),
        )
        .unwrap();

        let cycle = DetectionCycle::new(4, DetectionConfig::default());
        let mut observer = TracingObserver::new();
        let mut outcome = cycle.run(input, &mut observer).await.unwrap();
        outcome.sort_by_source();

        assert!(outcome.complete);
        assert_eq!(outcome.sources_analyzed, 12);
        assert_eq!(outcome.sources_skipped, 1);
        assert_eq!(outcome.sources_not_run, 0);
        assert_eq!(outcome.incidents, sequential.incidents);
        assert_eq!(observer.sources_started, 13);
        assert_eq!(observer.totals.total(), outcome.incidents.len());
    }

    #[tokio::test]
    async fn test_run_preserves_rule_order_per_source() {
        let cycle = DetectionCycle::new(3, DetectionConfig::default());
        let mut outcome = cycle.run(inputs(5), &mut NoopObserver).await.unwrap();
        outcome.sort_by_source();

        // Per source: 10 expected vs 8 observed, one repeat, one late file.
        let kinds: Vec<IncidentType> = outcome
            .incidents
            .iter()
            .filter(|i| i.source_id == "s03")
            .map(|i| i.incident_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                IncidentType::MissingFile,
                IncidentType::IntradayDuplicate,
                IncidentType::FileUploadAfterSchedule,
            ]
        );
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let cycle = DetectionCycle::new(2, DetectionConfig::default());
        let mut first = cycle.run(inputs(6), &mut NoopObserver).await.unwrap();
        let mut second = cycle.run(inputs(6), &mut NoopObserver).await.unwrap();
        first.sort_by_source();
        second.sort_by_source();
        assert_eq!(first.incidents, second.incidents);
    }

    #[tokio::test]
    async fn test_run_unparseable_only() {
        let profiles = BTreeMap::from([("a".to_string(), parse_profile("a", "  \n"))]);
        let input = RunInputs::new(
            monday(),
            profiles,
            TelemetryBatch::from_records(monday(), vec![record("a", "x.csv", 23)]),
            TelemetryBatch::empty(monday()),
        );
        let outcome = DetectionCycle::new(1, DetectionConfig::default())
            .run(input, &mut NoopObserver)
            .await
            .unwrap();
        assert!(outcome.complete);
        assert!(outcome.incidents.is_empty());
        assert_eq!(outcome.sources_skipped, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start_is_incomplete() {
        let cancel = CancelHandle::new();
        cancel.cancel();
        assert!(cancel.is_cancelled());

        let mut observer = TracingObserver::new();
        let outcome = DetectionCycle::new(4, DetectionConfig::default())
            .run_until_cancelled(inputs(3), &mut observer, &cancel)
            .await
            .unwrap();

        assert!(!outcome.complete);
        assert!(outcome.incidents.is_empty());
        assert_eq!(outcome.sources_not_run, 4);
        assert_eq!(observer.stop_reason, Some(StopReason::Cancelled));
    }

    #[tokio::test]
    async fn test_elapsed_deadline_is_incomplete() {
        let outcome = DetectionCycle::new(4, DetectionConfig::default())
            .with_deadline(Duration::ZERO)
            .run(inputs(3), &mut NoopObserver)
            .await
            .unwrap();

        assert!(!outcome.complete);
        assert_eq!(outcome.sources_analyzed + outcome.sources_skipped, 0);
        assert_eq!(outcome.sources_not_run, 4);
    }

    #[tokio::test]
    async fn test_elapsed_deadline_stops_dispatch_on_busy_run() {
        let mut observer = TracingObserver::new();
        let outcome = DetectionCycle::new(8, DetectionConfig::default())
            .with_deadline(Duration::ZERO)
            .run(inputs(500), &mut observer)
            .await
            .unwrap();

        assert!(!outcome.complete);
        assert_eq!(observer.sources_started, 0);
        assert_eq!(outcome.sources_not_run, 501);
        assert_eq!(observer.stop_reason, Some(StopReason::DeadlineElapsed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_elapsed_deadline_stops_dispatch_multi_thread() {
        let outcome = DetectionCycle::new(8, DetectionConfig::default())
            .with_deadline(Duration::ZERO)
            .run(inputs(500), &mut NoopObserver)
            .await
            .unwrap();

        assert!(!outcome.complete);
        assert_eq!(outcome.sources_analyzed + outcome.sources_skipped, 0);
    }

    #[tokio::test]
    async fn test_generous_deadline_completes() {
        let outcome = DetectionCycle::new(4, DetectionConfig::default())
            .with_deadline(Duration::from_secs(60))
            .run(inputs(3), &mut NoopObserver)
            .await
            .unwrap();
        assert!(outcome.complete);
        assert_eq!(outcome.sources_not_run, 0);
    }

    #[tokio::test]
    async fn test_empty_run_is_complete() {
        let input = RunInputs::new(
            monday(),
            BTreeMap::new(),
            TelemetryBatch::empty(monday()),
            TelemetryBatch::empty(monday()),
        );
        let outcome = DetectionCycle::new(1, DetectionConfig::default())
            .run(input, &mut NoopObserver)
            .await
            .unwrap();
        assert!(outcome.complete);
        assert!(outcome.incidents.is_empty());
    }

    #[test]
    fn test_sort_by_source_is_stable() {
        let date = monday();
        let mut outcome = CycleOutcome {
            incidents: vec![
                Incident::new("b", IncidentType::MissingFile, date, "1"),
                Incident::new("a", IncidentType::FailedFile, date, "2"),
                Incident::new("b", IncidentType::FileUploadAfterSchedule, date, "3"),
                Incident::new("a", IncidentType::PreviousPeriodUpload, date, "4"),
            ],
            complete: true,
            sources_analyzed: 2,
            sources_skipped: 0,
            sources_not_run: 0,
        };
        outcome.sort_by_source();
        let order: Vec<&str> = outcome.incidents.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(order, vec!["2", "4", "1", "3"]);
    }
}
