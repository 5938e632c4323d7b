//! Per-source detection pipeline.
//!
//! [`analyze_source`] fans one source's telemetry and profile through every
//! rule in order.
//!
//! [`analyze_sources`] is the sequential entry point for library callers
//! that already hold parsed profiles and batches and need no task runtime
//! (scripts, tests, embedding in a synchronous service). It produces the
//! same incidents, in source order, as the concurrent cycle in
//! `monitor-runtime` followed by a sort by source id.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use monitor_core::error::Result;
use monitor_core::models::{FileRecord, Incident, SourceProfile};
use monitor_core::settings::DetectionConfig;
use tracing::{debug, info};

use crate::reader::TelemetryBatch;
use crate::rules::{RuleContext, RULES};

// ── Public types ──────────────────────────────────────────────────────────────

/// Owned inputs for one source, ready to move into a worker task.
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub profile: SourceProfile,
    pub today: Vec<FileRecord>,
    pub history: Vec<FileRecord>,
}

impl SourceInput {
    /// Slice the run's batches for `profile`'s source.
    pub fn from_batches(
        profile: SourceProfile,
        today: &TelemetryBatch,
        history: &TelemetryBatch,
    ) -> Self {
        let today = today.for_source(&profile.source_id).to_vec();
        let history = history.for_source(&profile.source_id).to_vec();
        Self {
            profile,
            today,
            history,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.profile.source_id
    }
}

/// Outcome of analysing one source.
#[derive(Debug, Clone)]
pub struct SourceAnalysis {
    pub source_id: String,
    /// `true` when the profile was unparseable and no rule ran.
    pub skipped: bool,
    /// Incidents in rule order.
    pub incidents: Vec<Incident>,
}

/// Metadata produced alongside a sequential run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AnalysisMetadata {
    /// ISO-8601 timestamp when this result was generated.
    pub generated_at: String,
    /// The analysed calendar date.
    pub date: NaiveDate,
    pub sources_analyzed: usize,
    pub sources_skipped: usize,
    pub incidents_detected: usize,
}

/// The complete output of [`analyze_sources`].
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub incidents: Vec<Incident>,
    pub metadata: AnalysisMetadata,
}

// ── Public functions ──────────────────────────────────────────────────────────

/// Run every rule for one source.
///
/// Unparseable profiles are skipped. The only error is a broken input
/// contract (telemetry or profile of another source).
pub fn analyze_source(
    input: &SourceInput,
    date: NaiveDate,
    config: &DetectionConfig,
) -> Result<SourceAnalysis> {
    let source_id = input.source_id();
    let ctx = RuleContext::new(
        source_id,
        date,
        &input.today,
        &input.history,
        &input.profile,
        config,
    )?;

    if !input.profile.is_parseable() {
        info!(source_id = %source_id, "Skipping source with unparseable profile");
        return Ok(SourceAnalysis {
            source_id: source_id.to_string(),
            skipped: true,
            incidents: Vec::new(),
        });
    }

    let mut incidents = Vec::new();
    for (name, rule) in RULES {
        let found = rule(&ctx);
        if !found.is_empty() {
            debug!(
                source_id = %source_id,
                rule = name,
                incidents = found.len(),
                "Rule reported incidents"
            );
        }
        incidents.extend(found);
    }

    Ok(SourceAnalysis {
        source_id: source_id.to_string(),
        skipped: false,
        incidents,
    })
}

/// Sequential detection cycle over every profile.
///
/// Sources are visited in key order and incidents are concatenated, so the
/// result needs no further sorting. No cancellation: every source runs.
pub fn analyze_sources(
    profiles: &BTreeMap<String, SourceProfile>,
    today: &TelemetryBatch,
    history: &TelemetryBatch,
    date: NaiveDate,
    config: &DetectionConfig,
) -> Result<AnalysisResult> {
    let mut incidents = Vec::new();
    let mut analyzed = 0usize;
    let mut skipped = 0usize;

    for profile in profiles.values() {
        let input = SourceInput::from_batches(profile.clone(), today, history);
        let analysis = analyze_source(&input, date, config)?;
        if analysis.skipped {
            skipped += 1;
        } else {
            analyzed += 1;
        }
        incidents.extend(analysis.incidents);
    }

    let metadata = AnalysisMetadata {
        generated_at: Utc::now().to_rfc3339(),
        date,
        sources_analyzed: analyzed,
        sources_skipped: skipped,
        incidents_detected: incidents.len(),
    };

    Ok(AnalysisResult {
        incidents,
        metadata,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
