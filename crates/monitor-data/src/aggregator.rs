//! Incident aggregation by workspace.
//!
//! Groups a run's flat incident list by the workspace that owns each
//! source, as extracted from the profile documents.

use std::collections::{BTreeMap, HashMap};

use monitor_core::models::{Incident, Severity, SourceProfile, UNKNOWN_WORKSPACE};
use serde::Serialize;

// ── SeverityTotals ────────────────────────────────────────────────────────────

/// Incident counts per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityTotals {
    pub urgent: usize,
    pub needs_attention: usize,
    pub warning: usize,
}

impl SeverityTotals {
    /// Count one incident.
    pub fn add(&mut self, incident: &Incident) {
        match incident.severity {
            Severity::Urgent => self.urgent += 1,
            Severity::NeedsAttention => self.needs_attention += 1,
            Severity::Warning => self.warning += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.urgent + self.needs_attention + self.warning
    }
}

// ── WorkspaceReport ───────────────────────────────────────────────────────────

/// All incidents of the sources owned by one workspace.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceReport {
    pub workspace_id: String,
    /// Incidents in the order they were detected.
    pub incidents: Vec<Incident>,
    pub totals: SeverityTotals,
}

impl WorkspaceReport {
    fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            incidents: Vec::new(),
            totals: SeverityTotals::default(),
        }
    }

    fn add(&mut self, incident: &Incident) {
        self.totals.add(incident);
        self.incidents.push(incident.clone());
    }
}

// ── ReportAggregator ──────────────────────────────────────────────────────────

/// Stateless helper that groups incidents by workspace.
pub struct ReportAggregator;

impl ReportAggregator {
    /// Map each source id to its workspace id.
    pub fn workspace_map<'a>(
        profiles: impl IntoIterator<Item = &'a SourceProfile>,
    ) -> HashMap<String, String> {
        profiles
            .into_iter()
            .map(|p| (p.source_id.clone(), p.workspace_id.clone()))
            .collect()
    }

    /// Group `incidents` by workspace.
    ///
    /// Sources absent from `workspaces` land in the `"unknown"` group.
    /// Returns reports sorted by workspace id; empty input gives an empty
    /// report list.
    pub fn group_by_workspace(
        incidents: &[Incident],
        workspaces: &HashMap<String, String>,
    ) -> Vec<WorkspaceReport> {
        let mut groups: BTreeMap<&str, WorkspaceReport> = BTreeMap::new();
        for incident in incidents {
            let workspace = workspaces
                .get(&incident.source_id)
                .map(String::as_str)
                .unwrap_or(UNKNOWN_WORKSPACE);
            groups
                .entry(workspace)
                .or_insert_with(|| WorkspaceReport::new(workspace))
                .add(incident);
        }
        groups.into_values().collect()
    }

    /// Sum the severity counts of every workspace.
    pub fn calculate_totals(reports: &[WorkspaceReport]) -> SeverityTotals {
        let mut totals = SeverityTotals::default();
        for report in reports {
            totals.urgent += report.totals.urgent;
            totals.needs_attention += report.totals.needs_attention;
            totals.warning += report.totals.warning;
        }
        totals
    }
}

/// Group a run's incidents by the workspaces named in `profiles`.
pub fn build_report<'a>(
    incidents: &[Incident],
    profiles: impl IntoIterator<Item = &'a SourceProfile>,
) -> Vec<WorkspaceReport> {
    let workspaces = ReportAggregator::workspace_map(profiles);
    ReportAggregator::group_by_workspace(incidents, &workspaces)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
