//! Text and JSON rendering of a run's workspace report.

use std::fmt::Write as _;

use chrono::NaiveDate;
use monitor_data::aggregator::{ReportAggregator, SeverityTotals, WorkspaceReport};
use monitor_runtime::orchestrator::CycleOutcome;
use serde::Serialize;

/// Serialized shape of `--format json`.
#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    date: NaiveDate,
    complete: bool,
    sources_analyzed: usize,
    sources_skipped: usize,
    sources_not_run: usize,
    totals: SeverityTotals,
    workspaces: &'a [WorkspaceReport],
}

pub fn render_json(
    date: NaiveDate,
    outcome: &CycleOutcome,
    reports: &[WorkspaceReport],
) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport {
        date,
        complete: outcome.complete,
        sources_analyzed: outcome.sources_analyzed,
        sources_skipped: outcome.sources_skipped,
        sources_not_run: outcome.sources_not_run,
        totals: ReportAggregator::calculate_totals(reports),
        workspaces: reports,
    })
}

fn totals_line(totals: &SeverityTotals) -> String {
    format!(
        "{} urgent, {} needs attention, {} warning",
        totals.urgent, totals.needs_attention, totals.warning
    )
}

pub fn render_text(date: NaiveDate, outcome: &CycleOutcome, reports: &[WorkspaceReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Ingestion report for {}", date);
    if !outcome.complete {
        let _ = writeln!(
            out,
            "INCOMPLETE: {} source(s) were not analysed",
            outcome.sources_not_run
        );
    }
    let _ = writeln!(
        out,
        "Sources analysed: {}, skipped: {}",
        outcome.sources_analyzed, outcome.sources_skipped
    );

    if reports.is_empty() {
        let _ = writeln!(out, "\nNo incidents detected.");
        return out;
    }

    for report in reports {
        let _ = writeln!(
            out,
            "\nWorkspace {} ({})",
            report.workspace_id,
            totals_line(&report.totals)
        );
        for incident in &report.incidents {
            let _ = writeln!(
                out,
                "  [{}] {} {}: {}",
                incident.severity, incident.source_id, incident.incident_type, incident.description
            );
        }
    }

    let totals = ReportAggregator::calculate_totals(reports);
    let _ = writeln!(out, "\nTotal: {} incident(s), {}", totals.total(), totals_line(&totals));
    out
}
