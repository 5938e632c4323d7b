//! Profile document parser.
//!
//! A profile document describes how a source normally behaves. Two layouts
//! exist and are told apart by content, not configuration:
//!
//! * **table form**: markdown tables keyed by weekday (file counts, upload
//!   schedule, per-day volume and empty files, entity stats);
//! * **text form**: a `Row Count Statistics` section with bullet lines
//!   such as `- Mean: 1,234`.
//!
//! Tables matching a known signature are extracted in both layouts.

use std::path::Path;

use monitor_core::extract::{
    empty_file_allowance, has_text_form_marker, labeled_value, parse_number, upload_window,
    volume_range, workspace_id, TEXT_FORM_MARKER,
};
use monitor_core::models::{
    ProfileKind, ProfileStats, SourceProfile, VolumeSummary, UNKNOWN_WORKSPACE,
};
use monitor_core::time_utils::parse_weekday;
use tracing::{debug, warn};

use crate::reader::profile_path;

const COL_DAY: &str = "day";
const COL_MEAN_FILES: &str = "mean files";
const COL_UPLOAD_SLOT: &str = "upload hour slot mean";
const COL_TOTAL_ROWS: &str = "total rows processed";
const COL_EMPTY_FILES: &str = "empty files";

// ── MarkdownTable ─────────────────────────────────────────────────────────────

/// A pipe table with its header flattened to a single level.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkdownTable {
    /// Lower-cased, trimmed column names.
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl MarkdownTable {
    /// Index of a column by (lower-case) name.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// `true` when every named column is present.
    pub fn has_columns(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.column(n).is_some())
    }

    /// Cell text at (`row`, `col`), empty when the row is short.
    pub fn cell<'a>(&'a self, row: &'a [String], col: usize) -> &'a str {
        row.get(col).map(String::as_str).unwrap_or("")
    }
}

/// Extract every pipe table in a markdown document.
///
/// A table is a run of `|`-rows containing a `---` delimiter row. When
/// several header rows precede the delimiter (multi-level header), only the
/// last one is kept.
pub fn parse_tables(doc: &str) -> Vec<MarkdownTable> {
    let mut tables = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    for line in doc.lines().chain(std::iter::once("")) {
        let trimmed = line.trim();
        if trimmed.starts_with('|') {
            block.push(trimmed);
            continue;
        }
        if !block.is_empty() {
            if let Some(table) = table_from_block(&block) {
                tables.push(table);
            }
            block.clear();
        }
    }

    tables
}

fn table_from_block(lines: &[&str]) -> Option<MarkdownTable> {
    let rows: Vec<Vec<String>> = lines.iter().map(|l| split_row(l)).collect();
    let delimiter = rows.iter().position(|r| is_delimiter_row(r))?;
    if delimiter == 0 {
        return None;
    }

    let headers = rows[delimiter - 1]
        .iter()
        .map(|h| flatten_header(h))
        .collect();
    let body = rows[delimiter + 1..]
        .iter()
        .filter(|r| !is_delimiter_row(r) && r.iter().any(|c| !c.is_empty()))
        .cloned()
        .collect();

    Some(MarkdownTable {
        headers,
        rows: body,
    })
}

fn split_row(line: &str) -> Vec<String> {
    let inner = line.trim().trim_start_matches('|');
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner
        .replace("\\|", "\u{0}")
        .split('|')
        .map(|c| c.replace('\u{0}', "|").trim().to_string())
        .collect()
}

fn is_delimiter_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|c| {
            let c = c.trim();
            let inner = c.trim_start_matches(':').trim_end_matches(':');
            !inner.is_empty() && inner.chars().all(|ch| ch == '-')
        })
}

/// Reduce a header cell to its lowest level.
///
/// Handles tuple-style headers (`('Rows', 'Total Rows Processed')`) and
/// strips emphasis markers.
fn flatten_header(cell: &str) -> String {
    let mut name = cell.trim();
    if name.starts_with('(') && name.ends_with(')') {
        let inner = &name[1..name.len() - 1];
        if let Some(last) = inner
            .rsplit(',')
            .map(|p| p.trim().trim_matches(|c| c == '\'' || c == '"').trim())
            .find(|p| !p.is_empty())
        {
            name = last;
        }
    }
    name.trim_matches('*').trim().to_lowercase()
}

// ── Variant detection ─────────────────────────────────────────────────────────

/// Which layout a readable document uses.
///
/// Blank documents are unparseable; a document carrying the text-form
/// marker is text form; anything else is table form.
pub fn detect_kind(doc: &str) -> ProfileKind {
    if doc.trim().is_empty() {
        ProfileKind::Unparseable
    } else if has_text_form_marker(doc) {
        ProfileKind::TextForm
    } else {
        ProfileKind::TableForm
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Read and parse the profile document of `source_id` under `data_dir`.
///
/// Never fails: an unreadable document yields an unparseable profile.
pub fn load_profile(data_dir: &Path, source_id: &str) -> SourceProfile {
    let path = profile_path(data_dir, source_id);
    match std::fs::read_to_string(&path) {
        Ok(doc) => parse_profile(source_id, &doc),
        Err(e) => {
            warn!(
                source_id = %source_id,
                "Failed to read profile {}: {}",
                path.display(),
                e
            );
            SourceProfile::unparseable(source_id)
        }
    }
}

/// Parse one profile document.
pub fn parse_profile(source_id: &str, doc: &str) -> SourceProfile {
    let kind = detect_kind(doc);
    if kind == ProfileKind::Unparseable {
        debug!(source_id = %source_id, "Profile document is empty");
        return SourceProfile::unparseable(source_id);
    }

    let tables = parse_tables(doc);
    let mut stats = ProfileStats::default();
    for table in &tables {
        extract_table_stats(table, &mut stats);
    }

    if kind == ProfileKind::TextForm {
        stats.volume_summary = text_section(doc)
            .map(|section| extract_volume_summary(&section))
            .filter(|summary| !summary.is_empty());
    }

    let workspace = workspace_id(doc).unwrap_or_else(|| UNKNOWN_WORKSPACE.to_string());

    debug!(
        source_id = %source_id,
        kind = %kind,
        tables = tables.len(),
        file_count_days = stats.file_count.len(),
        schedule_days = stats.upload_windows.len(),
        volume_days = stats.volume.len(),
        "Profile parsed"
    );
    if stats.is_empty() {
        debug!(source_id = %source_id, "Profile carries no recognised statistics");
    }

    SourceProfile::parsed(source_id, kind, workspace, stats)
}

// ── Extraction ────────────────────────────────────────────────────────────────

fn extract_table_stats(table: &MarkdownTable, stats: &mut ProfileStats) {
    let Some(day_col) = table.column(COL_DAY) else {
        return;
    };

    let mean_files = table.column(COL_MEAN_FILES);
    let upload_slot = table.column(COL_UPLOAD_SLOT);
    let day_volume = if table.has_columns(&[COL_TOTAL_ROWS, COL_EMPTY_FILES]) {
        table.column(COL_TOTAL_ROWS).zip(table.column(COL_EMPTY_FILES))
    } else {
        None
    };

    for row in &table.rows {
        let Some(day) = parse_weekday(table.cell(row, day_col)) else {
            continue;
        };

        if let Some(col) = mean_files {
            let cell = table.cell(row, col);
            if let Some(mean) = parse_number(cell).or_else(|| labeled_value(cell, "Mean")) {
                stats.file_count.insert(day, mean);
            }
        }

        if let Some(col) = upload_slot {
            if let Some(window) = upload_window(table.cell(row, col)) {
                stats.upload_windows.insert(day, window);
            }
        }

        if let Some((rows_col, empty_col)) = day_volume {
            if let Some(range) = volume_range(table.cell(row, rows_col)) {
                stats.volume.insert(day, range);
            }
            if let Some(allowance) = empty_file_allowance(table.cell(row, empty_col)) {
                stats.empty_file_allowance.insert(day, allowance);
            }
        }
    }
}

/// Lines between the text-form heading and the next heading.
fn text_section(doc: &str) -> Option<String> {
    let marker = TEXT_FORM_MARKER.to_lowercase();
    let mut lines = doc.lines();
    lines.by_ref().find(|l| l.to_lowercase().contains(&marker))?;
    let section: Vec<&str> = lines
        .take_while(|l| !l.trim_start().starts_with('#'))
        .collect();
    Some(section.join("\n"))
}

fn extract_volume_summary(section: &str) -> VolumeSummary {
    VolumeSummary {
        mean: labeled_value(section, "Mean"),
        median: labeled_value(section, "Median"),
        min: labeled_value(section, "Min"),
        max: labeled_value(section, "Max"),
        empty_files: labeled_value(section, "Empty files"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
