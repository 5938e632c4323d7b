//! Telemetry and profile-document loading.
//!
//! Reads the per-source file batches exported by the ingestion platform
//! and locates the profile documents of every known source. A missing or
//! unreadable file is logged and treated as "nothing observed"; it never
//! fails the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use monitor_core::models::FileRecord;
use monitor_core::time_utils::{parse_timestamp_value, prior_period};
use serde_json::Value;
use tracing::{debug, warn};

/// Today's batch inside a run directory.
pub const DAILY_FILES: &str = "files.json";
/// Same-weekday-last-week batch inside a run directory.
pub const HISTORICAL_FILES: &str = "files_last_weekday.json";
/// Directory holding one profile document per source.
pub const PROFILE_DIR: &str = "datasource_cvs";
/// Profile documents are named `<source_id>_native.md`.
pub const PROFILE_SUFFIX: &str = "_native.md";

// ── TelemetryBatch ────────────────────────────────────────────────────────────

/// File records uploaded on one calendar date, grouped by source.
#[derive(Debug, Clone, Default)]
pub struct TelemetryBatch {
    date: Option<NaiveDate>,
    by_source: BTreeMap<String, Vec<FileRecord>>,
}

impl TelemetryBatch {
    /// An empty batch for `date` (missing telemetry).
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            by_source: BTreeMap::new(),
        }
    }

    /// Build a batch from records, keeping only those uploaded on `date` (UTC).
    pub fn from_records(date: NaiveDate, records: impl IntoIterator<Item = FileRecord>) -> Self {
        let mut by_source: BTreeMap<String, Vec<FileRecord>> = BTreeMap::new();
        for record in records {
            if record.uploaded_at.date_naive() != date {
                continue;
            }
            by_source
                .entry(record.source_id.clone())
                .or_default()
                .push(record);
        }
        Self {
            date: Some(date),
            by_source,
        }
    }

    /// The calendar date the batch was filtered to.
    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    /// Records of one source; empty when the source sent nothing.
    pub fn for_source(&self, source_id: &str) -> &[FileRecord] {
        self.by_source
            .get(source_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All records, grouped by source id in ascending order.
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.by_source.values().flatten()
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.by_source.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Run directory for an analysis date: `<data_dir>/<date>_20_00_UTC`.
pub fn batch_dir(data_dir: &Path, date: NaiveDate) -> PathBuf {
    data_dir.join(format!("{}_20_00_UTC", date.format("%Y-%m-%d")))
}

/// Profile document path for a source.
pub fn profile_path(data_dir: &Path, source_id: &str) -> PathBuf {
    data_dir
        .join(PROFILE_DIR)
        .join(format!("{}{}", source_id, PROFILE_SUFFIX))
}

/// Load today's batch for `date`.
pub fn load_daily_files(data_dir: &Path, date: NaiveDate) -> TelemetryBatch {
    let path = batch_dir(data_dir, date).join(DAILY_FILES);
    debug!("Loading daily files from {}", path.display());
    load_batch(&path, date)
}

/// Load the prior-period batch stored next to `date`'s batch.
///
/// Records are kept when they were uploaded `offset_days` before `date`.
pub fn load_historical_files(data_dir: &Path, date: NaiveDate, offset_days: i64) -> TelemetryBatch {
    let path = batch_dir(data_dir, date).join(HISTORICAL_FILES);
    debug!("Loading historical files from {}", path.display());
    load_batch(&path, prior_period(date, offset_days))
}

/// Read a batch document and keep the records uploaded on `date`.
pub fn load_batch(path: &Path, date: NaiveDate) -> TelemetryBatch {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read file {}: {}", path.display(), e);
            return TelemetryBatch::empty(date);
        }
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(value) => parse_batch(&value, date),
        Err(e) => {
            warn!("Failed to parse JSON in {}: {}", path.display(), e);
            TelemetryBatch::empty(date)
        }
    }
}

/// Convert a `{source_id: [entry, ...]}` document into a batch for `date`.
pub fn parse_batch(data: &Value, date: NaiveDate) -> TelemetryBatch {
    let Some(sources) = data.as_object() else {
        warn!("Telemetry document is not keyed by source id");
        return TelemetryBatch::empty(date);
    };

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for (source_id, entries) in sources {
        let Some(entries) = entries.as_array() else {
            debug!("Telemetry for source {} is not a list", source_id);
            continue;
        };
        for entry in entries {
            match map_to_file_record(source_id, entry) {
                Some(record) => records.push(record),
                None => dropped += 1,
            }
        }
    }

    let total = records.len();
    let batch = TelemetryBatch::from_records(date, records);
    debug!(
        "Telemetry: {} records parsed, {} dropped, {} on {}",
        total,
        dropped,
        batch.len(),
        date
    );
    batch
}

/// Every source with a profile document, sorted by id.
pub fn discover_source_ids(data_dir: &Path) -> Vec<String> {
    let dir = data_dir.join(PROFILE_DIR);
    if !dir.exists() {
        warn!("Profile directory does not exist: {}", dir.display());
        return Vec::new();
    }

    let mut ids: Vec<String> = walkdir::WalkDir::new(&dir)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?;
            let id = name.strip_suffix(PROFILE_SUFFIX)?;
            (!id.is_empty()).then(|| id.to_string())
        })
        .collect();

    ids.sort();
    ids.dedup();
    ids
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Map one raw entry to a [`FileRecord`], or `None` when it lacks a
/// filename or a parseable upload timestamp.
fn map_to_file_record(source_id: &str, data: &Value) -> Option<FileRecord> {
    let filename = data.get("filename").and_then(|v| v.as_str())?.to_string();
    let uploaded_at = data.get("uploaded_at").and_then(parse_timestamp_value)?;

    let row_count = ["rows", "row_count", "rows_processed"]
        .iter()
        .find_map(|key| data.get(*key).and_then(as_count))
        .unwrap_or(0);

    let status = data
        .get("status")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let status_message = data
        .get("status_message")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string());

    let is_duplicate_flag = data
        .get("is_duplicated")
        .or_else(|| data.get("is_duplicate"))
        .map(as_flag)
        .unwrap_or(false);

    Some(FileRecord {
        source_id: source_id.to_string(),
        filename,
        uploaded_at,
        row_count,
        status,
        status_message,
        is_duplicate_flag,
    })
}

/// Non-negative whole row count. Fractional or out-of-range values are
/// rejected so the field falls back to its default.
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f < u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().replace(',', "").parse::<u64>().ok(),
        _ => None,
    }
}

fn as_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_u64() == Some(1),
        _ => false,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn sample_batch() -> Value {
        json!({
            "195385": [
                {
                    "filename": "sales_20250908.csv",
                    "uploaded_at": "2025-09-08T09:15:00Z",
                    "rows": 1200,
                    "status": "processed",
                    "status_message": "",
                    "is_duplicated": false
                },
                {
                    "filename": "sales_20250907.csv",
                    "uploaded_at": "2025-09-07T23:59:59Z",
                    "rows": 900,
                    "status": "processed",
                    "is_duplicated": false
                }
            ],
            "220504": [
                {
                    "filename": "stock.csv",
                    "uploaded_at": "2025-09-08T01:00:00+02:00",
                    "row_count": "1,500",
                    "status": "Stopped",
                    "status_message": "duplicate of stock.csv",
                    "is_duplicated": true
                }
            ]
        })
    }

    // ── parse_batch ───────────────────────────────────────────────────────────

    #[test]
    fn test_parse_batch_filters_to_target_date() {
        let batch = parse_batch(&sample_batch(), date("2025-09-08"));
        assert_eq!(batch.for_source("195385").len(), 1);
        assert_eq!(batch.for_source("195385")[0].filename, "sales_20250908.csv");
    }

    #[test]
    fn test_parse_batch_interprets_offsets_in_utc() {
        // 01:00+02:00 on the 8th is 23:00 UTC on the 7th.
        let batch = parse_batch(&sample_batch(), date("2025-09-08"));
        assert!(batch.for_source("220504").is_empty());

        let batch = parse_batch(&sample_batch(), date("2025-09-07"));
        let records = batch.for_source("220504");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].row_count, 1500);
        assert!(records[0].is_duplicate_flag);
        assert_eq!(
            records[0].status_message.as_deref(),
            Some("duplicate of stock.csv")
        );
    }

    #[test]
    fn test_parse_batch_defaults_missing_fields() {
        let data = json!({
            "1": [{"filename": "a.csv", "uploaded_at": "2025-09-08T10:00:00Z"}]
        });
        let batch = parse_batch(&data, date("2025-09-08"));
        let record = &batch.for_source("1")[0];
        assert_eq!(record.row_count, 0);
        assert_eq!(record.status, "unknown");
        assert!(record.status_message.is_none());
        assert!(!record.is_duplicate_flag);
    }

    #[test]
    fn test_parse_batch_rejects_out_of_range_row_counts() {
        let data = json!({
            "1": [
                {"filename": "a.csv", "uploaded_at": "2025-09-08T10:00:00Z", "rows": 1e20},
                {"filename": "b.csv", "uploaded_at": "2025-09-08T10:00:00Z", "rows": 12.5},
                {"filename": "c.csv", "uploaded_at": "2025-09-08T10:00:00Z", "rows": 40.0},
                {"filename": "d.csv", "uploaded_at": "2025-09-08T10:00:00Z", "rows": -3}
            ]
        });
        let batch = parse_batch(&data, date("2025-09-08"));
        let counts: Vec<u64> = batch.for_source("1").iter().map(|r| r.row_count).collect();
        assert_eq!(counts, vec![0, 0, 40, 0]);
    }

    #[test]
    fn test_parse_batch_drops_entries_without_timestamp() {
        let data = json!({
            "1": [
                {"filename": "a.csv", "uploaded_at": "garbage"},
                {"filename": "b.csv"},
                {"uploaded_at": "2025-09-08T10:00:00Z"},
                {"filename": "c.csv", "uploaded_at": "2025-09-08T10:00:00Z"}
            ]
        });
        let batch = parse_batch(&data, date("2025-09-08"));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.for_source("1")[0].filename, "c.csv");
    }

    #[test]
    fn test_parse_batch_rejects_non_object() {
        let batch = parse_batch(&json!([1, 2, 3]), date("2025-09-08"));
        assert!(batch.is_empty());
        assert_eq!(batch.date(), Some(date("2025-09-08")));
    }

    #[test]
    fn test_for_source_unknown_is_empty() {
        let batch = parse_batch(&sample_batch(), date("2025-09-08"));
        assert!(batch.for_source("nope").is_empty());
    }

    // ── load_* ────────────────────────────────────────────────────────────────

    #[test]
    fn test_load_daily_files_reads_run_directory() {
        let dir = TempDir::new().unwrap();
        let day = date("2025-09-08");
        write_file(
            &batch_dir(dir.path(), day).join(DAILY_FILES),
            &sample_batch().to_string(),
        );

        let batch = load_daily_files(dir.path(), day);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records().count(), 1);
    }

    #[test]
    fn test_load_daily_files_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let batch = load_daily_files(dir.path(), date("2025-09-08"));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_load_batch_malformed_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("files.json");
        write_file(&path, "{not json");
        assert!(load_batch(&path, date("2025-09-08")).is_empty());
    }

    #[test]
    fn test_load_historical_files_uses_prior_week() {
        let dir = TempDir::new().unwrap();
        let day = date("2025-09-08");
        let data = json!({
            "195385": [
                {"filename": "old.csv", "uploaded_at": "2025-09-01T08:00:00Z", "status": "processed"},
                {"filename": "today.csv", "uploaded_at": "2025-09-08T08:00:00Z", "status": "processed"}
            ]
        });
        write_file(
            &batch_dir(dir.path(), day).join(HISTORICAL_FILES),
            &data.to_string(),
        );

        let batch = load_historical_files(dir.path(), day, 7);
        assert_eq!(batch.date(), Some(date("2025-09-01")));
        let records = batch.for_source("195385");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filename, "old.csv");
    }

    // ── discover_source_ids ───────────────────────────────────────────────────

    #[test]
    fn test_discover_source_ids_sorted() {
        let dir = TempDir::new().unwrap();
        write_file(&profile_path(dir.path(), "220504"), "x");
        write_file(&profile_path(dir.path(), "195385"), "x");
        write_file(&dir.path().join(PROFILE_DIR).join("README.md"), "x");

        let ids = discover_source_ids(dir.path());
        assert_eq!(ids, vec!["195385".to_string(), "220504".to_string()]);
    }

    #[test]
    fn test_discover_source_ids_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(discover_source_ids(dir.path()).is_empty());
    }

    #[test]
    fn test_batch_dir_layout() {
        let path = batch_dir(Path::new("data"), date("2025-09-08"));
        assert_eq!(path, PathBuf::from("data/2025-09-08_20_00_UTC"));
    }
}
