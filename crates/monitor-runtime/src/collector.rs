//! Collect stage: everything one detection run reads from disk.
//!
//! [`collect_inputs`] loads both telemetry batches and parses every profile
//! exactly once. The resulting [`RunInputs`] is handed to the detection
//! cycle by value; nothing is cached between runs.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use monitor_core::error::{MonitorError, Result};
use monitor_core::models::SourceProfile;
use monitor_core::settings::DetectionConfig;
use monitor_data::analysis::SourceInput;
use monitor_data::profile::load_profile;
use monitor_data::reader::{
    discover_source_ids, load_daily_files, load_historical_files, TelemetryBatch,
};
use tracing::{debug, info};

// ── RunInputs ─────────────────────────────────────────────────────────────────

/// Inputs of one detection run.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub date: NaiveDate,
    /// Known sources, sorted.
    pub source_ids: Vec<String>,
    pub profiles: BTreeMap<String, SourceProfile>,
    /// Telemetry uploaded on `date`.
    pub today: TelemetryBatch,
    /// Telemetry of the prior comparable period.
    pub history: TelemetryBatch,
}

impl RunInputs {
    /// Assemble inputs from already-loaded parts.
    ///
    /// The source list is taken from the profile keys.
    pub fn new(
        date: NaiveDate,
        profiles: BTreeMap<String, SourceProfile>,
        today: TelemetryBatch,
        history: TelemetryBatch,
    ) -> Self {
        let source_ids = profiles.keys().cloned().collect();
        Self {
            date,
            source_ids,
            profiles,
            today,
            history,
        }
    }

    /// One owned work item per known source, in source order.
    ///
    /// A source without a loaded profile gets an unparseable one.
    pub fn source_inputs(&self) -> Vec<SourceInput> {
        self.source_ids
            .iter()
            .map(|id| {
                let profile = self
                    .profiles
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| SourceProfile::unparseable(id.as_str()));
                SourceInput::from_batches(profile, &self.today, &self.history)
            })
            .collect()
    }

    pub fn source_count(&self) -> usize {
        self.source_ids.len()
    }
}

// ── collect_inputs ────────────────────────────────────────────────────────────

/// Load everything a run for `date` needs from `data_dir`.
///
/// Only a missing `data_dir` is an error. Missing batches or profiles
/// degrade to empty telemetry and unparseable profiles.
pub fn collect_inputs(
    data_dir: &Path,
    date: NaiveDate,
    config: &DetectionConfig,
) -> Result<RunInputs> {
    if !data_dir.is_dir() {
        return Err(MonitorError::DataPathNotFound(data_dir.to_path_buf()));
    }

    let today = load_daily_files(data_dir, date);
    let history = load_historical_files(data_dir, date, config.historical_offset_days);
    let source_ids = discover_source_ids(data_dir);

    let profiles: BTreeMap<String, SourceProfile> = source_ids
        .iter()
        .map(|id| (id.clone(), load_profile(data_dir, id)))
        .collect();

    let unprofiled = today
        .records()
        .filter(|r| !profiles.contains_key(&r.source_id))
        .count();
    if unprofiled > 0 {
        debug!(records = unprofiled, "Telemetry records without a known source ignored");
    }

    info!(
        date = %date,
        sources = source_ids.len(),
        today = today.len(),
        history = history.len(),
        "Collected run inputs"
    );

    Ok(RunInputs {
        date,
        source_ids,
        profiles,
        today,
        history,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_core::models::ProfileKind;
    use std::fs;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 8).unwrap()
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_collect_inputs_missing_data_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let result = collect_inputs(&missing, date(), &DetectionConfig::default());
        assert!(matches!(result, Err(MonitorError::DataPathNotFound(_))));
    }

    #[test]
    fn test_collect_inputs_loads_everything() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "datasource_cvs/200_native.md",
            "| Day | Mean Files |\n|---|---|\n| Monday | 2 |\n",
        );
        write(dir.path(), "datasource_cvs/100_native.md", "");
        write(
            dir.path(),
            "2025-09-08_20_00_UTC/files.json",
            r#"{"200": [{"filename": "a.csv", "uploaded_at": "2025-09-08T09:00:00Z",
                         "rows": 10, "status": "processed"}],
                "999": [{"filename": "z.csv", "uploaded_at": "2025-09-08T09:00:00Z"}]}"#,
        );
        write(
            dir.path(),
            "2025-09-08_20_00_UTC/files_last_weekday.json",
            r#"{"200": [{"filename": "a.csv", "uploaded_at": "2025-09-01T09:00:00Z"},
                        {"filename": "b.csv", "uploaded_at": "2025-09-08T09:00:00Z"}]}"#,
        );

        let inputs = collect_inputs(dir.path(), date(), &DetectionConfig::default()).unwrap();
        assert_eq!(inputs.source_ids, vec!["100", "200"]);
        assert_eq!(inputs.profiles["100"].kind, ProfileKind::Unparseable);
        assert_eq!(inputs.profiles["200"].kind, ProfileKind::TableForm);
        assert_eq!(inputs.today.for_source("200").len(), 1);
        // Prior batch keeps only the date one period back.
        assert_eq!(inputs.history.len(), 1);
        assert_eq!(inputs.history.for_source("200")[0].filename, "a.csv");
    }

    #[test]
    fn test_collect_inputs_without_batches() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "datasource_cvs/1_native.md", "Workspace ID: 3\n");

        let inputs = collect_inputs(dir.path(), date(), &DetectionConfig::default()).unwrap();
        assert_eq!(inputs.source_count(), 1);
        assert!(inputs.today.is_empty());
        assert!(inputs.history.is_empty());
    }

    #[test]
    fn test_source_inputs_fills_missing_profiles() {
        let mut inputs = RunInputs::new(
            date(),
            BTreeMap::new(),
            TelemetryBatch::empty(date()),
            TelemetryBatch::empty(date()),
        );
        inputs.source_ids.push("42".to_string());

        let items = inputs.source_inputs();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_id(), "42");
        assert!(!items[0].profile.is_parseable());
    }
}
