use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::time_utils::at_time;

/// Workspace id used when a profile document does not name one.
pub const UNKNOWN_WORKSPACE: &str = "unknown";

// ── FileRecord ────────────────────────────────────────────────────────────────

/// One uploaded file as reported by the ingestion platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Identifier of the source that delivered the file.
    pub source_id: String,
    /// Name of the uploaded file.
    pub filename: String,
    /// When the upload happened (UTC).
    pub uploaded_at: DateTime<Utc>,
    /// Number of rows processed; `0` means the file was empty.
    #[serde(default)]
    pub row_count: u64,
    /// Free-text processing outcome (compared case-insensitively).
    #[serde(default)]
    pub status: String,
    /// Optional diagnostic text attached to the status.
    #[serde(default)]
    pub status_message: Option<String>,
    /// Duplicate flag set by the upstream system.
    #[serde(default)]
    pub is_duplicate_flag: bool,
}

impl FileRecord {
    /// `true` when the status reads `processed`.
    pub fn is_processed(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("processed")
    }

    /// `true` when the status reads `stopped`.
    pub fn is_stopped(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("stopped")
    }

    /// `true` when the file carried no rows.
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}

// ── Profile ───────────────────────────────────────────────────────────────────

/// Which document schema a profile was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Four markdown tables keyed by weekday.
    TableForm,
    /// Bullet-list statistics under a fixed section heading.
    TextForm,
    /// The document was missing or could not be read.
    Unparseable,
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProfileKind::TableForm => "table-form",
            ProfileKind::TextForm => "text-form",
            ProfileKind::Unparseable => "unparseable",
        };
        f.write_str(s)
    }
}

/// Expected upload window for one weekday, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl UploadWindow {
    /// The instant the window closes for uploads made on `date`.
    ///
    /// A window whose end precedes its start wraps past midnight.
    pub fn end_on(&self, date: NaiveDate) -> DateTime<Utc> {
        let end = at_time(date, self.end);
        if self.end < self.start {
            end + TimeDelta::days(1)
        } else {
            end
        }
    }
}

impl fmt::Display for UploadWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// Inclusive expected row-count range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeRange {
    pub min: f64,
    pub max: f64,
}

impl VolumeRange {
    /// `true` when `total` lies inside `[min, max]`.
    pub fn contains(&self, total: f64) -> bool {
        total >= self.min && total <= self.max
    }
}

/// Global row-count summary found in text-form documents.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VolumeSummary {
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Historical number of empty files.
    pub empty_files: Option<f64>,
}

impl VolumeSummary {
    /// The `[min, max]` range, when both bounds were extracted.
    pub fn range(&self) -> Option<VolumeRange> {
        Some(VolumeRange {
            min: self.min?,
            max: self.max?,
        })
    }

    /// `true` when no field could be extracted.
    pub fn is_empty(&self) -> bool {
        self.mean.is_none()
            && self.median.is_none()
            && self.min.is_none()
            && self.max.is_none()
            && self.empty_files.is_none()
    }
}

/// The statistic groups a parsed profile may carry.
///
/// Every group is optional per weekday: a missing entry means the
/// statistic cannot be evaluated, never that it is zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileStats {
    pub file_count: HashMap<Weekday, f64>,
    pub upload_windows: HashMap<Weekday, UploadWindow>,
    pub volume: HashMap<Weekday, VolumeRange>,
    pub volume_summary: Option<VolumeSummary>,
    pub empty_file_allowance: HashMap<Weekday, u32>,
}

impl ProfileStats {
    /// Mean number of files expected on `day`.
    pub fn expected_file_count(&self, day: Weekday) -> Option<f64> {
        self.file_count.get(&day).copied()
    }

    /// Upload window expected on `day`.
    pub fn upload_window(&self, day: Weekday) -> Option<UploadWindow> {
        self.upload_windows.get(&day).copied()
    }

    /// Expected total rows on `day`; falls back to the global summary.
    pub fn volume_range(&self, day: Weekday) -> Option<VolumeRange> {
        self.volume
            .get(&day)
            .copied()
            .or_else(|| self.volume_summary.and_then(|s| s.range()))
    }

    /// How many empty files are normal on `day`.
    ///
    /// Falls back to the global historical empty-file count.
    pub fn empty_file_allowance(&self, day: Weekday) -> Option<u32> {
        self.empty_file_allowance.get(&day).copied().or_else(|| {
            self.volume_summary
                .and_then(|s| s.empty_files)
                .map(|n| n.max(0.0).round() as u32)
        })
    }

    /// `true` when nothing at all was extracted.
    pub fn is_empty(&self) -> bool {
        self.file_count.is_empty()
            && self.upload_windows.is_empty()
            && self.volume.is_empty()
            && self.volume_summary.is_none()
            && self.empty_file_allowance.is_empty()
    }
}

/// Normalised expected-behaviour summary for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProfile {
    pub source_id: String,
    pub kind: ProfileKind,
    /// Owning workspace, or [`UNKNOWN_WORKSPACE`].
    pub workspace_id: String,
    stats: ProfileStats,
}

impl SourceProfile {
    /// Build a parsed profile. `kind` must not be `Unparseable`; use
    /// [`SourceProfile::unparseable`] for that.
    pub fn parsed(
        source_id: impl Into<String>,
        kind: ProfileKind,
        workspace_id: impl Into<String>,
        stats: ProfileStats,
    ) -> Self {
        debug_assert!(kind != ProfileKind::Unparseable);
        Self {
            source_id: source_id.into(),
            kind,
            workspace_id: workspace_id.into(),
            stats,
        }
    }

    /// A profile with no statistics; every rule skips it.
    pub fn unparseable(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            kind: ProfileKind::Unparseable,
            workspace_id: UNKNOWN_WORKSPACE.to_string(),
            stats: ProfileStats::default(),
        }
    }

    /// Statistics of a parsed profile; `None` for unparseable ones.
    pub fn stats(&self) -> Option<&ProfileStats> {
        match self.kind {
            ProfileKind::TableForm | ProfileKind::TextForm => Some(&self.stats),
            ProfileKind::Unparseable => None,
        }
    }

    pub fn is_parseable(&self) -> bool {
        self.stats().is_some()
    }
}

// ── Incident ──────────────────────────────────────────────────────────────────

/// How urgently an incident needs a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Urgent,
    NeedsAttention,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Urgent => "URGENT",
            Severity::NeedsAttention => "NEEDS ATTENTION",
            Severity::Warning => "WARNING",
        };
        f.write_str(s)
    }
}

/// Closed set of anomaly kinds the detection rules emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentType {
    #[serde(rename = "Missing File")]
    MissingFile,
    #[serde(rename = "Duplicated File")]
    DuplicatedFile,
    #[serde(rename = "Intraday Duplicate")]
    IntradayDuplicate,
    #[serde(rename = "Historical Duplicate")]
    HistoricalDuplicate,
    #[serde(rename = "Failed File")]
    FailedFile,
    #[serde(rename = "Unexpected Empty File")]
    UnexpectedEmptyFile,
    #[serde(rename = "Unexpected Volume Variation")]
    UnexpectedVolumeVariation,
    #[serde(rename = "File Upload After Schedule")]
    FileUploadAfterSchedule,
    #[serde(rename = "Previous Period Upload")]
    PreviousPeriodUpload,
}

impl IncidentType {
    /// Fixed severity of each incident kind.
    pub fn severity(self) -> Severity {
        match self {
            IncidentType::MissingFile | IncidentType::DuplicatedFile => Severity::Urgent,
            IncidentType::IntradayDuplicate
            | IncidentType::HistoricalDuplicate
            | IncidentType::FailedFile
            | IncidentType::UnexpectedEmptyFile
            | IncidentType::UnexpectedVolumeVariation => Severity::NeedsAttention,
            IncidentType::FileUploadAfterSchedule | IncidentType::PreviousPeriodUpload => {
                Severity::Warning
            }
        }
    }

    /// `true` for the kinds that claim a filename as a duplicate.
    pub fn is_duplicate(self) -> bool {
        matches!(
            self,
            IncidentType::DuplicatedFile
                | IncidentType::IntradayDuplicate
                | IncidentType::HistoricalDuplicate
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentType::MissingFile => "Missing File",
            IncidentType::DuplicatedFile => "Duplicated File",
            IncidentType::IntradayDuplicate => "Intraday Duplicate",
            IncidentType::HistoricalDuplicate => "Historical Duplicate",
            IncidentType::FailedFile => "Failed File",
            IncidentType::UnexpectedEmptyFile => "Unexpected Empty File",
            IncidentType::UnexpectedVolumeVariation => "Unexpected Volume Variation",
            IncidentType::FileUploadAfterSchedule => "File Upload After Schedule",
            IncidentType::PreviousPeriodUpload => "Previous Period Upload",
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected deviation between observed and expected behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub source_id: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    /// Human-readable text; embeds the numbers that triggered detection.
    pub description: String,
    pub date: NaiveDate,
    /// Structured evidence (filename, status, counts, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, String>>,
}

impl Incident {
    /// Create an incident whose severity follows from its type.
    pub fn new(
        source_id: impl Into<String>,
        incident_type: IncidentType,
        date: NaiveDate,
        description: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            incident_type,
            severity: incident_type.severity(),
            description: description.into(),
            date,
            details: None,
        }
    }

    /// Attach one piece of evidence.
    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Look up one piece of evidence.
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.as_ref()?.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(status: &str, rows: u64) -> FileRecord {
        FileRecord {
            source_id: "195385".to_string(),
            filename: "sales_20250908.csv".to_string(),
            uploaded_at: Utc.with_ymd_and_hms(2025, 9, 8, 9, 0, 0).unwrap(),
            row_count: rows,
            status: status.to_string(),
            status_message: None,
            is_duplicate_flag: false,
        }
    }

    #[test]
    fn test_file_record_status_is_case_insensitive() {
        assert!(record("PROCESSED", 10).is_processed());
        assert!(record(" Stopped ", 10).is_stopped());
        assert!(!record("failure", 10).is_processed());
    }

    #[test]
    fn test_file_record_is_empty() {
        assert!(record("processed", 0).is_empty());
        assert!(!record("processed", 1).is_empty());
    }

    #[test]
    fn test_upload_window_end_same_day() {
        let window = UploadWindow {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
        };
        let date = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();
        assert_eq!(
            window.end_on(date),
            Utc.with_ymd_and_hms(2025, 9, 8, 10, 30, 0).unwrap()
        );
        assert_eq!(window.to_string(), "08:00-10:30");
    }

    #[test]
    fn test_upload_window_wraps_midnight() {
        let window = UploadWindow {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
        };
        let date = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();
        assert_eq!(
            window.end_on(date),
            Utc.with_ymd_and_hms(2025, 9, 9, 1, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_volume_range_bounds_inclusive() {
        let range = VolumeRange {
            min: 100.0,
            max: 200.0,
        };
        assert!(range.contains(100.0));
        assert!(range.contains(200.0));
        assert!(!range.contains(99.0));
        assert!(!range.contains(201.0));
    }

    #[test]
    fn test_unparseable_profile_has_no_stats() {
        let profile = SourceProfile::unparseable("42");
        assert!(profile.stats().is_none());
        assert!(!profile.is_parseable());
        assert_eq!(profile.workspace_id, UNKNOWN_WORKSPACE);
    }

    #[test]
    fn test_volume_range_falls_back_to_summary() {
        let stats = ProfileStats {
            volume_summary: Some(VolumeSummary {
                min: Some(10.0),
                max: Some(20.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let range = stats.volume_range(Weekday::Tue).unwrap();
        assert_eq!(range.min, 10.0);
        assert_eq!(range.max, 20.0);
    }

    #[test]
    fn test_per_day_volume_wins_over_summary() {
        let mut stats = ProfileStats {
            volume_summary: Some(VolumeSummary {
                min: Some(10.0),
                max: Some(20.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        stats.volume.insert(
            Weekday::Mon,
            VolumeRange {
                min: 1.0,
                max: 2.0,
            },
        );
        assert_eq!(stats.volume_range(Weekday::Mon).unwrap().max, 2.0);
        assert_eq!(stats.volume_range(Weekday::Wed).unwrap().max, 20.0);
    }

    #[test]
    fn test_empty_file_allowance_summary_fallback() {
        let stats = ProfileStats {
            volume_summary: Some(VolumeSummary {
                empty_files: Some(3.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(stats.empty_file_allowance(Weekday::Fri), Some(3));
        assert_eq!(ProfileStats::default().empty_file_allowance(Weekday::Fri), None);
    }

    #[test]
    fn test_incident_type_severity_mapping() {
        assert_eq!(IncidentType::MissingFile.severity(), Severity::Urgent);
        assert_eq!(IncidentType::DuplicatedFile.severity(), Severity::Urgent);
        assert_eq!(IncidentType::FailedFile.severity(), Severity::NeedsAttention);
        assert_eq!(
            IncidentType::FileUploadAfterSchedule.severity(),
            Severity::Warning
        );
        assert_eq!(IncidentType::PreviousPeriodUpload.severity(), Severity::Warning);
    }

    #[test]
    fn test_incident_details() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();
        let incident = Incident::new("X", IncidentType::FailedFile, date, "failed")
            .with_detail("filename", "a.csv")
            .with_detail("status", "error");
        assert_eq!(incident.severity, Severity::NeedsAttention);
        assert_eq!(incident.detail("filename"), Some("a.csv"));
        assert_eq!(incident.detail("missing"), None);
    }

    #[test]
    fn test_incident_serialises_closed_shape() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();
        let incident = Incident::new("X", IncidentType::MissingFile, date, "3 files missing");
        let value = serde_json::to_value(&incident).unwrap();
        assert_eq!(value["incident_type"], "Missing File");
        assert_eq!(value["severity"], "URGENT");
        assert_eq!(value["date"], "2025-09-08");
        assert!(value.get("details").is_none());
    }
}
