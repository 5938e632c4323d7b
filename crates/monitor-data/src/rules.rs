//! Detection rules.
//!
//! Each rule is a pure function over one source's telemetry and profile.
//! A rule whose profile statistic is absent for the weekday returns no
//! incidents: missing data means "cannot evaluate", not "anomaly".
//!
//! Rules run in a fixed order (see [`RULES`]) and each appends its
//! incidents in telemetry order.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate, Weekday};
use monitor_core::error::{MonitorError, Result};
use monitor_core::extract::filename_date;
use monitor_core::models::{FileRecord, Incident, IncidentType, ProfileStats, SourceProfile};
use monitor_core::settings::DetectionConfig;
use monitor_core::time_utils::weekday_name;

// ── RuleContext ───────────────────────────────────────────────────────────────

/// Everything a rule may look at for one source on one date.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub source_id: &'a str,
    pub date: NaiveDate,
    /// Files the source uploaded on `date`.
    pub today: &'a [FileRecord],
    /// Files the source uploaded in the prior comparable period.
    pub history: &'a [FileRecord],
    pub profile: &'a SourceProfile,
    pub config: &'a DetectionConfig,
}

impl<'a> RuleContext<'a> {
    /// Build a context, checking that every input belongs to `source_id`.
    ///
    /// A mismatch means the caller wired the wrong data together and is
    /// reported as [`MonitorError::InvariantViolation`].
    pub fn new(
        source_id: &'a str,
        date: NaiveDate,
        today: &'a [FileRecord],
        history: &'a [FileRecord],
        profile: &'a SourceProfile,
        config: &'a DetectionConfig,
    ) -> Result<Self> {
        if profile.source_id != source_id {
            return Err(MonitorError::InvariantViolation(format!(
                "profile of source {} passed for source {}",
                profile.source_id, source_id
            )));
        }
        if let Some(stray) = today
            .iter()
            .chain(history.iter())
            .find(|r| r.source_id != source_id)
        {
            return Err(MonitorError::InvariantViolation(format!(
                "file '{}' of source {} passed for source {}",
                stray.filename, stray.source_id, source_id
            )));
        }
        Ok(Self {
            source_id,
            date,
            today,
            history,
            profile,
            config,
        })
    }

    pub fn weekday(&self) -> Weekday {
        self.date.weekday()
    }

    fn day_name(&self) -> &'static str {
        weekday_name(self.weekday())
    }

    fn stats(&self) -> Option<&'a ProfileStats> {
        self.profile.stats()
    }

    fn incident(&self, kind: IncidentType, description: String) -> Incident {
        Incident::new(self.source_id, kind, self.date, description)
    }
}

/// A detection rule.
pub type Rule = fn(&RuleContext<'_>) -> Vec<Incident>;

/// All rules, in evaluation order.
pub const RULES: [(&str, Rule); 6] = [
    ("missing_files", find_missing_files),
    ("duplicated_or_failed_files", find_duplicated_or_failed_files),
    ("unexpected_empty_files", find_unexpected_empty_files),
    ("volume_variation", find_volume_variation),
    ("late_uploads", find_late_uploads),
    ("previous_period_uploads", find_previous_period_uploads),
];

// ── Missing files ─────────────────────────────────────────────────────────────

/// Fewer files than the weekday's mean, by at least one whole file.
pub fn find_missing_files(ctx: &RuleContext<'_>) -> Vec<Incident> {
    let Some(expected) = ctx.stats().and_then(|s| s.expected_file_count(ctx.weekday())) else {
        return Vec::new();
    };

    let observed = ctx.today.len();
    let shortfall = expected - observed as f64;
    if shortfall < 1.0 {
        return Vec::new();
    }
    let missing = shortfall.round() as u64;

    vec![ctx
        .incident(
            IncidentType::MissingFile,
            format!(
                "{} file(s) missing on {}: expected ~{:.0}, received {}.",
                missing,
                ctx.day_name(),
                expected,
                observed
            ),
        )
        .with_detail("expected_mean", format!("{:.2}", expected))
        .with_detail("observed", observed)
        .with_detail("missing", missing)]
}

// ── Duplicated / failed files ─────────────────────────────────────────────────

/// Duplicate and failed-processing detection.
///
/// Emits, in order: flagged duplicates (flag set and status `stopped`),
/// intraday duplicates (one incident per repeat of a filename after its
/// first upload today), historical duplicates (filename already uploaded
/// in the prior period) and failed files (status other than `processed`).
/// A filename claimed by any duplicate kind is never reported as failed
/// and is not claimed twice.
pub fn find_duplicated_or_failed_files(ctx: &RuleContext<'_>) -> Vec<Incident> {
    if ctx.stats().is_none() || ctx.today.is_empty() {
        return Vec::new();
    }

    let mut incidents = Vec::new();
    let mut claimed: HashSet<&str> = HashSet::new();

    // Flagged upstream.
    for record in ctx.today.iter().filter(|r| r.is_duplicate_flag && r.is_stopped()) {
        incidents.push(
            ctx.incident(
                IncidentType::DuplicatedFile,
                format!(
                    "Duplicated file detected: '{}' (status: {}).",
                    record.filename, record.status
                ),
            )
            .with_detail("filename", &record.filename)
            .with_detail("status", &record.status),
        );
        claimed.insert(record.filename.as_str());
    }

    // Same filename more than once today.
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for record in ctx.today {
        *occurrences.entry(record.filename.as_str()).or_default() += 1;
    }
    let mut seen: HashSet<&str> = HashSet::new();
    let mut intraday: HashSet<&str> = HashSet::new();
    for record in ctx.today {
        let name = record.filename.as_str();
        if claimed.contains(name) || seen.insert(name) {
            continue;
        }
        let total = occurrences.get(name).copied().unwrap_or(0);
        incidents.push(
            ctx.incident(
                IncidentType::IntradayDuplicate,
                format!(
                    "File '{}' uploaded {} times today (repeat at {}).",
                    name,
                    total,
                    record.uploaded_at.format("%H:%M:%S UTC")
                ),
            )
            .with_detail("filename", name)
            .with_detail("occurrences", total)
            .with_detail("uploaded_at", record.uploaded_at.to_rfc3339()),
        );
        intraday.insert(name);
    }
    claimed.extend(intraday);

    // Already seen in the prior period.
    if !ctx.history.is_empty() {
        let previous: HashSet<&str> = ctx.history.iter().map(|r| r.filename.as_str()).collect();
        let mut historical: HashSet<&str> = HashSet::new();
        for record in ctx.today {
            let name = record.filename.as_str();
            if claimed.contains(name) || !previous.contains(name) || !historical.insert(name) {
                continue;
            }
            incidents.push(
                ctx.incident(
                    IncidentType::HistoricalDuplicate,
                    format!(
                        "File '{}' was already uploaded in the previous period.",
                        name
                    ),
                )
                .with_detail("filename", name),
            );
        }
        claimed.extend(historical);
    }

    // Processing failures not already explained as duplicates.
    for record in ctx
        .today
        .iter()
        .filter(|r| !r.is_processed() && !claimed.contains(r.filename.as_str()))
    {
        let mut incident = ctx
            .incident(
                IncidentType::FailedFile,
                format!(
                    "File failed processing: '{}' (status: {}).",
                    record.filename, record.status
                ),
            )
            .with_detail("filename", &record.filename)
            .with_detail("status", &record.status);
        if let Some(message) = &record.status_message {
            incident = incident.with_detail("status_message", message);
        }
        incidents.push(incident);
    }

    incidents
}

// ── Empty files ───────────────────────────────────────────────────────────────

/// Zero-row files on a weekday whose empty-file allowance is 0 or unknown.
pub fn find_unexpected_empty_files(ctx: &RuleContext<'_>) -> Vec<Incident> {
    let Some(stats) = ctx.stats() else {
        return Vec::new();
    };
    let allowance = stats.empty_file_allowance(ctx.weekday()).unwrap_or(0);
    if allowance > 0 {
        return Vec::new();
    }

    ctx.today
        .iter()
        .filter(|r| r.is_empty())
        .map(|record| {
            ctx.incident(
                IncidentType::UnexpectedEmptyFile,
                format!(
                    "File '{}' has 0 rows; {} allows {} empty file(s).",
                    record.filename,
                    ctx.day_name(),
                    allowance
                ),
            )
            .with_detail("filename", &record.filename)
            .with_detail("allowance", allowance)
        })
        .collect()
}

// ── Volume variation ──────────────────────────────────────────────────────────

/// Today's total rows outside the weekday's `[min, max]` (bounds inclusive).
pub fn find_volume_variation(ctx: &RuleContext<'_>) -> Vec<Incident> {
    let Some(range) = ctx.stats().and_then(|s| s.volume_range(ctx.weekday())) else {
        return Vec::new();
    };

    let total = ctx
        .today
        .iter()
        .fold(0u64, |acc, r| acc.saturating_add(r.row_count));
    if range.contains(total as f64) {
        return Vec::new();
    }
    let direction = if (total as f64) < range.min {
        "below"
    } else {
        "above"
    };

    vec![ctx
        .incident(
            IncidentType::UnexpectedVolumeVariation,
            format!(
                "Total rows {} {} expected range [{:.0}, {:.0}] for {}.",
                total,
                direction,
                range.min,
                range.max,
                ctx.day_name()
            ),
        )
        .with_detail("total_rows", total)
        .with_detail("expected_min", format!("{:.0}", range.min))
        .with_detail("expected_max", format!("{:.0}", range.max))]
}

// ── Late uploads ──────────────────────────────────────────────────────────────

/// Uploads after the weekday's window end plus the grace period.
pub fn find_late_uploads(ctx: &RuleContext<'_>) -> Vec<Incident> {
    let Some(window) = ctx.stats().and_then(|s| s.upload_window(ctx.weekday())) else {
        return Vec::new();
    };
    let deadline = window.end_on(ctx.date) + ctx.config.late_grace;

    ctx.today
        .iter()
        .filter(|r| r.uploaded_at > deadline)
        .map(|record| {
            let late_by = record.uploaded_at - deadline;
            ctx.incident(
                IncidentType::FileUploadAfterSchedule,
                format!(
                    "File '{}' uploaded at {}, after the {} window {} plus {}h grace.",
                    record.filename,
                    record.uploaded_at.format("%H:%M:%S UTC"),
                    ctx.day_name(),
                    window,
                    ctx.config.late_grace.num_hours()
                ),
            )
            .with_detail("filename", &record.filename)
            .with_detail("uploaded_at", record.uploaded_at.to_rfc3339())
            .with_detail("deadline", deadline.to_rfc3339())
            .with_detail("late_by_minutes", late_by.num_minutes())
        })
        .collect()
}

// ── Previous-period uploads ───────────────────────────────────────────────────

/// Files whose embedded date is older than the threshold at upload time.
///
/// Filenames without a recognisable date are skipped.
pub fn find_previous_period_uploads(ctx: &RuleContext<'_>) -> Vec<Incident> {
    if ctx.stats().is_none() {
        return Vec::new();
    }
    let threshold = ctx.config.previous_period_days;

    ctx.today
        .iter()
        .filter_map(|record| {
            let file_date = filename_date(&record.filename)?;
            let age = (record.uploaded_at.date_naive() - file_date).num_days();
            (age > threshold).then(|| {
                ctx.incident(
                    IncidentType::PreviousPeriodUpload,
                    format!(
                        "File '{}' is dated {}, {} days before its upload (threshold {} days).",
                        record.filename, file_date, age, threshold
                    ),
                )
                .with_detail("filename", &record.filename)
                .with_detail("file_date", file_date)
                .with_detail("age_days", age)
            })
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
