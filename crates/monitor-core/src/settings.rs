use chrono::{NaiveDate, TimeDelta};
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::Result;
use crate::time_utils::{parse_date, today_utc};

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Daily ingestion anomaly detection against per-source behaviour profiles
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ingest-monitor",
    about = "Daily ingestion anomaly detection against per-source behaviour profiles",
    version
)]
pub struct Settings {
    /// Analysis date, YYYY-MM-DD (defaults to today in UTC)
    #[arg(long)]
    pub date: Option<String>,

    /// Root of the data directory
    #[arg(long, default_value = "data", env = "INGEST_MONITOR_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Maximum number of sources analysed concurrently (1-64)
    #[arg(long, default_value = "8", value_parser = clap::value_parser!(u32).range(1..=64))]
    pub concurrency: u32,

    /// Stop dispatching new sources after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Report format
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,

    /// Sort incidents by source id before reporting
    #[arg(long)]
    pub sort: bool,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Settings {
    /// Parse the process arguments.
    pub fn load() -> Self {
        Self::load_from_args(std::env::args_os().collect())
    }

    /// Same as [`Settings::load`] with an explicit argument list.
    pub fn load_from_args(args: Vec<OsString>) -> Self {
        let mut settings = Settings::parse_from(args);
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// The date to analyse.
    pub fn analysis_date(&self) -> Result<NaiveDate> {
        match &self.date {
            Some(s) => parse_date(s),
            None => Ok(today_utc()),
        }
    }
}

// ── DetectionConfig ───────────────────────────────────────────────────────────

/// Fixed thresholds used by the detection rules.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Slack after the expected upload window closes.
    pub late_grace: TimeDelta,
    /// A filename date older than this many days before upload is flagged.
    pub previous_period_days: i64,
    /// Distance to the prior comparable period (same weekday).
    pub historical_offset_days: i64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            late_grace: TimeDelta::hours(4),
            previous_period_days: 7,
            historical_offset_days: 7,
        }
    }
}
