//! Labeled-value extraction from semi-structured profile text.
//!
//! Every function here returns `Option`: text that does not match yields
//! "statistic absent", never a default number.

use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;

use crate::models::{UploadWindow, VolumeRange};

/// Heading that marks a text-form profile document.
pub const TEXT_FORM_MARKER: &str = "Row Count Statistics";

const NUMBER: &str = r"[-+]?\d[\d,]*(?:\.\d+)?|[-+]?\.\d+";

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!("^(?:{NUMBER})$")).expect("regex is valid"))
}

fn time_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)(?:^|[^\d.:\-–—])",
            r"(\d{1,2})(?::(\d{2})(?::\d{2})?)?\s*h?",
            r"\s*(?:-|–|—|to)\s*",
            r"(\d{1,2})(?::(\d{2})(?::\d{2})?)?\s*h?",
            r"(?:[^\d.:\-–—]|$)",
        ))
        .expect("regex is valid")
    })
}

fn workspace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Workspace ID\s*:\s*(\d+)").expect("regex is valid"))
}

fn compact_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\D)(\d{8})(?:\D|$)").expect("regex is valid"))
}

fn dashed_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("regex is valid"))
}

/// Parse a number that may carry thousands separators (`1,234.5`).
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_matches('*').trim();
    if !number_re().is_match(trimmed) {
        return None;
    }
    trimmed.replace(',', "").parse::<f64>().ok()
}

/// Value following `label:` anywhere in `text` (label matched case-insensitively).
///
/// `labeled_value("Mean: 1,200, Max: 3,400", "Max")` is `Some(3400.0)`.
pub fn labeled_value(text: &str, label: &str) -> Option<f64> {
    let pattern = format!(
        r"(?i)(?:^|[^\w]){}\**\s*:\s*\**\s*({NUMBER})",
        regex::escape(label)
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(text)?;
    parse_number(caps.get(1)?.as_str())
}

/// The `Max: N` bound of a statistic cell.
pub fn max_bound(text: &str) -> Option<f64> {
    labeled_value(text, "Max")
}

/// The `Min: N` bound of a statistic cell.
pub fn min_bound(text: &str) -> Option<f64> {
    labeled_value(text, "Min")
}

/// `[Min, Max]` from a statistic cell; both labels must be present.
pub fn volume_range(text: &str) -> Option<VolumeRange> {
    let min = min_bound(text)?;
    let max = max_bound(text)?;
    Some(VolumeRange { min, max })
}

/// Empty-file allowance: the `Max: N` bound, as a whole count.
pub fn empty_file_allowance(text: &str) -> Option<u32> {
    let max = max_bound(text)?;
    if max < 0.0 {
        return None;
    }
    Some(max.round() as u32)
}

/// First window in a schedule cell.
///
/// Accepts `HH:MM-HH:MM` as well as bare hours (`8-10`, `08h-10h`); a
/// missing minute part means `:00`.
pub fn upload_window(text: &str) -> Option<UploadWindow> {
    let caps = time_range_re().captures(text)?;
    let hour = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();
    let minute = |i: usize| caps.get(i).map_or(Some(0), |m| m.as_str().parse::<u32>().ok());
    let start = NaiveTime::from_hms_opt(hour(1)?, minute(2)?, 0)?;
    let end = hour_minute(hour(3)?, minute(4)?)?;
    Some(UploadWindow { start, end })
}

/// `24:00` is accepted as the last instant of the day.
fn hour_minute(hour: u32, minute: u32) -> Option<NaiveTime> {
    if hour == 24 && minute == 0 {
        return NaiveTime::from_hms_opt(23, 59, 59);
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Workspace id from a `Workspace ID: <digits>` line.
pub fn workspace_id(text: &str) -> Option<String> {
    workspace_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// `true` when the document carries the text-form section heading.
pub fn has_text_form_marker(text: &str) -> bool {
    let marker = TEXT_FORM_MARKER.to_lowercase();
    text.lines().any(|line| line.to_lowercase().contains(&marker))
}

/// Best-effort date embedded in a filename.
///
/// Accepts `YYYYMMDD` (exactly eight contiguous digits) or `YYYY-MM-DD`.
/// Digit runs that are not a valid calendar date are ignored.
pub fn filename_date(filename: &str) -> Option<NaiveDate> {
    for caps in dashed_date_re().captures_iter(filename) {
        let y = caps.get(1)?.as_str().parse().ok()?;
        let m = caps.get(2)?.as_str().parse().ok()?;
        let d = caps.get(3)?.as_str().parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
            return Some(date);
        }
    }
    compact_date_re()
        .captures_iter(filename)
        .filter_map(|c| c.get(1))
        .find_map(|m| NaiveDate::parse_from_str(m.as_str(), "%Y%m%d").ok())
}
