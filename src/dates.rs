//! Loose graduation-date normalization for imported alumni rows.
//!
//! Spreadsheet exports arrive with dates in whatever regional format the
//! uploader's machine produced, and sometimes as raw spreadsheet serial
//! numbers. `normalize_date_input` converts the recognized shapes to ISO
//! `YYYY-MM-DD`. Unrecognized input is returned unchanged; callers must
//! check the result with `is_iso_date` before treating it as a real date.

use chrono::{DateTime, Datelike, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// Offset between the 1900-based spreadsheet epoch and the Unix epoch, in days.
const SERIAL_EPOCH_OFFSET: f64 = 25569.0;

static ISO_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid iso date regex"));

/// True when `s` has the canonical `YYYY-MM-DD` shape and names a real
/// calendar date.
pub fn is_iso_date(s: &str) -> bool {
    ISO_SHAPE_RE.is_match(s) && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

pub fn normalize_date_input(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }

    // Already ISO: pass through unchanged.
    if ISO_SHAPE_RE.is_match(s) {
        return s.to_string();
    }

    if let Some(d) = parse_slash_date(s) {
        return d.format("%Y-%m-%d").to_string();
    }
    if let Some(d) = parse_dash_date(s) {
        return d.format("%Y-%m-%d").to_string();
    }
    if let Some(d) = parse_serial_date(s) {
        return d.format("%Y-%m-%d").to_string();
    }
    if let Some(d) = parse_freetext_date(s) {
        return d.format("%Y-%m-%d").to_string();
    }
    if let Some(d) = parse_relative_date(s) {
        return d.format("%Y-%m-%d").to_string();
    }

    // Fail-soft: hand the original back and let the caller reject it.
    raw.to_string()
}

/// `DD/MM/YYYY`, `MM/DD/YYYY` (only when day-first is impossible), and
/// `YYYY/MM/DD`.
fn parse_slash_date(s: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let a: u32 = parts[0].trim().parse().ok()?;
    let b: u32 = parts[1].trim().parse().ok()?;
    let c: i32 = parts[2].trim().parse().ok()?;

    if parts[0].trim().len() == 4 {
        // YYYY/MM/DD
        return NaiveDate::from_ymd_opt(a as i32, b, c as u32);
    }

    // Day-first wins; a first component above 12 forces it outright.
    NaiveDate::from_ymd_opt(c, b, a).or_else(|| NaiveDate::from_ymd_opt(c, a, b))
}

/// `DD-MM-YYYY` (the ISO shape was already handled upstream).
fn parse_dash_date(s: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 3 || parts[0].trim().len() > 2 {
        return None;
    }
    let day: u32 = parts[0].trim().parse().ok()?;
    let month: u32 = parts[1].trim().parse().ok()?;
    let year: i32 = parts[2].trim().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Spreadsheet serial-date numbers from 1900-epoch systems. Serial
/// 2958465 is 9999-12-31; anything above that is not a date column.
const SERIAL_MAX: f64 = 2_958_465.0;

fn parse_serial_date(s: &str) -> Option<NaiveDate> {
    let serial: f64 = s.parse().ok()?;
    if serial <= SERIAL_EPOCH_OFFSET || serial > SERIAL_MAX {
        return None;
    }
    let secs = ((serial - SERIAL_EPOCH_OFFSET) * 86400.0) as i64;
    Some(DateTime::from_timestamp(secs, 0)?.date_naive())
}

/// Common free-text spellings: "15 September 2025", "September 15, 2025", ...
fn parse_freetext_date(s: &str) -> Option<NaiveDate> {
    const FORMATS: [&str; 6] = [
        "%d %B %Y",
        "%d %b %Y",
        "%B %d, %Y",
        "%b %d, %Y",
        "%B %d %Y",
        "%Y%m%d",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
}

/// Last resort: permissive relative keywords.
fn parse_relative_date(s: &str) -> Option<NaiveDate> {
    match s.to_ascii_lowercase().as_str() {
        "today" | "now" => Some(Local::now().date_naive()),
        "yesterday" => Local::now().date_naive().pred_opt(),
        "tomorrow" => Local::now().date_naive().succ_opt(),
        _ => None,
    }
}

/// Display label for an auto-provisioned graduation cohort, e.g.
/// "September 2025 Ceremony".
pub fn cohort_label(iso_date: &str) -> String {
    match NaiveDate::parse_from_str(iso_date, "%Y-%m-%d") {
        Ok(d) => format!("{} {} Ceremony", month_name(d.month()), d.year()),
        Err(_) => format!("{} Ceremony", iso_date),
    }
}

fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        _ => "December",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_passes_through_unchanged() {
        assert_eq!(normalize_date_input("2025-09-15"), "2025-09-15");
        assert_eq!(normalize_date_input(" 2025-09-15 "), "2025-09-15");
    }

    #[test]
    fn day_first_slash_format() {
        assert_eq!(normalize_date_input("15/09/2025"), "2025-09-15");
        assert_eq!(normalize_date_input("1/6/2024"), "2024-06-01");
    }

    #[test]
    fn month_first_only_when_day_first_invalid() {
        // 09/15 cannot be day-first (no month 15), so it reads as Sep 15.
        assert_eq!(normalize_date_input("09/15/2025"), "2025-09-15");
        // Ambiguous input stays day-first.
        assert_eq!(normalize_date_input("03/04/2025"), "2025-04-03");
    }

    #[test]
    fn year_first_slash_format() {
        assert_eq!(normalize_date_input("2025/09/15"), "2025-09-15");
    }

    #[test]
    fn day_first_dash_format() {
        assert_eq!(normalize_date_input("15-09-2025"), "2025-09-15");
    }

    #[test]
    fn spreadsheet_serial_dates() {
        assert_eq!(normalize_date_input("45915"), "2025-09-15");
        // At or below the epoch offset the number is not a date.
        assert_eq!(normalize_date_input("25569"), "25569");
    }

    #[test]
    fn freetext_dates() {
        assert_eq!(normalize_date_input("15 September 2025"), "2025-09-15");
        assert_eq!(normalize_date_input("September 15, 2025"), "2025-09-15");
        assert_eq!(normalize_date_input("20250915"), "2025-09-15");
    }

    #[test]
    fn unparseable_input_returned_unchanged() {
        assert_eq!(normalize_date_input("next ceremony"), "next ceremony");
        assert_eq!(normalize_date_input("15/13/2025"), "15/13/2025");
        assert!(!is_iso_date("15/13/2025"));
    }

    #[test]
    fn iso_shape_check_rejects_fake_dates() {
        assert!(is_iso_date("2025-09-15"));
        assert!(!is_iso_date("2025-13-40"));
        assert!(!is_iso_date("2025-9-15"));
    }

    #[test]
    fn cohort_labels() {
        assert_eq!(cohort_label("2025-09-15"), "September 2025 Ceremony");
        assert_eq!(cohort_label("2024-06-01"), "June 2024 Ceremony");
    }
}
