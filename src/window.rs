//! Reporting window resolution.
//!
//! A week id such as `cw38`, `w07` or `2024-W38` maps to the ISO week it names.
//! Any other id is only a directory key; the window then falls back to the
//! previous full Monday to Sunday week before the reference date.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::sources::builtin_regex;

static WEEK_ID: LazyLock<Regex> =
    LazyLock::new(|| builtin_regex(r"(?i)^(?:(?P<year>\d{4})-)?c?w(?P<week>\d{1,2})$"));

/// An inclusive date range, Monday through Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportWindow {
    /// Build a window from explicit bounds.
    #[must_use]
    pub const fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Resolve the window for `week_id`, using `reference` when the id does
    /// not name an ISO week.
    #[must_use]
    pub fn resolve(week_id: Option<&str>, reference: NaiveDate) -> Self {
        week_id
            .and_then(|id| Self::from_week_id(id, reference.iso_week().year()))
            .unwrap_or_else(|| Self::previous_full_week(reference))
    }

    /// Parse `cwNN`, `wNN` or `YYYY-WNN`. `default_year` applies when the id
    /// carries no year.
    #[must_use]
    pub fn from_week_id(id: &str, default_year: i32) -> Option<Self> {
        let caps = WEEK_ID.captures(id.trim())?;
        let week: u32 = caps.name("week")?.as_str().parse().ok()?;
        let year = match caps.name("year") {
            Some(y) => y.as_str().parse().ok()?,
            None => default_year,
        };
        let start = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
        Some(Self::new(start, start + Duration::days(6)))
    }

    /// The last complete Monday to Sunday week strictly before `reference`.
    ///
    /// When `reference` is itself a Monday the window is the seven days that
    /// just ended.
    #[must_use]
    pub fn previous_full_week(reference: NaiveDate) -> Self {
        let days_since_monday = i64::from(reference.weekday().num_days_from_monday());
        let this_monday = reference - Duration::days(days_since_monday);
        let start = this_monday - Duration::days(7);
        Self::new(start, start + Duration::days(6))
    }

    /// Number of days covered (always at least one).
    #[must_use]
    pub fn days(&self) -> i64 {
        ((self.end - self.start).num_days() + 1).max(1)
    }

    /// Whether `date` falls inside the window.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Git `--since` argument (start of the first day).
    #[must_use]
    pub fn git_since(&self) -> String {
        format!("{} 00:00:00", self.start.format("%Y-%m-%d"))
    }

    /// Git `--until` argument (end of the last day).
    #[must_use]
    pub fn git_until(&self) -> String {
        format!("{} 23:59:59", self.end.format("%Y-%m-%d"))
    }
}

impl fmt::Display for ReportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_cw_id_maps_to_iso_week() {
        let window = ReportWindow::from_week_id("cw38", 2024).unwrap();
        assert_eq!(window.start, date(2024, 9, 16));
        assert_eq!(window.end, date(2024, 9, 22));
    }

    #[test]
    fn test_year_qualified_id() {
        let window = ReportWindow::from_week_id("2023-W01", 2024).unwrap();
        assert_eq!(window.start, date(2023, 1, 2));
        assert_eq!(window.days(), 7);
    }

    #[test]
    fn test_unrecognised_id_falls_back_to_previous_week() {
        // Wednesday 2024-09-18
        let window = ReportWindow::resolve(Some("release-freeze"), date(2024, 9, 18));
        assert_eq!(window.start, date(2024, 9, 9));
        assert_eq!(window.end, date(2024, 9, 15));
    }

    #[test]
    fn test_previous_full_week_from_monday() {
        let window = ReportWindow::previous_full_week(date(2024, 9, 16));
        assert_eq!(window.start, date(2024, 9, 9));
        assert_eq!(window.end, date(2024, 9, 15));
    }

    #[test]
    fn test_invalid_week_number_falls_back() {
        assert!(ReportWindow::from_week_id("cw60", 2024).is_none());
    }

    #[test]
    fn test_contains_and_git_bounds() {
        let window = ReportWindow::new(date(2024, 1, 1), date(2024, 1, 7));
        assert!(window.contains(date(2024, 1, 7)));
        assert!(!window.contains(date(2024, 1, 8)));
        assert_eq!(window.git_since(), "2024-01-01 00:00:00");
        assert_eq!(window.git_until(), "2024-01-07 23:59:59");
        assert_eq!(window.to_string(), "2024-01-01 to 2024-01-07");
    }
}
