//! CI, LeftShift and ABS work items.
//!
//! All three come out of the same tracker export, so one reader serves them
//! and the [`IssueKind`] tag says which list a record belongs to.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::clipboard::{parse_clipboard, ClipboardBlock, ClipboardSpec};
use super::format::{
    detect_format, parse_date, tabular_rows, unique_rows, ExportFormat, FieldAliases, FieldRow,
    FormatHint,
};
use super::{builtin_regex, read_content, source_name, ParseOutcome};
use crate::model::{IssueKind, Priority, WorkItem};

static WORK_ID: LazyLock<Regex> = LazyLock::new(|| builtin_regex(r"^W-\d{7,8}$"));

/// Status values of tracker work items.
pub const WORK_ITEM_STATUSES: &[&str] = &[
    "New",
    "Triaged",
    "In Progress",
    "Ready for Review",
    "Waiting",
    "Integrate",
    "QA In Progress",
    "Fixed",
    "Closed",
];

const WORK_ITEM_FIELDS: FieldAliases = &[
    ("id", &["id", "work id", "work item", "work"]),
    ("team", &["team", "scrum team", "team name", "assigned team"]),
    ("priority", &["priority", "severity"]),
    ("subject", &["subject", "title", "summary", "description"]),
    ("status", &["status", "state"]),
    ("build_version", &["build", "found in build", "build version", "scheduled build", "version"]),
    ("created", &["created", "created date", "date", "reported date"]),
];

const UNKNOWN_TEAM: &str = "Unknown";

/// Read one tracker export and tag every record with `kind`.
#[must_use]
pub fn read_work_items(path: &Path, kind: IssueKind) -> ParseOutcome<WorkItem> {
    let source = source_name(path);
    let mut warnings = Vec::new();
    let Some(content) = read_content(path, &mut warnings) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };

    let records = match detect_format(&content, FormatHint::from_path(path)) {
        format @ (ExportFormat::Json | ExportFormat::Delimited(_)) => {
            let rows = tabular_rows(&content, format, WORK_ITEM_FIELDS, "id", &source, &mut warnings);
            unique_rows(rows, "id", &source, &mut warnings)
                .iter()
                .map(|row| item_from_row(row, kind))
                .collect()
        }
        _ => {
            let spec = ClipboardSpec {
                id_pattern: &WORK_ID,
                statuses: WORK_ITEM_STATUSES,
                labels: WORK_ITEM_FIELDS,
            };
            parse_clipboard(&content, &spec, &source, &mut warnings)
                .into_iter()
                .map(|block| item_from_block(block, kind))
                .collect()
        }
    };
    ParseOutcome::new(records, warnings)
}

fn item_from_row(row: &FieldRow, kind: IssueKind) -> WorkItem {
    WorkItem {
        id: row.text("id"),
        kind,
        team: row.get("team").unwrap_or(UNKNOWN_TEAM).to_string(),
        priority: row.get("priority").and_then(Priority::parse).unwrap_or_default(),
        subject: row.text("subject"),
        status: row.get("status").unwrap_or("New").to_string(),
        build_version: row.text("build_version"),
        created: row.get("created").and_then(parse_date),
        augmentation: None,
    }
}

fn item_from_block(block: ClipboardBlock, kind: IssueKind) -> WorkItem {
    let team = block
        .labelled
        .get("team")
        .map(str::to_string)
        .or(block.group)
        .unwrap_or_else(|| UNKNOWN_TEAM.to_string());
    WorkItem {
        id: block.id,
        kind,
        team,
        priority: block.priority.unwrap_or_default(),
        subject: block.subject.unwrap_or_default(),
        status: block.status.unwrap_or_else(|| "New".to_string()),
        build_version: block.build_version.unwrap_or_default(),
        created: block.date,
        augmentation: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    const CI_EXPORT: &str = "\
CI Failures - Development Codeline
P2(2)
Storage Core(2)
W-19876543
Triaged
sdb.260.1
9/10/2025
Flaky replication test times out under load
W-19876544
In Progress
Checkpoint test leaks file handles on retry
Subtotal
P1(1)
Query Engine(1)
W-19876545
New
Planner regression in nightly perf suite
";

    #[test]
    fn test_ci_clipboard_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ci.txt");
        std::fs::write(&path, CI_EXPORT).unwrap();

        let outcome = read_work_items(&path, IssueKind::Ci);
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        assert_eq!(outcome.records.len(), 3);

        let first = &outcome.records[0];
        assert_eq!(first.kind, IssueKind::Ci);
        assert_eq!(first.team, "Storage Core");
        assert_eq!(first.priority, Priority::P2);
        assert_eq!(first.status, "Triaged");
        assert_eq!(first.build_version, "sdb.260.1");
        assert_eq!(first.created, NaiveDate::from_ymd_opt(2025, 9, 10));

        let last = &outcome.records[2];
        assert_eq!(last.priority, Priority::P1);
        assert_eq!(last.team, "Query Engine");
    }

    #[test]
    fn test_leftshift_csv_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("leftshift.csv");
        std::fs::write(
            &path,
            "Work ID,Team,Priority,Subject,Status\n\
             W-1111111,Storage,P3,Deadlock found by stress suite,New\n\
             Grand Total,,,,\n",
        )
        .unwrap();

        let outcome = read_work_items(&path, IssueKind::LeftShift);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].kind, IssueKind::LeftShift);
        assert_eq!(outcome.records[0].priority, Priority::P3);
        assert_eq!(outcome.skipped(), 0);
    }

    #[test]
    fn test_empty_file_is_empty_outcome() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abs.txt");
        std::fs::write(&path, "\n\n").unwrap();
        let outcome = read_work_items(&path, IssueKind::Abs);
        assert!(outcome.records.is_empty());
        assert!(outcome.warnings.is_empty());
    }
}
