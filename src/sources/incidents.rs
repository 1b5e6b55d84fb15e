//! Problem reports (PRBs) and active production bugs.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::clipboard::{parse_clipboard, ClipboardBlock, ClipboardSpec};
use super::format::{
    detect_format, parse_date, tabular_rows, unique_rows, ExportFormat, FieldAliases, FieldRow,
    FormatHint,
};
use super::work_items::WORK_ITEM_STATUSES;
use super::{builtin_regex, read_content, source_name, Augmentation, ParseOutcome};
use crate::model::{BugRecord, Priority, ProblemReport};

static PRB_ID: LazyLock<Regex> = LazyLock::new(|| builtin_regex(r"^PRB-\d{7}$"));
static BUG_ID: LazyLock<Regex> = LazyLock::new(|| builtin_regex(r"^W-\d{7,8}$"));

const PRB_STATUSES: &[&str] = &[
    "Analysis Complete",
    "Waiting 3rd Party",
    "In Progress",
    "Open",
    "New",
    "Resolved",
    "Closed",
];

pub(crate) const PRB_FIELDS: FieldAliases = &[
    ("id", &["id", "prb", "prb id", "prb number", "problem", "problem number", "problem id", "case number", "number"]),
    ("title", &["title", "subject", "problem title", "short description", "summary"]),
    ("priority", &["priority", "severity", "sev"]),
    ("status", &["status", "problem state", "state"]),
    ("team", &["team", "team name", "owner team", "assigned team"]),
    ("created", &["created", "created date", "created date time", "opened", "date"]),
    ("customer_impact", &["customer impact", "impact"]),
    ("what_happened", &["what happened"]),
    ("customer_experience", &["customer experience", "user experience"]),
    ("proximate_cause", &["proximate cause", "root cause"]),
    ("how_resolved", &["how was it resolved", "how resolved", "resolution"]),
];

pub(crate) const BUG_FIELDS: FieldAliases = &[
    ("id", &["id", "work id", "work item", "work", "bug id", "bug"]),
    ("title", &["subject", "title", "summary", "description"]),
    ("priority", &["priority", "severity"]),
    ("status", &["status", "state"]),
    ("component", &["team", "scrum team", "team name", "component", "product tag"]),
    ("build_version", &["build", "found in build", "build version", "scheduled build", "version"]),
    ("reported", &["created", "created date", "reported", "reported date", "date"]),
    ("assignee", &["assignee", "assigned to", "owner"]),
];

const UNKNOWN_TEAM: &str = "Unknown";

/// Read problem reports and attach operator notes from `augmentation`.
#[must_use]
pub fn read_problem_reports(path: &Path, augmentation: &Augmentation) -> ParseOutcome<ProblemReport> {
    let source = source_name(path);
    let mut warnings = Vec::new();
    let Some(content) = read_content(path, &mut warnings) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };

    let mut records: Vec<ProblemReport> = match detect_format(&content, FormatHint::from_path(path)) {
        format @ (ExportFormat::Json | ExportFormat::Delimited(_)) => {
            let rows = tabular_rows(&content, format, PRB_FIELDS, "id", &source, &mut warnings);
            unique_rows(rows, "id", &source, &mut warnings)
                .iter()
                .map(prb_from_row)
                .collect()
        }
        _ => {
            let spec = ClipboardSpec {
                id_pattern: &PRB_ID,
                statuses: PRB_STATUSES,
                labels: PRB_FIELDS,
            };
            parse_clipboard(&content, &spec, &source, &mut warnings)
                .into_iter()
                .map(prb_from_block)
                .collect()
        }
    };

    augmentation.apply(&mut records);
    ParseOutcome::new(records, warnings)
}

/// Build a [`ProblemReport`] from a tabular row. Exposed for the remote
/// reports API, which yields rows with the same aliases.
pub(crate) fn prb_from_row(row: &FieldRow) -> ProblemReport {
    ProblemReport {
        id: row.text("id"),
        title: row.text("title"),
        priority: row.get("priority").and_then(Priority::parse).unwrap_or_default(),
        status: row.get("status").unwrap_or("Open").to_string(),
        team: row.get("team").unwrap_or(UNKNOWN_TEAM).to_string(),
        created: row.get("created").and_then(parse_date),
        customer_impact: row.text("customer_impact"),
        what_happened: row.text("what_happened"),
        customer_experience: row.text("customer_experience"),
        proximate_cause: row.text("proximate_cause"),
        how_resolved: row.text("how_resolved"),
        augmentation: None,
    }
}

fn prb_from_block(block: ClipboardBlock) -> ProblemReport {
    let fields = &block.labelled;
    let team = fields
        .get("team")
        .map(str::to_string)
        .or(block.group)
        .unwrap_or_else(|| UNKNOWN_TEAM.to_string());
    ProblemReport {
        title: block.subject.unwrap_or_default(),
        priority: block.priority.unwrap_or_default(),
        status: block.status.unwrap_or_else(|| "Open".to_string()),
        team,
        created: block.date,
        customer_impact: fields.text("customer_impact"),
        what_happened: fields.text("what_happened"),
        customer_experience: fields.text("customer_experience"),
        proximate_cause: fields.text("proximate_cause"),
        how_resolved: fields.text("how_resolved"),
        augmentation: None,
        id: block.id,
    }
}

/// Read active production bugs.
#[must_use]
pub fn read_bugs(path: &Path) -> ParseOutcome<BugRecord> {
    let source = source_name(path);
    let mut warnings = Vec::new();
    let Some(content) = read_content(path, &mut warnings) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };

    let records = match detect_format(&content, FormatHint::from_path(path)) {
        format @ (ExportFormat::Json | ExportFormat::Delimited(_)) => {
            let rows = tabular_rows(&content, format, BUG_FIELDS, "id", &source, &mut warnings);
            unique_rows(rows, "id", &source, &mut warnings)
                .iter()
                .map(bug_from_row)
                .collect()
        }
        _ => {
            let spec = ClipboardSpec {
                id_pattern: &BUG_ID,
                statuses: WORK_ITEM_STATUSES,
                labels: BUG_FIELDS,
            };
            parse_clipboard(&content, &spec, &source, &mut warnings)
                .into_iter()
                .map(bug_from_block)
                .collect()
        }
    };
    ParseOutcome::new(records, warnings)
}

pub(crate) fn bug_from_row(row: &FieldRow) -> BugRecord {
    BugRecord {
        id: row.text("id"),
        title: row.text("title"),
        priority: row.get("priority").and_then(Priority::parse).unwrap_or_default(),
        status: row.get("status").unwrap_or("New").to_string(),
        component: row.get("component").unwrap_or(UNKNOWN_TEAM).to_string(),
        build_version: row.text("build_version"),
        reported: row.get("reported").and_then(parse_date),
        assignee: row.text("assignee"),
        augmentation: None,
    }
}

fn bug_from_block(block: ClipboardBlock) -> BugRecord {
    let component = block
        .labelled
        .get("component")
        .map(str::to_string)
        .or(block.group)
        .unwrap_or_else(|| UNKNOWN_TEAM.to_string());
    BugRecord {
        title: block.subject.unwrap_or_default(),
        priority: block.priority.unwrap_or_default(),
        status: block.status.unwrap_or_else(|| "New".to_string()),
        component,
        build_version: block.build_version.unwrap_or_default(),
        reported: block.date,
        assignee: block.labelled.text("assignee"),
        augmentation: None,
        id: block.id,
    }
}
