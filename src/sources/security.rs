//! Static-analysis security findings tracked as work items.
//!
//! The usual export is the grouped clipboard format: a `W-` line followed by
//! build, assignee, status and the scanner's description, under `P<n>(count)`
//! and team group headers.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::clipboard::{parse_clipboard, ClipboardBlock, ClipboardSpec};
use super::format::{
    detect_format, tabular_rows, unique_rows, ExportFormat, FieldAliases, FieldRow, FormatHint,
};
use super::work_items::WORK_ITEM_STATUSES;
use super::{builtin_regex, read_content, source_name, ParseOutcome};
use crate::model::{Priority, SecurityCategory, SecurityFinding};

static WORK_ID: LazyLock<Regex> = LazyLock::new(|| builtin_regex(r"^W-\d{7,8}$"));

static SOURCE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    builtin_regex(r"/[^()\s:]+\.(?:c|cc|cpp|h|hpp|java|py|rs|go)\b")
});

static PERSON_NAME: LazyLock<Regex> =
    LazyLock::new(|| builtin_regex(r"^[A-Z][A-Za-z'-]+(?: [A-Z][A-Za-z'-]+){1,2}$"));

const SECURITY_FIELDS: FieldAliases = &[
    ("id", &["id", "work id", "work item", "work"]),
    ("summary", &["subject", "title", "summary", "description", "issue"]),
    ("category", &["category", "checker", "issue type", "type"]),
    ("priority", &["priority", "severity"]),
    ("status", &["status", "state"]),
    ("assignee", &["assignee", "assigned to", "owner"]),
    ("build_version", &["build", "found in build", "build version", "version"]),
    ("team", &["team", "scrum team", "team name"]),
    ("file_path", &["file", "file path", "path"]),
];

const DEFAULT_TEAM: &str = "Security";

/// Read security findings from `path`.
#[must_use]
pub fn read_security(path: &Path) -> ParseOutcome<SecurityFinding> {
    let source = source_name(path);
    let mut warnings = Vec::new();
    let Some(content) = read_content(path, &mut warnings) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };

    let records = match detect_format(&content, FormatHint::from_path(path)) {
        format @ (ExportFormat::Json | ExportFormat::Delimited(_)) => {
            let rows = tabular_rows(&content, format, SECURITY_FIELDS, "id", &source, &mut warnings);
            unique_rows(rows, "id", &source, &mut warnings)
                .iter()
                .map(finding_from_row)
                .collect()
        }
        _ => {
            let spec = ClipboardSpec {
                id_pattern: &WORK_ID,
                statuses: WORK_ITEM_STATUSES,
                labels: SECURITY_FIELDS,
            };
            parse_clipboard(&content, &spec, &source, &mut warnings)
                .into_iter()
                .map(finding_from_block)
                .collect()
        }
    };
    ParseOutcome::new(records, warnings)
}

fn finding_from_row(row: &FieldRow) -> SecurityFinding {
    let summary = row.text("summary");
    let category = row
        .get("category")
        .and_then(SecurityCategory::detect)
        .or_else(|| SecurityCategory::detect(&summary))
        .unwrap_or_default();
    let file_path = row
        .get("file_path")
        .map(str::to_string)
        .or_else(|| find_source_path(&summary))
        .unwrap_or_default();
    SecurityFinding {
        id: row.text("id"),
        category,
        priority: row.get("priority").and_then(Priority::parse).unwrap_or_default(),
        summary,
        file_path,
        assignee: row.text("assignee"),
        status: row.get("status").unwrap_or("New").to_string(),
        build_version: row.text("build_version"),
        team: row.get("team").unwrap_or(DEFAULT_TEAM).to_string(),
        augmentation: None,
    }
}

fn finding_from_block(block: ClipboardBlock) -> SecurityFinding {
    let assignee = block
        .labelled
        .get("assignee")
        .map(str::to_string)
        .or_else(|| {
            block
                .cells
                .iter()
                .find(|c| PERSON_NAME.is_match(c) && !is_status(c))
                .cloned()
        })
        .unwrap_or_default();

    // The scanner description names the checker; prefer it over whichever
    // long cell the clipboard parser took as the subject.
    let summary = block
        .cells
        .iter()
        .find(|c| SecurityCategory::detect(c).is_some())
        .or_else(|| {
            block
                .cells
                .iter()
                .find(|c| c.chars().count() > 10 && **c != assignee && !c.contains(':'))
        })
        .cloned()
        .or(block.subject)
        .unwrap_or_default();

    let category = SecurityCategory::detect(&summary).unwrap_or_default();
    let file_path = block
        .cells
        .iter()
        .find_map(|c| find_source_path(c))
        .unwrap_or_default();
    let team = block
        .labelled
        .get("team")
        .map(str::to_string)
        .or(block.group)
        .unwrap_or_else(|| DEFAULT_TEAM.to_string());

    SecurityFinding {
        id: block.id,
        category,
        priority: block.priority.unwrap_or_default(),
        summary,
        file_path,
        assignee,
        status: block.status.unwrap_or_else(|| "New".to_string()),
        build_version: block.build_version.unwrap_or_default(),
        team,
        augmentation: None,
    }
}

fn is_status(cell: &str) -> bool {
    WORK_ITEM_STATUSES.iter().any(|s| s.eq_ignore_ascii_case(cell))
}

fn find_source_path(text: &str) -> Option<String> {
    SOURCE_PATH.find(text).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SS_EXPORT: &str = "\
Security Scan Bugs
P3(1)
Storage Core(1)
W-18765432
sdb.259.4
Thomas Fanghaenel
Triaged
CID 40112: RESOURCE_LEAK in /src/storage/wal/segment.c (handle)
P4(1)
Query Engine(1)
W-18765433
sdb.259.4
Jane Doe
New
CID 40113: ARRAY_VS_SINGLETON in /src/query/plan.cpp
";

    #[test]
    fn test_ss_clipboard_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("security.txt");
        std::fs::write(&path, SS_EXPORT).unwrap();

        let outcome = read_security(&path);
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        assert_eq!(outcome.records.len(), 2);

        let first = &outcome.records[0];
        assert_eq!(first.id, "W-18765432");
        assert_eq!(first.priority, Priority::P3);
        assert_eq!(first.team, "Storage Core");
        assert_eq!(first.assignee, "Thomas Fanghaenel");
        assert_eq!(first.status, "Triaged");
        assert_eq!(first.build_version, "sdb.259.4");
        assert_eq!(first.category, SecurityCategory::ResourceLeak);
        assert_eq!(first.file_path, "/src/storage/wal/segment.c");
        assert!(first.summary.starts_with("CID 40112"));

        let second = &outcome.records[1];
        assert_eq!(second.assignee, "Jane Doe");
        assert_eq!(second.category, SecurityCategory::ArrayVsSingleton);
        assert_eq!(second.priority, Priority::P4);
    }

    #[test]
    fn test_tabular_security_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("security.json");
        std::fs::write(
            &path,
            r#"[{"Work ID": "W-10000001", "Subject": "UNINIT read in parser", "Priority": "P2"}]"#,
        )
        .unwrap();

        let outcome = read_security(&path);
        assert_eq!(outcome.records.len(), 1);
        let finding = &outcome.records[0];
        assert_eq!(finding.category, SecurityCategory::UninitializedVariable);
        assert_eq!(finding.team, "Security");
    }
}
