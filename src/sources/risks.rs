//! Feature risk notes.
//!
//! Usually `Feature:` blocks typed by hand; JSON and delimited exports of the
//! same fields are accepted too.

use std::path::Path;

use super::format::{
    detect_format, key_value_blocks, parse_date, tabular_rows, ExportFormat, FieldAliases,
    FieldRow, FormatHint,
};
use super::{read_content, source_name, ParseOutcome, ParseWarning};
use crate::model::{RiskItem, RiskStatus};

const RISK_FIELDS: FieldAliases = &[
    ("feature", &["feature", "feature name", "name", "title"]),
    ("status", &["status", "risk", "risk status", "health"]),
    ("priority", &["priority"]),
    ("description", &["description", "details", "notes", "summary"]),
    ("last_updated", &["updated", "last updated", "date", "last update"]),
];

const DEFAULT_PRIORITY: &str = "Medium";

/// Read risk notes from `path`.
#[must_use]
pub fn read_risks(path: &Path) -> ParseOutcome<RiskItem> {
    let source = source_name(path);
    let mut warnings = Vec::new();
    let Some(content) = read_content(path, &mut warnings) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };

    let rows = match detect_format(&content, FormatHint::from_path(path)) {
        format @ (ExportFormat::Json | ExportFormat::Delimited(_)) => {
            tabular_rows(&content, format, RISK_FIELDS, "feature", &source, &mut warnings)
        }
        _ => key_value_blocks(&content, "feature", RISK_FIELDS),
    };

    let records = rows
        .iter()
        .filter_map(|row| risk_from_row(row, &source, &mut warnings))
        .collect();
    ParseOutcome::new(records, warnings)
}

fn risk_from_row(row: &FieldRow, source: &str, warnings: &mut Vec<ParseWarning>) -> Option<RiskItem> {
    let feature = row.text("feature");
    let Some(status) = row.get("status").and_then(RiskStatus::parse) else {
        warnings.push(ParseWarning::new(
            source,
            row.line,
            format!("risk `{feature}` has no recognisable status"),
        ));
        return None;
    };

    let last_updated = match row.get("last_updated") {
        Some(raw) => {
            let parsed = parse_date(raw);
            if parsed.is_none() {
                warnings.push(ParseWarning::new(
                    source,
                    row.line,
                    format!("risk `{feature}` has an unparseable date `{raw}`"),
                ));
            }
            parsed
        }
        None => None,
    };

    Some(RiskItem {
        feature,
        status,
        priority: row.get("priority").unwrap_or(DEFAULT_PRIORITY).to_string(),
        description: row.text("description"),
        last_updated,
    })
}
