//! Grouped report pastes: one cell per line, records anchored on identifiers.
//!
//! Report UIs copy grouped reports as a flat list of cells. Group header
//! lines (`P1(3)`, `Data Platform(12)`) set the current priority or group.
//! An identifier line opens a block that runs until the next identifier or
//! group header, and the cells inside are classified by shape.

use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use super::format::{
    canonical_field, is_summary_line, meaningful_lines, parse_date, truncate_chars, FieldAliases,
    FieldRow,
};
use super::{builtin_regex, ParseWarning};
use crate::model::Priority;

static GROUP_HEADER: LazyLock<Regex> =
    LazyLock::new(|| builtin_regex(r"^(?P<name>.+?)\s*\((?P<count>\d+)\)$"));

static WHOLE_PRIORITY: LazyLock<Regex> = LazyLock::new(|| builtin_regex(r"^P[0-4]$"));

static BUILD_VERSION: LazyLock<Regex> =
    LazyLock::new(|| builtin_regex(r"^[A-Za-z][A-Za-z0-9_-]*\.\d+\.\d+(\.\d+)?$"));

/// Longest subject kept from a clipboard block.
pub const MAX_SUBJECT_CHARS: usize = 150;

/// Cells shorter than this are never taken as the subject.
const MIN_SUBJECT_CHARS: usize = 10;

/// What a clipboard reader recognises.
pub struct ClipboardSpec<'a> {
    /// Anchored pattern for a whole identifier line.
    pub id_pattern: &'a Regex,
    /// Known status values, matched case-insensitively against whole cells.
    pub statuses: &'a [&'a str],
    /// Labels of `Label: value` cells, mapped to canonical fields.
    pub labels: FieldAliases,
}

/// One record's cells after classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipboardBlock {
    pub line: usize,
    pub id: String,
    pub priority: Option<Priority>,
    pub group: Option<String>,
    pub status: Option<String>,
    pub date: Option<NaiveDate>,
    pub build_version: Option<String>,
    pub subject: Option<String>,
    pub labelled: FieldRow,
    /// Every cell after the identifier, in order.
    pub cells: Vec<String>,
}

#[derive(Clone)]
struct OpenBlock {
    line: usize,
    id: String,
    group_priority: Option<Priority>,
    group: Option<String>,
    cells: Vec<String>,
}

/// Parse a clipboard paste into classified blocks.
///
/// Blocks without a subject are malformed; repeated identifiers are skipped.
/// Both produce a warning.
pub fn parse_clipboard(
    content: &str,
    spec: &ClipboardSpec<'_>,
    source: &str,
    warnings: &mut Vec<ParseWarning>,
) -> Vec<ClipboardBlock> {
    let mut blocks = Vec::new();
    let mut seen = HashSet::new();
    let mut current_priority: Option<Priority> = None;
    let mut current_group: Option<String> = None;
    let mut open: Option<OpenBlock> = None;

    let mut close = |block: Option<OpenBlock>, warnings: &mut Vec<ParseWarning>| {
        if let Some(block) = block {
            if !seen.insert(block.id.clone()) {
                warnings.push(ParseWarning::new(
                    source,
                    block.line,
                    format!("duplicate identifier {}", block.id),
                ));
                return;
            }
            match classify(block, spec) {
                Ok(done) => blocks.push(done),
                Err(warning) => warnings.push(warning.with_source(source)),
            }
        }
    };

    for (line_no, line) in meaningful_lines(content) {
        if is_summary_line(line) {
            continue;
        }
        if spec.id_pattern.is_match(line) {
            close(open.take(), warnings);
            open = Some(OpenBlock {
                line: line_no,
                id: line.to_string(),
                group_priority: current_priority,
                group: current_group.clone(),
                cells: Vec::new(),
            });
            continue;
        }
        if let Some(caps) = GROUP_HEADER.captures(line) {
            let name = caps.name("name").map_or("", |m| m.as_str()).trim();
            // `Subject text (3)` inside a block still waiting for its subject
            // is a cell, not a team header.
            let priority_header = WHOLE_PRIORITY.is_match(name);
            if let Some(block) = open.as_mut() {
                if !priority_header && !has_subject(block, spec) {
                    block.cells.push(line.to_string());
                    continue;
                }
            }
            close(open.take(), warnings);
            if priority_header {
                current_priority = Priority::parse(name);
            } else if !name.is_empty() {
                current_group = Some(name.to_string());
            }
            continue;
        }
        if let Some(block) = open.as_mut() {
            block.cells.push(line.to_string());
        }
    }
    close(open.take(), warnings);
    blocks
}

fn has_subject(block: &OpenBlock, spec: &ClipboardSpec<'_>) -> bool {
    classify(block.clone(), spec).is_ok()
}

fn classify(block: OpenBlock, spec: &ClipboardSpec<'_>) -> Result<ClipboardBlock, ParseWarning> {
    let mut priority = block.group_priority;
    let mut status = None;
    let mut date = None;
    let mut build_version = None;
    let mut subject: Option<String> = None;
    let mut labelled = FieldRow::new(block.line);
    let mut pending_label: Option<&'static str> = None;

    for cell in &block.cells {
        if let Some(field) = pending_label.take() {
            labelled.insert(field, cell.as_str());
            continue;
        }
        if WHOLE_PRIORITY.is_match(cell) {
            priority = Priority::parse(cell);
            continue;
        }
        if status.is_none() {
            if let Some(known) = spec.statuses.iter().find(|s| s.eq_ignore_ascii_case(cell)) {
                status = Some((*known).to_string());
                continue;
            }
        }
        if date.is_none() {
            if let Some(d) = parse_date(cell) {
                date = Some(d);
                continue;
            }
        }
        if build_version.is_none() && BUILD_VERSION.is_match(cell) {
            build_version = Some(cell.clone());
            continue;
        }
        if let Some((field, value)) = labelled_cell(cell, spec.labels) {
            if value.is_empty() {
                pending_label = Some(field);
            } else {
                labelled.insert(field, value);
            }
            continue;
        }
        if subject.is_none() && cell.chars().count() > MIN_SUBJECT_CHARS {
            subject = Some(truncate_chars(cell, MAX_SUBJECT_CHARS));
        }
    }

    if subject.is_none() {
        return Err(ParseWarning::new("", block.line, format!("{} has no subject", block.id)));
    }

    Ok(ClipboardBlock {
        line: block.line,
        id: block.id,
        priority,
        group: block.group,
        status,
        date,
        build_version,
        subject,
        labelled,
        cells: block.cells,
    })
}

/// `Label: value` or a bare `Label` whose value is the next cell.
fn labelled_cell<'c>(cell: &'c str, labels: FieldAliases) -> Option<(&'static str, &'c str)> {
    if labels.is_empty() {
        return None;
    }
    if let Some((label, value)) = cell.split_once(':') {
        if let Some(field) = canonical_field(label, labels) {
            return Some((field, value.trim()));
        }
    }
    canonical_field(cell, labels).map(|field| (field, ""))
}
