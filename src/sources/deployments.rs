//! Release deployment history.
//!
//! Two CSV shapes share the deployment file name: the release log
//! (`version,date,environment,status,features,issues`, header optional) and
//! the rollout dashboard's stagger export (`stagger,version,SUM(count)`).
//! Each reader returns nothing for the other shape.

use std::path::Path;

use super::format::{
    is_summary_line, meaningful_lines, parse_count, parse_date, split_delimited, Delimiter,
    FormatHint,
};
use super::{read_content, source_name, ParseOutcome, ParseWarning};
use crate::model::{DeploymentEvent, RolloutPhase, StaggerDeployment};

const MIN_CELLS: usize = 4;
const MAX_CELLS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Releases,
    Stagger,
}

fn first_cell(line: &str, delimiter: Delimiter) -> String {
    split_delimited(line, delimiter)
        .into_iter()
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Fixed-column export: comma-separated unless the file is a `.tsv`.
///
/// Not sniffed, since the features cell is itself `|`-separated.
fn delimiter_for(path: &Path) -> Delimiter {
    match FormatHint::from_path(path) {
        FormatHint::Tsv => Delimiter::Tab,
        _ => Delimiter::Comma,
    }
}

fn shape_of(content: &str, delimiter: Delimiter) -> Option<(Shape, Delimiter)> {
    let (_, first) = meaningful_lines(content).next()?;
    let shape = if first_cell(first, delimiter).starts_with("stagger") {
        Shape::Stagger
    } else {
        Shape::Releases
    };
    Some((shape, delimiter))
}

/// Read the release log, newest first.
///
/// Rows with fewer than four or more than six cells, an empty version or an
/// unparseable date are skipped with a warning. Rows with equal dates keep
/// their file order.
#[must_use]
pub fn read_deployments(path: &Path) -> ParseOutcome<DeploymentEvent> {
    let source = source_name(path);
    let mut warnings = Vec::new();
    let Some(content) = read_content(path, &mut warnings) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };
    let Some((Shape::Releases, delimiter)) = shape_of(&content, delimiter_for(path)) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };

    let mut events = Vec::new();
    for (index, (line_no, line)) in meaningful_lines(&content).enumerate() {
        if index == 0 && first_cell(line, delimiter) == "version" {
            continue;
        }
        if is_summary_line(line) {
            continue;
        }
        match parse_release(line, delimiter) {
            Ok(event) => events.push(event),
            Err(reason) => warnings.push(ParseWarning::new(&source, line_no, reason)),
        }
    }

    events.sort_by(|a, b| b.date.cmp(&a.date));
    ParseOutcome::new(events, warnings)
}

fn parse_release(line: &str, delimiter: Delimiter) -> Result<DeploymentEvent, String> {
    let cells = split_delimited(line, delimiter);
    if !(MIN_CELLS..=MAX_CELLS).contains(&cells.len()) {
        return Err(format!(
            "expected {MIN_CELLS} to {MAX_CELLS} cells, found {}",
            cells.len()
        ));
    }
    let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or_default();

    let version = cell(0);
    if version.is_empty() {
        return Err("empty version".to_string());
    }
    let date = parse_date(cell(1)).ok_or_else(|| format!("unparseable date `{}`", cell(1)))?;
    let features = cell(4)
        .split([';', '|'])
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    let issue = Some(cell(5)).filter(|s| !s.is_empty()).map(str::to_string);

    Ok(DeploymentEvent {
        version: version.to_string(),
        date,
        environment: cell(2).to_string(),
        status: cell(3).to_string(),
        features,
        issue,
    })
}

/// Read the stagger rollout export. Empty for the release-log shape.
#[must_use]
pub fn read_stagger_rollout(path: &Path) -> ParseOutcome<StaggerDeployment> {
    let source = source_name(path);
    let mut warnings = Vec::new();
    let Some(content) = read_content(path, &mut warnings) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };
    let Some((Shape::Stagger, delimiter)) = shape_of(&content, delimiter_for(path)) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };

    let mut lines = meaningful_lines(&content);
    let Some((_, header)) = lines.next() else {
        return ParseOutcome::new(Vec::new(), warnings);
    };
    let headers: Vec<String> = split_delimited(header, delimiter)
        .into_iter()
        .map(|h| h.to_lowercase())
        .collect();
    let column = |pred: &dyn Fn(&str) -> bool| headers.iter().position(|h| pred(h));
    let stagger_col = column(&|h| h.starts_with("stagger")).unwrap_or(0);
    let version_col = column(&|h| h.contains("version")).unwrap_or(1);
    let count_col = column(&|h| h.contains("count") || h.contains("cells")).unwrap_or(2);

    let mut records = Vec::new();
    for (line_no, line) in lines {
        if is_summary_line(line) {
            continue;
        }
        let cells = split_delimited(line, delimiter);
        let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or_default();
        let stagger = cell(stagger_col);
        if stagger.is_empty() {
            warnings.push(ParseWarning::new(&source, line_no, "empty stagger"));
            continue;
        }
        let Some(cell_count) = parse_count(cell(count_col)) else {
            warnings.push(ParseWarning::new(
                &source,
                line_no,
                format!("unparseable cell count `{}`", cell(count_col)),
            ));
            continue;
        };
        records.push(StaggerDeployment {
            stagger: stagger.to_string(),
            version: cell(version_col).to_string(),
            cell_count,
            phase: RolloutPhase::from_stagger(stagger),
        });
    }
    ParseOutcome::new(records, warnings)
}
