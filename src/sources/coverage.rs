//! Test coverage: per-component metrics and the code-quality panel summary.

use std::path::Path;

use super::format::{
    detect_format, key_value_blocks, meaningful_lines, parse_count, parse_percent, tabular_rows,
    unique_rows, ExportFormat, FieldAliases, FieldRow, FormatHint,
};
use super::{read_content, source_name, ParseOutcome, ParseWarning};
use crate::model::{CoverageFigures, CoverageMetric, CoverageSummary};

const COVERAGE_FIELDS: FieldAliases = &[
    ("component", &["component", "module", "name", "project"]),
    ("line_coverage", &["line coverage", "lines", "line", "coverage"]),
    ("branch_coverage", &["branch coverage", "branches", "branch", "condition coverage"]),
    ("function_coverage", &["function coverage", "functions", "function", "method coverage"]),
    ("test_count", &["test count", "tests", "test cases", "number of tests"]),
];

/// Read per-component coverage metrics. The panel layout yields none; see
/// [`read_coverage_summary`].
#[must_use]
pub fn read_coverage(path: &Path) -> ParseOutcome<CoverageMetric> {
    let source = source_name(path);
    let mut warnings = Vec::new();
    let Some(content) = read_content(path, &mut warnings) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };

    let rows = match detect_format(&content, FormatHint::from_path(path)) {
        ExportFormat::SonarPanel => return ParseOutcome::new(Vec::new(), warnings),
        format @ (ExportFormat::Json | ExportFormat::Delimited(_)) => {
            tabular_rows(&content, format, COVERAGE_FIELDS, "component", &source, &mut warnings)
        }
        _ => key_value_blocks(&content, "component", COVERAGE_FIELDS),
    };
    let rows = unique_rows(rows, "component", &source, &mut warnings);

    let records = rows
        .iter()
        .filter_map(|row| metric_from_row(row, &source, &mut warnings))
        .collect();
    ParseOutcome::new(records, warnings)
}

fn metric_from_row(
    row: &FieldRow,
    source: &str,
    warnings: &mut Vec<ParseWarning>,
) -> Option<CoverageMetric> {
    let component = row.text("component");
    let Some(line_coverage) = row.get("line_coverage").and_then(parse_percent) else {
        warnings.push(ParseWarning::new(
            source,
            row.line,
            format!("`{component}` has no line coverage"),
        ));
        return None;
    };
    Some(CoverageMetric {
        component,
        line_coverage,
        branch_coverage: row.get("branch_coverage").and_then(parse_percent).unwrap_or(0.0),
        function_coverage: row.get("function_coverage").and_then(parse_percent).unwrap_or(0.0),
        test_count: row.get("test_count").and_then(parse_count).unwrap_or(0),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    NewCode,
    Overall,
}

#[derive(Debug, Clone, Copy)]
enum Figure {
    Coverage,
    LineCoverage,
    ConditionCoverage,
    LinesToCover,
    UncoveredLines,
    ConditionsToCover,
    UncoveredConditions,
}

impl Figure {
    fn from_label(label: &str) -> Option<Self> {
        match label.trim().trim_end_matches(':').to_lowercase().as_str() {
            "coverage" => Some(Self::Coverage),
            "line coverage" => Some(Self::LineCoverage),
            "condition coverage" => Some(Self::ConditionCoverage),
            "lines to cover" => Some(Self::LinesToCover),
            "uncovered lines" => Some(Self::UncoveredLines),
            "conditions to cover" => Some(Self::ConditionsToCover),
            "uncovered conditions" => Some(Self::UncoveredConditions),
            _ => None,
        }
    }

    fn is_percent(self) -> bool {
        matches!(self, Self::Coverage | Self::LineCoverage | Self::ConditionCoverage)
    }

    /// Store `raw` into `figures`; `false` when it does not parse.
    fn store(self, figures: &mut CoverageFigures, raw: &str) -> bool {
        if self.is_percent() {
            let Some(value) = parse_percent(raw) else {
                return false;
            };
            match self {
                Self::Coverage => figures.coverage = value,
                Self::LineCoverage => figures.line_coverage = value,
                _ => figures.condition_coverage = value,
            }
        } else {
            let Some(value) = parse_count(raw) else {
                return false;
            };
            match self {
                Self::LinesToCover => figures.lines_to_cover = value,
                Self::UncoveredLines => figures.uncovered_lines = value,
                Self::ConditionsToCover => figures.conditions_to_cover = value,
                _ => figures.uncovered_conditions = value,
            }
        }
        true
    }
}

/// Read the code-quality panel ("On new code" / "Overall" followed by label
/// and value lines). At most one record; empty for other layouts.
#[must_use]
pub fn read_coverage_summary(path: &Path) -> ParseOutcome<CoverageSummary> {
    let source = source_name(path);
    let mut warnings = Vec::new();
    let Some(content) = read_content(path, &mut warnings) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };
    if detect_format(&content, FormatHint::from_path(path)) != ExportFormat::SonarPanel {
        return ParseOutcome::new(Vec::new(), warnings);
    }

    let mut summary = CoverageSummary::default();
    let mut section: Option<Section> = None;
    let mut pending: Option<(Figure, usize)> = None;
    let mut stored = 0usize;

    for (line_no, line) in meaningful_lines(&content) {
        if line.eq_ignore_ascii_case("on new code") {
            section = Some(Section::NewCode);
            pending = None;
            continue;
        }
        if line.eq_ignore_ascii_case("overall") {
            section = Some(Section::Overall);
            pending = None;
            continue;
        }
        let Some(current) = section else {
            continue;
        };
        let figures = match current {
            Section::NewCode => &mut summary.new_code,
            Section::Overall => &mut summary.overall,
        };

        if let Some((figure, label_line)) = pending.take() {
            if figure.store(figures, line) {
                stored += 1;
            } else {
                warnings.push(ParseWarning::new(
                    &source,
                    label_line,
                    format!("unparseable value `{line}`"),
                ));
            }
            continue;
        }
        if let Some(figure) = Figure::from_label(line) {
            pending = Some((figure, line_no));
            continue;
        }
        if let Some((label, value)) = line.split_once(':') {
            if let Some(figure) = Figure::from_label(label) {
                if figure.store(figures, value) {
                    stored += 1;
                } else {
                    warnings.push(ParseWarning::new(
                        &source,
                        line_no,
                        format!("unparseable value `{}`", value.trim()),
                    ));
                }
            }
        }
    }

    if stored == 0 {
        warnings.push(ParseWarning::new(&source, 1, "coverage panel has no figures"));
        return ParseOutcome::new(Vec::new(), warnings);
    }
    ParseOutcome::new(vec![summary], warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PANEL: &str = "\
On new code

Coverage
83.9%

Lines to Cover
6,194

Uncovered Lines
277

Line Coverage
95.5%

Condition Coverage
71.1%

Overall

Coverage
67.8%

Lines to Cover
543,125

Uncovered Conditions
222,186
";

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_panel_summary() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "coverage.txt", PANEL);

        assert!(read_coverage(&path).records.is_empty());

        let outcome = read_coverage_summary(&path);
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        let summary = &outcome.records[0];
        assert_eq!(summary.new_code.coverage, 83.9);
        assert_eq!(summary.new_code.lines_to_cover, 6_194);
        assert_eq!(summary.new_code.uncovered_lines, 277);
        assert_eq!(summary.new_code.line_coverage, 95.5);
        assert_eq!(summary.new_code.condition_coverage, 71.1);
        assert_eq!(summary.overall.coverage, 67.8);
        assert_eq!(summary.overall.lines_to_cover, 543_125);
        assert_eq!(summary.overall.uncovered_conditions, 222_186);
    }

    #[test]
    fn test_panel_bad_value_warns() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "coverage.txt", "On new code\nCoverage\nunknown\nLine Coverage\n90%\n");
        let outcome = read_coverage_summary(&path);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.skipped(), 1);
        assert_eq!(outcome.warnings[0].line, 2);
    }

    #[test]
    fn test_component_csv() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "coverage.csv",
            "component,line_coverage,branch_coverage,function_coverage,test_count\n\
             storage,81.5%,70.2,90,1204\n\
             planner,,60,80,10\n",
        );
        let outcome = read_coverage(&path);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].component, "storage");
        assert_eq!(outcome.records[0].line_coverage, 81.5);
        assert_eq!(outcome.skipped(), 1);
    }

    #[test]
    fn test_component_key_value() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "coverage.txt",
            "Component: storage\nLine Coverage: 80\nTests: 1,204\nComponent: planner\nLine Coverage: 75.5%\n",
        );
        let outcome = read_coverage(&path);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].test_count, 1_204);
        assert_eq!(outcome.records[1].line_coverage, 75.5);
    }
}
