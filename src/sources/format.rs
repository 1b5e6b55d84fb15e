//! Export format detection and the shared row model.
//!
//! Every tabular source (delimited text or JSON arrays) is reduced to
//! [`FieldRow`]s keyed by canonical field names, so individual readers only
//! deal with field semantics and never with column positions.

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use super::{builtin_regex, ParseWarning};

static KEY_VALUE_LINE: LazyLock<Regex> =
    LazyLock::new(|| builtin_regex(r"^[A-Za-z][A-Za-z0-9 _/()-]{0,40}:(\s|$)"));

static CLIPBOARD_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    builtin_regex(r"^(PRB-\d{7}|W-\d{7,8}|P[0-4]\(\d+\))$")
});

static EMBEDDED_DATE: LazyLock<Regex> =
    LazyLock::new(|| builtin_regex(r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})\b"));

/// Column separators recognised in delimited exports, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Tab,
    Pipe,
    Comma,
    Semicolon,
}

impl Delimiter {
    pub const CANDIDATES: [Delimiter; 4] = [
        Delimiter::Tab,
        Delimiter::Pipe,
        Delimiter::Comma,
        Delimiter::Semicolon,
    ];

    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Tab => '\t',
            Self::Pipe => '|',
            Self::Comma => ',',
            Self::Semicolon => ';',
        }
    }

    /// Pick the delimiter that splits `header` into the most columns.
    ///
    /// Ties go to the earlier candidate. Returns `None` when no candidate
    /// yields at least two columns.
    #[must_use]
    pub fn sniff(header: &str) -> Option<Self> {
        let mut best: Option<(Self, usize)> = None;
        for candidate in Self::CANDIDATES {
            let columns = split_delimited(header, candidate).len();
            if columns >= 2 && best.is_none_or(|(_, n)| columns > n) {
                best = Some((candidate, columns));
            }
        }
        best.map(|(d, _)| d)
    }
}

/// Format hint derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatHint {
    Json,
    Csv,
    Tsv,
    #[default]
    Text,
}

impl FormatHint {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("csv") => Self::Csv,
            Some("tsv") => Self::Tsv,
            _ => Self::Text,
        }
    }
}

/// The parsing strategy chosen for one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// An array of JSON objects.
    Json,
    /// A header line followed by delimited rows.
    Delimited(Delimiter),
    /// `Key: value` lines grouped into blocks.
    KeyValue,
    /// A grouped report pasted one cell per line.
    Clipboard,
    /// The code-quality dashboard's coverage panel.
    SonarPanel,
}

/// Choose the parsing strategy for `content`.
///
/// Rules are checked in order: JSON (hint or leading bracket), coverage
/// panel, explicit CSV/TSV hint, clipboard anchors (a whole line that is an
/// identifier or a `P<n>(<count>)` group header), `Key: value` first line,
/// delimiter sniffing on the first line. Anything else is treated as a
/// clipboard paste.
#[must_use]
pub fn detect_format(content: &str, hint: FormatHint) -> ExportFormat {
    let lines: Vec<&str> = meaningful_lines(content).map(|(_, l)| l).collect();
    let Some(first) = lines.first() else {
        return ExportFormat::Clipboard;
    };

    if hint == FormatHint::Json || first.starts_with('[') || first.starts_with('{') {
        return ExportFormat::Json;
    }
    if is_sonar_panel(&lines) {
        return ExportFormat::SonarPanel;
    }
    match hint {
        FormatHint::Csv if split_delimited(first, Delimiter::Comma).len() >= 2 => {
            return ExportFormat::Delimited(Delimiter::Comma);
        }
        FormatHint::Tsv if split_delimited(first, Delimiter::Tab).len() >= 2 => {
            return ExportFormat::Delimited(Delimiter::Tab);
        }
        _ => {}
    }
    if lines.iter().any(|l| CLIPBOARD_ANCHOR.is_match(l)) {
        return ExportFormat::Clipboard;
    }
    if KEY_VALUE_LINE.is_match(first) {
        return ExportFormat::KeyValue;
    }
    Delimiter::sniff(first).map_or(ExportFormat::Clipboard, ExportFormat::Delimited)
}

fn is_sonar_panel(lines: &[&str]) -> bool {
    let has_section = lines
        .iter()
        .any(|l| l.eq_ignore_ascii_case("on new code") || l.eq_ignore_ascii_case("overall"));
    has_section && lines.iter().any(|l| l.to_lowercase().contains("coverage"))
}

// ============================================================================
// Line helpers
// ============================================================================

/// Trimmed lines with 1-based line numbers, skipping blanks and `#` comments.
pub fn meaningful_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
}

/// `Subtotal`, `Total` and `Grand Total` lines in report exports.
#[must_use]
pub fn is_summary_line(line: &str) -> bool {
    let lower = line.trim_start().to_lowercase();
    if lower.starts_with("subtotal") || lower.starts_with("grand total") {
        return true;
    }
    lower
        .strip_prefix("total")
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphabetic()))
}

/// Split one delimited line. Double-quoted cells may contain the delimiter;
/// `""` inside quotes is a literal quote. Cells are trimmed.
#[must_use]
pub fn split_delimited(line: &str, delimiter: Delimiter) -> Vec<String> {
    let sep = delimiter.as_char();
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                cells.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

// ============================================================================
// Value helpers
// ============================================================================

/// Parse `YYYY-MM-DD` or `M/D/YYYY`, ignoring a trailing time component.
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let token = s
        .trim()
        .split(|c: char| c == 'T' || c == ',' || c.is_whitespace())
        .next()?;
    NaiveDate::parse_from_str(token, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(token, "%m/%d/%Y"))
        .ok()
}

/// The first date embedded anywhere in `text`.
#[must_use]
pub fn find_date(text: &str) -> Option<NaiveDate> {
    EMBEDDED_DATE
        .find_iter(text)
        .find_map(|m| parse_date(m.as_str()))
}

/// Parse a percentage such as `83.9%` or `83.9`.
#[must_use]
pub fn parse_percent(s: &str) -> Option<f64> {
    s.trim().trim_end_matches('%').trim().parse::<f64>().ok()
}

/// Parse a count such as `543,125`, `6 194` or `12.3k`.
#[must_use]
pub fn parse_count(s: &str) -> Option<u64> {
    let cleaned: String = s
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '_' | ' '))
        .collect();
    let (number, scale) = match cleaned.chars().last()? {
        'k' | 'K' => (&cleaned[..cleaned.len() - 1], 1_000.0),
        'm' | 'M' => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };
    if scale == 1.0 {
        return number.parse().ok();
    }
    let value: f64 = number.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * scale).round() as u64)
}

/// Truncate to at most `max` characters on a char boundary.
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ============================================================================
// Field aliases and rows
// ============================================================================

/// Canonical field name paired with the normalised header names that map to it.
pub type FieldAliases = &'static [(&'static str, &'static [&'static str])];

/// Lowercase, turn separators into spaces and drop other punctuation.
#[must_use]
pub fn normalize_header(name: &str) -> String {
    let mapped: String = name
        .chars()
        .filter_map(|c| match c {
            '_' | '-' | '.' | '/' => Some(' '),
            c if c.is_alphanumeric() || c.is_whitespace() => Some(c.to_ascii_lowercase()),
            _ => None,
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve a header through `aliases`.
#[must_use]
pub fn canonical_field(name: &str, aliases: FieldAliases) -> Option<&'static str> {
    let normalized = normalize_header(name);
    aliases
        .iter()
        .find(|(_, names)| names.iter().any(|n| *n == normalized))
        .map(|(field, _)| *field)
}

/// One record's cells keyed by canonical field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldRow {
    pub line: usize,
    fields: HashMap<&'static str, String>,
}

impl FieldRow {
    #[must_use]
    pub fn new(line: usize) -> Self {
        Self {
            line,
            fields: HashMap::new(),
        }
    }

    /// Insert unless the field already holds a non-empty value.
    pub fn insert(&mut self, field: &'static str, value: impl Into<String>) {
        let value = value.into();
        let slot = self.fields.entry(field).or_default();
        if slot.is_empty() {
            *slot = value.trim().to_string();
        }
    }

    /// Non-empty value of `field`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value of `field`, or the empty string.
    #[must_use]
    pub fn text(&self, field: &str) -> String {
        self.get(field).unwrap_or_default().to_string()
    }
}

/// Reduce a JSON or delimited export to field rows.
///
/// Rows without a value for `id_field` are malformed. Other formats yield
/// nothing; callers dispatch those to the dedicated parsers.
pub fn tabular_rows(
    content: &str,
    format: ExportFormat,
    aliases: FieldAliases,
    id_field: &'static str,
    source: &str,
    warnings: &mut Vec<ParseWarning>,
) -> Vec<FieldRow> {
    match format {
        ExportFormat::Json => json_rows(content, aliases, id_field, source, warnings),
        ExportFormat::Delimited(d) => delimited_rows(content, d, aliases, id_field, source, warnings),
        _ => Vec::new(),
    }
}

/// Drop rows whose `id_field` repeats an earlier row, with a warning each.
pub fn unique_rows(
    rows: Vec<FieldRow>,
    id_field: &str,
    source: &str,
    warnings: &mut Vec<ParseWarning>,
) -> Vec<FieldRow> {
    let mut seen = std::collections::HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let id = row.text(id_field);
            if seen.insert(id.clone()) {
                true
            } else {
                warnings.push(ParseWarning::new(
                    source,
                    row.line,
                    format!("duplicate identifier {id}"),
                ));
                false
            }
        })
        .collect()
}

/// Group `Key: value` lines into blocks that start at `anchor`.
///
/// Keys are case-insensitive and resolved through `aliases`; unknown keys and
/// lines before the first anchor are ignored.
pub fn key_value_blocks(
    content: &str,
    anchor: &'static str,
    aliases: FieldAliases,
) -> Vec<FieldRow> {
    let mut rows = Vec::new();
    let mut current: Option<FieldRow> = None;

    for (line_no, line) in meaningful_lines(content) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Some(field) = canonical_field(key, aliases) else {
            continue;
        };
        if field == anchor {
            if let Some(done) = current.take() {
                rows.push(done);
            }
            let mut row = FieldRow::new(line_no);
            row.insert(field, value);
            current = Some(row);
        } else if let Some(row) = current.as_mut() {
            row.insert(field, value);
        }
    }
    if let Some(done) = current {
        rows.push(done);
    }
    rows
}

fn delimited_rows(
    content: &str,
    delimiter: Delimiter,
    aliases: FieldAliases,
    id_field: &'static str,
    source: &str,
    warnings: &mut Vec<ParseWarning>,
) -> Vec<FieldRow> {
    // Tabs are kept so that trailing empty cells survive.
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_matches(|c: char| c.is_whitespace() && c != '\t')))
        .filter(|(_, l)| !l.trim().is_empty() && !l.trim().starts_with('#'));
    let Some((header_line, header)) = lines.next() else {
        return Vec::new();
    };
    let headers = split_delimited(header, delimiter);
    let mapping: Vec<Option<&'static str>> = headers
        .iter()
        .map(|h| canonical_field(h, aliases))
        .collect();

    if !mapping.contains(&Some(id_field)) {
        warnings.push(ParseWarning::new(
            source,
            header_line,
            format!("header has no `{id_field}` column"),
        ));
        return Vec::new();
    }

    let mut rows = Vec::new();
    for (line_no, line) in lines {
        if is_summary_line(line) {
            continue;
        }
        let mut cells = split_delimited(line, delimiter);
        while cells.len() > headers.len() && cells.last().is_some_and(String::is_empty) {
            cells.pop();
        }
        if cells.len() < headers.len() {
            warnings.push(ParseWarning::new(
                source,
                line_no,
                format!("expected {} cells, found {}", headers.len(), cells.len()),
            ));
            continue;
        }

        let mut row = FieldRow::new(line_no);
        for (field, cell) in mapping.iter().zip(cells) {
            if let Some(field) = field {
                row.insert(field, cell);
            }
        }
        if row.get(id_field).is_none() {
            warnings.push(ParseWarning::new(source, line_no, "empty identifier"));
            continue;
        }
        rows.push(row);
    }
    rows
}

fn json_rows(
    content: &str,
    aliases: FieldAliases,
    id_field: &'static str,
    source: &str,
    warnings: &mut Vec<ParseWarning>,
) -> Vec<FieldRow> {
    let items = match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            warnings.push(ParseWarning::new(source, 1, "expected a JSON array of objects"));
            return Vec::new();
        }
        Err(e) => {
            warnings.push(ParseWarning::new(source, e.line(), format!("invalid JSON: {e}")));
            return Vec::new();
        }
    };

    let mut rows = Vec::new();
    // JSON warnings report the 1-based element index as the line.
    for (index, item) in items.iter().enumerate() {
        let position = index + 1;
        let Value::Object(map) = item else {
            warnings.push(ParseWarning::new(source, position, "element is not an object"));
            continue;
        };
        let mut row = FieldRow::new(position);
        for (key, value) in map {
            if let (Some(field), Some(text)) = (canonical_field(key, aliases), json_text(value)) {
                row.insert(field, text);
            }
        }
        if row.get(id_field).is_none() {
            warnings.push(ParseWarning::new(source, position, "missing identifier"));
            continue;
        }
        rows.push(row);
    }
    rows
}

fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(json_text)
                .collect::<Vec<_>>()
                .join("; "),
        ),
        Value::Null | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALIASES: FieldAliases = &[
        ("id", &["id", "work id"]),
        ("subject", &["subject", "title"]),
        ("priority", &["priority"]),
    ];

    #[test]
    fn test_delimiter_sniff_prefers_most_columns() {
        assert_eq!(Delimiter::sniff("a,b,c"), Some(Delimiter::Comma));
        assert_eq!(Delimiter::sniff("a\tb\tc"), Some(Delimiter::Tab));
        assert_eq!(Delimiter::sniff("a;b;c;d|e"), Some(Delimiter::Semicolon));
        assert_eq!(Delimiter::sniff("single"), None);
    }

    #[test]
    fn test_delimiter_sniff_tie_break_order() {
        // Two columns for both pipe and comma: pipe wins.
        assert_eq!(Delimiter::sniff("a|b,c"), Some(Delimiter::Pipe));
    }

    #[test]
    fn test_split_delimited_respects_quotes() {
        let cells = split_delimited(r#"W-1,"Crash, then ""retry""",P1"#, Delimiter::Comma);
        assert_eq!(cells, vec!["W-1", r#"Crash, then "retry""#, "P1"]);
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("[{\"id\": 1}]", FormatHint::Text), ExportFormat::Json);
        assert_eq!(
            detect_format("Feature: Login\nStatus: Green", FormatHint::Text),
            ExportFormat::KeyValue
        );
        assert_eq!(
            detect_format("Work ID\tSubject\nW-1\tx", FormatHint::Text),
            ExportFormat::Delimited(Delimiter::Tab)
        );
        assert_eq!(
            detect_format("P1(2)\nPRB-0001234\nSomething broke badly", FormatHint::Text),
            ExportFormat::Clipboard
        );
        assert_eq!(
            detect_format("On new code\nCoverage\n83.9%", FormatHint::Text),
            ExportFormat::SonarPanel
        );
        assert_eq!(
            detect_format("id,subject\n1,x", FormatHint::Csv),
            ExportFormat::Delimited(Delimiter::Comma)
        );
    }

    #[test]
    fn test_summary_lines() {
        assert!(is_summary_line("Subtotal (4)"));
        assert!(is_summary_line("Total"));
        assert!(is_summary_line("Grand Total,12"));
        assert!(!is_summary_line("Totally new crash"));
    }

    #[test]
    fn test_value_helpers() {
        assert_eq!(parse_date("2024-01-02"), NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(parse_date("9/3/2025, 10:15 AM"), NaiveDate::from_ymd_opt(2025, 9, 3));
        assert_eq!(parse_date("2024-01-02T10:00:00Z"), NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(parse_date("yesterday"), None);
        assert_eq!(find_date("opened 10/7/2025 by ops"), NaiveDate::from_ymd_opt(2025, 10, 7));
        assert_eq!(parse_percent("83.9%"), Some(83.9));
        assert_eq!(parse_count("543,125"), Some(543_125));
        assert_eq!(parse_count("12.3k"), Some(12_300));
        assert_eq!(parse_count("n/a"), None);
    }

    #[test]
    fn test_delimited_rows_skip_malformed_and_summary() {
        let content = "Work ID,Title,Priority\nW-1,Crash,P1\nW-2,Short\n,No id,P2\nSubtotal,,\nW-3,Leak,P3,,\n";
        let mut warnings = Vec::new();
        let rows = tabular_rows(
            content,
            ExportFormat::Delimited(Delimiter::Comma),
            ALIASES,
            "id",
            "bugs.txt",
            &mut warnings,
        );
        let ids: Vec<_> = rows.iter().map(|r| r.text("id")).collect();
        assert_eq!(ids, vec!["W-1", "W-3"]);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].line, 3);
        assert_eq!(warnings[1].line, 4);
    }

    #[test]
    fn test_json_rows_map_aliases() {
        let content = r#"[{"Work ID": "W-1", "title": "Crash"}, "junk", {"title": "no id"}]"#;
        let mut warnings = Vec::new();
        let rows = tabular_rows(content, ExportFormat::Json, ALIASES, "id", "ci.json", &mut warnings);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("subject"), "Crash");
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_missing_id_column_is_single_warning() {
        let mut warnings = Vec::new();
        let rows = tabular_rows(
            "Title,Priority\nCrash,P1\n",
            ExportFormat::Delimited(Delimiter::Comma),
            ALIASES,
            "id",
            "bugs.txt",
            &mut warnings,
        );
        assert!(rows.is_empty());
        assert_eq!(warnings.len(), 1);
    }
}
