//! Source readers.
//!
//! Each reader turns one export file into typed records. Readers are
//! stateless and independent: a missing or empty file yields an empty
//! outcome, and lines that cannot be parsed are skipped and reported as
//! [`ParseWarning`]s. Nothing in this module fails on file content.

pub mod clipboard;
pub mod coverage;
pub mod deployments;
pub mod format;
pub mod incidents;
pub mod remote;
pub mod risks;
pub mod security;
pub mod work_items;

pub use coverage::{read_coverage, read_coverage_summary};
pub use deployments::{read_deployments, read_stagger_rollout};
pub use format::{detect_format, Delimiter, ExportFormat, FormatHint};
pub use incidents::{read_bugs, read_problem_reports};
pub use risks::read_risks;
pub use security::read_security;
pub use work_items::read_work_items;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// A skipped line. Collected, logged and counted; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// File name of the source.
    pub source: String,
    /// 1-based line number (element index for JSON sources).
    pub line: usize,
    pub reason: String,
}

impl ParseWarning {
    pub fn new(source: impl Into<String>, line: usize, reason: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            line,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.source, self.line, self.reason)
    }
}

/// Records from one source plus the lines that were skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome<T> {
    pub records: Vec<T>,
    pub warnings: Vec<ParseWarning>,
}

impl<T> Default for ParseOutcome<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl<T> ParseOutcome<T> {
    #[must_use]
    pub fn new(records: Vec<T>, warnings: Vec<ParseWarning>) -> Self {
        Self { records, warnings }
    }

    /// Number of skipped lines.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.warnings.len()
    }

    /// Emit every warning through `tracing`.
    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            warn!(source = %warning.source, line = warning.line, "Skipped line: {}", warning.reason);
        }
    }
}

/// Compile a pattern that is part of this crate's source.
///
/// Panics only if a literal pattern in this crate is invalid, which the unit
/// tests of every module that uses it would catch.
pub(crate) fn builtin_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("invalid built-in pattern {pattern:?}: {e}"),
    }
}

/// Display name used in warnings for `path`.
pub(crate) fn source_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Read a source file. Absent, empty and unreadable files all yield `None`;
/// an unreadable file also records a warning.
pub(crate) fn read_content(path: &Path, warnings: &mut Vec<ParseWarning>) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => {
            debug!("Source {} is empty", path.display());
            None
        }
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Source {} not present", path.display());
            None
        }
        Err(e) => {
            warnings.push(ParseWarning::new(source_name(path), 0, format!("unreadable: {e}")));
            None
        }
    }
}

/// Free-text narrative (the weekly deployment summary). Trimmed; `None`
/// when absent or empty.
#[must_use]
pub fn read_narrative(path: &Path) -> Option<String> {
    let mut ignored = Vec::new();
    read_content(path, &mut ignored).map(|c| c.trim().to_string())
}

// ============================================================================
// Augmentation notes
// ============================================================================

/// Operator notes keyed by record id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Augmentation {
    notes: BTreeMap<String, String>,
}

impl Augmentation {
    #[must_use]
    pub fn note_for(&self, id: &str) -> Option<String> {
        self.notes.get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

/// Records that can carry an operator note.
pub trait Augmentable {
    fn record_id(&self) -> &str;
    fn set_augmentation(&mut self, note: String);
}

impl Augmentation {
    /// Attach notes to every record whose id has one. Returns how many
    /// records were annotated.
    pub fn apply<T: Augmentable>(&self, records: &mut [T]) -> usize {
        let mut applied = 0;
        for record in records.iter_mut() {
            if let Some(note) = self.note_for(record.record_id()) {
                record.set_augmentation(note);
                applied += 1;
            }
        }
        applied
    }
}

macro_rules! impl_augmentable {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Augmentable for $ty {
                fn record_id(&self) -> &str {
                    &self.id
                }

                fn set_augmentation(&mut self, note: String) {
                    self.augmentation = Some(note);
                }
            }
        )+
    };
}

impl_augmentable!(
    crate::model::ProblemReport,
    crate::model::BugRecord,
    crate::model::WorkItem,
    crate::model::SecurityFinding,
);

impl FromIterator<(String, String)> for Augmentation {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            notes: iter.into_iter().collect(),
        }
    }
}

/// Read `{ "<id>": "<note>" }`. Non-string values are skipped with a warning.
#[must_use]
pub fn read_augmentation(path: &Path) -> ParseOutcome<(String, String)> {
    let source = source_name(path);
    let mut warnings = Vec::new();
    let Some(content) = read_content(path, &mut warnings) else {
        return ParseOutcome::new(Vec::new(), warnings);
    };

    let map = match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&content) {
        Ok(map) => map,
        Err(e) => {
            warnings.push(ParseWarning::new(
                &source,
                e.line(),
                format!("expected a JSON object of notes: {e}"),
            ));
            return ParseOutcome::new(Vec::new(), warnings);
        }
    };

    let mut records = Vec::new();
    for (id, value) in map {
        match value {
            serde_json::Value::String(note) if !note.trim().is_empty() => {
                records.push((id, note.trim().to_string()));
            }
            _ => warnings.push(ParseWarning::new(&source, 0, format!("note for {id} is not text"))),
        }
    }
    ParseOutcome::new(records, warnings)
}
