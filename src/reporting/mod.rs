//! Report persistence.
//!
//! - [`writer`] - writes the Markdown narrative and the JSON aggregate,
//!   never overwriting, with optional archive copies
//! - [`index`] - lists persisted artifacts newest first
//!
//! # Layout
//!
//! ```text
//! <reports_dir>/<component>/<week>/<YYYY-MM-DD>/quality_report.md
//! <reports_dir>/<component>/<week>/<YYYY-MM-DD>/quality_data.json
//! <reports_dir>/<component>/<week>/<YYYY-MM-DD>/quality_report.v2.md
//! <archive_dir>/<component>/quality_data_archive_<YYYYMMDD_HHMMSS>.json
//! ```

pub mod index;
pub mod writer;

pub use index::{ReportArtifact, ReportIndex};
pub use writer::{artifact_names, ConflictPolicy, ReportWriter, WrittenReport};
