//! Report writer.
//!
//! Persists the narrative (Markdown) and the aggregate (JSON) as a pair under
//! `<reports_dir>/<component>/[<week>/]<date>/`. Files are only ever created,
//! never replaced: an existing pair either gets a `.vN` sibling or fails the
//! write, per [`ConflictPolicy`]. Archive copies are append-only.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::PathSettings;
use crate::error::{QualityError, Result};
use crate::model::QualityReportData;

pub const REPORT_STEM: &str = "quality_report";
pub const DATA_STEM: &str = "quality_data";
pub const ARCHIVE_PREFIX: &str = "quality_data_archive_";

const MAX_VERSIONS: u32 = 999;

/// What to do when the artifact pair already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Write `quality_report.v2.md` and so on.
    #[default]
    Version,
    /// Fail with [`QualityError::ArtifactExists`].
    Fail,
}

impl FromStr for ConflictPolicy {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "version" => Ok(Self::Version),
            "fail" => Ok(Self::Fail),
            other => Err(QualityError::invalid_config(
                "on_conflict",
                format!("unknown policy '{other}' (expected version or fail)"),
            )),
        }
    }
}

/// File names for `version` (1 is unversioned).
#[must_use]
pub fn artifact_names(version: u32) -> (String, String) {
    if version <= 1 {
        (format!("{REPORT_STEM}.md"), format!("{DATA_STEM}.json"))
    } else {
        (
            format!("{REPORT_STEM}.v{version}.md"),
            format!("{DATA_STEM}.v{version}.json"),
        )
    }
}

/// Paths written by one [`ReportWriter::write`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenReport {
    pub report_path: PathBuf,
    pub data_path: PathBuf,
    pub version: u32,
    pub archive_path: Option<PathBuf>,
}

/// Writes report artifacts.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    reports_dir: PathBuf,
    archive_dir: PathBuf,
    policy: ConflictPolicy,
    archive: bool,
}

impl ReportWriter {
    #[must_use]
    pub fn new(reports_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
            archive_dir: archive_dir.into(),
            policy: ConflictPolicy::default(),
            archive: false,
        }
    }

    #[must_use]
    pub fn from_settings(paths: &PathSettings) -> Self {
        Self::new(&paths.reports_dir, &paths.archive_dir)
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Also write a timestamped archive copy of the data.
    #[must_use]
    pub fn with_archive(mut self, archive: bool) -> Self {
        self.archive = archive;
        self
    }

    /// Directory holding the pair for `data`.
    #[must_use]
    pub fn report_dir(&self, data: &QualityReportData) -> PathBuf {
        let mut dir = self.reports_dir.join(&data.component);
        if let Some(week) = &data.week {
            dir.push(week);
        }
        dir.push(data.generated_at.format("%Y-%m-%d").to_string());
        dir
    }

    /// Persist `narrative` and `data`.
    pub fn write(&self, narrative: &str, data: &QualityReportData) -> Result<WrittenReport> {
        let dir = self.report_dir(data);
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(data)?;
        let markdown = render_markdown(narrative, data);

        for version in 1..=MAX_VERSIONS {
            let (report_name, data_name) = artifact_names(version);
            let report_path = dir.join(&report_name);
            let data_path = dir.join(&data_name);

            let taken = report_path.exists() || data_path.exists();
            if taken {
                if self.policy == ConflictPolicy::Fail {
                    let existing = if report_path.exists() { report_path } else { data_path };
                    return Err(QualityError::ArtifactExists { path: existing });
                }
                debug!("{} exists, trying next version", report_path.display());
                continue;
            }

            match create_pair(&data_path, &report_path, &json, &markdown) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.policy == ConflictPolicy::Fail {
                        return Err(QualityError::ArtifactExists { path: report_path });
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let archive_path = if self.archive {
                Some(self.write_archive(&json, data)?)
            } else {
                None
            };

            info!("Wrote report to {}", report_path.display());
            return Ok(WrittenReport {
                report_path,
                data_path,
                version,
                archive_path,
            });
        }

        Err(QualityError::ArtifactExists { path: dir })
    }

    /// Append-only copy under `<archive_dir>/<component>/`.
    fn write_archive(&self, json: &str, data: &QualityReportData) -> Result<PathBuf> {
        let dir = self.archive_dir.join(&data.component);
        fs::create_dir_all(&dir)?;
        let stamp = data.generated_at.format("%Y%m%d_%H%M%S").to_string();

        for attempt in 1..=MAX_VERSIONS {
            let name = if attempt == 1 {
                format!("{ARCHIVE_PREFIX}{stamp}.json")
            } else {
                format!("{ARCHIVE_PREFIX}{stamp}_{attempt}.json")
            };
            let path = dir.join(name);
            match create_new(&path) {
                Ok(mut file) => {
                    file.write_all(json.as_bytes())?;
                    debug!("Archived data to {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(QualityError::ArtifactExists { path: dir })
    }
}

fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Create the data file, then the report. On failure every file created
/// here is removed again, so no half pair is left behind.
fn create_pair(data_path: &Path, report_path: &Path, json: &str, markdown: &str) -> std::io::Result<()> {
    let mut data_file = create_new(data_path)?;
    let result = data_file.write_all(json.as_bytes()).and_then(|()| {
        let mut report_file = create_new(report_path)?;
        report_file.write_all(markdown.as_bytes()).inspect_err(|_| {
            remove_partial(report_path);
        })
    });
    if result.is_err() {
        remove_partial(data_path);
    }
    result
}

fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Could not remove partial artifact {}: {}", path.display(), e);
    }
}

fn render_markdown(narrative: &str, data: &QualityReportData) -> String {
    let mut lines = vec![format!("# Quality Report: {}", data.component), String::new()];
    let mut meta = Vec::new();
    if let Some(week) = &data.week {
        meta.push(format!("Week {week}"));
    }
    meta.push(format!("{}", data.window));
    meta.push(format!("generated {}", data.generated_at.format("%Y-%m-%d %H:%M UTC")));
    meta.push(format!("run {}", data.run_id));
    lines.push(format!("_{}_", meta.join(" | ")));
    lines.push(String::new());
    lines.push(narrative.trim().to_string());
    lines.push(String::new());
    lines.join("\n")
}
