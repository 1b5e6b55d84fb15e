//! Index of persisted report artifacts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::writer::{DATA_STEM, REPORT_STEM};
use crate::error::Result;
use crate::model::QualityReportData;

/// One persisted report pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportArtifact {
    pub component: String,
    pub week: Option<String>,
    pub date: NaiveDate,
    pub version: u32,
    pub data_path: PathBuf,
    /// Narrative path, when it exists next to the data.
    pub report_path: Option<PathBuf>,
    pub generated_at: Option<DateTime<Utc>>,
}

impl ReportArtifact {
    /// Load the aggregate this artifact holds.
    pub fn load(&self) -> Result<QualityReportData> {
        let content = fs::read_to_string(&self.data_path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Finds report artifacts under a reports directory.
#[derive(Debug, Clone)]
pub struct ReportIndex {
    reports_dir: PathBuf,
}

impl ReportIndex {
    #[must_use]
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    /// Every artifact for `component`, newest first.
    pub fn list(&self, component: &str) -> Result<Vec<ReportArtifact>> {
        let root = self.reports_dir.join(component);
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut artifacts: Vec<ReportArtifact> = WalkDir::new(&root)
            .max_depth(3)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| artifact_at(&root, component, e.path()))
            .collect();

        artifacts.sort_by(|a, b| {
            b.generated_at
                .cmp(&a.generated_at)
                .then_with(|| b.date.cmp(&a.date))
                .then_with(|| b.version.cmp(&a.version))
        });
        debug!("Found {} artifacts for {}", artifacts.len(), component);
        Ok(artifacts)
    }

    /// The newest artifact for `component`.
    pub fn latest(&self, component: &str) -> Result<Option<ReportArtifact>> {
        Ok(self.list(component)?.into_iter().next())
    }
}

/// Version encoded in a data file name, or `None` for other files.
fn data_version(file_name: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(DATA_STEM)?.strip_suffix(".json")?;
    if rest.is_empty() {
        return Some(1);
    }
    rest.strip_prefix(".v")?.parse().ok()
}

fn artifact_at(root: &Path, component: &str, path: &Path) -> Option<ReportArtifact> {
    let version = data_version(path.file_name()?.to_str()?)?;
    let dir = path.parent()?;
    let date = NaiveDate::parse_from_str(dir.file_name()?.to_str()?, "%Y-%m-%d").ok()?;

    let week = dir
        .parent()
        .filter(|p| *p != root)
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(str::to_string);

    let report_name = if version == 1 {
        format!("{REPORT_STEM}.md")
    } else {
        format!("{REPORT_STEM}.v{version}.md")
    };
    let report_path = Some(dir.join(report_name)).filter(|p| p.is_file());

    Some(ReportArtifact {
        component: component.to_string(),
        week,
        date,
        version,
        data_path: path.to_path_buf(),
        report_path,
        generated_at: read_generated_at(path),
    })
}

fn read_generated_at(path: &Path) -> Option<DateTime<Utc>> {
    #[derive(serde::Deserialize)]
    struct Stamp {
        generated_at: DateTime<Utc>,
    }
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str::<Stamp>(&content).ok().map(|s| s.generated_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, ReportContext};
    use crate::input::SourceBundle;
    use crate::model::GitMetrics;
    use crate::reporting::ReportWriter;
    use crate::window::ReportWindow;
    use chrono::Duration;
    use tempfile::TempDir;

    fn data(week: &str, hours_ago: i64) -> QualityReportData {
        let window = ReportWindow::new(
            NaiveDate::from_ymd_opt(2024, 9, 16).unwrap(),
            NaiveDate::from_ymd_opt(2024, 9, 22).unwrap(),
        );
        let ctx = ReportContext::new(Some(week.to_string()), "Engine", window);
        let mut data = aggregate(SourceBundle::default(), GitMetrics::empty(&window), &ctx);
        data.generated_at -= Duration::hours(hours_ago);
        data
    }

    #[test]
    fn test_data_version_parsing() {
        assert_eq!(data_version("quality_data.json"), Some(1));
        assert_eq!(data_version("quality_data.v3.json"), Some(3));
        assert_eq!(data_version("quality_report.md"), None);
        assert_eq!(data_version("quality_data_archive_20240101_000000.json"), None);
    }

    #[test]
    fn test_list_newest_first() {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("reports");
        let writer = ReportWriter::new(&reports, reports.join("archive"));
        writer.write("old", &data("cw37", 72)).unwrap();
        let newest = writer.write("new", &data("cw38", 0)).unwrap();
        writer.write("mid", &data("cw38", 24)).unwrap();

        let artifacts = ReportIndex::new(&reports).list("Engine").unwrap();
        assert_eq!(artifacts.len(), 3);
        assert_eq!(artifacts[0].data_path, newest.data_path);
        assert_eq!(artifacts[0].week.as_deref(), Some("cw38"));
        assert_eq!(artifacts[2].week.as_deref(), Some("cw37"));
        assert!(artifacts.iter().all(|a| a.report_path.is_some()));

        let latest = ReportIndex::new(&reports).latest("Engine").unwrap().unwrap();
        assert_eq!(latest.load().unwrap().run_id, artifacts[0].load().unwrap().run_id);
    }

    #[test]
    fn test_unknown_component_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(ReportIndex::new(dir.path()).list("Nope").unwrap().is_empty());
    }
}
