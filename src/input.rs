//! Input sources for one report run.
//!
//! An [`InputSource`] is resolved from settings, a week id and a component
//! name. Resolution checks every required input before anything is read or
//! fetched; [`InputSource::collect`] then produces a [`SourceBundle`] that
//! looks the same whether incidents came from exported files or from the
//! remote reports API.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{InputFiles, Settings};
use crate::error::{QualityError, Result};
use crate::model::{
    BugRecord, CoverageMetric, CoverageSummary, DeploymentEvent, IssueKind, ProblemReport,
    RiskItem, SecurityFinding, SourceMode, StaggerDeployment, WorkItem,
};
use crate::sources::remote::{RemoteError, RemoteReportsClient};
use crate::sources::{
    read_augmentation, read_bugs, read_coverage, read_coverage_summary, read_deployments,
    read_narrative, read_problem_reports, read_risks, read_security, read_stagger_rollout,
    read_work_items, Augmentation, ParseOutcome,
};

// ============================================================================
// Source bundle
// ============================================================================

/// Everything the readers produced for one run.
#[derive(Debug, Clone, Default)]
pub struct SourceBundle {
    pub mode: SourceMode,
    pub input_dir: PathBuf,
    pub risks: ParseOutcome<RiskItem>,
    pub problem_reports: ParseOutcome<ProblemReport>,
    pub bugs: ParseOutcome<BugRecord>,
    pub ci_issues: ParseOutcome<WorkItem>,
    pub leftshift_issues: ParseOutcome<WorkItem>,
    pub abs_issues: ParseOutcome<WorkItem>,
    pub security: ParseOutcome<SecurityFinding>,
    pub deployments: ParseOutcome<DeploymentEvent>,
    pub stagger_rollout: ParseOutcome<StaggerDeployment>,
    pub coverage: ParseOutcome<CoverageMetric>,
    pub coverage_summary: ParseOutcome<CoverageSummary>,
    pub augmentation: ParseOutcome<(String, String)>,
    pub narrative: Option<String>,
}

impl SourceBundle {
    /// Skipped-line counts keyed by source label. Sources without skipped
    /// lines are left out.
    #[must_use]
    pub fn skipped_by_source(&self) -> BTreeMap<String, usize> {
        [
            ("risks", self.risks.skipped()),
            ("problem_reports", self.problem_reports.skipped()),
            ("bugs", self.bugs.skipped()),
            ("ci_issues", self.ci_issues.skipped()),
            ("leftshift_issues", self.leftshift_issues.skipped()),
            ("abs_issues", self.abs_issues.skipped()),
            ("security", self.security.skipped()),
            ("deployments", self.deployments.skipped()),
            ("stagger_rollout", self.stagger_rollout.skipped()),
            ("coverage", self.coverage.skipped()),
            ("coverage_summary", self.coverage_summary.skipped()),
            ("augmentation", self.augmentation.skipped()),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(label, n)| (label.to_string(), n))
        .collect()
    }

    /// Emit every source's warnings through `tracing`.
    pub fn log_warnings(&self) {
        self.risks.log_warnings();
        self.problem_reports.log_warnings();
        self.bugs.log_warnings();
        self.ci_issues.log_warnings();
        self.leftshift_issues.log_warnings();
        self.abs_issues.log_warnings();
        self.security.log_warnings();
        self.deployments.log_warnings();
        self.stagger_rollout.log_warnings();
        self.coverage.log_warnings();
        self.coverage_summary.log_warnings();
        self.augmentation.log_warnings();
    }
}

// ============================================================================
// Local files
// ============================================================================

/// Exported files in `<weeks_dir>/<week>/<component>/`.
#[derive(Debug, Clone)]
pub struct LocalInputs {
    dir: PathBuf,
    files: InputFiles,
}

impl LocalInputs {
    #[must_use]
    pub fn new(dir: PathBuf, files: InputFiles) -> Self {
        Self { dir, files }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Names of `required` entries whose file does not exist.
    fn missing(&self, required: &[&str]) -> Vec<String> {
        self.files
            .entries()
            .iter()
            .filter(|(key, _)| required.contains(key))
            .filter(|(_, name)| !self.path(name).is_file())
            .map(|(_, name)| (*name).to_string())
            .collect()
    }

    /// Read every local source. PRBs and bugs are skipped when `incidents`
    /// is false.
    fn read_all(&self, incidents: bool) -> SourceBundle {
        let files = &self.files;
        let augmentation_outcome = read_augmentation(&self.path(&files.augmentation));
        let augmentation: Augmentation = augmentation_outcome.records.iter().cloned().collect();
        if !augmentation.is_empty() {
            debug!("Loaded {} augmentation notes", augmentation.len());
        }

        let (problem_reports, mut bugs) = if incidents {
            (
                read_problem_reports(&self.path(&files.prb), &augmentation),
                read_bugs(&self.path(&files.bugs)),
            )
        } else {
            (ParseOutcome::default(), ParseOutcome::default())
        };
        augmentation.apply(&mut bugs.records);

        let mut ci_issues = read_work_items(&self.path(&files.ci), IssueKind::Ci);
        let mut leftshift_issues = read_work_items(&self.path(&files.leftshift), IssueKind::LeftShift);
        let mut abs_issues = read_work_items(&self.path(&files.abs), IssueKind::Abs);
        let mut security = read_security(&self.path(&files.security));
        augmentation.apply(&mut ci_issues.records);
        augmentation.apply(&mut leftshift_issues.records);
        augmentation.apply(&mut abs_issues.records);
        augmentation.apply(&mut security.records);

        let deployment_path = self.path(&files.deployment);
        let coverage_path = self.path(&files.coverage);

        SourceBundle {
            mode: SourceMode::Local,
            input_dir: self.dir.clone(),
            risks: read_risks(&self.path(&files.risks)),
            problem_reports,
            bugs,
            ci_issues,
            leftshift_issues,
            abs_issues,
            security,
            deployments: read_deployments(&deployment_path),
            stagger_rollout: read_stagger_rollout(&deployment_path),
            coverage: read_coverage(&coverage_path),
            coverage_summary: read_coverage_summary(&coverage_path),
            augmentation: augmentation_outcome,
            narrative: read_narrative(&self.path(&files.narrative)),
        }
    }
}

// ============================================================================
// Remote reports API
// ============================================================================

/// Local files plus PRB and bug reports fetched from the reports API.
#[derive(Clone)]
pub struct RemoteInputs {
    local: LocalInputs,
    instance: String,
    session_id: String,
    api_version: String,
    prb_report_id: String,
    bug_report_id: String,
    timeout: Duration,
}

impl fmt::Debug for RemoteInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteInputs")
            .field("local", &self.local)
            .field("instance", &self.instance)
            .field("session_id", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("prb_report_id", &self.prb_report_id)
            .field("bug_report_id", &self.bug_report_id)
            .finish_non_exhaustive()
    }
}

impl RemoteInputs {
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    async fn collect(&self) -> Result<SourceBundle> {
        let mut bundle = self.local.read_all(false);
        bundle.mode = SourceMode::Remote;

        let client = RemoteReportsClient::new(
            &self.instance,
            &self.api_version,
            self.session_id.clone(),
            self.timeout,
        )?;
        info!("Fetching PRBs and bugs from {}", self.instance);
        let mut problem_reports = client.fetch_problem_reports(&self.prb_report_id).await?;
        let mut bugs = client.fetch_bugs(&self.bug_report_id).await?;

        let augmentation: Augmentation = bundle.augmentation.records.iter().cloned().collect();
        augmentation.apply(&mut problem_reports.records);
        augmentation.apply(&mut bugs.records);
        bundle.problem_reports = problem_reports;
        bundle.bugs = bugs;
        Ok(bundle)
    }
}

// ============================================================================
// Input source
// ============================================================================

const LOCAL_REQUIRED: &[&str] = &["risks", "prb", "bugs", "ci", "leftshift", "security"];

/// Where a run reads its inputs from.
#[derive(Debug, Clone)]
pub enum InputSource {
    Local(LocalInputs),
    Remote(RemoteInputs),
}

impl InputSource {
    /// Resolve and check inputs, reading credentials from the process
    /// environment.
    pub fn resolve(settings: &Settings, week: &str, component: &str, mode: SourceMode) -> Result<Self> {
        Self::resolve_with(settings, week, component, mode, |key| std::env::var(key).ok())
    }

    /// Resolve and check inputs with an explicit environment lookup.
    ///
    /// Fails with [`QualityError::MissingInput`] when the input directory or a
    /// required file is absent. Remote mode also needs a session credential
    /// ([`RemoteError::MissingSession`]) and the instance and report ids
    /// ([`QualityError::InvalidConfig`]).
    pub fn resolve_with<F>(
        settings: &Settings,
        week: &str,
        component: &str,
        mode: SourceMode,
        lookup: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let weeks_dir = &settings.paths.weeks_dir;
        let week_dir = weeks_dir.join(week);
        if !week_dir.is_dir() {
            let weeks = list_weeks(weeks_dir);
            return Err(QualityError::missing_input(
                week_dir,
                format!(
                    "Create the week folder and export the reports into it. Available weeks: {}",
                    describe_available(&weeks)
                ),
            ));
        }

        let dir = week_dir.join(component);
        if !dir.is_dir() {
            let components = list_components(weeks_dir, week);
            return Err(QualityError::missing_input(
                dir,
                format!(
                    "No input folder for component '{component}' in week {week}. Available components: {}",
                    describe_available(&components)
                ),
            ));
        }

        let local = LocalInputs::new(dir, settings.inputs.clone());
        match mode {
            SourceMode::Local => {
                let missing = local.missing(LOCAL_REQUIRED);
                if let Some(first) = missing.first() {
                    return Err(QualityError::missing_input(
                        local.path(first),
                        format!(
                            "Export the missing report(s) into {}: {}",
                            local.dir.display(),
                            missing.join(", ")
                        ),
                    ));
                }
                debug!("Resolved local inputs in {}", local.dir.display());
                Ok(Self::Local(local))
            }
            SourceMode::Remote => Self::resolve_remote(settings, local, lookup),
        }
    }

    fn resolve_remote<F>(settings: &Settings, local: LocalInputs, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let files = &local.files;
        if !local.path(&files.risks).is_file() {
            return Err(QualityError::missing_input(
                local.path(&files.risks),
                format!("Write the weekly risk notes to {}", files.risks),
            ));
        }
        if !local.path(&files.deployment).is_file() && !local.path(&files.coverage).is_file() {
            return Err(QualityError::missing_input(
                local.path(&files.deployment),
                format!(
                    "Remote mode needs deployment or coverage data: export {} or {}",
                    files.deployment, files.coverage
                ),
            ));
        }

        let remote = &settings.remote;
        let session_id = lookup(&remote.session_env)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RemoteError::MissingSession {
                env_var: remote.session_env.clone(),
            })?;
        let instance = remote
            .instance
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                QualityError::invalid_config(
                    "remote.instance",
                    format!("required for remote mode (or set ${})", remote.instance_env),
                )
            })?;
        let prb_report_id = remote
            .prb_report_id
            .clone()
            .ok_or_else(|| QualityError::invalid_config("remote.prb_report_id", "required for remote mode"))?;
        let bug_report_id = remote
            .bug_report_id
            .clone()
            .ok_or_else(|| QualityError::invalid_config("remote.bug_report_id", "required for remote mode"))?;

        Ok(Self::Remote(RemoteInputs {
            local,
            instance,
            session_id,
            api_version: remote.api_version.clone(),
            prb_report_id,
            bug_report_id,
            timeout: Duration::from_secs(remote.timeout_secs),
        }))
    }

    #[must_use]
    pub fn mode(&self) -> SourceMode {
        match self {
            Self::Local(_) => SourceMode::Local,
            Self::Remote(_) => SourceMode::Remote,
        }
    }

    #[must_use]
    pub fn input_dir(&self) -> &Path {
        match self {
            Self::Local(local) => local.dir(),
            Self::Remote(remote) => remote.local.dir(),
        }
    }

    /// Read (and in remote mode fetch) every source.
    pub async fn collect(&self) -> Result<SourceBundle> {
        match self {
            Self::Local(local) => Ok(local.read_all(true)),
            Self::Remote(remote) => remote.collect().await,
        }
    }
}

// ============================================================================
// Directory listings
// ============================================================================

fn subdirectories(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

/// Week folders under `weeks_dir`, sorted.
#[must_use]
pub fn list_weeks(weeks_dir: &Path) -> Vec<String> {
    subdirectories(weeks_dir)
}

/// Component folders for `week`, sorted.
#[must_use]
pub fn list_components(weeks_dir: &Path, week: &str) -> Vec<String> {
    subdirectories(&weeks_dir.join(week))
}

fn describe_available(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestFixture;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_resolve_local_with_required_inputs() {
        let fixture = TestFixture::with_required_inputs("cw37", "Engine");
        let source =
            InputSource::resolve_with(&fixture.settings(), "cw37", "Engine", SourceMode::Local, no_env)
                .unwrap();
        assert_eq!(source.mode(), SourceMode::Local);
        assert_eq!(source.input_dir(), fixture.input_dir("cw37", "Engine"));
    }

    #[test]
    fn test_missing_required_file_names_it() {
        let fixture = TestFixture::with_required_inputs("cw37", "Engine");
        fixture.remove_input("cw37", "Engine", "ci.txt");
        fixture.remove_input("cw37", "Engine", "security.txt");

        let err =
            InputSource::resolve_with(&fixture.settings(), "cw37", "Engine", SourceMode::Local, no_env)
                .unwrap_err();
        assert_eq!(err.exit_code(), 6);
        let hint = err.remediation().unwrap();
        assert!(hint.contains("ci.txt"));
        assert!(hint.contains("security.txt"));
    }

    #[test]
    fn test_missing_component_lists_available() {
        let fixture = TestFixture::with_required_inputs("cw37", "Engine");
        fixture.write_input("cw37", "Storage", "risks.txt", "Feature: A\nStatus: Green\n");

        let err =
            InputSource::resolve_with(&fixture.settings(), "cw37", "Planner", SourceMode::Local, no_env)
                .unwrap_err();
        assert!(matches!(err, QualityError::MissingInput { .. }));
        let hint = err.remediation().unwrap();
        assert!(hint.contains("Engine, Storage"));
    }

    #[test]
    fn test_missing_week_lists_weeks() {
        let fixture = TestFixture::with_required_inputs("cw37", "Engine");
        let err =
            InputSource::resolve_with(&fixture.settings(), "cw40", "Engine", SourceMode::Local, no_env)
                .unwrap_err();
        assert!(err.remediation().unwrap().contains("cw37"));
    }

    #[tokio::test]
    async fn test_collect_local_reads_every_source() {
        let fixture = TestFixture::with_all_inputs("cw37", "Engine");
        let source =
            InputSource::resolve_with(&fixture.settings(), "cw37", "Engine", SourceMode::Local, no_env)
                .unwrap();
        let bundle = source.collect().await.unwrap();

        assert_eq!(bundle.mode, SourceMode::Local);
        assert_eq!(bundle.risks.records.len(), 2);
        assert_eq!(bundle.bugs.records.len(), 2);
        assert!(!bundle.problem_reports.records.is_empty());
        assert_eq!(bundle.deployments.records.len(), 2);
        assert!(bundle.abs_issues.records.is_empty());
        assert_eq!(bundle.narrative.as_deref(), Some("Rollout of 258.11 completed."));

        let annotated = bundle
            .problem_reports
            .records
            .iter()
            .find(|p| p.id == "PRB-0012345")
            .unwrap();
        assert_eq!(annotated.augmentation.as_deref(), Some("Follow-up scheduled"));
    }

    #[test]
    fn test_remote_requires_session() {
        let fixture = TestFixture::with_all_inputs("cw37", "Engine");
        let err =
            InputSource::resolve_with(&fixture.settings(), "cw37", "Engine", SourceMode::Remote, no_env)
                .unwrap_err();
        assert!(matches!(
            err,
            QualityError::Remote(RemoteError::MissingSession { .. })
        ));
        assert_eq!(err.exit_code(), 9);
    }

    #[test]
    fn test_remote_requires_deployment_or_coverage() {
        let fixture = TestFixture::with_required_inputs("cw37", "Engine");
        let err = InputSource::resolve_with(
            &fixture.settings(),
            "cw37",
            "Engine",
            SourceMode::Remote,
            |_| Some("sess".to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, QualityError::MissingInput { .. }));
    }

    #[test]
    fn test_remote_requires_report_ids() {
        let fixture = TestFixture::with_all_inputs("cw37", "Engine");
        let mut settings = fixture.settings();
        settings.remote.instance = Some("reports.example.com".to_string());

        let err = InputSource::resolve_with(&settings, "cw37", "Engine", SourceMode::Remote, |_| {
            Some("sess".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, QualityError::InvalidConfig { ref field, .. } if field == "remote.prb_report_id"));
    }

    #[tokio::test]
    async fn test_collect_remote_fetches_incidents() {
        let server = MockServer::start().await;
        let describe = json!({
            "reportMetadata": {"detailColumns": ["A.Id", "A.Subject", "A.Priority"]},
            "reportExtendedMetadata": {"detailColumnInfo": {
                "A.Id": {"label": "Id"},
                "A.Subject": {"label": "Subject"},
                "A.Priority": {"label": "Priority"}
            }}
        });
        let rows = |id: &str| {
            json!({"factMap": {"T!T": {"rows": [
                {"dataCells": [
                    {"label": id, "value": id},
                    {"label": "Replica falls behind", "value": "Replica falls behind"},
                    {"label": "P1", "value": "P1"}
                ]}
            ]}}})
        };
        for (report, id) in [("00OPRB", "PRB-0012345"), ("00OBUG", "W-12345678")] {
            Mock::given(method("GET"))
                .and(path(format!("/services/data/v58.0/analytics/reports/{report}/describe")))
                .respond_with(ResponseTemplate::new(200).set_body_json(describe.clone()))
                .mount(&server)
                .await;
            Mock::given(method("POST"))
                .and(path(format!("/services/data/v58.0/analytics/reports/{report}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(rows(id)))
                .mount(&server)
                .await;
        }

        let fixture = TestFixture::with_all_inputs("cw37", "Engine");
        let mut settings = fixture.settings();
        settings.remote.instance = Some(server.uri());
        settings.remote.prb_report_id = Some("00OPRB".to_string());
        settings.remote.bug_report_id = Some("00OBUG".to_string());

        let source = InputSource::resolve_with(&settings, "cw37", "Engine", SourceMode::Remote, |_| {
            Some("sess-1".to_string())
        })
        .unwrap();
        let bundle = source.collect().await.unwrap();

        assert_eq!(bundle.mode, SourceMode::Remote);
        assert_eq!(bundle.problem_reports.records.len(), 1);
        assert_eq!(bundle.bugs.records[0].id, "W-12345678");
        assert_eq!(
            bundle.problem_reports.records[0].augmentation.as_deref(),
            Some("Follow-up scheduled")
        );
        assert_eq!(bundle.risks.records.len(), 2);
    }

    #[test]
    fn test_skipped_by_source_omits_clean_sources() {
        let mut bundle = SourceBundle::default();
        bundle.bugs.warnings.push(crate::sources::ParseWarning::new("bugs.txt", 3, "short row"));
        let skipped = bundle.skipped_by_source();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped["bugs"], 1);
    }

    #[test]
    fn test_remote_inputs_debug_redacts_session() {
        let fixture = TestFixture::with_all_inputs("cw37", "Engine");
        let mut settings = fixture.settings();
        settings.remote.instance = Some("reports.example.com".to_string());
        settings.remote.prb_report_id = Some("a".to_string());
        settings.remote.bug_report_id = Some("b".to_string());
        let source = InputSource::resolve_with(&settings, "cw37", "Engine", SourceMode::Remote, |_| {
            Some("top-secret".to_string())
        })
        .unwrap();
        assert!(!format!("{source:?}").contains("top-secret"));
    }
}
