//! Data aggregation.
//!
//! Combines a [`SourceBundle`] and git metrics into one
//! [`QualityReportData`]. Records pass through untouched; only the
//! [`ReportSummary`] is computed here. Missing sources yield empty lists and
//! zero counts, never an error.

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::input::SourceBundle;
use crate::model::{
    BugRecord, CoverageMetric, CoverageSummary, DeploymentEvent, GitMetrics, Priority,
    ProblemReport, QualityReportData, ReportSummary, RiskItem, RiskStatus, SecurityFinding,
    StaggerDeployment, WorkItem, is_closed_status,
};
use crate::window::ReportWindow;

/// Fleet size assumed when no stagger rollout data is available.
pub const DEFAULT_FLEET_SIZE: u64 = 1000;

/// Identity of one report run.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub week: Option<String>,
    pub component: String,
    pub window: ReportWindow,
    /// How many deployments the summary keeps.
    pub recent_deployments: usize,
}

impl ReportContext {
    #[must_use]
    pub fn new(week: Option<String>, component: impl Into<String>, window: ReportWindow) -> Self {
        Self {
            week,
            component: component.into(),
            window,
            recent_deployments: 5,
        }
    }

    #[must_use]
    pub fn with_recent_deployments(mut self, n: usize) -> Self {
        self.recent_deployments = n;
        self
    }
}

/// Build the aggregate for one run.
#[must_use]
pub fn aggregate(bundle: SourceBundle, git: GitMetrics, ctx: &ReportContext) -> QualityReportData {
    bundle.log_warnings();
    let skipped_rows = bundle.skipped_by_source();

    let SourceBundle {
        mode,
        risks,
        problem_reports,
        bugs,
        ci_issues,
        leftshift_issues,
        abs_issues,
        security,
        deployments,
        stagger_rollout,
        coverage,
        coverage_summary,
        narrative,
        ..
    } = bundle;

    let mut data = QualityReportData {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        week: ctx.week.clone(),
        component: ctx.component.clone(),
        window: ctx.window,
        mode,
        risks: risks.records,
        problem_reports: problem_reports.records,
        bugs: bugs.records,
        ci_issues: ci_issues.records,
        leftshift_issues: leftshift_issues.records,
        abs_issues: abs_issues.records,
        security_findings: security.records,
        deployments: deployments.records,
        stagger_rollout: stagger_rollout.records,
        deployment_narrative: narrative,
        coverage: coverage.records,
        coverage_summary: coverage_summary.records.into_iter().next(),
        git,
        summary: ReportSummary::default(),
    };
    data.summary = summarize(&data, ctx.recent_deployments, skipped_rows);

    info!(
        "Aggregated {} risks, {} PRBs, {} bugs, {} deployments ({} lines skipped)",
        data.risks.len(),
        data.problem_reports.len(),
        data.bugs.len(),
        data.deployments.len(),
        data.summary.total_skipped()
    );
    data
}

/// Compute the summary for already-assembled records.
#[must_use]
pub fn summarize(
    data: &QualityReportData,
    recent_deployments: usize,
    skipped_rows: BTreeMap<String, usize>,
) -> ReportSummary {
    let fleet_size = fleet_size(&data.stagger_rollout);
    let bugs_per_cell = data.bugs.len() as f64 / fleet_size as f64;
    debug!("Fleet size {} cells, {:.4} bugs per cell", fleet_size, bugs_per_cell);

    ReportSummary {
        risk_counts: risk_counts(&data.risks),
        prb_by_priority: count_by_priority(data.problem_reports.iter().map(|p| p.priority)),
        bug_by_priority: count_by_priority(data.bugs.iter().map(|b| b.priority)),
        active_prbs: active_prbs(&data.problem_reports),
        active_bugs: active_bugs(&data.bugs),
        ci_total: data.ci_issues.len(),
        ci_p0_p1: urgent_work_items(&data.ci_issues),
        leftshift_total: data.leftshift_issues.len(),
        leftshift_p0_p1: urgent_work_items(&data.leftshift_issues),
        abs_total: data.abs_issues.len(),
        security_total: data.security_findings.len(),
        security_p0_p1: data
            .security_findings
            .iter()
            .filter(|f| f.priority.is_urgent())
            .count(),
        security_by_category: security_by_category(&data.security_findings),
        recent_deployments: most_recent(&data.deployments, recent_deployments),
        fleet_size,
        bugs_per_cell,
        average_line_coverage: average_line_coverage(&data.coverage, data.coverage_summary.as_ref()),
        skipped_rows,
    }
}

fn risk_counts(risks: &[RiskItem]) -> BTreeMap<RiskStatus, usize> {
    let mut counts = BTreeMap::new();
    for risk in risks {
        *counts.entry(risk.status).or_insert(0) += 1;
    }
    counts
}

fn count_by_priority(priorities: impl Iterator<Item = Priority>) -> BTreeMap<Priority, usize> {
    let mut counts = BTreeMap::new();
    for priority in priorities {
        *counts.entry(priority).or_insert(0) += 1;
    }
    counts
}

fn active_prbs(reports: &[ProblemReport]) -> usize {
    reports.iter().filter(|p| !is_closed_status(&p.status)).count()
}

fn active_bugs(bugs: &[BugRecord]) -> usize {
    bugs.iter().filter(|b| !is_closed_status(&b.status)).count()
}

fn urgent_work_items(items: &[WorkItem]) -> usize {
    items.iter().filter(|i| i.priority.is_urgent()).count()
}

fn security_by_category(findings: &[SecurityFinding]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for finding in findings {
        *counts.entry(finding.category.label().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Deployments are stored newest first, so the head of the list is the most
/// recent.
fn most_recent(deployments: &[DeploymentEvent], n: usize) -> Vec<DeploymentEvent> {
    deployments.iter().take(n).cloned().collect()
}

/// Total cells across the stagger rollout, or [`DEFAULT_FLEET_SIZE`].
#[must_use]
pub fn fleet_size(rollout: &[StaggerDeployment]) -> u64 {
    match rollout.iter().map(|s| s.cell_count).sum::<u64>() {
        0 => DEFAULT_FLEET_SIZE,
        total => total,
    }
}

fn average_line_coverage(metrics: &[CoverageMetric], summary: Option<&CoverageSummary>) -> Option<f64> {
    if metrics.is_empty() {
        return summary.map(|s| s.overall.line_coverage);
    }
    let total: f64 = metrics.iter().map(|m| m.line_coverage).sum();
    Some(total / metrics.len() as f64)
}
