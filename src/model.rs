//! Typed records for every quality signal and the aggregate root.
//!
//! Records are created once by the source readers and never mutated
//! afterwards; [`QualityReportData`] is assembled by the aggregator and only
//! read from then on.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::window::ReportWindow;

// ============================================================================
// Shared vocabulary
// ============================================================================

/// Delivery status of a tracked feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskStatus {
    Green,
    AtRisk,
    Red,
}

impl RiskStatus {
    /// Parse the status words used in risk notes.
    ///
    /// Returns `None` for anything that is not a recognised status.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "green" | "ontrack" | "ok" => Some(Self::Green),
            "atrisk" | "amber" | "yellow" => Some(Self::AtRisk),
            "red" | "blocked" | "offtrack" => Some(Self::Red),
            _ => None,
        }
    }

    /// Severity rank, highest first when sorting ascending.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Red => 0,
            Self::AtRisk => 1,
            Self::Green => 2,
        }
    }
}

impl fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Green => "Green",
            Self::AtRisk => "At Risk",
            Self::Red => "Red",
        };
        f.write_str(label)
    }
}

/// Priority of an incident or work item. `P0` is the most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
    P4,
    #[default]
    Unknown,
}

impl Priority {
    /// Parse `P0`..`P4`, optionally followed by a label (`P1-High`) or a
    /// group count (`P2(11)`), and the plain words used by older exports.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        let upper = trimmed.to_uppercase();
        let bytes = upper.as_bytes();
        if bytes.len() >= 2 && bytes[0] == b'P' && bytes[1].is_ascii_digit() {
            let rest = &upper[2..];
            if rest.is_empty() || rest.starts_with('-') || rest.starts_with('(') || rest.starts_with(' ') {
                return match bytes[1] {
                    b'0' => Some(Self::P0),
                    b'1' => Some(Self::P1),
                    b'2' => Some(Self::P2),
                    b'3' => Some(Self::P3),
                    b'4' => Some(Self::P4),
                    _ => None,
                };
            }
            return None;
        }
        match upper.as_str() {
            "CRITICAL" | "BLOCKER" | "SEV0" | "SEV-0" => Some(Self::P0),
            "HIGH" | "MAJOR" | "SEV1" | "SEV-1" => Some(Self::P1),
            "MEDIUM" | "NORMAL" | "SEV2" | "SEV-2" => Some(Self::P2),
            "LOW" | "MINOR" | "SEV3" | "SEV-3" => Some(Self::P3),
            "MINIMAL" | "TRIVIAL" => Some(Self::P4),
            _ => None,
        }
    }

    /// Display label, e.g. `P1-High`.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::P0 => "P0-Critical",
            Self::P1 => "P1-High",
            Self::P2 => "P2-Medium",
            Self::P3 => "P3-Low",
            Self::P4 => "P4-Minimal",
            Self::Unknown => "Unprioritized",
        }
    }

    /// P0 and P1 items are reported separately in every summary.
    #[must_use]
    pub const fn is_urgent(&self) -> bool {
        matches!(self, Self::P0 | Self::P1)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Status words that mean the item needs no further attention.
pub const CLOSED_STATUSES: &[&str] = &["resolved", "closed", "fixed", "completed", "done"];

/// Whether a free-text status counts as closed.
#[must_use]
pub fn is_closed_status(status: &str) -> bool {
    let lower = status.trim().to_lowercase();
    CLOSED_STATUSES.iter().any(|s| lower == *s)
}

// ============================================================================
// Records
// ============================================================================

/// A tracked feature and its delivery risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    pub feature: String,
    pub status: RiskStatus,
    pub priority: String,
    pub description: String,
    pub last_updated: Option<NaiveDate>,
}

/// A problem report (incident) and its retrospective fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProblemReport {
    pub id: String,
    pub title: String,
    pub priority: Priority,
    pub status: String,
    pub team: String,
    pub created: Option<NaiveDate>,
    pub customer_impact: String,
    pub what_happened: String,
    pub customer_experience: String,
    pub proximate_cause: String,
    pub how_resolved: String,
    pub augmentation: Option<String>,
}

/// An active production bug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BugRecord {
    pub id: String,
    pub title: String,
    pub priority: Priority,
    pub status: String,
    pub component: String,
    pub build_version: String,
    pub reported: Option<NaiveDate>,
    pub assignee: String,
    pub augmentation: Option<String>,
}

/// Origin of a development-codeline work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    Ci,
    LeftShift,
    Abs,
}

impl IssueKind {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Ci => "CI",
            Self::LeftShift => "LeftShift",
            Self::Abs => "ABS",
        }
    }
}

/// A CI, LeftShift or ABS issue. All three share the export shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub kind: IssueKind,
    pub team: String,
    pub priority: Priority,
    pub subject: String,
    pub status: String,
    pub build_version: String,
    pub created: Option<NaiveDate>,
    pub augmentation: Option<String>,
}

/// Failures reported by the CI system.
pub type CiIssueRecord = WorkItem;
/// Issues caught before production by LeftShift infrastructure.
pub type LeftShiftRecord = WorkItem;

/// Static-analysis categories reported by security scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SecurityCategory {
    ResourceLeak,
    BufferOverrun,
    UseAfterFree,
    UninitializedVariable,
    NoEffect,
    ArrayVsSingleton,
    #[default]
    Other,
}

impl SecurityCategory {
    /// Scanner checker names, most specific first (`ARRAY_VS_SINGLETON`
    /// must win over `OVERRUN`-style substrings).
    const CHECKERS: &'static [(&'static str, SecurityCategory)] = &[
        ("RESOURCE_LEAK", SecurityCategory::ResourceLeak),
        ("ARRAY_VS_SINGLETON", SecurityCategory::ArrayVsSingleton),
        ("USE_AFTER_FREE", SecurityCategory::UseAfterFree),
        ("OVERRUN", SecurityCategory::BufferOverrun),
        ("UNINIT", SecurityCategory::UninitializedVariable),
        ("NO_EFFECT", SecurityCategory::NoEffect),
    ];

    /// Find the checker name mentioned in a line of scanner output.
    #[must_use]
    pub fn detect(text: &str) -> Option<Self> {
        Self::CHECKERS
            .iter()
            .find(|(needle, _)| text.contains(needle))
            .map(|(_, category)| *category)
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ResourceLeak => "Resource Leak",
            Self::BufferOverrun => "Buffer Overrun",
            Self::UseAfterFree => "Use After Free",
            Self::UninitializedVariable => "Uninitialized Variable",
            Self::NoEffect => "No Effect",
            Self::ArrayVsSingleton => "Array vs Singleton",
            Self::Other => "Other",
        }
    }
}

/// A security scan finding tracked as a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub id: String,
    pub category: SecurityCategory,
    pub priority: Priority,
    pub summary: String,
    pub file_path: String,
    pub assignee: String,
    pub status: String,
    pub build_version: String,
    pub team: String,
    pub augmentation: Option<String>,
}

/// One release deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub version: String,
    pub date: NaiveDate,
    pub environment: String,
    pub status: String,
    pub features: Vec<String>,
    pub issue: Option<String>,
}

/// Rollout phase derived from the stagger name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutPhase {
    Sandbox,
    ProductionRollout,
    Unknown,
}

impl RolloutPhase {
    #[must_use]
    pub fn from_stagger(stagger: &str) -> Self {
        let upper = stagger.trim().to_uppercase();
        if upper.starts_with("SB") {
            Self::Sandbox
        } else if upper.starts_with('R') {
            Self::ProductionRollout
        } else {
            Self::Unknown
        }
    }
}

/// Cell counts per stagger wave from the deployment dashboard export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaggerDeployment {
    pub stagger: String,
    pub version: String,
    pub cell_count: u64,
    pub phase: RolloutPhase,
}

/// Per-component test coverage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetric {
    pub component: String,
    pub line_coverage: f64,
    pub branch_coverage: f64,
    pub function_coverage: f64,
    pub test_count: u64,
}

/// One column of the code-quality dashboard's coverage panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CoverageFigures {
    pub coverage: f64,
    pub line_coverage: f64,
    pub condition_coverage: f64,
    pub lines_to_cover: u64,
    pub uncovered_lines: u64,
    pub conditions_to_cover: u64,
    pub uncovered_conditions: u64,
}

/// Coverage for new code and for the whole codebase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CoverageSummary {
    pub new_code: CoverageFigures,
    pub overall: CoverageFigures,
}

/// Code churn risk level for the reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChurnRisk {
    Low,
    Medium,
    High,
    #[default]
    Unknown,
}

/// Lines changed in one file over the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChurn {
    pub path: String,
    pub lines_added: u64,
    pub lines_deleted: u64,
}

impl FileChurn {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.lines_added + self.lines_deleted
    }
}

/// Commit and churn statistics for the reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitMetrics {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub commit_count: u64,
    pub files_changed: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub churn: u64,
    pub authors: Vec<String>,
    pub most_changed_files: Vec<FileChurn>,
    pub commits_per_day: f64,
    pub churn_risk: ChurnRisk,
}

impl GitMetrics {
    /// Zeroed metrics used whenever git analysis is unavailable.
    #[must_use]
    pub fn empty(window: &ReportWindow) -> Self {
        Self {
            window_start: window.start,
            window_end: window.end,
            commit_count: 0,
            files_changed: 0,
            lines_added: 0,
            lines_deleted: 0,
            churn: 0,
            authors: Vec::new(),
            most_changed_files: Vec::new(),
            commits_per_day: 0.0,
            churn_risk: ChurnRisk::Unknown,
        }
    }
}

// ============================================================================
// Aggregate root
// ============================================================================

/// Where the incident data for a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Exported files only.
    #[default]
    Local,
    /// PRBs and bugs from the remote reports API.
    Remote,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Counts derived from the records; see [`crate::aggregate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReportSummary {
    pub risk_counts: BTreeMap<RiskStatus, usize>,
    pub prb_by_priority: BTreeMap<Priority, usize>,
    pub bug_by_priority: BTreeMap<Priority, usize>,
    pub active_prbs: usize,
    pub active_bugs: usize,
    pub ci_total: usize,
    pub ci_p0_p1: usize,
    pub leftshift_total: usize,
    pub leftshift_p0_p1: usize,
    pub abs_total: usize,
    pub security_total: usize,
    pub security_p0_p1: usize,
    pub security_by_category: BTreeMap<String, usize>,
    pub recent_deployments: Vec<DeploymentEvent>,
    pub fleet_size: u64,
    pub bugs_per_cell: f64,
    pub average_line_coverage: Option<f64>,
    pub skipped_rows: BTreeMap<String, usize>,
}

impl ReportSummary {
    /// Qualitative reading of `bugs_per_cell`.
    #[must_use]
    pub fn bug_density_rating(&self) -> &'static str {
        if self.bugs_per_cell < 0.05 {
            "Excellent"
        } else if self.bugs_per_cell < 0.1 {
            "Good"
        } else {
            "Review Needed"
        }
    }

    /// Total skipped lines across all sources.
    #[must_use]
    pub fn total_skipped(&self) -> usize {
        self.skipped_rows.values().sum()
    }
}

/// The merged, read-only snapshot of all quality data for one report run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReportData {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub week: Option<String>,
    pub component: String,
    pub window: ReportWindow,
    pub mode: SourceMode,
    pub risks: Vec<RiskItem>,
    pub problem_reports: Vec<ProblemReport>,
    pub bugs: Vec<BugRecord>,
    pub ci_issues: Vec<CiIssueRecord>,
    pub leftshift_issues: Vec<LeftShiftRecord>,
    pub abs_issues: Vec<WorkItem>,
    pub security_findings: Vec<SecurityFinding>,
    pub deployments: Vec<DeploymentEvent>,
    pub stagger_rollout: Vec<StaggerDeployment>,
    pub deployment_narrative: Option<String>,
    pub coverage: Vec<CoverageMetric>,
    pub coverage_summary: Option<CoverageSummary>,
    pub git: GitMetrics,
    pub summary: ReportSummary,
}

impl QualityReportData {
    /// True when no source contributed a single record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.risks.is_empty()
            && self.problem_reports.is_empty()
            && self.bugs.is_empty()
            && self.ci_issues.is_empty()
            && self.leftshift_issues.is_empty()
            && self.abs_issues.is_empty()
            && self.security_findings.is_empty()
            && self.deployments.is_empty()
            && self.stagger_rollout.is_empty()
            && self.coverage.is_empty()
            && self.coverage_summary.is_none()
    }

    /// The `n` most recent deployments, newest first.
    #[must_use]
    pub fn most_recent_deployments(&self, n: usize) -> &[DeploymentEvent] {
        &self.deployments[..n.min(self.deployments.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_status_parse_variants() {
        assert_eq!(RiskStatus::parse("Green"), Some(RiskStatus::Green));
        assert_eq!(RiskStatus::parse("At Risk"), Some(RiskStatus::AtRisk));
        assert_eq!(RiskStatus::parse("AtRisk"), Some(RiskStatus::AtRisk));
        assert_eq!(RiskStatus::parse("at-risk"), Some(RiskStatus::AtRisk));
        assert_eq!(RiskStatus::parse("RED"), Some(RiskStatus::Red));
        assert_eq!(RiskStatus::parse("Off Track"), Some(RiskStatus::Red));
        assert_eq!(RiskStatus::parse("purple"), None);
    }

    #[test]
    fn test_priority_parse_forms() {
        assert_eq!(Priority::parse("P1"), Some(Priority::P1));
        assert_eq!(Priority::parse("P2-Medium"), Some(Priority::P2));
        assert_eq!(Priority::parse("P4(16)"), Some(Priority::P4));
        assert_eq!(Priority::parse("p0"), Some(Priority::P0));
        assert_eq!(Priority::parse("High"), Some(Priority::P1));
        assert_eq!(Priority::parse("PRB-1234567"), None);
        assert_eq!(Priority::parse("P9"), None);
    }

    #[test]
    fn test_priority_ordering_is_urgency() {
        let mut priorities = vec![Priority::Unknown, Priority::P3, Priority::P0, Priority::P2];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::P0, Priority::P2, Priority::P3, Priority::Unknown]
        );
        assert!(Priority::P1.is_urgent());
        assert!(!Priority::P2.is_urgent());
    }

    #[test]
    fn test_security_category_detection() {
        assert_eq!(
            SecurityCategory::detect("CID 1234: RESOURCE_LEAK in /src/a.c"),
            Some(SecurityCategory::ResourceLeak)
        );
        assert_eq!(
            SecurityCategory::detect("ARRAY_VS_SINGLETON (x)"),
            Some(SecurityCategory::ArrayVsSingleton)
        );
        assert_eq!(SecurityCategory::detect("flaky test"), None);
    }

    #[test]
    fn test_rollout_phase_from_stagger() {
        assert_eq!(RolloutPhase::from_stagger("SB1"), RolloutPhase::Sandbox);
        assert_eq!(
            RolloutPhase::from_stagger("R0"),
            RolloutPhase::ProductionRollout
        );
        assert_eq!(RolloutPhase::from_stagger("X"), RolloutPhase::Unknown);
    }

    #[test]
    fn test_closed_status() {
        assert!(is_closed_status("Resolved"));
        assert!(is_closed_status(" closed "));
        assert!(!is_closed_status("In Progress"));
    }

    #[test]
    fn test_risk_counts_serialize_with_status_keys() {
        let mut summary = ReportSummary::default();
        summary.risk_counts.insert(RiskStatus::AtRisk, 1);
        summary.risk_counts.insert(RiskStatus::Green, 1);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["risk_counts"]["AtRisk"], 1);
        assert_eq!(json["risk_counts"]["Green"], 1);
    }
}
