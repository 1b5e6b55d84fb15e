//! Prompt sections and their item renderers.
//!
//! A [`PromptSection`] is a heading, fixed context lines, zero or more ranked
//! [`ItemList`]s and, for deployments, the free-text narrative. Lists are
//! ranked on construction (highest priority first, then most recent) so the
//! budget can always drop from the tail.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::model::{
    BugRecord, CoverageMetric, DeploymentEvent, FileChurn, Priority, ProblemReport,
    QualityReportData, RiskItem, RiskStatus, SecurityFinding, StaggerDeployment, WorkItem,
};

/// The fixed order of sections in every prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectionKind {
    Framing,
    Risks,
    Incidents,
    Deployments,
    Coverage,
    Recommendations,
}

impl SectionKind {
    pub const ORDER: [SectionKind; 6] = [
        Self::Framing,
        Self::Risks,
        Self::Incidents,
        Self::Deployments,
        Self::Coverage,
        Self::Recommendations,
    ];

    #[must_use]
    pub const fn heading(&self) -> &'static str {
        match self {
            Self::Framing => "# Weekly Quality Report Input",
            Self::Risks => "## Risk Data",
            Self::Incidents => "## Incident Data",
            Self::Deployments => "## Deployment Data",
            Self::Coverage => "## Codeline Health and Coverage",
            Self::Recommendations => "## Report Request",
        }
    }
}

/// How much detail the report should go into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    #[default]
    Comprehensive,
    Compact,
}

impl ReportType {
    fn guidance(self) -> &'static str {
        match self {
            Self::Comprehensive => "Cover every section in full, with incident narratives for P0/P1 PRBs.",
            Self::Compact => "Keep every section to a short paragraph or a few bullets.",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comprehensive => write!(f, "comprehensive"),
            Self::Compact => write!(f, "compact"),
        }
    }
}

/// A ranked list of rendered items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemList {
    /// Plural label used in headings and omission notes.
    pub label: &'static str,
    /// Optional context line shown under the list heading.
    pub context: Option<String>,
    /// Rendered items, best ranked first.
    pub items: Vec<String>,
    /// Items dropped by the budget so far.
    pub omitted: usize,
    /// List-specific cap applied before the per-section cap.
    pub cap: Option<usize>,
    /// Once emptied by the budget, render only the heading and the note.
    pub collapsed: bool,
}

impl ItemList {
    #[must_use]
    pub fn new(label: &'static str, items: Vec<String>) -> Self {
        Self {
            label,
            context: None,
            items,
            omitted: 0,
            cap: None,
            collapsed: false,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    #[must_use]
    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = Some(cap);
        self
    }

    /// Drop items beyond `keep`, counting them as omitted.
    pub fn truncate(&mut self, keep: usize) {
        if self.items.len() > keep {
            self.omitted += self.items.len() - keep;
            self.items.truncate(keep);
        }
    }

    /// Drop the lowest-ranked item. Returns false when the list is empty.
    pub fn drop_last(&mut self) -> bool {
        if self.items.pop().is_some() {
            self.omitted += 1;
            true
        } else {
            false
        }
    }

    /// The exact omission note, if anything was dropped.
    #[must_use]
    pub fn omission_note(&self) -> Option<String> {
        (self.omitted > 0).then(|| format!("({} more {} omitted)", self.omitted, self.label))
    }

    /// Collapse an emptied list. Lists that still hold items are unchanged.
    pub fn collapse(&mut self) {
        if self.items.is_empty() {
            self.collapsed = true;
        }
    }

    fn render(&self, lines: &mut Vec<String>) {
        if self.collapsed {
            if let Some(note) = self.omission_note() {
                lines.push(format!("### {}", capitalize(self.label)));
                lines.push(note);
                lines.push(String::new());
            }
            return;
        }
        lines.push(format!("### {}", capitalize(self.label)));
        if let Some(context) = &self.context {
            lines.push(context.clone());
        }
        if self.items.is_empty() && self.omitted == 0 {
            lines.push("None reported.".to_string());
        }
        lines.extend(self.items.iter().cloned());
        if let Some(note) = self.omission_note() {
            lines.push(note);
        }
        lines.push(String::new());
    }
}

/// One section of the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSection {
    pub kind: SectionKind,
    pub lines: Vec<String>,
    pub lists: Vec<ItemList>,
    pub narrative: Option<String>,
}

impl PromptSection {
    #[must_use]
    pub fn new(kind: SectionKind) -> Self {
        Self {
            kind,
            lines: Vec::new(),
            lists: Vec::new(),
            narrative: None,
        }
    }

    #[must_use]
    pub fn with_lines(mut self, lines: Vec<String>) -> Self {
        self.lines = lines;
        self
    }

    #[must_use]
    pub fn with_list(mut self, list: ItemList) -> Self {
        self.lists.push(list);
        self
    }

    #[must_use]
    pub fn with_narrative(mut self, narrative: Option<String>) -> Self {
        self.narrative = narrative;
        self
    }

    /// Items still present across every list.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.lists.iter().map(|l| l.items.len()).sum()
    }

    #[must_use]
    pub fn omitted(&self) -> usize {
        self.lists.iter().map(|l| l.omitted).sum()
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut lines = vec![self.kind.heading().to_string(), String::new()];
        if !self.lines.is_empty() {
            lines.extend(self.lines.iter().cloned());
            lines.push(String::new());
        }
        if let Some(narrative) = &self.narrative {
            lines.push("### Deployment Narrative".to_string());
            lines.push(narrative.clone());
            lines.push(String::new());
        }
        for list in &self.lists {
            list.render(&mut lines);
        }
        lines.join("\n")
    }
}

/// Concatenate sections in order.
#[must_use]
pub fn render_all(sections: &[PromptSection]) -> String {
    let mut text = sections
        .iter()
        .map(PromptSection::render)
        .collect::<Vec<_>>()
        .join("\n");
    let trimmed = text.trim_end().len();
    text.truncate(trimmed);
    text.push('\n');
    text
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// Section construction
// ============================================================================

/// Build every section for `data`, in [`SectionKind::ORDER`].
#[must_use]
pub fn build_sections(
    data: &QualityReportData,
    recent_deployments: usize,
    report_type: ReportType,
) -> Vec<PromptSection> {
    vec![
        framing(data),
        risks(data),
        incidents(data),
        deployments(data, recent_deployments),
        coverage(data),
        recommendations(report_type),
    ]
}

fn framing(data: &QualityReportData) -> PromptSection {
    let s = &data.summary;
    let count = |status: RiskStatus| s.risk_counts.get(&status).copied().unwrap_or(0);
    let mut lines = vec![
        format!("Component: {}", data.component),
        format!("Reporting period: {}", data.window),
    ];
    if let Some(week) = &data.week {
        lines.push(format!("Week: {week}"));
    }
    lines.push(format!("Incident source: {}", data.mode));
    lines.push(String::new());
    lines.push(format!(
        "Risks: {} red, {} at risk, {} green",
        count(RiskStatus::Red),
        count(RiskStatus::AtRisk),
        count(RiskStatus::Green)
    ));
    lines.push(format!(
        "PRBs: {} total, {} active ({})",
        data.problem_reports.len(),
        s.active_prbs,
        priority_breakdown(&s.prb_by_priority)
    ));
    lines.push(format!(
        "Production bugs: {} total, {} active ({})",
        data.bugs.len(),
        s.active_bugs,
        priority_breakdown(&s.bug_by_priority)
    ));
    lines.push(format!(
        "Fleet: {} cells, {:.4} bugs per cell ({})",
        s.fleet_size,
        s.bugs_per_cell,
        s.bug_density_rating()
    ));
    lines.push(format!(
        "Codeline: {} CI issues ({} P0/P1), {} LeftShift ({} P0/P1), {} ABS, {} security findings ({} P0/P1)",
        s.ci_total,
        s.ci_p0_p1,
        s.leftshift_total,
        s.leftshift_p0_p1,
        s.abs_total,
        s.security_total,
        s.security_p0_p1
    ));
    PromptSection::new(SectionKind::Framing).with_lines(lines)
}

fn priority_breakdown(counts: &std::collections::BTreeMap<Priority, usize>) -> String {
    if counts.is_empty() {
        return "none".to_string();
    }
    counts
        .iter()
        .map(|(p, n)| format!("{}: {n}", p.label()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn risks(data: &QualityReportData) -> PromptSection {
    let mut risks: Vec<&RiskItem> = data.risks.iter().collect();
    risks.sort_by(|a, b| {
        a.status
            .rank()
            .cmp(&b.status.rank())
            .then_with(|| newest_first(a.last_updated, b.last_updated))
    });
    PromptSection::new(SectionKind::Risks).with_list(ItemList::new(
        "risks",
        risks.into_iter().map(render_risk).collect(),
    ))
}

fn incidents(data: &QualityReportData) -> PromptSection {
    let mut prbs: Vec<&ProblemReport> = data.problem_reports.iter().collect();
    prbs.sort_by(|a, b| by_priority_then_date(a.priority, a.created, b.priority, b.created));

    let mut bugs: Vec<&BugRecord> = data.bugs.iter().collect();
    bugs.sort_by(|a, b| by_priority_then_date(a.priority, a.reported, b.priority, b.reported));

    let mut security: Vec<&SecurityFinding> = data.security_findings.iter().collect();
    security.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

    PromptSection::new(SectionKind::Incidents)
        .with_list(
            ItemList::new("PRBs", prbs.into_iter().map(render_prb).collect()).with_context(
                "Each PRB lists what happened, the customer experience, the proximate cause and how it was resolved. Use them for incident narratives and lessons learned.",
            ),
        )
        .with_list(
            ItemList::new("production bugs", bugs.into_iter().map(render_bug).collect())
                .with_context("Evaluate bug counts relative to fleet size, not in absolute terms."),
        )
        .with_list(work_item_list("CI issues", &data.ci_issues))
        .with_list(work_item_list("LeftShift issues", &data.leftshift_issues))
        .with_list(work_item_list("ABS issues", &data.abs_issues))
        .with_list(ItemList::new(
            "security findings",
            security.into_iter().map(render_security).collect(),
        ))
}

fn work_item_list(label: &'static str, items: &[WorkItem]) -> ItemList {
    let mut sorted: Vec<&WorkItem> = items.iter().collect();
    sorted.sort_by(|a, b| by_priority_then_date(a.priority, a.created, b.priority, b.created));
    ItemList::new(label, sorted.into_iter().map(render_work_item).collect())
}

fn deployments(data: &QualityReportData, recent: usize) -> PromptSection {
    let mut lines = Vec::new();
    if !data.stagger_rollout.is_empty() {
        lines.push(
            "Rollout runs SB0 (sandbox), SB1, SB2, then R0 (production), R1, R2 (full rollout)."
                .to_string(),
        );
    }
    PromptSection::new(SectionKind::Deployments)
        .with_lines(lines)
        .with_narrative(data.deployment_narrative.clone())
        .with_list(
            ItemList::new(
                "deployments",
                data.deployments.iter().map(render_deployment).collect(),
            )
            .with_cap(recent),
        )
        .with_list(ItemList::new(
            "stagger waves",
            data.stagger_rollout.iter().map(render_stagger).collect(),
        ))
}

fn coverage(data: &QualityReportData) -> PromptSection {
    let mut lines = Vec::new();
    if let Some(avg) = data.summary.average_line_coverage {
        lines.push(format!("Average line coverage: {avg:.1}%"));
    }
    if let Some(summary) = &data.coverage_summary {
        lines.push(format!(
            "New code: {:.1}% coverage, {:.1}% line, {:.1}% condition ({} of {} lines uncovered)",
            summary.new_code.coverage,
            summary.new_code.line_coverage,
            summary.new_code.condition_coverage,
            summary.new_code.uncovered_lines,
            summary.new_code.lines_to_cover
        ));
        lines.push(format!(
            "Overall: {:.1}% coverage, {:.1}% line, {:.1}% condition ({} of {} lines uncovered)",
            summary.overall.coverage,
            summary.overall.line_coverage,
            summary.overall.condition_coverage,
            summary.overall.uncovered_lines,
            summary.overall.lines_to_cover
        ));
    }

    let git = &data.git;
    lines.push(format!(
        "Git churn {} to {}: {} commits by {} authors, {} files, +{}/-{} lines, {:.1} commits/day, churn risk {:?}",
        git.window_start,
        git.window_end,
        git.commit_count,
        git.authors.len(),
        git.files_changed,
        git.lines_added,
        git.lines_deleted,
        git.commits_per_day,
        git.churn_risk
    ));
    if git.commit_count == 0 {
        lines.push("Zero commits may indicate a planned quiet period.".to_string());
    }

    let mut metrics: Vec<&CoverageMetric> = data.coverage.iter().collect();
    metrics.sort_by(|a, b| {
        a.line_coverage
            .partial_cmp(&b.line_coverage)
            .unwrap_or(Ordering::Equal)
    });

    PromptSection::new(SectionKind::Coverage)
        .with_lines(lines)
        .with_list(ItemList::new(
            "coverage entries",
            metrics.into_iter().map(render_coverage).collect(),
        ))
        .with_list(ItemList::new(
            "changed files",
            git.most_changed_files.iter().map(render_file_churn).collect(),
        ))
}

fn recommendations(report_type: ReportType) -> PromptSection {
    let mut lines = vec![
        format!("Generate a {report_type} quality report based on the data above."),
        report_type.guidance().to_string(),
    ];
    lines.extend([
        "Write the report in Markdown with these sections:",
        "1. Executive Summary (overall quality status)",
        "2. Risk Assessment (risk items by status and priority)",
        "3. Incident Analysis (PRBs and production bugs by priority)",
        "4. Deployment Quality (recent deployments and rollout progress)",
        "5. Development Codeline Health (CI, LeftShift, ABS, security, coverage, churn)",
        "6. Recommendations (three to five actionable items)",
        "",
        "Do not add a title, report date, reporting period or attribution line.",
        "Focus on P0/P1 items and trends rather than absolute counts.",
        "Where a list above was shortened, say that the data was truncated.",
    ]
    .map(str::to_string));
    PromptSection::new(SectionKind::Recommendations).with_lines(lines)
}

// ============================================================================
// Ranking
// ============================================================================

fn newest_first<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn by_priority_then_date<T: Ord>(pa: Priority, da: Option<T>, pb: Priority, db: Option<T>) -> Ordering {
    pa.cmp(&pb).then_with(|| newest_first(da, db))
}

// ============================================================================
// Item renderers
// ============================================================================

fn push_field(parts: &mut Vec<String>, label: &str, value: &str) {
    if !value.trim().is_empty() {
        parts.push(format!("{label}: {}", value.trim()));
    }
}

fn render_risk(risk: &RiskItem) -> String {
    let mut line = format!("- [{}] {} (priority {})", risk.status, risk.feature, risk.priority);
    if !risk.description.is_empty() {
        line.push_str(&format!(": {}", risk.description));
    }
    if let Some(date) = risk.last_updated {
        line.push_str(&format!(" (updated {date})"));
    }
    line
}

fn render_prb(prb: &ProblemReport) -> String {
    let mut head = vec![format!("- {} [{}] {}", prb.id, prb.priority.label(), prb.title)];
    push_field(&mut head, "status", &prb.status);
    push_field(&mut head, "team", &prb.team);
    if let Some(date) = prb.created {
        head.push(format!("created: {date}"));
    }
    let mut lines = vec![head.join(" | ")];
    for (label, value) in [
        ("Customer impact", &prb.customer_impact),
        ("What happened", &prb.what_happened),
        ("Customer experience", &prb.customer_experience),
        ("Proximate cause", &prb.proximate_cause),
        ("How resolved", &prb.how_resolved),
    ] {
        if !value.trim().is_empty() {
            lines.push(format!("  {label}: {}", value.trim()));
        }
    }
    if let Some(note) = &prb.augmentation {
        lines.push(format!("  Note: {note}"));
    }
    lines.join("\n")
}

fn render_bug(bug: &BugRecord) -> String {
    let mut parts = vec![format!("- {} [{}] {}", bug.id, bug.priority.label(), bug.title)];
    push_field(&mut parts, "status", &bug.status);
    push_field(&mut parts, "team", &bug.component);
    push_field(&mut parts, "build", &bug.build_version);
    push_field(&mut parts, "assignee", &bug.assignee);
    if let Some(date) = bug.reported {
        parts.push(format!("reported: {date}"));
    }
    with_note(parts.join(" | "), bug.augmentation.as_deref())
}

fn render_work_item(item: &WorkItem) -> String {
    let mut parts = vec![format!("- {} [{}] {}", item.id, item.priority.label(), item.subject)];
    push_field(&mut parts, "status", &item.status);
    push_field(&mut parts, "team", &item.team);
    push_field(&mut parts, "build", &item.build_version);
    if let Some(date) = item.created {
        parts.push(format!("created: {date}"));
    }
    with_note(parts.join(" | "), item.augmentation.as_deref())
}

fn render_security(finding: &SecurityFinding) -> String {
    let mut parts = vec![format!(
        "- {} [{}] {}: {}",
        finding.id,
        finding.priority.label(),
        finding.category.label(),
        finding.summary
    )];
    push_field(&mut parts, "file", &finding.file_path);
    push_field(&mut parts, "status", &finding.status);
    push_field(&mut parts, "team", &finding.team);
    with_note(parts.join(" | "), finding.augmentation.as_deref())
}

fn render_deployment(event: &DeploymentEvent) -> String {
    let mut line = format!(
        "- {} on {} to {}: {}",
        event.version, event.date, event.environment, event.status
    );
    if !event.features.is_empty() {
        line.push_str(&format!("; features: {}", event.features.join(", ")));
    }
    if let Some(issue) = &event.issue {
        line.push_str(&format!("; issue: {issue}"));
    }
    line
}

fn render_stagger(wave: &StaggerDeployment) -> String {
    format!(
        "- {} {}: {} cells ({:?})",
        wave.stagger, wave.version, wave.cell_count, wave.phase
    )
}

fn render_coverage(metric: &CoverageMetric) -> String {
    format!(
        "- {}: line {:.1}%, branch {:.1}%, function {:.1}%, {} tests",
        metric.component,
        metric.line_coverage,
        metric.branch_coverage,
        metric.function_coverage,
        metric.test_count
    )
}

fn render_file_churn(file: &FileChurn) -> String {
    format!("- {} (+{}/-{})", file.path, file.lines_added, file.lines_deleted)
}

fn with_note(line: String, note: Option<&str>) -> String {
    match note {
        Some(note) => format!("{line}\n  Note: {note}"),
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omission_note_is_exact() {
        let mut list = ItemList::new("PRBs", vec!["a".into(), "b".into(), "c".into()]);
        assert!(list.omission_note().is_none());
        list.truncate(1);
        assert!(list.drop_last());
        assert!(!list.drop_last());
        assert_eq!(list.omission_note().as_deref(), Some("(3 more PRBs omitted)"));
    }

    #[test]
    fn test_empty_list_says_none() {
        let section =
            PromptSection::new(SectionKind::Risks).with_list(ItemList::new("risks", Vec::new()));
        let text = section.render();
        assert!(text.starts_with("## Risk Data"));
        assert!(text.contains("### Risks\nNone reported."));
    }

    #[test]
    fn test_newest_first_puts_undated_last() {
        let mut dates = vec![None, Some(1), Some(3), Some(2)];
        dates.sort_by(|a, b| newest_first(*a, *b));
        assert_eq!(dates, vec![Some(3), Some(2), Some(1), None]);
    }

    #[test]
    fn test_priority_then_date_ordering() {
        assert_eq!(
            by_priority_then_date(Priority::P1, Some(1), Priority::P2, Some(9)),
            Ordering::Less
        );
        assert_eq!(
            by_priority_then_date(Priority::P1, Some(1), Priority::P1, Some(9)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_render_all_ends_with_single_newline() {
        let sections = vec![
            PromptSection::new(SectionKind::Framing).with_lines(vec!["Component: X".into()]),
            recommendations(ReportType::default()),
        ];
        let text = render_all(&sections);
        assert!(text.ends_with("attribution line.\nFocus on P0/P1 items and trends rather than absolute counts.\nWhere a list above was shortened, say that the data was truncated.\n"));
        assert!(text.find("# Weekly").unwrap() < text.find("## Report Request").unwrap());
    }

    #[test]
    fn test_collapsed_list_keeps_only_heading_and_note() {
        let mut dropped = ItemList::new("PRBs", vec!["- PRB-1".into()])
            .with_context("Each PRB lists what happened.");
        dropped.truncate(0);
        dropped.collapse();
        let mut empty = ItemList::new("risks", Vec::new()).with_context("context");
        empty.collapse();

        let text = PromptSection::new(SectionKind::Incidents)
            .with_list(dropped)
            .with_list(empty)
            .render();
        assert!(text.contains("### PRBs\n(1 more PRBs omitted)"));
        assert!(!text.contains("what happened"));
        assert!(!text.contains("None reported."));
        assert!(!text.contains("### Risks"));
    }

    #[test]
    fn test_report_type_sets_request_wording() {
        let compact = recommendations(ReportType::Compact).render();
        assert!(compact.contains("Generate a compact quality report"));
        assert!(compact.contains("short paragraph"));
        let full = recommendations(ReportType::Comprehensive).render();
        assert!(full.contains("Generate a comprehensive quality report"));
    }
}
