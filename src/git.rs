//! Git analyzer.
//!
//! Runs one `git log --numstat` over the reporting window and reduces it to
//! [`GitMetrics`]. Every failure (not a repository, git missing, command
//! error, timeout, no commits) degrades to zeroed metrics with a warning;
//! the report is still produced.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::model::{ChurnRisk, FileChurn, GitMetrics};
use crate::window::ReportWindow;

/// Number of files listed in `most_changed_files`.
pub const TOP_FILES: usize = 10;

/// Marker prefixed to each commit's author line.
const AUTHOR_MARKER: char = '@';

/// Reasons git analysis was skipped. Logged, never propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GitAnalysisError {
    #[error("{path} is not a git repository")]
    NotARepository { path: PathBuf },

    #[error("git executable not found on PATH")]
    GitUnavailable,

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("git log timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Source of `git log` output.
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Raw `git log --numstat --pretty=format:@%an` output for
    /// `[since, until]`.
    async fn log(&self, repo: &Path, since: &str, until: &str) -> Result<String, GitAnalysisError>;
}

/// [`GitRunner`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl GitCli {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl GitRunner for GitCli {
    async fn log(&self, repo: &Path, since: &str, until: &str) -> Result<String, GitAnalysisError> {
        let git = which::which("git").map_err(|_| GitAnalysisError::GitUnavailable)?;
        if !repo.is_dir() {
            return Err(GitAnalysisError::NotARepository {
                path: repo.to_path_buf(),
            });
        }

        let since_arg = format!("--since={since}");
        let until_arg = format!("--until={until}");
        let child = Command::new(git)
            .args([
                "log",
                since_arg.as_str(),
                until_arg.as_str(),
                "--numstat",
                "--no-renames",
                "--pretty=format:@%an",
            ])
            .current_dir(repo)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(GitAnalysisError::CommandFailed {
                    command: "log".to_string(),
                    stderr: e.to_string(),
                });
            }
            Err(_) => {
                return Err(GitAnalysisError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.to_lowercase().contains("not a git repository") {
                return Err(GitAnalysisError::NotARepository {
                    path: repo.to_path_buf(),
                });
            }
            return Err(GitAnalysisError::CommandFailed {
                command: "log".to_string(),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Computes [`GitMetrics`] for a repository.
pub struct GitAnalyzer {
    runner: Box<dyn GitRunner>,
    repo: Option<PathBuf>,
}

impl GitAnalyzer {
    #[must_use]
    pub fn new(runner: Box<dyn GitRunner>, repo: Option<PathBuf>) -> Self {
        Self { runner, repo }
    }

    /// Analyzer that always yields zeroed metrics.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Box::new(GitCli::new(Duration::from_secs(1))), None)
    }

    /// Metrics for `window`, or zeroed metrics on any failure.
    pub async fn analyze(&self, window: &ReportWindow) -> GitMetrics {
        let Some(repo) = &self.repo else {
            debug!("Git analysis disabled");
            return GitMetrics::empty(window);
        };
        match self.try_analyze(repo, window).await {
            Ok(metrics) if metrics.commit_count == 0 => {
                warn!("No commits in {} between {}; git metrics zeroed", repo.display(), window);
                GitMetrics::empty(window)
            }
            Ok(metrics) => {
                info!(
                    "Git: {} commits, {} files, churn {} ({:?})",
                    metrics.commit_count, metrics.files_changed, metrics.churn, metrics.churn_risk
                );
                metrics
            }
            Err(e) => {
                warn!("Git analysis skipped: {}", e);
                GitMetrics::empty(window)
            }
        }
    }

    /// Metrics for `window`, surfacing the failure reason.
    ///
    /// # Errors
    ///
    /// Any [`GitAnalysisError`] from the runner.
    pub async fn try_analyze(
        &self,
        repo: &Path,
        window: &ReportWindow,
    ) -> Result<GitMetrics, GitAnalysisError> {
        let output = self
            .runner
            .log(repo, &window.git_since(), &window.git_until())
            .await?;
        Ok(parse_log(&output, window))
    }
}

/// Reduce `git log --numstat --pretty=format:@%an` output to metrics.
///
/// Binary files (`-` counts) contribute zero lines but still count as
/// changed files.
#[must_use]
pub fn parse_log(output: &str, window: &ReportWindow) -> GitMetrics {
    let mut metrics = GitMetrics::empty(window);
    let mut authors = BTreeSet::new();
    let mut files: HashMap<&str, (u64, u64)> = HashMap::new();

    for line in output.lines() {
        let line = line.trim_end();
        if let Some(author) = line.strip_prefix(AUTHOR_MARKER) {
            metrics.commit_count += 1;
            let author = author.trim();
            if !author.is_empty() {
                authors.insert(author.to_string());
            }
            continue;
        }

        let mut parts = line.splitn(3, '\t');
        let (Some(added), Some(deleted), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let added = added.parse::<u64>().unwrap_or(0);
        let deleted = deleted.parse::<u64>().unwrap_or(0);
        metrics.lines_added += added;
        metrics.lines_deleted += deleted;
        let entry = files.entry(path).or_default();
        entry.0 += added;
        entry.1 += deleted;
    }

    metrics.churn = metrics.lines_added + metrics.lines_deleted;
    metrics.files_changed = files.len() as u64;
    metrics.authors = authors.into_iter().collect();

    let mut ranked: Vec<FileChurn> = files
        .into_iter()
        .map(|(path, (lines_added, lines_deleted))| FileChurn {
            path: path.to_string(),
            lines_added,
            lines_deleted,
        })
        .collect();
    ranked.sort_by(|a, b| b.total().cmp(&a.total()).then_with(|| a.path.cmp(&b.path)));
    ranked.truncate(TOP_FILES);
    metrics.most_changed_files = ranked;

    let days = window.days() as f64;
    metrics.commits_per_day = metrics.commit_count as f64 / days;
    metrics.churn_risk = if metrics.commit_count == 0 {
        ChurnRisk::Unknown
    } else {
        assess_churn_risk(metrics.commit_count, metrics.churn, metrics.files_changed, days)
    };
    metrics
}

/// High when at least two high thresholds trip, Medium when at least two
/// medium ones do, else Low.
#[must_use]
pub fn assess_churn_risk(commits: u64, lines_changed: u64, files: u64, days: f64) -> ChurnRisk {
    if days <= 0.0 {
        return ChurnRisk::Unknown;
    }
    let per_day = |n: u64| n as f64 / days;
    let tripped = |conditions: [bool; 4]| conditions.iter().filter(|c| **c).count();

    let high = tripped([
        per_day(commits) > 10.0,
        per_day(lines_changed) > 1000.0,
        per_day(files) > 20.0,
        lines_changed > 50_000,
    ]);
    if high >= 2 {
        return ChurnRisk::High;
    }
    let medium = tripped([
        per_day(commits) > 5.0,
        per_day(lines_changed) > 500.0,
        per_day(files) > 10.0,
        lines_changed > 20_000,
    ]);
    if medium >= 2 {
        ChurnRisk::Medium
    } else {
        ChurnRisk::Low
    }
}
