//! One report run, end to end.
//!
//! resolve inputs → collect → analyze git → aggregate → build prompt →
//! call the LLM → write artifacts.
//!
//! Input problems abort before any network call. A failed LLM call aborts
//! the run with nothing written.

use chrono::{Local, NaiveDate};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::aggregate::{aggregate, ReportContext};
use crate::config::Settings;
use crate::error::Result;
use crate::git::{GitAnalyzer, GitCli};
use crate::input::InputSource;
use crate::llm::{Completion, CompletionRequest, GatewayClient, LlmClient};
use crate::model::{QualityReportData, SourceMode};
use crate::prompt::{BuiltPrompt, PromptBuilder};
use crate::reporting::{ConflictPolicy, ReportWriter, WrittenReport};
use crate::window::ReportWindow;

/// What to report on and how to persist it.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub week: String,
    pub component: String,
    pub mode: SourceMode,
    /// Reference date for the window; today when absent.
    pub report_end_date: Option<NaiveDate>,
    pub archive: bool,
    pub on_conflict: ConflictPolicy,
}

impl RunRequest {
    #[must_use]
    pub fn new(week: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            week: week.into(),
            component: component.into(),
            mode: SourceMode::Local,
            report_end_date: None,
            archive: false,
            on_conflict: ConflictPolicy::Version,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: SourceMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_report_end_date(mut self, date: Option<NaiveDate>) -> Self {
        self.report_end_date = date;
        self
    }

    #[must_use]
    pub fn with_archive(mut self, archive: bool) -> Self {
        self.archive = archive;
        self
    }

    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.on_conflict = policy;
        self
    }

    /// The reporting window for this request.
    #[must_use]
    pub fn window(&self) -> ReportWindow {
        let reference = self
            .report_end_date
            .unwrap_or_else(|| Local::now().date_naive());
        ReportWindow::resolve(Some(&self.week), reference)
    }
}

/// Aggregate and prompt, before any LLM call.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub input_dir: PathBuf,
    pub data: QualityReportData,
    pub prompt: BuiltPrompt,
}

/// A completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub data: QualityReportData,
    pub prompt: BuiltPrompt,
    pub completion: Completion,
    pub written: WrittenReport,
}

/// Runs the report pipeline with one set of settings.
pub struct Pipeline {
    settings: Settings,
    git: GitAnalyzer,
    llm: Option<Arc<dyn LlmClient>>,
}

impl Pipeline {
    /// Pipeline with the real git runner (when enabled) and the gateway
    /// client built on first use.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        let git = match (&settings.git.repo_path, settings.git.enabled) {
            (Some(repo), true) => GitAnalyzer::new(
                Box::new(GitCli::new(Duration::from_secs(settings.git.timeout_secs))),
                Some(repo.clone()),
            ),
            _ => GitAnalyzer::disabled(),
        };
        Self {
            settings,
            git,
            llm: None,
        }
    }

    #[must_use]
    pub fn with_git(mut self, git: GitAnalyzer) -> Self {
        self.git = git;
        self
    }

    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Everything up to the prompt. Makes no LLM call.
    pub async fn prepare(&self, request: &RunRequest) -> Result<PreparedRun> {
        let source = InputSource::resolve(&self.settings, &request.week, &request.component, request.mode)?;
        let window = request.window();
        info!(
            "Building {} report for {} ({}, {} inputs)",
            request.week, request.component, window, request.mode
        );

        let bundle = source.collect().await?;
        let git = self.git.analyze(&window).await;

        let ctx = ReportContext::new(Some(request.week.clone()), request.component.clone(), window)
            .with_recent_deployments(self.settings.prompt.recent_deployments);
        let data = aggregate(bundle, git, &ctx);
        if data.is_empty() {
            warn!("No source produced any records for {}", request.component);
        }

        let prompt = PromptBuilder::from_settings(&self.settings.prompt).build(&data);
        Ok(PreparedRun {
            input_dir: source.input_dir().to_path_buf(),
            data,
            prompt,
        })
    }

    /// The full run.
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        let PreparedRun { data, prompt, .. } = self.prepare(request).await?;

        let llm: Arc<dyn LlmClient> = match &self.llm {
            Some(llm) => Arc::clone(llm),
            None => Arc::new(GatewayClient::from_settings(&self.settings.llm)?),
        };
        info!(
            "Requesting narrative from {} ({} chars, ~{} tokens)",
            llm.model_name(),
            prompt.chars,
            prompt.estimated_tokens
        );
        let completion_request =
            CompletionRequest::new(prompt.text.clone(), self.settings.llm.generation_params());
        let completion = llm.complete(&completion_request).await?;

        let written = ReportWriter::from_settings(&self.settings.paths)
            .with_policy(request.on_conflict)
            .with_archive(request.archive)
            .write(&completion.text, &data)?;

        Ok(RunOutcome {
            data,
            prompt,
            completion,
            written,
        })
    }
}
