//! qreport - weekly quality report pipeline
//!
//! Aggregates quality-engineering signals (risk notes, problem reports, bug
//! exports, CI and LeftShift failures, security findings, deployment history,
//! coverage) and git churn into one snapshot, asks an LLM for a narrative
//! report, and persists both as dated artifacts.
//!
//! # Architecture
//!
//! - [`sources`] - source readers for every export format
//! - [`input`] - local files or the remote reports API, checked up front
//! - [`git`] - commit and churn statistics for the reporting window
//! - [`aggregate`] - the read-only [`QualityReportData`] snapshot
//! - [`prompt`] - bounded prompt rendering
//! - [`llm`] - the chat-completions gateway client
//! - [`reporting`] - never-overwriting artifact writer and index
//! - [`pipeline`] - one run, end to end
//! - [`config`] - layered settings and validation
//! - [`error`] - error types and exit codes
//! - [`testing`] - mocks and fixtures
//!
//! # Example
//!
//! ```rust,ignore
//! use qreport::{Pipeline, RunRequest, Settings};
//!
//! let (settings, _chain) = Settings::load(project_dir, None)?;
//! let outcome = Pipeline::new(settings)
//!     .run(&RunRequest::new("cw38", "Engine"))
//!     .await?;
//! println!("{}", outcome.written.report_path.display());
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod git;
pub mod input;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod prompt;
pub mod reporting;
pub mod sources;
pub mod testing;
pub mod window;

pub use error::{IntoQualityError, QualityError, Result};

pub use config::{ConfigValidator, Settings, ValidationReport};

pub use model::{QualityReportData, ReportSummary, SourceMode};

pub use input::{InputSource, SourceBundle};

pub use git::{GitAnalysisError, GitAnalyzer, GitCli, GitRunner};

pub use llm::{GatewayClient, GatewayError, LlmClient, MockLlmClient};

pub use prompt::{BuiltPrompt, PromptBudget, PromptBuilder};

pub use reporting::{ConflictPolicy, ReportIndex, ReportWriter, WrittenReport};

pub use pipeline::{Pipeline, PreparedRun, RunOutcome, RunRequest};

pub use window::ReportWindow;

pub use testing::MockGitRunner;

// TestFixture is only available in test builds
#[cfg(test)]
pub use testing::TestFixture;
