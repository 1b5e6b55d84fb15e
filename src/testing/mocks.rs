//! Mock implementations of the pipeline's external seams.
//!
//! The LLM mock lives next to its trait in [`crate::llm::MockLlmClient`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::git::{GitAnalysisError, GitRunner};

/// One recorded `git log` call: repository, since, until.
pub type GitCall = (PathBuf, String, String);

/// Mock implementation of [`GitRunner`].
///
/// # Example
///
/// ```rust,ignore
/// let runner = MockGitRunner::with_output("@Dev\n1\t0\tsrc/lib.rs\n");
/// let calls = runner.calls();
/// let analyzer = GitAnalyzer::new(Box::new(runner), Some("/repo".into()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockGitRunner {
    output: String,
    error: Option<GitAnalysisError>,
    calls: Arc<Mutex<Vec<GitCall>>>,
}

impl MockGitRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `output` from every call.
    #[must_use]
    pub fn with_output(output: &str) -> Self {
        Self {
            output: output.to_string(),
            ..Self::default()
        }
    }

    /// Fail every call with `error`.
    #[must_use]
    pub fn failing(error: GitAnalysisError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Shared handle on the recorded calls; stays valid after the runner
    /// is moved into an analyzer.
    #[must_use]
    pub fn calls(&self) -> Arc<Mutex<Vec<GitCall>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl GitRunner for MockGitRunner {
    async fn log(&self, repo: &Path, since: &str, until: &str) -> Result<String, GitAnalysisError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((repo.to_path_buf(), since.to_string(), until.to_string()));
        }
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.output.clone()),
        }
    }
}
