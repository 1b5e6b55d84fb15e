//! Configuration management for qreport.
//!
//! [`Settings`] is an explicit value built once per run and handed to each
//! component's constructor. Layers, lowest priority first: built-in
//! defaults, the user file, the project `qreport.json`, an explicit
//! `--config` file, environment variables, then CLI flags (applied by the
//! binary).

pub mod resolution;
pub mod validation;

pub use resolution::{ConfigLevel, ConfigLoader, ConfigLocations, ConfigSource, InheritanceChain};
pub use validation::{ConfigValidator, ValidationIssue, ValidationReport};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::llm::GenerationParams;
use crate::prompt::ReportType;

/// Project-level configuration file name.
pub const PROJECT_CONFIG_FILE: &str = "qreport.json";

/// Environment variable overriding `llm.endpoint`.
pub const ENDPOINT_ENV: &str = "QREPORT_LLM_ENDPOINT";
/// Environment variable overriding `llm.model`.
pub const MODEL_ENV: &str = "QREPORT_LLM_MODEL";
/// Environment variable overriding `paths.weeks_dir`.
pub const WEEKS_DIR_ENV: &str = "QREPORT_WEEKS_DIR";
/// Environment variable overriding `paths.reports_dir`.
pub const REPORTS_DIR_ENV: &str = "QREPORT_REPORTS_DIR";
/// Environment variable overriding `git.repo_path`.
pub const GIT_REPO_ENV: &str = "QREPORT_GIT_REPO";

/// All settings for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub prompt: PromptSettings,
    pub paths: PathSettings,
    pub inputs: InputFiles,
    pub git: GitSettings,
    pub remote: RemoteSettings,
}

/// Chat-completion gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Full chat-completions URL.
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout_secs: u64,
    /// Retries after the first attempt, for transient failures only.
    pub max_retries: u32,
    pub retry_base_ms: u64,
    /// Name of the variable holding the gateway key.
    pub api_key_env: String,
    /// Name of the variable holding the optional caller id.
    pub user_id_env: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        let params = GenerationParams::default();
        Self {
            endpoint: "https://llm-gateway.local/chat/completions".to_string(),
            model: params.model,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            timeout_secs: 90,
            max_retries: 2,
            retry_base_ms: 2000,
            api_key_env: "LLM_GW_EXPRESS_KEY".to_string(),
            user_id_env: "OPENAI_USER_ID".to_string(),
        }
    }
}

impl LlmSettings {
    #[must_use]
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

/// Prompt budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    /// Hard cap on prompt length in characters.
    pub max_chars: usize,
    pub max_items_per_section: usize,
    /// How many deployments the prompt lists.
    pub recent_deployments: usize,
    pub report_type: ReportType,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            max_chars: 48_000,
            max_items_per_section: 25,
            recent_deployments: 5,
            report_type: ReportType::default(),
        }
    }
}

/// Directory layout. Relative paths are resolved against the project dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Holds `<week>/<component>/` input folders.
    pub weeks_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub archive_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            weeks_dir: PathBuf::from("weeks"),
            reports_dir: PathBuf::from("reports"),
            archive_dir: PathBuf::from("reports/archive"),
        }
    }
}

impl PathSettings {
    /// Make every relative path absolute under `project_dir`.
    pub fn resolve_against(&mut self, project_dir: &Path) {
        for dir in [&mut self.weeks_dir, &mut self.reports_dir, &mut self.archive_dir] {
            if dir.is_relative() {
                *dir = project_dir.join(&*dir);
            }
        }
    }
}

/// Input file names inside a week/component folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputFiles {
    pub risks: String,
    pub prb: String,
    pub bugs: String,
    pub ci: String,
    pub leftshift: String,
    pub security: String,
    pub abs: String,
    pub deployment: String,
    pub coverage: String,
    pub narrative: String,
    pub augmentation: String,
}

impl Default for InputFiles {
    fn default() -> Self {
        Self {
            risks: "risks.txt".to_string(),
            prb: "prb.txt".to_string(),
            bugs: "bugs.txt".to_string(),
            ci: "ci.txt".to_string(),
            leftshift: "leftshift.txt".to_string(),
            security: "security.txt".to_string(),
            abs: "abs.txt".to_string(),
            deployment: "deployment.csv".to_string(),
            coverage: "coverage.txt".to_string(),
            narrative: "deployment.txt".to_string(),
            augmentation: "augmentation.json".to_string(),
        }
    }
}

impl InputFiles {
    /// `(setting name, file name)` for every input.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, &str); 11] {
        [
            ("inputs.risks", &self.risks),
            ("inputs.prb", &self.prb),
            ("inputs.bugs", &self.bugs),
            ("inputs.ci", &self.ci),
            ("inputs.leftshift", &self.leftshift),
            ("inputs.security", &self.security),
            ("inputs.abs", &self.abs),
            ("inputs.deployment", &self.deployment),
            ("inputs.coverage", &self.coverage),
            ("inputs.narrative", &self.narrative),
            ("inputs.augmentation", &self.augmentation),
        ]
    }
}

/// Git analysis settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub enabled: bool,
    /// Repository to analyse. `None` skips the analysis.
    pub repo_path: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_path: None,
            timeout_secs: 60,
        }
    }
}

/// Remote reports API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Instance host; falls back to `$instance_env`.
    pub instance: Option<String>,
    pub instance_env: String,
    pub session_env: String,
    pub api_version: String,
    pub prb_report_id: Option<String>,
    pub bug_report_id: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            instance: None,
            instance_env: "SALESFORCE_INSTANCE".to_string(),
            session_env: "SALESFORCE_SESSION_ID".to_string(),
            api_version: crate::sources::remote::DEFAULT_API_VERSION.to_string(),
            prb_report_id: None,
            bug_report_id: None,
            timeout_secs: 60,
        }
    }
}

impl Settings {
    /// Load every file layer, `.env`, and environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`crate::QualityError::Config`] when a present file cannot be
    /// parsed or an explicit `--config` file is missing.
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<(Self, InheritanceChain)> {
        let dotenv = project_dir.join(".env");
        match dotenvy::from_path(&dotenv) {
            Ok(()) => debug!("Loaded environment from {}", dotenv.display()),
            Err(e) => debug!("No .env loaded from {}: {}", dotenv.display(), e),
        }

        let (mut settings, chain) = ConfigLoader::new().load_with_chain(project_dir, explicit)?;
        settings.apply_env(|name| std::env::var(name).ok());
        settings.paths.resolve_against(project_dir);
        if let Some(repo) = settings.git.repo_path.take() {
            settings.git.repo_path = Some(if repo.is_relative() {
                project_dir.join(repo)
            } else {
                repo
            });
        }
        Ok((settings, chain))
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = get(ENDPOINT_ENV) {
            self.llm.endpoint = endpoint;
        }
        if let Some(model) = get(MODEL_ENV) {
            self.llm.model = model;
        }
        if let Some(dir) = get(WEEKS_DIR_ENV) {
            self.paths.weeks_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get(REPORTS_DIR_ENV) {
            self.paths.reports_dir = PathBuf::from(dir);
        }
        if let Some(repo) = get(GIT_REPO_ENV) {
            self.git.repo_path = Some(PathBuf::from(repo));
        }
        if self.remote.instance.is_none() {
            self.remote.instance = get(&self.remote.instance_env);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.llm.api_key_env, "LLM_GW_EXPRESS_KEY");
        assert_eq!(settings.llm.max_retries, 2);
        assert_eq!(settings.inputs.deployment, "deployment.csv");
        assert_eq!(settings.remote.api_version, "v58.0");
        assert!(settings.git.enabled);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"llm": {"model": "gpt-4o"}, "prompt": {"max_chars": 9000}}"#)
                .unwrap();
        assert_eq!(settings.llm.model, "gpt-4o");
        assert_eq!(settings.llm.max_tokens, 2000);
        assert_eq!(settings.prompt.max_chars, 9000);
        assert_eq!(settings.prompt.recent_deployments, 5);
        assert_eq!(settings.prompt.report_type, ReportType::Comprehensive);
    }

    #[test]
    fn test_report_type_from_json() {
        let settings: Settings =
            serde_json::from_str(r#"{"prompt": {"report_type": "compact"}}"#).unwrap();
        assert_eq!(settings.prompt.report_type, ReportType::Compact);
        assert!(serde_json::from_str::<Settings>(r#"{"prompt": {"report_type": "brief"}}"#).is_err());
    }

    #[test]
    fn test_apply_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENDPOINT_ENV, "http://127.0.0.1:9/chat/completions"),
            (GIT_REPO_ENV, "/srv/repo"),
            ("SALESFORCE_INSTANCE", "org.example.com"),
            (MODEL_ENV, "  "),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.llm.endpoint, "http://127.0.0.1:9/chat/completions");
        assert_eq!(settings.git.repo_path, Some(PathBuf::from("/srv/repo")));
        assert_eq!(settings.remote.instance.as_deref(), Some("org.example.com"));
        assert_eq!(settings.llm.model, LlmSettings::default().model);
    }

    #[test]
    fn test_paths_resolve_against_project() {
        let dir = TempDir::new().unwrap();
        let mut paths = PathSettings {
            reports_dir: PathBuf::from("/abs/reports"),
            ..PathSettings::default()
        };
        paths.resolve_against(dir.path());
        assert_eq!(paths.weeks_dir, dir.path().join("weeks"));
        assert_eq!(paths.reports_dir, PathBuf::from("/abs/reports"));
    }

    #[test]
    fn test_generation_params_from_settings() {
        let llm = LlmSettings {
            model: "m".to_string(),
            max_tokens: 10,
            ..LlmSettings::default()
        };
        let params = llm.generation_params();
        assert_eq!(params.model, "m");
        assert_eq!(params.max_tokens, 10);
    }
}
