//! Configuration validation.
//!
//! [`ConfigValidator`] checks a resolved [`Settings`] value and collects every
//! problem at once. Errors make the run refuse to start; warnings are shown
//! by `qreport config validate` and logged otherwise.
//!
//! ```rust,ignore
//! let report = ConfigValidator::new(&settings).validate();
//! if !report.is_valid() {
//!     eprintln!("{}", report.verbose_report());
//!     return Err(report.into_error().unwrap());
//! }
//! ```

use std::fmt;

use super::{InheritanceChain, Settings};
use crate::error::QualityError;
use crate::prompt::budget::MIN_BUDGET_CHARS;

const MAX_RETRIES: u32 = 10;

/// One finding, tied to a dotted setting name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of configuration validation.
///
/// An empty report is valid:
///
/// ```rust
/// use qreport::config::ValidationReport;
///
/// let report = ValidationReport::new();
/// assert!(report.is_valid());
/// assert_eq!(report.exit_code(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Problems that prevent a run.
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Files considered while loading, if known.
    pub inheritance_chain: InheritanceChain,
}

impl ValidationReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when there are no errors. Warnings do not affect validity.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// 0 when valid, else the configuration exit code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_valid() {
            0
        } else {
            7
        }
    }

    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_valid() {
            if self.warnings.is_empty() {
                "Configuration is valid.".to_string()
            } else {
                format!(
                    "Configuration is valid with {} warning(s).",
                    self.warnings.len()
                )
            }
        } else {
            format!(
                "Configuration is invalid with {} error(s).",
                self.errors.len()
            )
        }
    }

    /// Layers, errors, warnings and the final status.
    #[must_use]
    pub fn verbose_report(&self) -> String {
        let mut lines = vec![
            "Configuration Validation Report".to_string(),
            "\u{2500}".repeat(50),
            String::new(),
            "Layers:".to_string(),
        ];

        if self.inheritance_chain.sources.is_empty() {
            lines.push("  (defaults only)".to_string());
        } else {
            for source in &self.inheritance_chain.sources {
                let status = if source.loaded { "\u{2713}" } else { "\u{2717}" };
                lines.push(format!(
                    "  {} [{}] {}",
                    status,
                    source.level,
                    source.path.display()
                ));
            }
        }

        if !self.errors.is_empty() {
            lines.push(String::new());
            lines.push(format!("Errors ({}):", self.errors.len()));
            for error in &self.errors {
                lines.push(format!("  \u{2717} {error}"));
            }
        }

        if !self.warnings.is_empty() {
            lines.push(String::new());
            lines.push(format!("Warnings ({}):", self.warnings.len()));
            for warning in &self.warnings {
                lines.push(format!("  \u{26a0} {warning}"));
            }
        }

        lines.push(String::new());
        lines.push(format!("Status: {}", self.summary()));
        lines.join("\n")
    }

    /// The first error as an `InvalidConfig`, if any.
    #[must_use]
    pub fn into_error(self) -> Option<QualityError> {
        self.errors
            .into_iter()
            .next()
            .map(|issue| QualityError::invalid_config(issue.field, issue.message))
    }
}

/// Validates resolved settings.
pub struct ConfigValidator<'a> {
    settings: &'a Settings,
    chain: InheritanceChain,
    check_environment: bool,
}

impl<'a> ConfigValidator<'a> {
    #[must_use]
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            chain: InheritanceChain::new(),
            check_environment: true,
        }
    }

    /// Attach the layer chain for the verbose report.
    #[must_use]
    pub fn with_chain(mut self, chain: InheritanceChain) -> Self {
        self.chain = chain;
        self
    }

    /// Toggle warnings about unset credential variables.
    #[must_use]
    pub fn with_environment_check(mut self, enabled: bool) -> Self {
        self.check_environment = enabled;
        self
    }

    /// Run every check.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport {
            inheritance_chain: self.chain.clone(),
            ..ValidationReport::default()
        };
        self.validate_llm(&mut report);
        self.validate_prompt(&mut report);
        self.validate_inputs(&mut report);
        self.validate_git(&mut report);
        self.validate_remote(&mut report);
        report
    }

    fn validate_llm(&self, report: &mut ValidationReport) {
        let llm = &self.settings.llm;
        if !(llm.endpoint.starts_with("http://") || llm.endpoint.starts_with("https://")) {
            report.errors.push(ValidationIssue::new(
                "llm.endpoint",
                format!("'{}' is not an http(s) URL", llm.endpoint),
            ));
        }
        if llm.model.trim().is_empty() {
            report.errors.push(ValidationIssue::new("llm.model", "must not be empty"));
        }
        if llm.max_tokens == 0 {
            report.errors.push(ValidationIssue::new("llm.max_tokens", "must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&llm.temperature) {
            report.errors.push(ValidationIssue::new(
                "llm.temperature",
                format!("{} is outside 0.0..=2.0", llm.temperature),
            ));
        }
        if !(llm.top_p > 0.0 && llm.top_p <= 1.0) {
            report.errors.push(ValidationIssue::new(
                "llm.top_p",
                format!("{} is outside (0.0, 1.0]", llm.top_p),
            ));
        }
        if llm.timeout_secs == 0 {
            report.errors.push(ValidationIssue::new("llm.timeout_secs", "must be greater than 0"));
        }
        if llm.max_retries > MAX_RETRIES {
            report.errors.push(ValidationIssue::new(
                "llm.max_retries",
                format!("{} exceeds the limit of {MAX_RETRIES}", llm.max_retries),
            ));
        }
        if llm.api_key_env.trim().is_empty() {
            report.errors.push(ValidationIssue::new("llm.api_key_env", "must name a variable"));
        } else if self.check_environment && env_unset(&llm.api_key_env) {
            report.warnings.push(ValidationIssue::new(
                "llm.api_key_env",
                format!("${} is not set; `generate` will fail", llm.api_key_env),
            ));
        }
    }

    fn validate_prompt(&self, report: &mut ValidationReport) {
        let prompt = &self.settings.prompt;
        if prompt.max_chars < MIN_BUDGET_CHARS {
            report.errors.push(ValidationIssue::new(
                "prompt.max_chars",
                format!("{} is below the minimum of {MIN_BUDGET_CHARS}", prompt.max_chars),
            ));
        }
        if prompt.max_items_per_section == 0 {
            report.errors.push(ValidationIssue::new(
                "prompt.max_items_per_section",
                "must be at least 1",
            ));
        }
        if prompt.recent_deployments == 0 {
            report.warnings.push(ValidationIssue::new(
                "prompt.recent_deployments",
                "is 0; the prompt will list no deployments",
            ));
        }
    }

    fn validate_inputs(&self, report: &mut ValidationReport) {
        let mut seen: Vec<&str> = Vec::new();
        for (field, name) in self.settings.inputs.entries() {
            if name.trim().is_empty() {
                report.errors.push(ValidationIssue::new(field, "file name must not be empty"));
                continue;
            }
            if name.contains('/') || name.contains('\\') {
                report.errors.push(ValidationIssue::new(
                    field,
                    format!("'{name}' must be a file name, not a path"),
                ));
            }
            if seen.contains(&name) {
                report.errors.push(ValidationIssue::new(
                    field,
                    format!("'{name}' is already used by another input"),
                ));
            }
            seen.push(name);
        }
    }

    fn validate_git(&self, report: &mut ValidationReport) {
        let git = &self.settings.git;
        if git.timeout_secs == 0 {
            report.errors.push(ValidationIssue::new("git.timeout_secs", "must be greater than 0"));
        }
        if let Some(repo) = &git.repo_path {
            if git.enabled && !repo.exists() {
                report.warnings.push(ValidationIssue::new(
                    "git.repo_path",
                    format!("{} does not exist; git metrics will be zero", repo.display()),
                ));
            }
        }
    }

    fn validate_remote(&self, report: &mut ValidationReport) {
        let remote = &self.settings.remote;
        let version_ok = remote
            .api_version
            .strip_prefix('v')
            .and_then(|v| v.split_once('.'))
            .is_some_and(|(major, minor)| {
                !major.is_empty()
                    && major.chars().all(|c| c.is_ascii_digit())
                    && !minor.is_empty()
                    && minor.chars().all(|c| c.is_ascii_digit())
            });
        if !version_ok {
            report.errors.push(ValidationIssue::new(
                "remote.api_version",
                format!("'{}' is not of the form vNN.N", remote.api_version),
            ));
        }
        if remote.timeout_secs == 0 {
            report.errors.push(ValidationIssue::new("remote.timeout_secs", "must be greater than 0"));
        }
        for (field, id) in [
            ("remote.prb_report_id", &remote.prb_report_id),
            ("remote.bug_report_id", &remote.bug_report_id),
        ] {
            if id.as_deref().is_some_and(|id| id.trim().is_empty()) {
                report.errors.push(ValidationIssue::new(field, "must not be empty when set"));
            }
        }
    }
}

fn env_unset(name: &str) -> bool {
    std::env::var(name).map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(settings: &Settings) -> ValidationReport {
        ConfigValidator::new(settings)
            .with_environment_check(false)
            .validate()
    }

    #[test]
    fn test_defaults_are_valid() {
        let report = validate(&Settings::default());
        assert!(report.is_valid(), "{:?}", report.errors);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.summary(), "Configuration is valid.");
    }

    #[test]
    fn test_bad_llm_values_collected() {
        let mut settings = Settings::default();
        settings.llm.endpoint = "gateway.local".to_string();
        settings.llm.temperature = 3.5;
        settings.llm.top_p = 0.0;
        settings.llm.max_retries = 50;

        let report = validate(&settings);
        let fields: Vec<_> = report.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["llm.endpoint", "llm.temperature", "llm.top_p", "llm.max_retries"]
        );
        assert_eq!(report.exit_code(), 7);
    }

    #[test]
    fn test_input_names_must_be_distinct_file_names() {
        let mut settings = Settings::default();
        settings.inputs.bugs = "prb.txt".to_string();
        settings.inputs.ci = "sub/ci.txt".to_string();

        let report = validate(&settings);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|e| e.field == "inputs.bugs"));
        assert!(report.errors.iter().any(|e| e.field == "inputs.ci"));
    }

    #[test]
    fn test_api_version_shape() {
        let mut settings = Settings::default();
        settings.remote.api_version = "58".to_string();
        assert!(!validate(&settings).is_valid());
        settings.remote.api_version = "v61.0".to_string();
        assert!(validate(&settings).is_valid());
    }

    #[test]
    fn test_prompt_budget_floor() {
        let mut settings = Settings::default();
        settings.prompt.max_chars = MIN_BUDGET_CHARS - 1;
        assert!(!validate(&settings).is_valid());
        settings.prompt.max_chars = MIN_BUDGET_CHARS;
        assert!(validate(&settings).is_valid());
    }

    #[test]
    fn test_into_error_is_invalid_config() {
        let mut settings = Settings::default();
        settings.prompt.max_chars = 10;
        let err = validate(&settings).into_error().unwrap();
        assert!(matches!(err, QualityError::InvalidConfig { ref field, .. } if field == "prompt.max_chars"));
    }

    #[test]
    fn test_verbose_report_lists_issues() {
        let mut settings = Settings::default();
        settings.prompt.recent_deployments = 0;
        let text = validate(&settings).verbose_report();
        assert!(text.contains("Warnings (1):"));
        assert!(text.contains("prompt.recent_deployments"));
        assert!(text.contains("Status: Configuration is valid with 1 warning(s)."));
    }
}
