//! Prompt builder.
//!
//! Renders a [`QualityReportData`] into one bounded prompt:
//!
//! - [`sections`] - section model, ranking and item rendering
//! - [`budget`] - the length budget and the truncation policy
//!
//! # Example
//!
//! ```rust,ignore
//! use qreport::prompt::PromptBuilder;
//!
//! let builder = PromptBuilder::from_settings(&settings.prompt);
//! let prompt = builder.build(&data);
//! assert!(prompt.chars <= settings.prompt.max_chars);
//! ```

pub mod budget;
pub mod sections;

pub use budget::{PromptBudget, CHARS_PER_TOKEN, MIN_BUDGET_CHARS};
pub use sections::{ItemList, PromptSection, ReportType, SectionKind};

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::PromptSettings;
use crate::model::QualityReportData;

/// A rendered prompt and what the budget did to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltPrompt {
    pub text: String,
    pub chars: usize,
    pub estimated_tokens: usize,
    /// Dropped items per list label. Lists that kept everything are absent.
    pub omitted: BTreeMap<String, usize>,
    pub narrative_shortened: bool,
    pub context_trimmed: bool,
    pub hard_cut: bool,
}

impl BuiltPrompt {
    #[must_use]
    pub fn total_omitted(&self) -> usize {
        self.omitted.values().sum()
    }

    /// True when anything at all was left out.
    #[must_use]
    pub fn was_truncated(&self) -> bool {
        self.total_omitted() > 0 || self.narrative_shortened || self.context_trimmed || self.hard_cut
    }
}

/// Builds prompts within a [`PromptBudget`].
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget: PromptBudget,
    recent_deployments: usize,
    report_type: ReportType,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::from_settings(&PromptSettings::default())
    }
}

impl PromptBuilder {
    #[must_use]
    pub fn new(budget: PromptBudget) -> Self {
        Self {
            budget,
            recent_deployments: PromptSettings::default().recent_deployments,
            report_type: ReportType::default(),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &PromptSettings) -> Self {
        Self {
            budget: PromptBudget::from_settings(settings),
            recent_deployments: settings.recent_deployments,
            report_type: settings.report_type,
        }
    }

    #[must_use]
    pub fn with_recent_deployments(mut self, n: usize) -> Self {
        self.recent_deployments = n;
        self
    }

    #[must_use]
    pub fn with_report_type(mut self, report_type: ReportType) -> Self {
        self.report_type = report_type;
        self
    }

    #[must_use]
    pub fn budget(&self) -> &PromptBudget {
        &self.budget
    }

    /// Render `data` into a prompt no longer than the budget.
    #[must_use]
    pub fn build(&self, data: &QualityReportData) -> BuiltPrompt {
        let mut sections = sections::build_sections(data, self.recent_deployments, self.report_type);
        let fitted = budget::fit(&mut sections, &self.budget);

        let omitted: BTreeMap<String, usize> = sections
            .iter()
            .flat_map(|s| s.lists.iter())
            .filter(|l| l.omitted > 0)
            .map(|l| (l.label.to_string(), l.omitted))
            .collect();

        let prompt = BuiltPrompt {
            estimated_tokens: PromptBudget::estimate_tokens(fitted.chars),
            chars: fitted.chars,
            text: fitted.text,
            omitted,
            narrative_shortened: fitted.narrative_shortened,
            context_trimmed: fitted.context_trimmed,
            hard_cut: fitted.hard_cut,
        };

        if prompt.was_truncated() {
            info!(
                "Prompt truncated to fit {} chars: {} items omitted",
                self.budget.max_chars,
                prompt.total_omitted()
            );
        }
        debug!(
            "Built prompt: {} chars (~{} tokens)",
            prompt.chars, prompt.estimated_tokens
        );
        prompt
    }
}
