//! Prompt length budget.
//!
//! Fitting runs in steps, each only while the prompt is still too long:
//!
//! 1. Cap every list at its own cap and at `max_items_per_section`.
//! 2. Drop the lowest-ranked item of the list with the most items left.
//! 3. Shorten the deployment narrative.
//! 4. Collapse emptied lists to their heading and omission note.
//! 5. Trim the context lines of every section but the report request,
//!    keeping the earliest lines.
//! 6. Cut the text at a char boundary.
//!
//! Headings, omission notes and the report request are only touched by the
//! last step, which a budget of at least [`MIN_BUDGET_CHARS`] never reaches.
//! Lengths are counted in chars, so the result never exceeds `max_chars`
//! whatever the script of the input.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sections::{render_all, PromptSection, SectionKind};
use crate::config::PromptSettings;

/// Chars per token used for estimates.
pub const CHARS_PER_TOKEN: usize = 4;

/// Smallest budget that always holds every heading, omission note and the
/// report request.
pub const MIN_BUDGET_CHARS: usize = 2_000;

const NARRATIVE_MARKER: &str = " [narrative truncated]";

/// Size limits for one prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptBudget {
    pub max_chars: usize,
    pub max_items_per_section: usize,
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self::from_settings(&PromptSettings::default())
    }
}

impl PromptBudget {
    #[must_use]
    pub fn new(max_chars: usize, max_items_per_section: usize) -> Self {
        Self {
            max_chars,
            max_items_per_section,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &PromptSettings) -> Self {
        Self::new(settings.max_chars, settings.max_items_per_section)
    }

    /// Approximate token count for `chars` characters.
    #[must_use]
    pub fn estimate_tokens(chars: usize) -> usize {
        chars / CHARS_PER_TOKEN
    }
}

/// What fitting had to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FitOutcome {
    pub text: String,
    pub chars: usize,
    pub narrative_shortened: bool,
    /// Context lines were dropped or shortened.
    pub context_trimmed: bool,
    pub hard_cut: bool,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Fit `sections` into `budget`, mutating the lists to record what was
/// dropped.
pub fn fit(sections: &mut [PromptSection], budget: &PromptBudget) -> FitOutcome {
    for list in sections.iter_mut().flat_map(|s| s.lists.iter_mut()) {
        let cap = list
            .cap
            .map_or(budget.max_items_per_section, |c| c.min(budget.max_items_per_section));
        list.truncate(cap);
    }

    let mut text = render_all(sections);
    let mut chars = char_len(&text);

    while chars > budget.max_chars {
        let Some(list) = sections
            .iter_mut()
            .flat_map(|s| s.lists.iter_mut())
            .filter(|l| !l.items.is_empty())
            .rev()
            .max_by_key(|l| l.items.len())
        else {
            break;
        };
        list.drop_last();
        text = render_all(sections);
        chars = char_len(&text);
    }

    let mut outcome = FitOutcome::default();

    if chars > budget.max_chars {
        if let Some(section) = sections.iter_mut().find(|s| s.narrative.is_some()) {
            let overflow = chars - budget.max_chars;
            let current = section.narrative.as_deref().map_or(0, char_len);
            let keep = current.saturating_sub(overflow + char_len(NARRATIVE_MARKER));
            section.narrative = if keep == 0 {
                None
            } else {
                section.narrative.as_deref().map(|n| {
                    let mut shortened: String = n.chars().take(keep).collect();
                    shortened.push_str(NARRATIVE_MARKER);
                    shortened
                })
            };
            outcome.narrative_shortened = true;
            debug!("Shortened deployment narrative by {} chars", overflow);
            text = render_all(sections);
            chars = char_len(&text);
        }
    }

    if chars > budget.max_chars {
        for list in sections.iter_mut().flat_map(|s| s.lists.iter_mut()) {
            list.collapse();
        }
        text = render_all(sections);
        chars = char_len(&text);
    }

    if chars > budget.max_chars {
        outcome.narrative_shortened |= sections.iter().any(|s| s.narrative.is_some());
        text = trim_context(sections, budget.max_chars);
        chars = char_len(&text);
        outcome.context_trimmed = true;
        debug!("Trimmed section context to fit {} chars", budget.max_chars);
    }

    if chars > budget.max_chars {
        debug!("Cutting prompt from {} to {} chars", chars, budget.max_chars);
        text = text.chars().take(budget.max_chars).collect();
        chars = budget.max_chars;
        outcome.hard_cut = true;
    }

    outcome.text = text;
    outcome.chars = chars;
    outcome
}

/// Re-add context lines in order until the next one no longer fits; that
/// one is shortened to the remaining room. The report request keeps its
/// lines.
fn trim_context(sections: &mut [PromptSection], max_chars: usize) -> String {
    let mut removed: Vec<(usize, Vec<String>)> = Vec::new();
    for (index, section) in sections.iter_mut().enumerate() {
        section.narrative = None;
        if section.kind != SectionKind::Recommendations {
            removed.push((index, std::mem::take(&mut section.lines)));
        }
    }

    let mut text = render_all(sections);
    if char_len(&text) > max_chars {
        return text;
    }

    'fill: for (index, lines) in removed {
        for line in lines {
            let line_chars = char_len(&line);
            sections[index].lines.push(line.clone());
            let candidate = render_all(sections);
            let overflow = char_len(&candidate).saturating_sub(max_chars);
            if overflow == 0 {
                text = candidate;
                continue;
            }

            sections[index].lines.pop();
            let keep = line_chars.saturating_sub(overflow);
            if keep > 0 {
                sections[index].lines.push(line.chars().take(keep).collect());
                let shortened = render_all(sections);
                if char_len(&shortened) <= max_chars {
                    text = shortened;
                } else {
                    sections[index].lines.pop();
                }
            }
            break 'fill;
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::sections::{ItemList, SectionKind};

    fn items(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("- {prefix} item {i:03} with some padding text")).collect()
    }

    fn sample() -> Vec<PromptSection> {
        vec![
            PromptSection::new(SectionKind::Framing).with_lines(vec!["Component: Engine".into()]),
            PromptSection::new(SectionKind::Incidents)
                .with_list(ItemList::new("PRBs", items("prb", 30)))
                .with_list(ItemList::new("bugs", items("bug", 5))),
            PromptSection::new(SectionKind::Deployments)
                .with_narrative(Some("Rollout notes. ".repeat(40)))
                .with_list(ItemList::new("deployments", items("dep", 10)).with_cap(3)),
        ]
    }

    #[test]
    fn test_section_caps_applied_first() {
        let mut sections = sample();
        let outcome = fit(&mut sections, &PromptBudget::new(1_000_000, 25));
        assert!(!outcome.hard_cut);
        assert_eq!(sections[1].lists[0].items.len(), 25);
        assert_eq!(sections[1].lists[0].omitted, 5);
        assert_eq!(sections[2].lists[0].items.len(), 3);
        assert!(outcome.text.contains("(5 more PRBs omitted)"));
        assert!(outcome.text.contains("(7 more deployments omitted)"));
        assert!(!outcome.text.contains("more bugs omitted"));
    }

    #[test]
    fn test_largest_list_dropped_first() {
        let mut sections = sample();
        let full = fit(&mut sample(), &PromptBudget::new(1_000_000, 100)).chars;
        let outcome = fit(&mut sections, &PromptBudget::new(full - 200, 100));

        assert!(outcome.chars <= full - 200);
        assert!(sections[1].lists[0].omitted > 0);
        assert_eq!(sections[1].lists[1].omitted, 0);
        assert!(!outcome.narrative_shortened);
        let note = format!("({} more PRBs omitted)", sections[1].lists[0].omitted);
        assert!(outcome.text.contains(&note));
    }

    #[test]
    fn test_narrative_shortened_before_hard_cut() {
        let mut sections = vec![PromptSection::new(SectionKind::Deployments)
            .with_narrative(Some("x".repeat(2_000)))];
        let outcome = fit(&mut sections, &PromptBudget::new(500, 10));
        assert!(outcome.narrative_shortened);
        assert!(!outcome.hard_cut);
        assert!(outcome.chars <= 500);
        assert!(outcome.text.contains(NARRATIVE_MARKER.trim()));
    }

    #[test]
    fn test_context_trim_respects_char_boundaries() {
        let mut sections = vec![PromptSection::new(SectionKind::Framing)
            .with_lines(vec!["é".repeat(400)])];
        let outcome = fit(&mut sections, &PromptBudget::new(100, 10));
        assert!(outcome.context_trimmed);
        assert!(!outcome.hard_cut);
        assert_eq!(outcome.chars, 100);
        assert_eq!(outcome.text.chars().count(), 100);
        assert!(outcome.text.starts_with("# Weekly Quality Report Input"));
    }

    #[test]
    fn test_notes_and_request_survive_long_context() {
        let mut sections = vec![
            PromptSection::new(SectionKind::Framing).with_lines(vec!["x".repeat(300)]),
            PromptSection::new(SectionKind::Incidents)
                .with_list(ItemList::new("PRBs", items("prb", 50)).with_context("y".repeat(80))),
            PromptSection::new(SectionKind::Recommendations)
                .with_lines(vec!["Write the report.".into()]),
        ];
        let outcome = fit(&mut sections, &PromptBudget::new(200, 100));

        assert!(outcome.chars <= 200);
        assert!(!outcome.hard_cut);
        assert!(outcome.text.contains("(50 more PRBs omitted)"));
        assert!(outcome.text.ends_with("## Report Request\n\nWrite the report.\n"));
        assert!(!outcome.text.contains("yyy"));
    }

    #[test]
    fn test_hard_cut_only_below_skeleton() {
        let mut sections = vec![PromptSection::new(SectionKind::Recommendations)
            .with_lines(vec!["Write the report in Markdown.".into()])];
        let outcome = fit(&mut sections, &PromptBudget::new(20, 10));
        assert!(outcome.hard_cut);
        assert_eq!(outcome.chars, 20);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(PromptBudget::estimate_tokens(4_000), 1_000);
        assert_eq!(PromptBudget::estimate_tokens(3), 0);
    }
}
