//! Absolute-rule consistency check
//!
//! Runs at write time: new content is offered to the LLM together with the
//! user-declared rules and any verdicts come back as warnings on the add
//! response. Without an LLM a naive keyword fallback still catches verbatim
//! violations. The check never blocks a write.

use serde::Deserialize;

use crate::contradiction::extract_json;
use crate::providers::{BudgetManager, LlmProvider};

/// One rule the new content appears to violate
#[derive(Debug, Clone)]
pub struct RuleViolation {
    pub rule: String,
    pub reason: String,
    pub confidence: f32,
}

#[derive(Deserialize)]
struct RuleVerdict {
    #[serde(default)]
    violations: Vec<RuleVerdictItem>,
}

#[derive(Deserialize)]
struct RuleVerdictItem {
    rule: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Check new content against the absolute rules.
///
/// LLM path when available and affordable, substring fallback otherwise.
pub fn check_absolute_rules(
    content: &str,
    rules: &[String],
    llm: Option<&dyn LlmProvider>,
    budget: Option<&BudgetManager>,
) -> Vec<RuleViolation> {
    if rules.is_empty() || content.trim().is_empty() {
        return Vec::new();
    }

    if let Some(llm) = llm {
        let prompt = build_prompt(content, rules);
        let affordable = budget.is_none_or(|b| {
            b.can_afford(BudgetManager::estimate_cost(prompt.len(), 300), "rule_check")
        });
        if affordable {
            match llm.complete(&prompt, 300) {
                Ok(response) => {
                    if let Some(b) = budget {
                        b.record_usage(prompt.len() as u64 / 4, 100, llm.model());
                    }
                    if let Some(verdict) = extract_json::<RuleVerdict>(&response) {
                        return verdict
                            .violations
                            .into_iter()
                            .map(|v| RuleViolation {
                                rule: v.rule,
                                reason: v.reason,
                                confidence: v.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                            })
                            .collect();
                    }
                    tracing::warn!("rule check returned unparsable verdict, using fallback");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "rule check LLM call failed, using fallback");
                }
            }
        }
    }

    fallback_check(content, rules)
}

fn build_prompt(content: &str, rules: &[String]) -> String {
    let rules_list = rules
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {r}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "These rules must always hold for this character:\n{rules_list}\n\n\
         New content:\n{content}\n\n\
         Does the new content violate any rule? Reply with JSON only:\n\
         {{\"violations\": [{{\"rule\": \"the rule text\", \"reason\": \"...\", \
         \"confidence\": 0.0}}]}}\n\
         Use an empty list when nothing is violated."
    )
}

/// Naive fallback: a rule phrased as a prohibition ("never X", "no X") fires
/// when the banned phrase appears verbatim in the content.
fn fallback_check(content: &str, rules: &[String]) -> Vec<RuleViolation> {
    let content_lower = content.to_lowercase();
    let mut violations = Vec::new();

    for rule in rules {
        let rule_lower = rule.to_lowercase();
        let banned = ["never ", "must not ", "cannot ", "no "]
            .iter()
            .find_map(|marker| rule_lower.split_once(marker).map(|(_, rest)| rest));
        let Some(banned) = banned else {
            continue;
        };
        // Take the head phrase of the prohibition, skipping verbs like
        // "use" / "mention" so "never uses profanity" matches "profanity"
        let phrase: Vec<&str> = banned
            .split_whitespace()
            .filter(|w| !matches!(*w, "use" | "uses" | "say" | "says" | "mention" | "mentions" | "be" | "is"))
            .take(3)
            .collect();
        if phrase.is_empty() {
            continue;
        }
        let needle = phrase.join(" ");
        if needle.len() >= 3 && content_lower.contains(&needle) {
            violations.push(RuleViolation {
                rule: rule.clone(),
                reason: format!("content mentions \"{needle}\""),
                confidence: 0.4,
            });
        }
    }
    violations
}

// ============================================================================
// TESTS
// ============================================================================
