//! Extractor
//!
//! Turn text into entities, relations, and keywords. Three modes:
//!
//! - RULES: fixed-phrase scanners, pure-local, zero cost
//! - LLM: one strict-JSON prompt per episode, budget-gated
//! - ADAPTIVE: rules first; the LLM runs only when rules found nothing
//!
//! Extraction never fails the write path: every failure downgrades to the
//! rules result plus a warning.

mod dedup;
mod llm;
mod rules;

pub use dedup::{DedupConfig, DedupDecision, DedupItem, Deduplicator, MatchKind};
pub use rules::{extract_entities, extract_keywords, extract_relations, SELF_SUBJECT};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::providers::{BudgetManager, LlmProvider};

// ============================================================================
// TYPES
// ============================================================================

/// Extraction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMode {
    Rules,
    #[default]
    Adaptive,
    Llm,
}

impl ExtractMode {
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "rules" => ExtractMode::Rules,
            "llm" => ExtractMode::Llm,
            _ => ExtractMode::Adaptive,
        }
    }
}

/// An entity found in a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    /// Byte span in the source text; (0, 0) when the LLM produced it
    pub span: (usize, usize),
}

/// A relation found in a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub object_type: String,
    /// Natural-language restatement for retrieval
    pub fact: String,
    pub confidence: f32,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

/// Everything one turn yielded
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
    pub keywords: Vec<String>,
    /// Degradations that happened along the way (budget, provider failures)
    pub warnings: Vec<String>,
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Mode-dispatching extractor
pub struct Extractor {
    pub mode: ExtractMode,
}

impl Extractor {
    pub fn new(mode: ExtractMode) -> Self {
        Self { mode }
    }

    pub fn extract(
        &self,
        text: &str,
        llm: Option<&dyn LlmProvider>,
        budget: Option<&BudgetManager>,
    ) -> Extraction {
        let keywords = extract_keywords(text);

        match self.mode {
            ExtractMode::Rules => {
                let mut extraction = Self::rules_pass(text);
                extraction.keywords = keywords;
                extraction
            }
            ExtractMode::Llm => {
                let mut extraction = self.llm_pass(text, llm, budget);
                extraction.keywords = keywords;
                extraction
            }
            ExtractMode::Adaptive => {
                let mut extraction = Self::rules_pass(text);
                // Escalate only when rules found nothing and an LLM exists;
                // rules-only operation is the expected adaptive baseline
                if extraction.entities.is_empty()
                    && extraction.relations.is_empty()
                    && llm.is_some()
                {
                    extraction = self.llm_pass(text, llm, budget);
                }
                extraction.keywords = keywords;
                extraction
            }
        }
    }

    fn rules_pass(text: &str) -> Extraction {
        Extraction {
            entities: extract_entities(text),
            relations: extract_relations(text),
            keywords: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn llm_pass(
        &self,
        text: &str,
        llm: Option<&dyn LlmProvider>,
        budget: Option<&BudgetManager>,
    ) -> Extraction {
        let Some(llm) = llm else {
            let mut extraction = Self::rules_pass(text);
            extraction
                .warnings
                .push("llm extraction unavailable, used rules".into());
            return extraction;
        };

        match llm::extract_with_llm(text, llm, budget) {
            Ok((entities, relations)) => Extraction {
                entities,
                relations,
                keywords: Vec::new(),
                warnings: Vec::new(),
            },
            Err(EngineError::BudgetExhausted(_)) => {
                let mut extraction = Self::rules_pass(text);
                extraction.warnings.push("budget-limited: extraction downgraded to rules".into());
                extraction
            }
            Err(e) => {
                tracing::warn!(error = %e, "llm extraction failed, using rules");
                let mut extraction = Self::rules_pass(text);
                extraction.warnings.push(format!("llm extraction failed: {e}"));
                extraction
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::ScriptedLlm;
    use crate::providers::{BudgetConfig, BudgetManager};

    #[test]
    fn test_rules_mode_extracts_locally() {
        let extractor = Extractor::new(ExtractMode::Rules);
        let extraction = extractor.extract("I live in Berlin.", None, None);
        assert!(extraction.relations.iter().any(|r| r.predicate == "LIVES_IN"));
        assert!(extraction.keywords.contains(&"berlin".to_string()));
        assert!(extraction.warnings.is_empty());
    }

    #[test]
    fn test_adaptive_skips_llm_when_rules_fire() {
        let extractor = Extractor::new(ExtractMode::Adaptive);
        // A scripted LLM that would error on any parse: it must not be hit
        let llm = ScriptedLlm::new(vec!["not json"]);
        let extraction = extractor.extract("Alice loves Bob.", Some(&llm), None);
        assert_eq!(extraction.relations.len(), 1);
        assert!(extraction.warnings.is_empty());
    }

    #[test]
    fn test_adaptive_escalates_on_empty_rules() {
        let extractor = Extractor::new(ExtractMode::Adaptive);
        let llm = ScriptedLlm::new(vec![
            r#"{"entities": [{"name": "tea", "type": "ITEM"}], "relations": []}"#,
        ]);
        let extraction = extractor.extract("mmm something nice to drink", Some(&llm), None);
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(extraction.entities[0].name, "tea");
    }

    #[test]
    fn test_budget_veto_downgrades_with_warning() {
        let extractor = Extractor::new(ExtractMode::Llm);
        let llm = ScriptedLlm::new(vec!["{}"]);
        let budget = BudgetManager::new(BudgetConfig {
            daily_limit: 0.0,
            hourly_limit: 0.0,
        });
        let extraction = extractor.extract("I live in Berlin.", Some(&llm), Some(&budget));
        // Downgraded, not failed: the rules result still lands
        assert!(!extraction.relations.is_empty());
        assert!(extraction.warnings.iter().any(|w| w.contains("budget-limited")));
    }
}
