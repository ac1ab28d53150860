//! LLM-backed extraction
//!
//! One prompt per episode with a strict JSON output schema. The budget
//! manager may veto the call; the caller then falls back to rules and
//! records a budget-limited warning.

use serde::Deserialize;

use crate::contradiction::extract_json;
use crate::error::{EngineError, Result};
use crate::providers::{BudgetManager, LlmProvider};

use super::{ExtractedEntity, ExtractedRelation};

const EXTRACT_PROMPT: &str = "Extract entities and relations from this conversational turn.\n\n\
    Turn: {text}\n\n\
    Reply with JSON only, no prose:\n\
    {\"entities\": [{\"name\": \"...\", \"type\": \"PERSON|LOCATION|ORGANIZATION|ITEM|OTHER\"}],\n \
    \"relations\": [{\"subject\": \"...\", \"predicate\": \"SCREAMING_SNAKE_CASE\", \
    \"object\": \"...\", \"fact\": \"one sentence restatement\", \"confidence\": 0.0}]}\n\n\
    Use the subject \"user\" for first-person statements.";

const MAX_TOKENS: u32 = 600;

#[derive(Deserialize)]
struct LlmExtraction {
    #[serde(default)]
    entities: Vec<LlmEntity>,
    #[serde(default)]
    relations: Vec<LlmRelation>,
}

#[derive(Deserialize)]
struct LlmEntity {
    name: String,
    #[serde(rename = "type", default)]
    entity_type: Option<String>,
}

#[derive(Deserialize)]
struct LlmRelation {
    subject: String,
    predicate: String,
    object: String,
    #[serde(default)]
    fact: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Run one extraction prompt. `BudgetExhausted` signals the caller to
/// downgrade to rules rather than fail the write.
pub fn extract_with_llm(
    text: &str,
    llm: &dyn LlmProvider,
    budget: Option<&BudgetManager>,
) -> Result<(Vec<ExtractedEntity>, Vec<ExtractedRelation>)> {
    let prompt = EXTRACT_PROMPT.replace("{text}", text);

    if let Some(budget) = budget {
        let cost = BudgetManager::estimate_cost(prompt.len(), MAX_TOKENS);
        if !budget.can_afford(cost, "extract") {
            return Err(EngineError::BudgetExhausted("llm extraction".into()));
        }
    }

    let response = llm.complete(&prompt, MAX_TOKENS)?;
    if let Some(budget) = budget {
        budget.record_usage(prompt.len() as u64 / 4, MAX_TOKENS as u64 / 2, llm.model());
    }

    let parsed: LlmExtraction = extract_json(&response)
        .ok_or_else(|| EngineError::Provider("extraction response was not valid JSON".into()))?;

    let entities = parsed
        .entities
        .into_iter()
        .filter(|e| !e.name.trim().is_empty())
        .map(|e| ExtractedEntity {
            name: e.name.trim().to_string(),
            entity_type: e.entity_type.unwrap_or_else(|| "OTHER".to_string()),
            span: (0, 0),
        })
        .collect();

    let relations = parsed
        .relations
        .into_iter()
        .filter(|r| {
            !r.subject.trim().is_empty()
                && !r.predicate.trim().is_empty()
                && !r.object.trim().is_empty()
        })
        .map(|r| {
            let fact = r
                .fact
                .unwrap_or_else(|| format!("{} {} {}", r.subject, r.predicate, r.object));
            ExtractedRelation {
                subject: r.subject.trim().to_string(),
                predicate: r.predicate.trim().to_uppercase().replace(' ', "_"),
                object: r.object.trim().to_string(),
                object_type: "OTHER".to_string(),
                fact,
                confidence: r.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                valid_from: None,
                valid_until: None,
            }
        })
        .collect();

    Ok((entities, relations))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::ScriptedLlm;

    #[test]
    fn test_parses_strict_json() {
        let llm = ScriptedLlm::new(vec![
            r#"{"entities": [{"name": "Berlin", "type": "LOCATION"}],
                "relations": [{"subject": "user", "predicate": "lives in", "object": "Berlin",
                               "fact": "The user lives in Berlin", "confidence": 0.9}]}"#,
        ]);
        let (entities, relations) = extract_with_llm("I live in Berlin", &llm, None).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].predicate, "LIVES_IN");
        assert_eq!(relations[0].confidence, 0.9);
    }

    #[test]
    fn test_garbage_response_is_provider_error() {
        let llm = ScriptedLlm::new(vec!["I could not find anything."]);
        let result = extract_with_llm("hello", &llm, None);
        assert!(matches!(result, Err(EngineError::Provider(_))));
    }

    #[test]
    fn test_budget_veto() {
        use crate::providers::{BudgetConfig, BudgetManager};
        let budget = BudgetManager::new(BudgetConfig {
            daily_limit: 0.0,
            hourly_limit: 0.0,
        });
        let llm = ScriptedLlm::new(vec!["{}"]);
        let result = extract_with_llm("hello", &llm, Some(&budget));
        assert!(matches!(result, Err(EngineError::BudgetExhausted(_))));
    }
}
