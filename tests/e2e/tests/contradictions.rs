//! Contradiction lifecycle across the public API

use std::sync::Arc;

use engram_core::{ContradictionType, ResolutionStrategy};
use engram_e2e_tests::harness::EngineHarness;
use engram_e2e_tests::mocks::ScriptedLlm;

#[test]
fn direct_conflict_is_detected_and_pending_persists_restart() {
    let harness = EngineHarness::bare();
    harness.engine.add("I live in Berlin.", "u1", None, None).unwrap();
    let second = harness.engine.add("I live in Paris.", "u1", None, None).unwrap();
    assert!(
        second
            .consistency_warnings
            .iter()
            .any(|w| w.contains("contradiction")),
        "warnings: {:?}",
        second.consistency_warnings
    );

    let pending = harness.engine.list_pending_contradictions("u1", None).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].contradiction_type, ContradictionType::Direct);

    // Pending records are durable
    let harness = harness.restart();
    let pending = harness.engine.list_pending_contradictions("u1", None).unwrap();
    assert_eq!(pending.len(), 1);
}

#[test]
fn reject_expires_the_new_fact() {
    let harness = EngineHarness::bare();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();
    harness.engine.add("Alice hates Bob.", "u1", None, None).unwrap();

    let pending = harness.engine.list_pending_contradictions("u1", None).unwrap();
    let result = harness
        .engine
        .resolve_contradiction("u1", None, &pending[0].id, ResolutionStrategy::Reject)
        .unwrap();
    assert!(!result.success, "reject reports the new fact as dropped");

    let facts = harness
        .engine
        .query_at_time("u1", None, "Alice", chrono::Utc::now(), None)
        .unwrap();
    assert!(facts.iter().any(|f| f.predicate == "LOVES"));
    assert!(facts.iter().all(|f| f.predicate != "HATES"));
}

#[test]
fn coexist_keeps_both_facts() {
    let harness = EngineHarness::bare();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();
    harness.engine.add("Alice hates Bob.", "u1", None, None).unwrap();

    let pending = harness.engine.list_pending_contradictions("u1", None).unwrap();
    harness
        .engine
        .resolve_contradiction("u1", None, &pending[0].id, ResolutionStrategy::Coexist)
        .unwrap();

    let facts = harness
        .engine
        .query_at_time("u1", None, "Alice", chrono::Utc::now(), None)
        .unwrap();
    assert!(facts.iter().any(|f| f.predicate == "LOVES"));
    assert!(facts.iter().any(|f| f.predicate == "HATES"));

    // Resolution moved the record out of pending
    assert!(harness
        .engine
        .list_pending_contradictions("u1", None)
        .unwrap()
        .is_empty());
}

#[test]
fn auto_resolve_supersedes_on_write() {
    let harness = EngineHarness::with_config(|mut config| {
        config.contradiction.auto_resolve = true;
        config
    });
    harness.engine.add("I live in Berlin.", "u1", None, None).unwrap();
    harness.engine.add("I live in Paris.", "u1", None, None).unwrap();

    // The old fact closed automatically; only Paris remains current
    let facts = harness
        .engine
        .query_at_time("u1", None, "user", chrono::Utc::now(), Some("LIVES_IN"))
        .unwrap();
    assert_eq!(facts.len(), 1);
    assert!(facts[0].fact.contains("Paris"));

    assert!(harness
        .engine
        .list_pending_contradictions("u1", None)
        .unwrap()
        .is_empty());
}

#[test]
fn stats_reflect_pending_and_resolved_counts() {
    let harness = EngineHarness::bare();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();
    harness.engine.add("Alice hates Bob.", "u1", None, None).unwrap();

    let stats = harness.engine.contradiction_stats("u1", None).unwrap();
    assert_eq!(stats.pending_count, 1);
    assert_eq!(stats.resolved_count, 0);
    assert!(!stats.llm_enabled);

    let pending = harness.engine.list_pending_contradictions("u1", None).unwrap();
    harness
        .engine
        .resolve_contradiction("u1", None, &pending[0].id, ResolutionStrategy::Supersede)
        .unwrap();

    let stats = harness.engine.contradiction_stats("u1", None).unwrap();
    assert_eq!(stats.pending_count, 0);
    assert_eq!(stats.resolved_count, 1);
}

#[test]
fn detect_reruns_for_an_existing_fact() {
    let harness = EngineHarness::bare();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();
    harness.engine.add("Alice hates Bob.", "u1", None, None).unwrap();

    let pending = harness.engine.list_pending_contradictions("u1", None).unwrap();
    let new_fact_id = pending[0].new_fact_id.clone();
    let detected = harness
        .engine
        .detect_contradictions("u1", None, &new_fact_id)
        .unwrap();
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].contradiction_type, ContradictionType::Logical);
}

#[test]
fn llm_rule_check_warns_on_add() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        // Extraction prompt response (adaptive mode falls through on empty rules hit)
        r#"{"entities": [], "relations": []}"#,
        // Rule check verdict
        r#"{"violations": [{"rule": "never mentions dragons", "reason": "dragons appear", "confidence": 0.9}]}"#,
    ]));
    let harness = EngineHarness::with_llm(llm, |config| config);
    harness
        .engine
        .set_absolute_rules("u1", None, vec!["never mentions dragons".into()])
        .unwrap();

    let added = harness
        .engine
        .add("suddenly dragons filled the sky", "u1", None, None)
        .unwrap();
    assert!(
        added
            .consistency_warnings
            .iter()
            .any(|w| w.contains("rule violation")),
        "warnings: {:?}",
        added.consistency_warnings
    );
}
