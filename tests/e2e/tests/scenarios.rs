//! End-to-end scenarios S1-S6
//!
//! Each test mirrors one of the literal fixtures from the acceptance suite:
//! basic recall, fallback recall, temporal queries, contradiction handling,
//! user isolation, and budgeted context assembly.

use chrono::{DateTime, Utc};
use engram_e2e_tests::harness::EngineHarness;

fn dt(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

// S1 - basic recall: a stored turn is retrievable by a paraphrased query and
// its entity is extracted.
#[test]
fn s1_basic_recall() {
    let harness = EngineHarness::with_embeddings();

    let added = harness
        .engine
        .add("I live in Berlin.", "u1", None, None)
        .unwrap();
    assert!(
        added.entities.iter().any(|e| e == "Berlin"),
        "expected Berlin among {:?}",
        added.entities
    );

    let results = harness
        .engine
        .search("where does the user live", "u1", 3, None)
        .unwrap();
    assert!(
        results.iter().take(3).any(|r| r.content.contains("Berlin")),
        "turn not in top-3: {results:?}"
    );
}

// S2 - 100%-recall fallback: with no embedding capability and the structured
// recall layers disabled, the raw-text scan still finds the exact string.
#[test]
fn s2_fallback_recall_without_embeddings() {
    let harness = EngineHarness::with_config(|mut config| {
        config.retrieval.l1_enabled = false;
        config.retrieval.l3_enabled = false;
        config.retrieval.l4_enabled = false;
        config.retrieval.l6_enabled = false;
        config.retrieval.l7_enabled = false;
        config.retrieval.parallel_recall_enabled = false;
        config
    });

    harness
        .engine
        .add("My lucky number is 7749382.", "u1", None, None)
        .unwrap();

    let results = harness.engine.search("7749382", "u1", 10, None).unwrap();
    assert_eq!(results.len(), 1, "fallback must find the turn");
    assert!(results[0].content.contains("7749382"));
    assert!(results[0].score > 0.0);
}

// S2 addendum: the same guarantee holds on the default configuration.
#[test]
fn s2_exact_string_recall_default_config() {
    let harness = EngineHarness::bare();
    harness
        .engine
        .add("My lucky number is 7749382.", "u1", None, None)
        .unwrap();
    let results = harness.engine.search("7749382", "u1", 10, None).unwrap();
    assert!(!results.is_empty());
    assert!(results[0].content.contains("7749382"));
}

// S3 - temporal query: two employment spans, point-in-time queries pick the
// right one on the fact-time axis.
#[test]
fn s3_temporal_query() {
    let harness = EngineHarness::bare();

    harness
        .engine
        .add("I worked at Acme from 2018 to 2020.", "u1", None, None)
        .unwrap();
    harness
        .engine
        .add("I worked at Globex from 2020 to 2023.", "u1", None, None)
        .unwrap();

    let at_2019 = harness
        .engine
        .query_at_time("u1", None, "user", dt("2019-06-01T00:00:00Z"), Some("WORKED_AT"))
        .unwrap();
    assert_eq!(at_2019.len(), 1, "exactly one fact valid mid-2019");
    assert!(at_2019[0].fact.contains("Acme"));

    let at_2021 = harness
        .engine
        .query_at_time("u1", None, "user", dt("2021-06-01T00:00:00Z"), Some("WORKED_AT"))
        .unwrap();
    assert_eq!(at_2021.len(), 1, "exactly one fact valid mid-2021");
    assert!(at_2021[0].fact.contains("Globex"));
}

// S4 - contradiction: LOVES then HATES on the same pair warns on the second
// add, and SUPERSEDE closes the first fact.
#[test]
fn s4_contradiction_supersede() {
    let harness = EngineHarness::bare();

    harness
        .engine
        .add("Alice loves Bob.", "u1", None, None)
        .unwrap();
    let second = harness
        .engine
        .add("Alice hates Bob.", "u1", None, None)
        .unwrap();
    assert!(
        !second.consistency_warnings.is_empty(),
        "second add must carry a consistency warning"
    );

    let pending = harness.engine.list_pending_contradictions("u1", None).unwrap();
    assert_eq!(pending.len(), 1);

    let result = harness
        .engine
        .resolve_contradiction(
            "u1",
            None,
            &pending[0].id,
            engram_core::ResolutionStrategy::Supersede,
        )
        .unwrap();
    assert!(result.success);

    // The LOVES fact is now superseded and bounded by the HATES fact's
    // knowledge time
    let timeline = harness
        .engine
        .query_timeline("u1", None, "Alice", Some("LOVES"), None, None)
        .unwrap();
    let superseded: Vec<_> = timeline
        .iter()
        .filter(|(_, _, kind)| *kind == engram_core::FactEventKind::Superseded)
        .collect();
    assert_eq!(superseded.len(), 1);
    let (_, fact, _) = superseded[0];
    assert!(fact.superseded_at.is_some());
    assert!(fact.valid_until.unwrap() <= fact.superseded_at.unwrap());

    // Only HATES remains valid now
    let now_facts = harness
        .engine
        .query_at_time("u1", None, "Alice", Utc::now(), None)
        .unwrap();
    assert!(now_facts.iter().all(|f| f.predicate != "LOVES"));
    assert!(now_facts.iter().any(|f| f.predicate == "HATES"));
}

// S5 - user isolation: one user's secret is invisible to another.
#[test]
fn s5_user_isolation() {
    let harness = EngineHarness::bare();

    harness
        .engine
        .add("my secret is 12345", "user-a", None, None)
        .unwrap();

    let b_results = harness.engine.search("12345", "user-b", 10, None).unwrap();
    assert!(b_results.is_empty(), "user B must see nothing");

    let a_results = harness.engine.search("12345", "user-a", 10, None).unwrap();
    assert!(!a_results.is_empty(), "user A must see their own turn");
}

// S6 - multi-turn context: thirty turns, a 1000-token budget, and the built
// context must stay under budget while containing a top-10 search hit.
#[test]
fn s6_multi_turn_context() {
    let harness = EngineHarness::with_embeddings();

    let topics = [
        "gardening", "astronomy", "cooking", "climbing", "painting", "chess",
    ];
    for i in 0..30 {
        let topic = topics[i % topics.len()];
        harness
            .engine
            .add(
                &format!("Turn {i}: today I spent time on {topic} and enjoyed it"),
                "u1",
                None,
                None,
            )
            .unwrap();
    }

    let query = "what does the user do for astronomy";
    let built = harness
        .engine
        .build_context(query, "u1", None, 1000, Some(5))
        .unwrap();
    assert!(built.token_estimate <= 1000, "budget exceeded: {}", built.token_estimate);

    let top10 = harness.engine.search(query, "u1", 10, None).unwrap();
    assert!(!top10.is_empty());
    let contained = top10
        .iter()
        .filter(|r| !r.content.is_empty())
        .any(|r| built.context.contains(r.content.as_str()));
    assert!(contained, "context must contain at least one top-10 hit");
}
