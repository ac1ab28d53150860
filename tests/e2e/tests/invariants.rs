//! Engine-wide invariants
//!
//! These must hold for all execution traces: monotone durability, tri-temporal
//! consistency, supersede idempotence, restart round-trips, index/graph
//! population equivalence, and the boundary behaviours.

use chrono::{DateTime, Utc};
use engram_core::{Direction, EngineConfig, ResolutionStrategy, TemporalFact};
use engram_e2e_tests::harness::EngineHarness;

fn dt(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

// Invariant 1 - monotone durability: every text ever added is retrievable via
// the raw-text fallback, even with all structured recall disabled.
#[test]
fn monotone_durability() {
    let harness = EngineHarness::with_config(|mut config| {
        config.retrieval.l1_enabled = false;
        config.retrieval.l3_enabled = false;
        config.retrieval.l4_enabled = false;
        config.retrieval.l6_enabled = false;
        config.retrieval.l7_enabled = false;
        config.retrieval.parallel_recall_enabled = false;
        config
    });

    let markers = ["zebra-9914", "quokka-7632", "lemur-0148", "番茄酱-55"];
    for (i, marker) in markers.iter().enumerate() {
        harness
            .engine
            .add(
                &format!("note {i} mentions the marker {marker} exactly once"),
                "u1",
                None,
                None,
            )
            .unwrap();
    }

    for marker in markers {
        let results = harness.engine.search(marker, "u1", 10, None).unwrap();
        assert!(
            results.iter().any(|r| r.content.contains(marker)),
            "marker {marker} lost"
        );
    }
}

// Invariant 2 - tri-temporal consistency: a fact about the past is valid at
// past times even though the engine only learned it now.
#[test]
fn tri_temporal_consistency() {
    let harness = EngineHarness::bare();
    harness
        .engine
        .add("I worked at Acme from 2018 to 2020.", "u1", None, None)
        .unwrap();

    // T long before known_at
    let at = dt("2019-06-01T00:00:00Z");
    let facts = harness
        .engine
        .query_at_time("u1", None, "user", at, Some("WORKED_AT"))
        .unwrap();
    assert_eq!(facts.len(), 1);
    let fact = &facts[0];
    assert!(fact.known_at > at, "the engine learned this after T");
    assert!(fact.is_valid_at(at));

    // Outside the validity window the same query is empty
    let outside = harness
        .engine
        .query_at_time("u1", None, "user", dt("2017-01-01T00:00:00Z"), Some("WORKED_AT"))
        .unwrap();
    assert!(outside.is_empty());
}

// Invariant 3 - contradiction resolution idempotence: applying SUPERSEDE
// twice leaves the facts exactly as the first application did.
#[test]
fn supersede_idempotence() {
    let harness = EngineHarness::bare();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();
    harness.engine.add("Alice hates Bob.", "u1", None, None).unwrap();

    let pending = harness.engine.list_pending_contradictions("u1", None).unwrap();
    assert_eq!(pending.len(), 1);
    let id = pending[0].id.clone();

    harness
        .engine
        .resolve_contradiction("u1", None, &id, ResolutionStrategy::Supersede)
        .unwrap();
    let after_first = harness
        .engine
        .query_timeline("u1", None, "Alice", Some("LOVES"), None, None)
        .unwrap();

    // Second application is a no-op, not an error
    let second = harness
        .engine
        .resolve_contradiction("u1", None, &id, ResolutionStrategy::Supersede)
        .unwrap();
    assert!(second.success);
    let after_second = harness
        .engine
        .query_timeline("u1", None, "Alice", Some("LOVES"), None, None)
        .unwrap();

    assert_eq!(after_first.len(), after_second.len());
    for (a, b) in after_first.iter().zip(after_second.iter()) {
        assert_eq!(a.0, b.0);
        assert_eq!(a.1.valid_until, b.1.valid_until);
        assert_eq!(a.1.superseded_at, b.1.superseded_at);
    }
}

// Invariant 4 - round-trip: save, restart, load yields identical answers.
#[test]
fn restart_round_trip() {
    let harness = EngineHarness::bare();
    harness.engine.add("I live in Berlin.", "u1", None, None).unwrap();
    harness
        .engine
        .add("I worked at Acme from 2018 to 2020.", "u1", None, None)
        .unwrap();
    harness.engine.add("My cat is named Miso.", "u1", None, None).unwrap();
    harness.engine.flush_all().unwrap();

    let queries = ["Berlin", "Acme", "Miso"];
    let before: Vec<Vec<String>> = queries
        .iter()
        .map(|q| {
            harness
                .engine
                .search(q, "u1", 10, None)
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect()
        })
        .collect();

    let harness = harness.restart();
    let after: Vec<Vec<String>> = queries
        .iter()
        .map(|q| {
            harness
                .engine
                .search(q, "u1", 10, None)
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect()
        })
        .collect();
    assert_eq!(before, after);

    let facts = harness
        .engine
        .query_at_time("u1", None, "user", dt("2019-06-01T00:00:00Z"), Some("WORKED_AT"))
        .unwrap();
    assert_eq!(facts.len(), 1);
}

// Invariant 5 - index/graph equivalence: every text index enumerates exactly
// the docs the owning stores know about.
#[test]
fn index_graph_equivalence() {
    let harness = EngineHarness::bare();
    for i in 0..5 {
        harness
            .engine
            .add(&format!("Alice loves topic number {i}."), "u1", None, None)
            .unwrap();
    }

    let diag = harness.engine.diagnostics("u1", None).unwrap();
    let expected_docs =
        diag.episode_count + diag.live_edge_count + diag.active_condition_count;
    assert_eq!(diag.ngram_doc_count, expected_docs);
    assert_eq!(diag.inverted_doc_count, expected_docs);
    assert_eq!(diag.fulltext_doc_count, expected_docs);
    // Temporal index carries one entry per episode and per live edge
    assert_eq!(
        diag.temporal_entry_count,
        diag.episode_count + diag.live_edge_count
    );
}

// Invariant 6 is exercised in scenarios::s5_user_isolation; here the stricter
// variant: writes by one user never change another user's result set.
#[test]
fn writes_do_not_leak_across_users() {
    let harness = EngineHarness::bare();
    harness.engine.add("blue whale facts", "u1", None, None).unwrap();

    let before = harness.engine.search("whale", "u2", 10, None).unwrap();
    harness.engine.add("whale watching trip", "u2", None, None).unwrap();
    harness.engine.add("more whale facts for u1", "u1", None, None).unwrap();
    let after = harness.engine.search("whale", "u2", 10, None).unwrap();

    assert!(before.is_empty());
    assert_eq!(after.len(), 1);
    assert!(after[0].content.contains("whale watching"));
}

// ============================================================================
// BOUNDARY BEHAVIOURS
// ============================================================================

#[test]
fn empty_query_is_empty_not_a_crash() {
    let harness = EngineHarness::bare();
    harness.engine.add("some content", "u1", None, None).unwrap();
    assert!(harness.engine.search("", "u1", 10, None).unwrap().is_empty());
}

#[test]
fn zero_top_k_is_empty() {
    let harness = EngineHarness::bare();
    harness.engine.add("some content", "u1", None, None).unwrap();
    assert!(harness.engine.search("content", "u1", 0, None).unwrap().is_empty());
}

#[test]
fn bfs_depth_zero_returns_no_edges() {
    let harness = EngineHarness::bare();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();
    let buckets = harness
        .engine
        .bfs("u1", None, "Alice", 0, Direction::Both)
        .unwrap();
    assert!(buckets.is_empty());
}

#[test]
fn unbounded_fact_is_valid_at_every_time() {
    let fact = TemporalFact::new("a", "LIKES", "b", "a likes b");
    assert!(fact.valid_from.is_none() && fact.valid_until.is_none());
    assert!(fact.is_valid_at(dt("1900-01-01T00:00:00Z")));
    assert!(fact.is_valid_at(dt("2999-12-31T00:00:00Z")));
}

#[test]
fn duplicate_turns_upsert_nodes_not_duplicate_them() {
    let harness = EngineHarness::bare();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();
    let diag_first = harness.engine.diagnostics("u1", None).unwrap();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();
    let diag_second = harness.engine.diagnostics("u1", None).unwrap();

    // Two episodes, but the same entity nodes
    assert_eq!(diag_second.episode_count, 2);
    assert_eq!(diag_first.active_node_count, diag_second.active_node_count);
}

#[test]
fn default_config_loads() {
    // Guards the serde defaults used by core_settings.json
    let json = serde_json::to_string(&EngineConfig::default()).unwrap();
    let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.graph.backend, "file");
}
