//! Graph query surface through the public engine API

use chrono::{DateTime, Utc};
use engram_core::Direction;
use engram_e2e_tests::harness::EngineHarness;

fn dt(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

#[test]
fn timeline_orders_employment_events() {
    let harness = EngineHarness::bare();
    harness
        .engine
        .add("I worked at Acme from 2018 to 2020.", "u1", None, None)
        .unwrap();
    harness
        .engine
        .add("I worked at Globex from 2020 to 2023.", "u1", None, None)
        .unwrap();

    let timeline = harness
        .engine
        .query_timeline("u1", None, "user", Some("WORKED_AT"), None, None)
        .unwrap();
    assert!(timeline.len() >= 4, "two start and two end events expected");
    for pair in timeline.windows(2) {
        assert!(pair[0].0 <= pair[1].0, "timeline must be chronological");
    }
    assert_eq!(timeline[0].0, dt("2018-01-01T00:00:00Z"));

    // Range filter narrows the window
    let windowed = harness
        .engine
        .query_timeline(
            "u1",
            None,
            "user",
            Some("WORKED_AT"),
            Some(dt("2019-01-01T00:00:00Z")),
            Some(dt("2021-01-01T00:00:00Z")),
        )
        .unwrap();
    assert!(windowed.iter().all(|(t, _, _)| {
        *t >= dt("2019-01-01T00:00:00Z") && *t <= dt("2021-01-01T00:00:00Z")
    }));
}

#[test]
fn snapshot_comparison_reports_job_change() {
    let harness = EngineHarness::bare();
    harness
        .engine
        .add("I worked at Acme from 2018 to 2020.", "u1", None, None)
        .unwrap();
    harness
        .engine
        .add("I worked at Globex from 2020 to 2023.", "u1", None, None)
        .unwrap();

    let diff = harness
        .engine
        .compare_snapshots(
            "u1",
            None,
            "user",
            dt("2019-06-01T00:00:00Z"),
            dt("2021-06-01T00:00:00Z"),
        )
        .unwrap();
    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.removed.len(), 1);
    assert!(diff.added[0].fact.contains("Globex"));
    assert!(diff.removed[0].fact.contains("Acme"));
}

#[test]
fn bfs_reaches_second_hop() {
    let harness = EngineHarness::bare();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();
    harness.engine.add("Bob works at Acme.", "u1", None, None).unwrap();

    let buckets = harness
        .engine
        .bfs("u1", None, "Alice", 2, Direction::Both)
        .unwrap();
    assert!(buckets.contains_key(&0), "first hop missing");
    assert!(buckets.contains_key(&1), "second hop missing");

    let second_hop_predicates: Vec<&str> = buckets[&1]
        .iter()
        .map(|(_, fact)| fact.predicate.as_str())
        .collect();
    assert!(second_hop_predicates.contains(&"WORKED_AT"));
}

#[test]
fn find_path_follows_directed_edges() {
    let harness = EngineHarness::bare();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();
    harness.engine.add("Bob works at Acme.", "u1", None, None).unwrap();

    let path = harness
        .engine
        .find_path("u1", None, "Alice", "Acme", 5)
        .unwrap()
        .expect("path exists");
    assert_eq!(path.len(), 2);
    assert_eq!(path[0].1.predicate, "LOVES");
    assert_eq!(path[1].1.predicate, "WORKED_AT");

    // No reverse path over directed edges
    assert!(harness
        .engine
        .find_path("u1", None, "Acme", "Alice", 5)
        .unwrap()
        .is_none());
}

#[test]
fn neighbors_lists_direct_edges_only() {
    let harness = EngineHarness::bare();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();
    harness.engine.add("Bob works at Acme.", "u1", None, None).unwrap();

    let neighbors = harness
        .engine
        .get_neighbors("u1", None, "Alice", Direction::Both)
        .unwrap();
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].1.predicate, "LOVES");
}

#[test]
fn unknown_subject_queries_are_empty() {
    let harness = EngineHarness::bare();
    harness.engine.add("Alice loves Bob.", "u1", None, None).unwrap();

    assert!(harness
        .engine
        .query_at_time("u1", None, "Nobody", Utc::now(), None)
        .unwrap()
        .is_empty());
    assert!(harness
        .engine
        .query_timeline("u1", None, "Nobody", None, None, None)
        .unwrap()
        .is_empty());
    assert!(harness
        .engine
        .bfs("u1", None, "Nobody", 3, Direction::Both)
        .unwrap()
        .is_empty());
}
