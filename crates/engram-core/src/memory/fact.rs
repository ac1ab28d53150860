//! Temporal facts - directed, time-bounded edges between nodes
//!
//! Each fact carries three independent time axes:
//!
//! - **Fact time** (`valid_from` / `valid_until`): when the statement was true
//!   in the world, regardless of when we learned it. Either bound may be
//!   `None`, meaning unbounded in that direction.
//! - **Knowledge time** (`known_at`): when the engine learned of the fact.
//! - **System time** (`created_at` / `expired_at`): when the record existed in
//!   storage. A correction expires the old record and creates a new one, so
//!   "what did we believe on date D" stays answerable separately from "what
//!   was true on date D".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TEMPORAL FACT
// ============================================================================

/// A directed, time-bounded edge between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalFact {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Subject node id
    pub subject: String,
    /// Relation name, SCREAMING_SNAKE_CASE by convention
    pub predicate: String,
    /// Object node id
    pub object: String,
    /// Natural-language restatement used for retrieval
    pub fact: String,
    /// Fact time start (T1); None = unbounded past
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    /// Fact time end (T1); None = unbounded future
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    /// Knowledge time (T2): when the engine learned this
    pub known_at: DateTime<Utc>,
    /// System time start (T3)
    pub created_at: DateTime<Utc>,
    /// System time end (T3); None = record still live
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    /// Confidence in this fact [0.0, 1.0]
    pub confidence: f32,
    /// Verbatim text the fact was extracted from
    #[serde(default)]
    pub source_text: String,
    /// Episodes supporting this fact
    #[serde(default)]
    pub source_episodes: Vec<String>,
    /// Set when a contradiction resolution replaced this fact; equals the
    /// superseding fact's known_at and is never earlier than created_at
    #[serde(default)]
    pub superseded_at: Option<DateTime<Utc>>,
    /// How many episodes re-confirmed this fact
    #[serde(default)]
    pub verification_count: u32,
}

impl TemporalFact {
    /// Create a fact with knowledge and system time set to now
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        fact: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            fact: fact.into(),
            valid_from: None,
            valid_until: None,
            known_at: now,
            created_at: now,
            expired_at: None,
            confidence: 0.5,
            source_text: String::new(),
            source_episodes: Vec::new(),
            superseded_at: None,
            verification_count: 1,
        }
    }

    /// Fact-time validity: `(valid_from <= T or null) && (T <= valid_until or
    /// null) && expired_at is null`
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        if self.expired_at.is_some() {
            return false;
        }
        let after_start = self.valid_from.is_none_or(|from| from <= at);
        let before_end = self.valid_until.is_none_or(|until| at <= until);
        after_start && before_end
    }

    /// A record is live until its system time is closed
    pub fn is_live(&self) -> bool {
        self.expired_at.is_none()
    }

    /// Currently valid on the fact-time axis
    pub fn is_currently_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Close the record on the system-time axis
    pub fn expire(&mut self) {
        self.expired_at = Some(Utc::now());
    }

    /// Fact-time overlap between two facts, treating missing bounds as
    /// unbounded in that direction
    pub fn overlaps(&self, other: &TemporalFact) -> bool {
        let ends_before = match (self.valid_until, other.valid_from) {
            (Some(end), Some(start)) => end < start,
            _ => false,
        };
        let starts_after = match (self.valid_from, other.valid_until) {
            (Some(start), Some(end)) => start > end,
            _ => false,
        };
        !ends_before && !starts_after
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_unbounded_fact_valid_everywhere() {
        let fact = TemporalFact::new("a", "KNOWS", "b", "a knows b");
        assert!(fact.is_valid_at(dt("1970-01-01T00:00:00Z")));
        assert!(fact.is_valid_at(dt("2999-01-01T00:00:00Z")));
    }

    #[test]
    fn test_bounded_validity() {
        let mut fact = TemporalFact::new("a", "WORKED_AT", "acme", "a worked at acme");
        fact.valid_from = Some(dt("2018-01-01T00:00:00Z"));
        fact.valid_until = Some(dt("2020-01-01T00:00:00Z"));

        assert!(fact.is_valid_at(dt("2019-06-01T00:00:00Z")));
        assert!(!fact.is_valid_at(dt("2021-06-01T00:00:00Z")));
        assert!(!fact.is_valid_at(dt("2017-06-01T00:00:00Z")));
        // Boundary is inclusive on both ends
        assert!(fact.is_valid_at(dt("2018-01-01T00:00:00Z")));
        assert!(fact.is_valid_at(dt("2020-01-01T00:00:00Z")));
    }

    #[test]
    fn test_expired_record_never_valid() {
        let mut fact = TemporalFact::new("a", "KNOWS", "b", "a knows b");
        fact.expire();
        assert!(!fact.is_valid_at(Utc::now()));
        assert!(!fact.is_live());
    }

    #[test]
    fn test_overlap() {
        let mut first = TemporalFact::new("a", "WORKED_AT", "acme", "");
        first.valid_from = Some(dt("2018-01-01T00:00:00Z"));
        first.valid_until = Some(dt("2020-01-01T00:00:00Z"));

        let mut second = TemporalFact::new("a", "WORKED_AT", "globex", "");
        second.valid_from = Some(dt("2019-01-01T00:00:00Z"));

        assert!(first.overlaps(&second));

        second.valid_from = Some(dt("2020-06-01T00:00:00Z"));
        assert!(!first.overlaps(&second));

        // Unbounded fact overlaps everything
        let open = TemporalFact::new("a", "WORKED_AT", "initech", "");
        assert!(open.overlaps(&first));
        assert!(first.overlaps(&open));
    }
}
