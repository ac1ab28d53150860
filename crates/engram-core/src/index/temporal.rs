//! Temporal index (L2)
//!
//! Interval entries over the three time axes, keyed by doc id, with subject
//! and predicate side maps. Restricts the retrieval candidate universe to a
//! time window before any scoring happens.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{atomic_write_json, load_json_or_quarantine};

// ============================================================================
// TYPES
// ============================================================================

/// Which time axis a query runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeAxis {
    /// T1, when the fact was true in the world
    #[default]
    Fact,
    /// T2, when the engine learned it
    Known,
    /// T3, when the record existed in storage
    System,
}

/// Half-open-ended time range; a missing bound is unbounded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, point: DateTime<Utc>) -> bool {
        if let Some(start) = self.start {
            if point < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if point > end {
                return false;
            }
        }
        true
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        if let (Some(end), Some(start)) = (self.end, other.start) {
            if end < start {
                return false;
            }
        }
        if let (Some(start), Some(end)) = (self.start, other.end) {
            if start > end {
                return false;
            }
        }
        true
    }
}

/// One indexed interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalEntry {
    pub doc_id: String,
    /// T1 fact-time range
    #[serde(default)]
    pub fact_range: TimeRange,
    /// T2 knowledge time
    #[serde(default)]
    pub known_at: Option<DateTime<Utc>>,
    /// T3 system-time range
    #[serde(default)]
    pub system_range: TimeRange,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub predicate: String,
}

/// What a timeline event marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineEventKind {
    Started,
    Ended,
    Known,
}

// ============================================================================
// INDEX
// ============================================================================

/// Tri-temporal interval index
pub struct TemporalIndex {
    path: PathBuf,
    entries: HashMap<String, TemporalEntry>,
    by_subject: HashMap<String, BTreeSet<String>>,
    by_predicate: HashMap<String, BTreeSet<String>>,
}

impl TemporalIndex {
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries: Vec<TemporalEntry> = load_json_or_quarantine(&path)?.unwrap_or_default();
        let mut index = Self {
            path,
            entries: HashMap::new(),
            by_subject: HashMap::new(),
            by_predicate: HashMap::new(),
        };
        for entry in entries {
            index.insert_in_memory(entry);
        }
        Ok(index)
    }

    fn insert_in_memory(&mut self, entry: TemporalEntry) {
        if !entry.subject.is_empty() {
            self.by_subject
                .entry(entry.subject.clone())
                .or_default()
                .insert(entry.doc_id.clone());
        }
        if !entry.predicate.is_empty() {
            self.by_predicate
                .entry(entry.predicate.clone())
                .or_default()
                .insert(entry.doc_id.clone());
        }
        self.entries.insert(entry.doc_id.clone(), entry);
    }

    pub fn add(&mut self, entry: TemporalEntry) {
        if self.entries.contains_key(&entry.doc_id) {
            self.remove(&entry.doc_id);
        }
        self.insert_in_memory(entry);
    }

    pub fn remove(&mut self, doc_id: &str) -> bool {
        let Some(entry) = self.entries.remove(doc_id) else {
            return false;
        };
        if let Some(set) = self.by_subject.get_mut(&entry.subject) {
            set.remove(doc_id);
            if set.is_empty() {
                self.by_subject.remove(&entry.subject);
            }
        }
        if let Some(set) = self.by_predicate.get_mut(&entry.predicate) {
            set.remove(doc_id);
            if set.is_empty() {
                self.by_predicate.remove(&entry.predicate);
            }
        }
        true
    }

    pub fn get(&self, doc_id: &str) -> Option<&TemporalEntry> {
        self.entries.get(doc_id)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// All doc ids whose interval on the chosen axis contains the point
    pub fn query_at_time(&self, point: DateTime<Utc>, axis: TimeAxis) -> Vec<String> {
        let mut results: Vec<String> = self
            .entries
            .values()
            .filter(|entry| match axis {
                TimeAxis::Fact => entry.fact_range.contains(point),
                TimeAxis::Known => entry.known_at.is_some_and(|t| t <= point),
                TimeAxis::System => entry.system_range.contains(point),
            })
            .map(|entry| entry.doc_id.clone())
            .collect();
        results.sort();
        results
    }

    /// All doc ids whose interval intersects [start, end] on the chosen axis
    pub fn query_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        axis: TimeAxis,
    ) -> Vec<String> {
        let window = TimeRange::new(start, end);
        let mut results: Vec<String> = self
            .entries
            .values()
            .filter(|entry| match axis {
                TimeAxis::Fact => entry.fact_range.overlaps(&window),
                TimeAxis::Known => entry
                    .known_at
                    .is_some_and(|t| window.contains(t)),
                TimeAxis::System => entry.system_range.overlaps(&window),
            })
            .map(|entry| entry.doc_id.clone())
            .collect();
        results.sort();
        results
    }

    /// Doc ids for a subject, optionally narrowed by predicate and fact-time
    /// point
    pub fn query_by_subject(
        &self,
        subject: &str,
        point: Option<DateTime<Utc>>,
        predicate: Option<&str>,
    ) -> Vec<String> {
        let Some(candidates) = self.by_subject.get(subject) else {
            return Vec::new();
        };
        let mut results: Vec<String> = candidates
            .iter()
            .filter(|doc_id| {
                let Some(entry) = self.entries.get(*doc_id) else {
                    return false;
                };
                if let Some(pred) = predicate {
                    if entry.predicate != pred {
                        return false;
                    }
                }
                match point {
                    Some(p) => entry.fact_range.contains(p),
                    None => true,
                }
            })
            .cloned()
            .collect();
        results.sort();
        results
    }

    /// Chronological event sequence for a subject
    pub fn query_timeline(
        &self,
        subject: &str,
        predicate: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<(DateTime<Utc>, String, TimelineEventKind)> {
        let Some(candidates) = self.by_subject.get(subject) else {
            return Vec::new();
        };
        let mut timeline = Vec::new();
        for doc_id in candidates {
            let Some(entry) = self.entries.get(doc_id) else {
                continue;
            };
            if let Some(pred) = predicate {
                if entry.predicate != pred {
                    continue;
                }
            }
            if let Some(t) = entry.fact_range.start {
                timeline.push((t, doc_id.clone(), TimelineEventKind::Started));
            }
            if let Some(t) = entry.fact_range.end {
                timeline.push((t, doc_id.clone(), TimelineEventKind::Ended));
            }
            if let Some(t) = entry.known_at {
                timeline.push((t, doc_id.clone(), TimelineEventKind::Known));
            }
        }
        timeline.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        timeline.retain(|(t, _, _)| {
            start.is_none_or(|s| *t >= s) && end.is_none_or(|e| *t <= e)
        });
        timeline
    }

    pub fn flush(&self) -> Result<()> {
        let entries: Vec<&TemporalEntry> = self.entries.values().collect();
        atomic_write_json(&self.path, &entries)
    }
}

// ============================================================================
// TESTS
// ============================================================================
