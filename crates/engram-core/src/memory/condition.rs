//! Persistent conditions - durable background statements
//!
//! A condition ("user lives in Berlin") is always offered to the context
//! assembler. It is not a [`TemporalFact`]: its confidence is reinforced by
//! repeated observation and decays multiplicatively while unused, so it has
//! its own lifecycle and store.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::atomic_write_json;

// ============================================================================
// TYPES
// ============================================================================

/// What kind of background statement this is
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    Location,
    State,
    Relationship,
    Possession,
    Goal,
    #[default]
    Other,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Location => "location",
            ConditionType::State => "state",
            ConditionType::Relationship => "relationship",
            ConditionType::Possession => "possession",
            ConditionType::Goal => "goal",
            ConditionType::Other => "other",
        }
    }

    pub fn all() -> [ConditionType; 6] {
        [
            ConditionType::Location,
            ConditionType::State,
            ConditionType::Relationship,
            ConditionType::Possession,
            ConditionType::Goal,
            ConditionType::Other,
        ]
    }
}

/// A durable background statement with reinforced confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentCondition {
    pub id: String,
    pub content: String,
    pub context_type: ConditionType,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    #[serde(default)]
    pub use_count: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl PersistentCondition {
    pub fn new(content: impl Into<String>, context_type: ConditionType, confidence: f32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            context_type,
            confidence: confidence.clamp(0.0, 1.0),
            created_at: now,
            last_used: now,
            use_count: 0,
            active: true,
        }
    }

    /// Hash of the normalized content, used for collision-merge
    fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        normalized(&self.content).hash(&mut hasher);
        hasher.finish()
    }
}

fn normalized(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lifecycle parameters for the tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionConfig {
    /// At most this many conditions per type survive consolidation
    pub max_per_type: usize,
    /// Hard cap across all types
    pub max_total: usize,
    /// A condition unused for this many days starts decaying
    pub decay_days: f32,
    /// Multiplicative decay rate per elapsed decay period
    pub decay_rate: f32,
    /// Conditions below this confidence are pruned
    pub min_confidence: f32,
    /// Word-overlap similarity at which two conditions merge
    pub merge_similarity: f32,
}

impl Default for ConditionConfig {
    fn default() -> Self {
        Self {
            max_per_type: 5,
            max_total: 30,
            decay_days: 7.0,
            decay_rate: 0.1,
            min_confidence: 0.2,
            merge_similarity: 0.6,
        }
    }
}

// ============================================================================
// TRACKER
// ============================================================================

/// Durable store of persistent conditions for one (user, character) scope
pub struct ConditionTracker {
    path: PathBuf,
    conditions: Vec<PersistentCondition>,
    config: ConditionConfig,
}

impl ConditionTracker {
    pub fn open(dir: &Path, config: ConditionConfig) -> Result<Self> {
        let path = dir.join("persistent_conditions.json");
        let conditions = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "unreadable conditions file, starting empty");
                Vec::new()
            })
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            conditions,
            config,
        })
    }

    fn save(&self) -> Result<()> {
        atomic_write_json(&self.path, &self.conditions)
    }

    /// Word-overlap similarity between two contents (Jaccard over word sets)
    fn similarity(a: &str, b: &str) -> f32 {
        let set_a: std::collections::HashSet<&str> = a.split_whitespace().collect();
        let set_b: std::collections::HashSet<&str> = b.split_whitespace().collect();
        if set_a.is_empty() || set_b.is_empty() {
            return 0.0;
        }
        let inter = set_a.intersection(&set_b).count() as f32;
        let union = set_a.union(&set_b).count() as f32;
        inter / union
    }

    /// Add a condition, merging into an existing one when the content is a
    /// hash collision or sufficiently similar within the same type.
    ///
    /// Merges keep the longer content; reinforcement lifts confidence toward
    /// the max of the two plus a small bump.
    pub fn add(&mut self, condition: PersistentCondition) -> Result<String> {
        let new_hash = condition.content_hash();
        let new_norm = normalized(&condition.content);

        let merge_index = self.conditions.iter().position(|existing| {
            existing.active
                && existing.context_type == condition.context_type
                && (existing.content_hash() == new_hash
                    || Self::similarity(&normalized(&existing.content), &new_norm)
                        >= self.config.merge_similarity)
        });

        let id = if let Some(index) = merge_index {
            let existing = &mut self.conditions[index];
            if condition.content.len() > existing.content.len() {
                existing.content = condition.content;
            }
            existing.confidence =
                (existing.confidence.max(condition.confidence) + 0.05).min(1.0);
            existing.last_used = Utc::now();
            existing.use_count += 1;
            existing.id.clone()
        } else {
            let id = condition.id.clone();
            self.conditions.push(condition);
            id
        };

        self.save()?;
        Ok(id)
    }

    /// Record that a condition was injected into a prompt
    pub fn mark_used(&mut self, ids: &[String]) -> Result<()> {
        let now = Utc::now();
        for cond in &mut self.conditions {
            if ids.iter().any(|id| *id == cond.id) {
                cond.last_used = now;
                cond.use_count += 1;
            }
        }
        self.save()
    }

    pub fn deactivate(&mut self, id: &str) -> Result<bool> {
        let mut found = false;
        for cond in &mut self.conditions {
            if cond.id == id {
                cond.active = false;
                found = true;
            }
        }
        if found {
            self.save()?;
        }
        Ok(found)
    }

    /// Apply multiplicative decay driven by `last_used`, prune below the
    /// confidence floor, and enforce per-type and total caps.
    ///
    /// Returns the surviving active conditions grouped in declaration order.
    pub fn consolidate(&mut self) -> Result<Vec<PersistentCondition>> {
        let now = Utc::now();
        let decay_seconds = (self.config.decay_days as f64) * 86_400.0;

        for cond in &mut self.conditions {
            if !cond.active {
                continue;
            }
            let idle = (now - cond.last_used).num_seconds() as f64;
            if decay_seconds > 0.0 && idle > decay_seconds {
                let periods = (idle / decay_seconds).floor() as u32;
                for _ in 0..periods {
                    cond.confidence *= 1.0 - self.config.decay_rate;
                }
                // Decay is idempotent per elapsed period: advance last_used
                // so the same period is not charged twice.
                cond.last_used = cond.last_used
                    + chrono::Duration::seconds((periods as f64 * decay_seconds) as i64);
            }
            if cond.confidence < self.config.min_confidence {
                cond.active = false;
            }
        }

        let mut survivors: Vec<PersistentCondition> = Vec::new();
        for ty in ConditionType::all() {
            let mut of_type: Vec<&PersistentCondition> = self
                .conditions
                .iter()
                .filter(|c| c.active && c.context_type == ty)
                .collect();
            of_type.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            survivors.extend(of_type.into_iter().take(self.config.max_per_type).cloned());
        }

        if survivors.len() > self.config.max_total {
            survivors.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            survivors.truncate(self.config.max_total);
        }

        // Deactivate everything that fell off a cap
        let keep: std::collections::HashSet<String> =
            survivors.iter().map(|c| c.id.clone()).collect();
        for cond in &mut self.conditions {
            if cond.active && !keep.contains(&cond.id) {
                cond.active = false;
            }
        }

        self.save()?;
        Ok(survivors)
    }

    pub fn active(&self) -> Vec<&PersistentCondition> {
        self.conditions.iter().filter(|c| c.active).collect()
    }

    pub fn get(&self, id: &str) -> Option<&PersistentCondition> {
        self.conditions.iter().find(|c| c.id == id)
    }

    pub fn count_active(&self) -> usize {
        self.conditions.iter().filter(|c| c.active).count()
    }

    /// Rule-based condition extraction from a user turn.
    ///
    /// Fixed-phrase scans, deliberately conservative: misses are recoverable
    /// on the next mention, incorrect conditions linger in every prompt.
    pub fn extract_from_text(&self, text: &str) -> Vec<PersistentCondition> {
        let mut found = Vec::new();
        let lower = text.to_lowercase();

        let patterns: [(&str, ConditionType); 7] = [
            ("i live in ", ConditionType::Location),
            ("i moved to ", ConditionType::Location),
            ("i am in ", ConditionType::Location),
            ("i have a ", ConditionType::Possession),
            ("i own a ", ConditionType::Possession),
            ("my goal is ", ConditionType::Goal),
            ("i want to ", ConditionType::Goal),
        ];

        for (phrase, ty) in patterns {
            let Some(pos) = lower.find(phrase) else {
                continue;
            };
            let tail_start = pos + phrase.len();
            // Offsets come from the lowercased copy; skip the rare Unicode
            // inputs where they stop being char boundaries in the original
            let (Some(head), Some(rest)) = (text.get(pos..tail_start), text.get(tail_start..))
            else {
                continue;
            };
            let tail: String = rest
                .chars()
                .take_while(|c| *c != '.' && *c != ',' && *c != '!' && *c != '?' && *c != '\n')
                .collect();
            let tail = tail.trim();
            if !tail.is_empty() && tail.len() <= 120 {
                found.push(PersistentCondition::new(format!("{head}{tail}"), ty, 0.6));
            }
        }

        found
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_add_and_reload() {
        let dir = tempdir().unwrap();
        {
            let mut tracker =
                ConditionTracker::open(dir.path(), ConditionConfig::default()).unwrap();
            tracker
                .add(PersistentCondition::new(
                    "user lives in Berlin",
                    ConditionType::Location,
                    0.8,
                ))
                .unwrap();
        }
        let tracker = ConditionTracker::open(dir.path(), ConditionConfig::default()).unwrap();
        assert_eq!(tracker.count_active(), 1);
    }

    #[test]
    fn test_similar_conditions_merge_keeping_longer_content() {
        let dir = tempdir().unwrap();
        let mut tracker = ConditionTracker::open(dir.path(), ConditionConfig::default()).unwrap();

        tracker
            .add(PersistentCondition::new(
                "user lives in Berlin",
                ConditionType::Location,
                0.6,
            ))
            .unwrap();
        tracker
            .add(PersistentCondition::new(
                "user lives in Berlin near the river",
                ConditionType::Location,
                0.5,
            ))
            .unwrap();

        assert_eq!(tracker.count_active(), 1);
        let kept = tracker.active()[0];
        assert_eq!(kept.content, "user lives in Berlin near the river");
        assert!(kept.confidence > 0.6);
    }

    #[test]
    fn test_decay_and_prune() {
        let dir = tempdir().unwrap();
        let config = ConditionConfig {
            decay_days: 1.0,
            decay_rate: 0.5,
            min_confidence: 0.3,
            ..Default::default()
        };
        let mut tracker = ConditionTracker::open(dir.path(), config).unwrap();

        let mut cond =
            PersistentCondition::new("user is tired", ConditionType::State, 0.8);
        cond.last_used = Utc::now() - chrono::Duration::days(3);
        tracker.conditions.push(cond);

        let survivors = tracker.consolidate().unwrap();
        // 0.8 * 0.5^3 = 0.1 < 0.3, pruned
        assert!(survivors.is_empty());
        assert_eq!(tracker.count_active(), 0);
    }

    #[test]
    fn test_per_type_cap_drops_lowest_confidence() {
        let dir = tempdir().unwrap();
        let config = ConditionConfig {
            max_per_type: 2,
            merge_similarity: 1.1, // no merging in this test
            ..Default::default()
        };
        let mut tracker = ConditionTracker::open(dir.path(), config).unwrap();
        for (content, conf) in [("goal a", 0.9), ("goal b", 0.5), ("goal c", 0.7)] {
            tracker
                .add(PersistentCondition::new(content, ConditionType::Goal, conf))
                .unwrap();
        }

        let survivors = tracker.consolidate().unwrap();
        assert_eq!(survivors.len(), 2);
        assert!(survivors.iter().all(|c| c.content != "goal b"));
    }

    #[test]
    fn test_rule_extraction() {
        let dir = tempdir().unwrap();
        let tracker = ConditionTracker::open(dir.path(), ConditionConfig::default()).unwrap();
        let found = tracker.extract_from_text("By the way, I live in Berlin.");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].context_type, ConditionType::Location);
        assert!(found[0].content.contains("Berlin"));
    }
}
