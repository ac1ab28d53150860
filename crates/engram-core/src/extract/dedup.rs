//! Three-stage entity deduplication
//!
//! Before a newly-seen entity is inserted, it runs through, in order:
//!
//! 1. Exact normalized-name match - O(1), free.
//! 2. MinHash over k-shingles + LSH banding, Jaccard from signatures.
//! 3. Embedding cosine: auto-accept above `semantic_high`, auto-reject below
//!    `semantic_low`, and in between optionally ask the LLM (budget
//!    permitting). An UNCERTAIN verdict inserts as new: unhappy duplicates
//!    are recoverable, incorrect merges are not.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::index::cosine_similarity;
use crate::providers::{BudgetManager, EmbeddingService, LlmProvider};

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub jaccard_threshold: f32,
    pub minhash_permutations: usize,
    pub lsh_bands: usize,
    pub lsh_rows: usize,
    /// Cosine at or above which two items merge automatically
    pub semantic_high: f32,
    /// Cosine below which two items are automatically distinct
    pub semantic_low: f32,
    pub llm_enabled: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            jaccard_threshold: 0.7,
            minhash_permutations: 128,
            lsh_bands: 16,
            lsh_rows: 8,
            semantic_high: 0.85,
            semantic_low: 0.70,
            llm_enabled: false,
        }
    }
}

// ============================================================================
// MINHASH + LSH
// ============================================================================

/// splitmix64: deterministic stream of hash parameters
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

struct MinHasher {
    a: Vec<u64>,
    b: Vec<u64>,
}

const MAX_HASH: u64 = u32::MAX as u64;

impl MinHasher {
    fn new(permutations: usize, seed: u64) -> Self {
        let mut state = seed;
        let a = (0..permutations)
            .map(|_| splitmix64(&mut state) % MAX_HASH | 1)
            .collect();
        let b = (0..permutations).map(|_| splitmix64(&mut state) % MAX_HASH).collect();
        Self { a, b }
    }

    fn shingles(text: &str, k: usize) -> HashSet<String> {
        let normalized: String = text.to_lowercase();
        let chars: Vec<char> = normalized.trim().chars().collect();
        if chars.len() < k {
            return [normalized.trim().to_string()].into();
        }
        chars.windows(k).map(|w| w.iter().collect()).collect()
    }

    fn signature(&self, shingles: &HashSet<String>) -> Vec<u64> {
        let mut signature = vec![MAX_HASH; self.a.len()];
        for shingle in shingles {
            let mut hasher = DefaultHasher::new();
            shingle.hash(&mut hasher);
            let h = hasher.finish() % MAX_HASH;
            for (slot, (a, b)) in signature.iter_mut().zip(self.a.iter().zip(self.b.iter())) {
                let value = (a.wrapping_mul(h).wrapping_add(*b)) % MAX_HASH;
                if value < *slot {
                    *slot = value;
                }
            }
        }
        signature
    }

    fn jaccard(sig1: &[u64], sig2: &[u64]) -> f32 {
        if sig1.is_empty() || sig1.len() != sig2.len() {
            return 0.0;
        }
        let matches = sig1.iter().zip(sig2.iter()).filter(|(a, b)| a == b).count();
        matches as f32 / sig1.len() as f32
    }
}

#[derive(Default)]
struct LshIndex {
    buckets: HashMap<(usize, u64), HashSet<String>>,
}

impl LshIndex {
    fn band_hash(signature: &[u64], band: usize, rows: usize) -> u64 {
        let start = band * rows;
        let end = (start + rows).min(signature.len());
        let mut hasher = DefaultHasher::new();
        signature[start..end].hash(&mut hasher);
        hasher.finish()
    }

    fn add(&mut self, item_id: &str, signature: &[u64], bands: usize, rows: usize) {
        for band in 0..bands {
            let key = (band, Self::band_hash(signature, band, rows));
            self.buckets.entry(key).or_default().insert(item_id.to_string());
        }
    }

    fn query(&self, signature: &[u64], bands: usize, rows: usize) -> HashSet<String> {
        let mut candidates = HashSet::new();
        for band in 0..bands {
            let key = (band, Self::band_hash(signature, band, rows));
            if let Some(bucket) = self.buckets.get(&key) {
                candidates.extend(bucket.iter().cloned());
            }
        }
        candidates
    }
}

// ============================================================================
// DEDUPLICATOR
// ============================================================================

/// A candidate for deduplication
#[derive(Debug, Clone)]
pub struct DedupItem {
    pub id: String,
    pub name: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

impl DedupItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            content: content.into(),
            embedding: None,
        }
    }

    fn text(&self) -> &str {
        if self.content.is_empty() {
            &self.name
        } else {
            &self.content
        }
    }
}

/// How a match was decided
#[derive(Debug, Clone, PartialEq)]
pub enum MatchKind {
    Exact,
    Fuzzy(f32),
    Semantic(f32),
    LlmConfirmed,
    New,
}

/// Outcome of matching one candidate
#[derive(Debug, Clone)]
pub struct DedupDecision {
    pub matched_id: Option<String>,
    pub kind: MatchKind,
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The three-stage deduplicator over one scope's known items
pub struct Deduplicator {
    config: DedupConfig,
    hasher: MinHasher,
    lsh: LshIndex,
    exact: HashMap<String, String>,
    signatures: HashMap<String, Vec<u64>>,
    items: HashMap<String, DedupItem>,
}

const DEDUP_PROMPT: &str = "Do these two names refer to the same thing?\n\n\
    A: {a}\nB: {b}\n\nAnswer with exactly one word: YES, NO, or UNCERTAIN.";

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        let hasher = MinHasher::new(config.minhash_permutations, 42);
        Self {
            config,
            hasher,
            lsh: LshIndex::default(),
            exact: HashMap::new(),
            signatures: HashMap::new(),
            items: HashMap::new(),
        }
    }

    pub fn add_to_index(&mut self, item: DedupItem) {
        let normalized = normalize(&item.name);
        if !normalized.is_empty() {
            self.exact.insert(normalized, item.id.clone());
        }
        let shingles = MinHasher::shingles(item.text(), 3);
        let signature = self.hasher.signature(&shingles);
        self.lsh
            .add(&item.id, &signature, self.config.lsh_bands, self.config.lsh_rows);
        self.signatures.insert(item.id.clone(), signature);
        self.items.insert(item.id.clone(), item);
    }

    pub fn indexed_count(&self) -> usize {
        self.items.len()
    }

    /// Run the three stages for one candidate
    pub fn match_item(
        &mut self,
        item: &DedupItem,
        embeddings: &EmbeddingService,
        llm: Option<&dyn LlmProvider>,
        budget: Option<&BudgetManager>,
    ) -> DedupDecision {
        // Stage 1a: exact normalized name
        let normalized = normalize(&item.name);
        if let Some(existing_id) = self.exact.get(&normalized) {
            return DedupDecision {
                matched_id: Some(existing_id.clone()),
                kind: MatchKind::Exact,
            };
        }

        // Stage 1b: MinHash + LSH
        let shingles = MinHasher::shingles(item.text(), 3);
        let signature = self.hasher.signature(&shingles);
        let candidates = self
            .lsh
            .query(&signature, self.config.lsh_bands, self.config.lsh_rows);
        let mut best: Option<(&str, f32)> = None;
        for candidate_id in &candidates {
            if let Some(candidate_sig) = self.signatures.get(candidate_id) {
                let jaccard = MinHasher::jaccard(&signature, candidate_sig);
                if best.is_none_or(|(_, b)| jaccard > b) {
                    best = Some((candidate_id.as_str(), jaccard));
                }
            }
        }
        if let Some((candidate_id, jaccard)) = best {
            if jaccard >= self.config.jaccard_threshold {
                return DedupDecision {
                    matched_id: Some(candidate_id.to_string()),
                    kind: MatchKind::Fuzzy(jaccard),
                };
            }
        }

        // Stage 2: embedding cosine over the known items
        if embeddings.is_enabled() && !self.items.is_empty() {
            if let Some(decision) = self.semantic_match(item, embeddings, llm, budget) {
                return decision;
            }
        }

        DedupDecision {
            matched_id: None,
            kind: MatchKind::New,
        }
    }

    fn semantic_match(
        &mut self,
        item: &DedupItem,
        embeddings: &EmbeddingService,
        llm: Option<&dyn LlmProvider>,
        budget: Option<&BudgetManager>,
    ) -> Option<DedupDecision> {
        let item_embedding = match &item.embedding {
            Some(v) => v.clone(),
            None => embeddings.encode_with_cache(item.text()).ok()??,
        };

        let mut best: Option<(String, f32)> = None;
        let ids: Vec<String> = self.items.keys().cloned().collect();
        for id in ids {
            let text = self.items[&id].text().to_string();
            let existing = match self.items[&id].embedding.clone() {
                Some(v) => v,
                None => {
                    let Some(v) = embeddings.encode_with_cache(&text).ok().flatten() else {
                        continue;
                    };
                    self.items.get_mut(&id).unwrap().embedding = Some(v.clone());
                    v
                }
            };
            let similarity = cosine_similarity(&item_embedding, &existing);
            if best.as_ref().is_none_or(|(_, b)| similarity > *b) {
                best = Some((id, similarity));
            }
        }

        let (best_id, best_sim) = best?;
        if best_sim >= self.config.semantic_high {
            return Some(DedupDecision {
                matched_id: Some(best_id),
                kind: MatchKind::Semantic(best_sim),
            });
        }
        if best_sim >= self.config.semantic_low && self.config.llm_enabled {
            if let Some(llm) = llm {
                if let Some(affordable) = budget.map(|b| {
                    b.can_afford(BudgetManager::estimate_cost(200, 10), "dedup_confirm")
                }) {
                    if !affordable {
                        return None;
                    }
                }
                let prompt = DEDUP_PROMPT
                    .replace("{a}", item.text())
                    .replace("{b}", self.items[&best_id].text());
                match llm.complete(&prompt, 10) {
                    Ok(response) => {
                        if let Some(b) = budget {
                            b.record_usage(prompt.len() as u64 / 4, 5, llm.model());
                        }
                        if response.trim().to_uppercase().starts_with("YES") {
                            return Some(DedupDecision {
                                matched_id: Some(best_id),
                                kind: MatchKind::LlmConfirmed,
                            });
                        }
                        // NO and UNCERTAIN both insert as new
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dedup LLM confirmation failed");
                    }
                }
            }
        }
        None
    }
}

// ============================================================================
// TESTS
// ============================================================================
