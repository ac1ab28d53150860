//! Character n-gram index (L6) and the raw-text fallback scan
//!
//! 2- and 3-grams give CJK-friendly fuzzy and substring recall. The index
//! also keeps the raw text of every document it has ever seen: when every
//! structured recall path comes back empty, `raw_search` runs a linear
//! substring scan over that corpus. That scan is what backs the engine's
//! never-forget guarantee, so documents are only ever removed here when the
//! owning store removes them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{atomic_write_json, load_json_or_quarantine};

#[derive(Debug, Default, Serialize, Deserialize)]
struct NgramData {
    /// gram -> posting set
    grams: HashMap<String, BTreeSet<String>>,
    /// doc id -> raw text (scan corpus)
    corpus: BTreeMap<String, String>,
}

/// Character 2/3-gram index with a raw-text scan corpus
pub struct NgramIndex {
    path: PathBuf,
    data: NgramData,
}

fn grams_of(text: &str) -> BTreeSet<String> {
    let chars: Vec<char> = text.to_lowercase().chars().filter(|c| !c.is_whitespace()).collect();
    let mut grams = BTreeSet::new();
    for n in [2usize, 3] {
        if chars.len() < n {
            continue;
        }
        for window in chars.windows(n) {
            grams.insert(window.iter().collect());
        }
    }
    if chars.len() == 1 {
        grams.insert(chars[0].to_string());
    }
    grams
}

impl NgramIndex {
    pub fn open(path: PathBuf) -> Result<Self> {
        let data = load_json_or_quarantine(&path)?.unwrap_or_default();
        Ok(Self { path, data })
    }

    pub fn add(&mut self, doc_id: &str, text: &str) {
        if self.data.corpus.contains_key(doc_id) {
            self.remove(doc_id);
        }
        for gram in grams_of(text) {
            self.data
                .grams
                .entry(gram)
                .or_default()
                .insert(doc_id.to_string());
        }
        self.data.corpus.insert(doc_id.to_string(), text.to_string());
    }

    pub fn remove(&mut self, doc_id: &str) -> bool {
        let Some(text) = self.data.corpus.remove(doc_id) else {
            return false;
        };
        for gram in grams_of(&text) {
            if let Some(postings) = self.data.grams.get_mut(&gram) {
                postings.remove(doc_id);
                if postings.is_empty() {
                    self.data.grams.remove(&gram);
                }
            }
        }
        true
    }

    /// OR-of-ngrams scoring: fraction of the query's grams present in each
    /// document, sorted descending (ties by doc id for determinism).
    pub fn search(&self, query: &str) -> Vec<(String, f32)> {
        let query_grams = grams_of(query);
        if query_grams.is_empty() {
            return Vec::new();
        }
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for gram in &query_grams {
            if let Some(postings) = self.data.grams.get(gram) {
                for doc_id in postings {
                    *counts.entry(doc_id.as_str()).or_default() += 1;
                }
            }
        }
        let total = query_grams.len() as f32;
        let mut results: Vec<(String, f32)> = counts
            .into_iter()
            .map(|(doc_id, count)| (doc_id.to_string(), count as f32 / total))
            .collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results
    }

    fn doc_matches(text_lower: &str, query_lower: &str, tokens: &[&str]) -> bool {
        if text_lower.contains(query_lower) {
            return true;
        }
        tokens.iter().any(|t| text_lower.contains(t))
    }

    /// Linear substring scan over the raw corpus, capped at `max_results`.
    ///
    /// A document matches when it contains the whole query or any query token
    /// of two or more characters. Deterministic: corpus order is doc-id order.
    pub fn raw_search(&self, query: &str, max_results: usize) -> Vec<String> {
        let query_lower = query.trim().to_lowercase();
        if query_lower.is_empty() || max_results == 0 {
            return Vec::new();
        }
        let tokens: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|t| t.chars().count() >= 2)
            .collect();

        let mut hits = Vec::new();
        for (doc_id, text) in &self.data.corpus {
            if Self::doc_matches(&text.to_lowercase(), &query_lower, &tokens) {
                hits.push(doc_id.clone());
                if hits.len() >= max_results {
                    break;
                }
            }
        }
        hits
    }

    /// Parallel variant of [`raw_search`]: the corpus is split across a
    /// short-lived scoped worker pool. The cap applies per query; results are
    /// merged back into doc-id order so the parallel path stays deterministic.
    ///
    /// [`raw_search`]: NgramIndex::raw_search
    pub fn raw_search_parallel(
        &self,
        query: &str,
        max_results: usize,
        num_workers: usize,
    ) -> Vec<String> {
        let query_lower = query.trim().to_lowercase();
        if query_lower.is_empty() || max_results == 0 {
            return Vec::new();
        }
        let workers = num_workers.max(1);
        if workers == 1 || self.data.corpus.len() < workers * 8 {
            return self.raw_search(query, max_results);
        }

        let tokens: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|t| t.chars().count() >= 2)
            .collect();

        let entries: Vec<(&String, &String)> = self.data.corpus.iter().collect();
        let chunk_size = entries.len().div_ceil(workers);

        let mut hits: Vec<String> = std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for chunk in entries.chunks(chunk_size) {
                let query_lower = &query_lower;
                let tokens = &tokens;
                handles.push(scope.spawn(move || {
                    let mut local = Vec::new();
                    for (doc_id, text) in chunk {
                        if Self::doc_matches(&text.to_lowercase(), query_lower, tokens) {
                            local.push((*doc_id).clone());
                            if local.len() >= max_results {
                                break;
                            }
                        }
                    }
                    local
                }));
            }
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_default())
                .collect()
        });

        hits.sort();
        hits.truncate(max_results);
        hits
    }

    pub fn raw_text(&self, doc_id: &str) -> Option<&str> {
        self.data.corpus.get(doc_id).map(|s| s.as_str())
    }

    pub fn doc_count(&self) -> usize {
        self.data.corpus.len()
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &String> {
        self.data.corpus.keys()
    }

    pub fn flush(&self) -> Result<()> {
        atomic_write_json(&self.path, &self.data)
    }
}

// ============================================================================
// TESTS
// ============================================================================
