//! Full-text index (BM25)
//!
//! Hand-rolled posting lists with per-document length, corpus average length,
//! and IDF. Complements the inverted index: that one is exact membership,
//! this one is relevance ranking. Mixed-script tokenizer keeps whole CJK runs
//! alongside their bigrams so both exact and partial CJK queries rank.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{atomic_write_json, load_json_or_quarantine};

use super::is_cjk;

// ============================================================================
// CONFIG
// ============================================================================

/// BM25 parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Config {
    /// Term-frequency saturation (1.2 - 2.0)
    pub k1: f32,
    /// Document-length normalization (0 - 1)
    pub b: f32,
    /// BM25+ delta; 0 means classic BM25
    pub delta: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            delta: 0.0,
        }
    }
}

fn stopwords() -> &'static HashSet<&'static str> {
    static STOPWORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    STOPWORDS.get_or_init(|| {
        [
            // English
            "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has",
            "had", "do", "does", "did", "will", "would", "could", "should", "may", "might",
            "must", "can", "this", "that", "these", "those", "i", "you", "he", "she", "it", "we",
            "they", "what", "which", "who", "when", "where", "why", "how", "all", "each", "every",
            "both", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only",
            "own", "same", "so", "than", "too", "very", "just", "and", "but", "or", "as", "if",
            "then", "else", "for", "of", "at", "by", "from", "to", "in", "on", "with", "about",
            "into", "through", "during", "before", "after", "above", "below", "up", "down",
            "out", "off", "over",
            // Chinese
            "的", "了", "在", "是", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上",
            "也", "很", "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己",
            "这", "那", "啊", "吧", "吗", "呢", "哦", "嗯", "啦",
        ]
        .into_iter()
        .collect()
    })
}

/// Mixed-script BM25 tokenizer: Western words (length > 1, not stopwords),
/// whole CJK runs (length >= 2) plus their bigrams.
fn bm25_tokenize(text: &str) -> Vec<String> {
    let stop = stopwords();
    let lower = text.to_lowercase();
    let mut tokens = Vec::new();

    let mut word = String::new();
    let mut cjk_run = String::new();

    let flush_word = |word: &mut String, tokens: &mut Vec<String>| {
        if word.chars().count() > 1 && !stop.contains(word.as_str()) {
            tokens.push(std::mem::take(word));
        } else {
            word.clear();
        }
    };
    let flush_cjk = |run: &mut String, tokens: &mut Vec<String>| {
        let chars: Vec<char> = run.chars().collect();
        if chars.len() >= 2 {
            if !stop.contains(run.as_str()) {
                tokens.push(run.clone());
            }
            for pair in chars.windows(2) {
                let bigram: String = pair.iter().collect();
                if !stop.contains(bigram.as_str()) {
                    tokens.push(bigram);
                }
            }
        }
        run.clear();
    };

    for c in lower.chars() {
        if is_cjk(c) {
            flush_word(&mut word, &mut tokens);
            cjk_run.push(c);
        } else if c.is_alphanumeric() {
            flush_cjk(&mut cjk_run, &mut tokens);
            word.push(c);
        } else {
            flush_word(&mut word, &mut tokens);
            flush_cjk(&mut cjk_run, &mut tokens);
        }
    }
    flush_word(&mut word, &mut tokens);
    flush_cjk(&mut cjk_run, &mut tokens);

    tokens
}

// ============================================================================
// INDEX
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocInfo {
    length: usize,
    terms: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FullTextData {
    doc_count: usize,
    total_doc_length: usize,
    /// term -> (doc id -> term frequency)
    postings: HashMap<String, HashMap<String, u32>>,
    doc_info: HashMap<String, DocInfo>,
}

/// BM25 full-text index
pub struct FullTextIndex {
    path: PathBuf,
    config: Bm25Config,
    data: FullTextData,
}

impl FullTextIndex {
    pub fn open(path: PathBuf, config: Bm25Config) -> Result<Self> {
        let data = load_json_or_quarantine(&path)?.unwrap_or_default();
        Ok(Self { path, config, data })
    }

    fn avg_doc_length(&self) -> f32 {
        if self.data.doc_count == 0 {
            0.0
        } else {
            self.data.total_doc_length as f32 / self.data.doc_count as f32
        }
    }

    pub fn add(&mut self, doc_id: &str, text: &str) {
        if self.data.doc_info.contains_key(doc_id) {
            self.remove(doc_id);
        }
        let tokens = bm25_tokenize(text);
        if tokens.is_empty() {
            return;
        }

        let mut term_freq: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freq.entry(token.clone()).or_default() += 1;
        }

        for (term, freq) in &term_freq {
            self.data
                .postings
                .entry(term.clone())
                .or_default()
                .insert(doc_id.to_string(), *freq);
        }

        self.data.doc_info.insert(
            doc_id.to_string(),
            DocInfo {
                length: tokens.len(),
                terms: term_freq.into_keys().collect(),
            },
        );
        self.data.doc_count += 1;
        self.data.total_doc_length += tokens.len();
    }

    pub fn remove(&mut self, doc_id: &str) -> bool {
        let Some(info) = self.data.doc_info.remove(doc_id) else {
            return false;
        };
        for term in &info.terms {
            if let Some(postings) = self.data.postings.get_mut(term) {
                postings.remove(doc_id);
                if postings.is_empty() {
                    self.data.postings.remove(term);
                }
            }
        }
        self.data.doc_count -= 1;
        self.data.total_doc_length -= info.length;
        true
    }

    /// BM25-ranked search, descending score, ties broken by doc id
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32)> {
        if self.data.doc_count == 0 || top_k == 0 {
            return Vec::new();
        }
        let query_terms = bm25_tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let n = self.data.doc_count as f32;
        let avg_len = self.avg_doc_length();
        let mut scores: HashMap<&str, f32> = HashMap::new();

        for term in &query_terms {
            let Some(postings) = self.data.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (doc_id, tf) in postings {
                let doc_len = self
                    .data
                    .doc_info
                    .get(doc_id)
                    .map(|i| i.length as f32)
                    .unwrap_or(avg_len);
                let tf = *tf as f32;
                let numerator = tf * (self.config.k1 + 1.0);
                let denominator = tf
                    + self.config.k1 * (1.0 - self.config.b + self.config.b * doc_len / avg_len);
                let mut score = idf * numerator / denominator;
                if self.config.delta > 0.0 {
                    score += self.config.delta;
                }
                *scores.entry(doc_id.as_str()).or_default() += score;
            }
        }

        let mut results: Vec<(String, f32)> = scores
            .into_iter()
            .map(|(id, score)| (id.to_string(), score))
            .collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(top_k);
        results
    }

    pub fn doc_count(&self) -> usize {
        self.data.doc_count
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &String> {
        self.data.doc_info.keys()
    }

    pub fn flush(&self) -> Result<()> {
        atomic_write_json(&self.path, &self.data)
    }
}

// ============================================================================
// TESTS
// ============================================================================
