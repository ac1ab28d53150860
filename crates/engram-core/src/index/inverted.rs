//! Inverted keyword index (L3)
//!
//! Case-folded exact-keyword postings: Western whitespace tokens and CJK
//! character unigrams. Writes stay in memory and flush on shutdown or every N
//! mutations.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{atomic_write_json, load_json_or_quarantine};

use super::tokenize;

#[derive(Debug, Default, Serialize, Deserialize)]
struct InvertedData {
    /// keyword -> ordered posting set
    postings: HashMap<String, BTreeSet<String>>,
    /// doc id -> its keywords, for O(terms) removal
    doc_terms: HashMap<String, Vec<String>>,
}

/// Keyword -> posting-list index
pub struct InvertedIndex {
    path: PathBuf,
    data: InvertedData,
    mutations_since_flush: usize,
    flush_every: usize,
}

impl InvertedIndex {
    pub fn open(path: PathBuf, flush_every: usize) -> Result<Self> {
        let data = load_json_or_quarantine(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            data,
            mutations_since_flush: 0,
            flush_every: flush_every.max(1),
        })
    }

    pub fn add(&mut self, doc_id: &str, text: &str) -> Result<()> {
        if self.data.doc_terms.contains_key(doc_id) {
            self.remove(doc_id)?;
        }
        let tokens = tokenize(text);
        let unique: BTreeSet<String> = tokens.into_iter().collect();
        for term in &unique {
            self.data
                .postings
                .entry(term.clone())
                .or_default()
                .insert(doc_id.to_string());
        }
        self.data
            .doc_terms
            .insert(doc_id.to_string(), unique.into_iter().collect());
        self.mark_dirty()
    }

    pub fn remove(&mut self, doc_id: &str) -> Result<bool> {
        let Some(terms) = self.data.doc_terms.remove(doc_id) else {
            return Ok(false);
        };
        for term in terms {
            if let Some(postings) = self.data.postings.get_mut(&term) {
                postings.remove(doc_id);
                if postings.is_empty() {
                    self.data.postings.remove(&term);
                }
            }
        }
        self.mark_dirty()?;
        Ok(true)
    }

    /// Docs containing the exact keyword (case-folded)
    pub fn search(&self, keyword: &str) -> BTreeSet<String> {
        let folded = keyword.to_lowercase();
        self.data
            .postings
            .get(&folded)
            .cloned()
            .unwrap_or_default()
    }

    /// Union over all keywords; deduplicated, first-seen order by keyword
    pub fn search_any(&self, keywords: &[String]) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut results = Vec::new();
        for kw in keywords {
            for doc_id in self.search(kw) {
                if seen.insert(doc_id.clone()) {
                    results.push(doc_id);
                }
            }
        }
        results
    }

    /// Keywords of a document, as indexed
    pub fn terms_for(&self, doc_id: &str) -> Option<&[String]> {
        self.data.doc_terms.get(doc_id).map(|v| v.as_slice())
    }

    /// True when the term exists in any posting list
    pub fn has_term(&self, term: &str) -> bool {
        self.data.postings.contains_key(&term.to_lowercase())
    }

    pub fn doc_count(&self) -> usize {
        self.data.doc_terms.len()
    }

    /// Every doc id this index knows about
    pub fn doc_ids(&self) -> impl Iterator<Item = &String> {
        self.data.doc_terms.keys()
    }

    fn mark_dirty(&mut self) -> Result<()> {
        self.mutations_since_flush += 1;
        if self.mutations_since_flush >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        atomic_write_json(&self.path, &self.data)?;
        self.mutations_since_flush = 0;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp(flush_every: usize) -> (InvertedIndex, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let index = InvertedIndex::open(dir.path().join("inverted.json"), flush_every).unwrap();
        (index, dir)
    }

    #[test]
    fn test_add_and_search() {
        let (mut index, _dir) = open_temp(1000);
        index.add("mem:1", "I live in Berlin").unwrap();
        index.add("mem:2", "Berlin is rainy").unwrap();
        index.add("mem:3", "Acme hired me").unwrap();

        let hits = index.search("berlin");
        assert_eq!(hits.len(), 2);
        assert!(hits.contains("mem:1"));
        assert!(hits.contains("mem:2"));

        // Case-folded at query time too
        assert_eq!(index.search("BERLIN").len(), 2);
    }

    #[test]
    fn test_search_any_union() {
        let (mut index, _dir) = open_temp(1000);
        index.add("mem:1", "alpha beta").unwrap();
        index.add("mem:2", "beta gamma").unwrap();

        let results = index.search_any(&["alpha".into(), "gamma".into()]);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_remove_cleans_postings() {
        let (mut index, _dir) = open_temp(1000);
        index.add("mem:1", "unique-term").unwrap();
        assert!(index.has_term("unique-term"));
        assert!(index.remove("mem:1").unwrap());
        assert!(!index.has_term("unique-term"));
        assert!(!index.remove("mem:1").unwrap());
    }

    #[test]
    fn test_reindex_replaces_old_terms() {
        let (mut index, _dir) = open_temp(1000);
        index.add("mem:1", "old text").unwrap();
        index.add("mem:1", "new words").unwrap();
        assert!(index.search("old").is_empty());
        assert!(!index.search("new").is_empty());
        assert_eq!(index.doc_count(), 1);
    }

    #[test]
    fn test_cjk_unigram_tokens() {
        let (mut index, _dir) = open_temp(1000);
        index.add("mem:1", "我住在北京").unwrap();
        assert!(!index.search("北").is_empty());
        assert!(!index.search("京").is_empty());
    }

    #[test]
    fn test_flush_every_n_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inverted.json");
        {
            let mut index = InvertedIndex::open(path.clone(), 2).unwrap();
            index.add("mem:1", "first").unwrap();
            // second mutation triggers the flush
            index.add("mem:2", "second").unwrap();
        }
        let index = InvertedIndex::open(path, 2).unwrap();
        assert_eq!(index.doc_count(), 2);
        assert!(!index.search("first").is_empty());
    }
}
