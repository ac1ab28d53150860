//! Counting bloom filter (L1)
//!
//! Prunes keywords before they touch the inverted index. Counting cells make
//! `remove` possible when a document is unindexed. Sized from the expected
//! corpus term count for a <=1% false positive rate.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{atomic_write_json, load_json_or_quarantine};

/// Counting bloom filter over terms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomFilter {
    cells: Vec<u16>,
    num_hashes: u32,
    items: u64,
}

impl BloomFilter {
    /// Size for `expected_items` at roughly the given false-positive rate.
    ///
    /// m = -n ln(p) / (ln 2)^2, k = (m / n) ln 2
    pub fn with_capacity(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-6, 0.5);
        let m = (-n * p.ln() / (std::f64::consts::LN_2 * std::f64::consts::LN_2)).ceil() as usize;
        let k = ((m as f64 / n) * std::f64::consts::LN_2).round().max(1.0) as u32;
        Self {
            cells: vec![0; m.max(64)],
            num_hashes: k.min(16),
            items: 0,
        }
    }

    /// Double hashing: h_i = h1 + i * h2
    fn indexes(&self, term: &str) -> impl Iterator<Item = usize> + '_ {
        let mut h1 = DefaultHasher::new();
        term.hash(&mut h1);
        let h1 = h1.finish();

        let mut h2 = DefaultHasher::new();
        (term, 0x9e3779b97f4a7c15u64).hash(&mut h2);
        let h2 = h2.finish() | 1;

        let len = self.cells.len() as u64;
        (0..self.num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % len) as usize)
    }

    pub fn insert(&mut self, term: &str) {
        let idx: Vec<usize> = self.indexes(term).collect();
        for i in idx {
            self.cells[i] = self.cells[i].saturating_add(1);
        }
        self.items += 1;
    }

    pub fn remove(&mut self, term: &str) {
        let idx: Vec<usize> = self.indexes(term).collect();
        if idx.iter().all(|&i| self.cells[i] > 0) {
            for i in idx {
                self.cells[i] -= 1;
            }
            self.items = self.items.saturating_sub(1);
        }
    }

    pub fn contains(&self, term: &str) -> bool {
        self.indexes(term).all(|i| self.cells[i] > 0)
    }

    pub fn len(&self) -> u64 {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    pub fn flush(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }

    pub fn load(path: &Path, expected_items: usize) -> Result<Self> {
        Ok(load_json_or_quarantine(path)?
            .unwrap_or_else(|| Self::with_capacity(expected_items, 0.01)))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let mut bloom = BloomFilter::with_capacity(1000, 0.01);
        bloom.insert("berlin");
        bloom.insert("acme");
        assert!(bloom.contains("berlin"));
        assert!(bloom.contains("acme"));
        assert!(!bloom.contains("nonexistent-term-xyz"));
    }

    #[test]
    fn test_counting_remove() {
        let mut bloom = BloomFilter::with_capacity(1000, 0.01);
        bloom.insert("berlin");
        bloom.insert("berlin");
        bloom.remove("berlin");
        assert!(bloom.contains("berlin"));
        bloom.remove("berlin");
        assert!(!bloom.contains("berlin"));
    }

    #[test]
    fn test_false_positive_rate_stays_low() {
        let mut bloom = BloomFilter::with_capacity(1000, 0.01);
        for i in 0..1000 {
            bloom.insert(&format!("term-{i}"));
        }
        let false_positives = (0..10_000)
            .filter(|i| bloom.contains(&format!("absent-{i}")))
            .count();
        // 1% target, allow generous slack for hash quality
        assert!(false_positives < 300, "fp count: {false_positives}");
    }

    #[test]
    fn test_flush_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bloom.json");
        let mut bloom = BloomFilter::with_capacity(100, 0.01);
        bloom.insert("berlin");
        bloom.flush(&path).unwrap();

        let loaded = BloomFilter::load(&path, 100).unwrap();
        assert!(loaded.contains("berlin"));
        assert_eq!(loaded.len(), 1);
    }
}
