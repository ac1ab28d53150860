//! Vector indexes
//!
//! Two flavours sharing one on-disk format:
//!
//! - [`FlatVectorIndex`]: exhaustive cosine over doc-id-keyed vectors. The
//!   correctness baseline and small-corpus default; also the O(1) vector
//!   store the fine-rescoring layer reads.
//! - [`IvfVectorIndex`]: coarse k-means quantizer (`nlist` cells, `nprobe`
//!   probed per query) over a flat store, with an optional HNSW quantizer
//!   over the centroids (`hnsw` feature, USearch).
//!
//! Both uphold the same invariant: the set of searchable ids equals the set
//! of ids added minus the set removed. An untrained IVF index searches
//! exhaustively rather than dropping anything.
//!
//! On disk, `vector.bin` is little-endian:
//! `[u32 count] [u32 dim] [count x (u32 id_len, id bytes)] [count x dim x f32]`

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::storage::atomic_write_bytes;

#[cfg(feature = "hnsw")]
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

// ============================================================================
// SIMILARITY
// ============================================================================

/// Cosine similarity; 0.0 for mismatched or zero-norm inputs
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Index statistics
#[derive(Debug, Clone)]
pub struct VectorStats {
    pub total_vectors: usize,
    pub dimensions: usize,
    pub nlist: usize,
    pub trained: bool,
}

// ============================================================================
// FLAT INDEX
// ============================================================================

/// Exhaustive cosine index over doc-id-keyed vectors
#[derive(Debug, Default)]
pub struct FlatVectorIndex {
    vectors: BTreeMap<String, Vec<f32>>,
    dim: Option<usize>,
}

impl FlatVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vectors in the index
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Established dimension, if any vector has been added
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.vectors.contains_key(doc_id)
    }

    pub fn add(&mut self, doc_id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            return Err(EngineError::Conflict("embedding must not be empty".into()));
        }
        match self.dim {
            None => self.dim = Some(vector.len()),
            Some(d) if d != vector.len() => {
                return Err(EngineError::Conflict(format!(
                    "embedding dimension mismatch: expected {d}, got {}",
                    vector.len()
                )));
            }
            _ => {}
        }
        self.vectors.insert(doc_id.to_string(), vector);
        Ok(())
    }

    pub fn remove(&mut self, doc_id: &str) -> bool {
        self.vectors.remove(doc_id).is_some()
    }

    /// Exhaustive cosine top-k, descending, ties by doc id
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
        if top_k == 0 || self.vectors.is_empty() {
            return Vec::new();
        }
        let mut results: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|(id, v)| (id.clone(), cosine_similarity(query, v)))
            .collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(top_k);
        results
    }

    /// O(1) per-id recall for the fine-rescoring layer
    pub fn vectors_for<'a, I>(&self, doc_ids: I) -> HashMap<String, &Vec<f32>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        doc_ids
            .into_iter()
            .filter_map(|id| self.vectors.get(id).map(|v| (id.to_string(), v)))
            .collect()
    }

    pub fn get(&self, doc_id: &str) -> Option<&Vec<f32>> {
        self.vectors.get(doc_id)
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &String> {
        self.vectors.keys()
    }

    // ------------------------------------------------------------------
    // vector.bin codec
    // ------------------------------------------------------------------

    pub fn save(&self, path: &Path) -> Result<()> {
        let dim = self.dim.unwrap_or(0);
        let mut bytes = Vec::with_capacity(8 + self.vectors.len() * (16 + dim * 4));
        bytes.extend_from_slice(&(self.vectors.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(dim as u32).to_le_bytes());
        for id in self.vectors.keys() {
            bytes.extend_from_slice(&(id.len() as u32).to_le_bytes());
            bytes.extend_from_slice(id.as_bytes());
        }
        for vector in self.vectors.values() {
            for x in vector {
                bytes.extend_from_slice(&x.to_le_bytes());
            }
        }
        atomic_write_bytes(path, &bytes)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = std::fs::read(path)?;
        match Self::decode(&bytes) {
            Ok(index) => Ok(index),
            Err(reason) => {
                let quarantine = path.with_extension("bin.corrupt");
                tracing::warn!(path = %path.display(), reason, "quarantining corrupt vector file");
                std::fs::rename(path, &quarantine)?;
                Ok(Self::new())
            }
        }
    }

    fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        let mut cursor = 0usize;
        let read_u32 = |bytes: &[u8], cursor: &mut usize| -> std::result::Result<u32, String> {
            let end = *cursor + 4;
            let slice = bytes.get(*cursor..end).ok_or("truncated header")?;
            *cursor = end;
            Ok(u32::from_le_bytes(slice.try_into().unwrap()))
        };

        let count = read_u32(bytes, &mut cursor)? as usize;
        let dim = read_u32(bytes, &mut cursor)? as usize;

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id_len = read_u32(bytes, &mut cursor)? as usize;
            let end = cursor + id_len;
            let slice = bytes.get(cursor..end).ok_or("truncated id")?;
            cursor = end;
            ids.push(String::from_utf8(slice.to_vec()).map_err(|e| e.to_string())?);
        }

        // Byte-length invariant: the payload must be exactly count * dim f32s
        let expected = count * dim * 4;
        let payload = bytes.get(cursor..).ok_or("missing payload")?;
        if payload.len() != expected {
            return Err(format!(
                "payload length {} does not match count {count} x dim {dim}",
                payload.len()
            ));
        }

        let mut vectors = BTreeMap::new();
        for (i, id) in ids.into_iter().enumerate() {
            let start = i * dim * 4;
            let vector: Vec<f32> = payload[start..start + dim * 4]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            vectors.insert(id, vector);
        }

        Ok(Self {
            vectors,
            dim: if count == 0 { None } else { Some(dim) },
        })
    }
}

// ============================================================================
// IVF INDEX
// ============================================================================

/// IVF parameters
#[derive(Debug, Clone, Copy)]
pub struct IvfConfig {
    /// Number of coarse cells
    pub nlist: usize,
    /// Cells probed per query
    pub nprobe: usize,
    /// Vectors required before training kicks in
    pub train_threshold: usize,
    /// HNSW connectivity for the centroid quantizer
    pub hnsw_m: usize,
    /// HNSW expansion factor for index building
    pub hnsw_ef_construction: usize,
    /// HNSW expansion factor for search
    pub hnsw_ef_search: usize,
}

impl Default for IvfConfig {
    fn default() -> Self {
        Self {
            nlist: 64,
            nprobe: 8,
            train_threshold: 256,
            hnsw_m: 16,
            hnsw_ef_construction: 128,
            hnsw_ef_search: 64,
        }
    }
}

/// IVF index: k-means coarse quantizer over a flat doc-id-keyed store
pub struct IvfVectorIndex {
    store: FlatVectorIndex,
    config: IvfConfig,
    centroids: Vec<Vec<f32>>,
    /// centroid index -> member doc ids
    cells: Vec<HashSet<String>>,
    /// doc id -> centroid index
    assignments: HashMap<String, usize>,
    #[cfg(feature = "hnsw")]
    quantizer: Option<Index>,
}

impl IvfVectorIndex {
    pub fn new(config: IvfConfig) -> Self {
        Self {
            store: FlatVectorIndex::new(),
            config,
            centroids: Vec::new(),
            cells: Vec::new(),
            assignments: HashMap::new(),
            #[cfg(feature = "hnsw")]
            quantizer: None,
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub fn stats(&self) -> VectorStats {
        VectorStats {
            total_vectors: self.store.len(),
            dimensions: self.store.dim().unwrap_or(0),
            nlist: self.centroids.len(),
            trained: self.is_trained(),
        }
    }

    pub fn add(&mut self, doc_id: &str, vector: Vec<f32>) -> Result<()> {
        if self.assignments.contains_key(doc_id) {
            self.remove(doc_id);
        }
        self.store.add(doc_id, vector)?;
        if self.is_trained() {
            let vector = self.store.get(doc_id).expect("just inserted");
            let cell = self.nearest_centroids(vector, 1)[0];
            self.cells[cell].insert(doc_id.to_string());
            self.assignments.insert(doc_id.to_string(), cell);
        } else if self.store.len() >= self.config.train_threshold {
            self.train();
        }
        Ok(())
    }

    pub fn remove(&mut self, doc_id: &str) -> bool {
        if let Some(cell) = self.assignments.remove(doc_id) {
            self.cells[cell].remove(doc_id);
        }
        self.store.remove(doc_id)
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.store.contains(doc_id)
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &String> {
        self.store.doc_ids()
    }

    /// The flat store backing this index, for fine rescoring
    pub fn store(&self) -> &FlatVectorIndex {
        &self.store
    }

    /// Deterministic k-means over the stored vectors.
    ///
    /// Seeds are evenly spaced over doc-id order so repeated training on the
    /// same corpus yields the same cells.
    pub fn train(&mut self) {
        let ids: Vec<String> = self.store.doc_ids().cloned().collect();
        if ids.is_empty() {
            return;
        }
        let k = self.config.nlist.min(ids.len()).max(1);

        let stride = ids.len() / k;
        let mut centroids: Vec<Vec<f32>> = (0..k)
            .map(|i| self.store.get(&ids[i * stride.max(1)]).unwrap().clone())
            .collect();

        for _iteration in 0..10 {
            let mut sums: Vec<Vec<f64>> =
                vec![vec![0.0; centroids[0].len()]; centroids.len()];
            let mut counts = vec![0usize; centroids.len()];

            for id in &ids {
                let vector = self.store.get(id).unwrap();
                let cell = Self::nearest_of(&centroids, vector);
                counts[cell] += 1;
                for (sum, x) in sums[cell].iter_mut().zip(vector.iter()) {
                    *sum += *x as f64;
                }
            }

            let mut moved = false;
            for (cell, centroid) in centroids.iter_mut().enumerate() {
                if counts[cell] == 0 {
                    continue;
                }
                for (c, sum) in centroid.iter_mut().zip(sums[cell].iter()) {
                    let next = (*sum / counts[cell] as f64) as f32;
                    if (next - *c).abs() > 1e-6 {
                        moved = true;
                    }
                    *c = next;
                }
            }
            if !moved {
                break;
            }
        }

        self.centroids = centroids;
        self.cells = vec![HashSet::new(); self.centroids.len()];
        self.assignments.clear();
        for id in &ids {
            let vector = self.store.get(id).unwrap();
            let cell = Self::nearest_of(&self.centroids, vector);
            self.cells[cell].insert(id.clone());
            self.assignments.insert(id.clone(), cell);
        }

        #[cfg(feature = "hnsw")]
        self.rebuild_quantizer();
    }

    fn nearest_of(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
        let mut best = 0usize;
        let mut best_sim = f32::MIN;
        for (i, centroid) in centroids.iter().enumerate() {
            let sim = cosine_similarity(centroid, vector);
            if sim > best_sim {
                best_sim = sim;
                best = i;
            }
        }
        best
    }

    #[cfg(feature = "hnsw")]
    fn rebuild_quantizer(&mut self) {
        let Some(dim) = self.store.dim() else {
            return;
        };
        let options = IndexOptions {
            dimensions: dim,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: self.config.hnsw_m,
            expansion_add: self.config.hnsw_ef_construction,
            expansion_search: self.config.hnsw_ef_search,
            multi: false,
        };
        match Index::new(&options) {
            Ok(index) => {
                if index.reserve(self.centroids.len()).is_err() {
                    self.quantizer = None;
                    return;
                }
                for (i, centroid) in self.centroids.iter().enumerate() {
                    if index.add(i as u64, centroid).is_err() {
                        self.quantizer = None;
                        return;
                    }
                }
                self.quantizer = Some(index);
            }
            Err(e) => {
                tracing::warn!(error = %e, "HNSW quantizer unavailable, using flat centroid scan");
                self.quantizer = None;
            }
        }
    }

    fn nearest_centroids(&self, vector: &[f32], count: usize) -> Vec<usize> {
        #[cfg(feature = "hnsw")]
        if let Some(quantizer) = &self.quantizer {
            if let Ok(matches) = quantizer.search(vector, count) {
                let cells: Vec<usize> = matches.keys.iter().map(|k| *k as usize).collect();
                if !cells.is_empty() {
                    return cells;
                }
            }
        }

        let mut scored: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(c, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(count.max(1)).map(|(i, _)| i).collect()
    }

    /// ANN search: probe `nprobe` cells, exhaustive within them. Falls back to
    /// exhaustive search while untrained so no id is ever silently dropped.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
        if top_k == 0 || self.store.is_empty() {
            return Vec::new();
        }
        if !self.is_trained() {
            return self.store.search(query, top_k);
        }

        let cells = self.nearest_centroids(query, self.config.nprobe);
        let mut results: Vec<(String, f32)> = Vec::new();
        for cell in cells {
            for doc_id in &self.cells[cell] {
                if let Some(vector) = self.store.get(doc_id) {
                    results.push((doc_id.clone(), cosine_similarity(query, vector)));
                }
            }
        }
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(top_k);
        results
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.store.save(path)
    }

    pub fn load(path: &Path, config: IvfConfig) -> Result<Self> {
        let store = FlatVectorIndex::load(path)?;
        let mut index = Self {
            store,
            config,
            centroids: Vec::new(),
            cells: Vec::new(),
            assignments: HashMap::new(),
            #[cfg(feature = "hnsw")]
            quantizer: None,
        };
        if index.store.len() >= index.config.train_threshold {
            index.train();
        }
        Ok(index)
    }
}

// ============================================================================
// TESTS
// ============================================================================
