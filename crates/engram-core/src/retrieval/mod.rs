//! Eleven-layer retriever
//!
//! Three phases over eleven layers:
//!
//! - Filter: L1 bloom (drop impossible keywords), L2 temporal (restrict the
//!   candidate universe to a time window)
//! - Recall: L3 inverted, L4 entity, L5 graph BFS, L6 n-gram, L7 vector
//! - Refine: L8 vector fine, L9 rerank, L10 cross-encoder, L11 LLM judge
//!
//! The steady-state path runs three recall arms (vector / keyword / entity)
//! concurrently and fuses them with weighted RRF; graph results join as a
//! fourth arm. When the fused set is empty the raw-text fallback scan runs,
//! which is what makes ingested text impossible to lose. The sequential
//! layer pipeline is kept for callers that disable parallel recall.
//!
//! With L10 and L11 disabled the output order is deterministic for identical
//! inputs and indexes; ties always break on doc id.

mod config;
mod fusion;

pub use config::{
    LayerStats, LayerWeights, RetrievalConfig, RetrievalResultItem, TemporalContext,
};
pub use fusion::{reciprocal_rank_fusion, weighted_score_fusion};

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::contradiction::extract_json;
use crate::graph::{Direction, TemporalGraph};
use crate::index::{
    BloomFilter, DocId, EntityIndex, FullTextIndex, InvertedIndex, IvfVectorIndex, NgramIndex,
    TemporalIndex, TimeAxis,
};
use crate::providers::{BudgetManager, CrossEncoderProvider, EmbeddingService, LlmProvider};

// ============================================================================
// RETRIEVER
// ============================================================================

/// Borrowed views over one scope's indexes; any of them may be absent and the
/// corresponding layers silently skip.
pub struct Retriever<'a> {
    pub bloom: Option<&'a BloomFilter>,
    pub inverted: Option<&'a InvertedIndex>,
    pub entity: Option<&'a EntityIndex>,
    pub ngram: Option<&'a NgramIndex>,
    pub fulltext: Option<&'a FullTextIndex>,
    pub vector: Option<&'a IvfVectorIndex>,
    pub temporal: Option<&'a TemporalIndex>,
    pub graph: Option<&'a TemporalGraph>,
    pub embeddings: &'a EmbeddingService,
    pub cross_encoder: Option<&'a dyn CrossEncoderProvider>,
    pub config: &'a RetrievalConfig,
}

/// Result set plus per-layer execution stats
#[derive(Debug, Default)]
pub struct Retrieved {
    pub items: Vec<RetrievalResultItem>,
    pub stats: Vec<LayerStats>,
}

impl<'a> Retriever<'a> {
    /// Synchronous retrieval (everything except the L11 judge)
    pub fn retrieve(
        &self,
        query: &str,
        entities: &[String],
        keywords: &[String],
        top_k: usize,
        temporal_context: Option<&TemporalContext>,
    ) -> Retrieved {
        let mut out = Retrieved::default();
        if top_k == 0 {
            return out;
        }
        if query.trim().is_empty() && entities.is_empty() && keywords.is_empty() {
            return out;
        }

        // L1: prune keywords that cannot exist in the corpus
        let keywords = self.l1_bloom(keywords, &mut out.stats);

        // L2: restrict the candidate universe to the time window
        let temporal_candidates = self.l2_temporal(temporal_context, &mut out.stats);

        let mut scores: HashMap<String, f32> = HashMap::new();
        if self.config.parallel_recall_enabled {
            self.parallel_recall(
                query,
                entities,
                &keywords,
                top_k,
                temporal_context,
                temporal_candidates.as_ref(),
                &mut scores,
                &mut out.stats,
            );
        } else {
            self.sequential_recall(
                query,
                entities,
                &keywords,
                temporal_context,
                temporal_candidates.as_ref(),
                &mut scores,
                &mut out.stats,
            );
        }

        // Hard-recall fallback: nothing structured matched, scan the raw text
        if scores.is_empty() {
            self.raw_text_fallback(query, &mut scores, &mut out.stats);
        }

        // L8: exact cosine rescoring once the candidate set is large enough
        if self.config.l8_enabled && scores.len() > self.config.fine_rank_threshold {
            self.l8_vector_fine(query, &mut scores, &mut out.stats);
        }

        // L9: exact keyword / entity occurrence bonuses
        if self.config.l9_enabled && !scores.is_empty() {
            self.l9_rerank(entities, &keywords, &mut scores, &mut out.stats);
        }

        // L10: cross-encoder blend
        if self.config.l10_enabled && self.cross_encoder.is_some() && !scores.is_empty() {
            self.l10_cross_encoder(query, &mut scores, &mut out.stats);
        }

        out.items = self.build_results(scores, top_k);
        out
    }

    // ------------------------------------------------------------------
    // Filter phase
    // ------------------------------------------------------------------

    fn l1_bloom(&self, keywords: &[String], stats: &mut Vec<LayerStats>) -> Vec<String> {
        let Some(bloom) = self.bloom.filter(|_| self.config.l1_enabled) else {
            return keywords.to_vec();
        };
        if keywords.is_empty() {
            return Vec::new();
        }
        let start = Instant::now();
        let filtered: Vec<String> = keywords
            .iter()
            .filter(|kw| bloom.contains(&kw.to_lowercase()))
            .cloned()
            .collect();
        stats.push(LayerStats {
            layer: "l1_bloom".into(),
            input_count: keywords.len() as i64,
            output_count: filtered.len(),
            time_ms: start.elapsed().as_secs_f64() * 1000.0,
        });
        filtered
    }

    fn l2_temporal(
        &self,
        temporal_context: Option<&TemporalContext>,
        stats: &mut Vec<LayerStats>,
    ) -> Option<HashSet<String>> {
        let temporal = self.temporal.filter(|_| self.config.l2_enabled)?;
        let context = temporal_context?;
        if !context.has_time_constraint() {
            return None;
        }
        let start = Instant::now();
        let mut candidates: Vec<String> =
            temporal.query_range(context.start, context.end, TimeAxis::Fact);
        candidates.truncate(self.config.l2_temporal_top_k);
        let set: HashSet<String> = candidates.into_iter().collect();
        stats.push(LayerStats {
            layer: "l2_temporal".into(),
            input_count: -1,
            output_count: set.len(),
            time_ms: start.elapsed().as_secs_f64() * 1000.0,
        });
        Some(set)
    }

    // ------------------------------------------------------------------
    // Recall phase - parallel triple recall
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn parallel_recall(
        &self,
        query: &str,
        entities: &[String],
        keywords: &[String],
        top_k: usize,
        temporal_context: Option<&TemporalContext>,
        temporal_candidates: Option<&HashSet<String>>,
        scores: &mut HashMap<String, f32>,
        stats: &mut Vec<LayerStats>,
    ) {
        let arm_k = top_k * 2;

        let (vector_arm, keyword_arm, entity_arm) = std::thread::scope(|scope| {
            let vector_handle = scope.spawn(|| self.vector_recall(query, arm_k, temporal_candidates));
            let keyword_handle =
                scope.spawn(|| self.keyword_recall(query, keywords, arm_k, temporal_candidates));
            let entity_handle =
                scope.spawn(|| self.entity_recall(entities, arm_k, temporal_candidates));
            (
                vector_handle.join().unwrap_or_default(),
                keyword_handle.join().unwrap_or_default(),
                entity_handle.join().unwrap_or_default(),
            )
        });

        stats.push(LayerStats {
            layer: "l7_vector_coarse".into(),
            input_count: 0,
            output_count: vector_arm.len(),
            time_ms: 0.0,
        });
        stats.push(LayerStats {
            layer: "l3_inverted".into(),
            input_count: 0,
            output_count: keyword_arm.len(),
            time_ms: 0.0,
        });
        stats.push(LayerStats {
            layer: "l4_entity".into(),
            input_count: 0,
            output_count: entity_arm.len(),
            time_ms: 0.0,
        });

        let mut arms = vec![vector_arm, keyword_arm, entity_arm];
        let mut weights = vec![
            self.config.vector_weight,
            self.config.keyword_weight,
            self.config.entity_weight,
        ];

        // L5: graph expansion joins as a fourth arm when entities are known
        if self.config.l5_enabled && self.graph.is_some() && !entities.is_empty() {
            let graph_arm = self.graph_recall(entities, top_k, temporal_context, stats);
            if !graph_arm.is_empty() {
                arms.push(graph_arm);
                weights.push(self.config.weights.graph);
            }
        }

        for (doc_id, score) in reciprocal_rank_fusion(&arms, self.config.rrf_k, Some(&weights)) {
            scores.insert(doc_id, score);
        }
    }

    fn vector_recall(
        &self,
        query: &str,
        top_k: usize,
        temporal_candidates: Option<&HashSet<String>>,
    ) -> Vec<(String, f32)> {
        let Some(vector) = self.vector.filter(|_| self.config.l7_enabled) else {
            return Vec::new();
        };
        let embedding = match self.embeddings.encode_with_cache(query) {
            Ok(Some(embedding)) => embedding,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "vector recall embed failed");
                return Vec::new();
            }
        };
        vector
            .search(&embedding, top_k)
            .into_iter()
            .filter(|(id, _)| temporal_candidates.is_none_or(|set| set.contains(id)))
            .collect()
    }

    /// The keyword arm: exact posting membership scored by match fraction,
    /// complemented with BM25-ranked hits the exact path missed.
    fn keyword_recall(
        &self,
        query: &str,
        keywords: &[String],
        top_k: usize,
        temporal_candidates: Option<&HashSet<String>>,
    ) -> Vec<(String, f32)> {
        let base_score = 0.8f32;
        let mut results: Vec<(String, f32)> = Vec::new();

        if let Some(inverted) = self.inverted {
            if !keywords.is_empty() {
                let mut match_counts: HashMap<String, usize> = HashMap::new();
                for kw in keywords {
                    for doc_id in inverted.search(kw) {
                        if temporal_candidates.is_some_and(|set| !set.contains(&doc_id)) {
                            continue;
                        }
                        *match_counts.entry(doc_id).or_default() += 1;
                    }
                }
                results = match_counts
                    .into_iter()
                    .map(|(doc_id, count)| {
                        (doc_id, base_score * count as f32 / keywords.len() as f32)
                    })
                    .collect();
            }
        }

        if let Some(fulltext) = self.fulltext {
            let bm25_hits = fulltext.search(query, top_k);
            let max_score = bm25_hits.first().map(|(_, s)| *s).unwrap_or(1.0).max(1e-6);
            let seen: HashSet<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
            let mut extra = Vec::new();
            for (doc_id, score) in &bm25_hits {
                if seen.contains(doc_id.as_str()) {
                    continue;
                }
                if temporal_candidates.is_some_and(|set| !set.contains(doc_id)) {
                    continue;
                }
                // Relevance-only hits rank below exact keyword membership
                extra.push((doc_id.clone(), 0.6 * base_score * score / max_score));
            }
            results.extend(extra);
        }

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(top_k);
        results
    }

    fn entity_recall(
        &self,
        entities: &[String],
        top_k: usize,
        temporal_candidates: Option<&HashSet<String>>,
    ) -> Vec<(String, f32)> {
        let Some(entity_index) = self.entity.filter(|_| self.config.l4_enabled) else {
            return Vec::new();
        };
        if entities.is_empty() {
            return Vec::new();
        }
        let mut doc_ids: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for entity in entities {
            for indexed in entity_index.get_related_turns(entity) {
                for doc_id in &indexed.turn_references {
                    if temporal_candidates.is_some_and(|set| !set.contains(doc_id)) {
                        continue;
                    }
                    if seen.insert(doc_id.clone()) {
                        doc_ids.push(doc_id.clone());
                    }
                }
            }
        }
        doc_ids.truncate(top_k);
        doc_ids.into_iter().map(|id| (id, 0.7)).collect()
    }

    fn graph_recall(
        &self,
        entities: &[String],
        top_k: usize,
        temporal_context: Option<&TemporalContext>,
        stats: &mut Vec<LayerStats>,
    ) -> Vec<(String, f32)> {
        let Some(graph) = self.graph else {
            return Vec::new();
        };
        let start = Instant::now();
        let direction = Direction::parse_name(&self.config.l5_graph_direction);
        let reference = temporal_context.and_then(|c| c.reference);

        let mut candidates: Vec<(String, f32)> = Vec::new();
        for entity in entities.iter().take(self.config.l5_graph_max_entities) {
            let Some(node) = graph.get_node_by_name(entity) else {
                continue;
            };
            let buckets = graph.bfs(
                &node.id,
                self.config.l5_graph_max_depth,
                None,
                reference,
                direction,
            );
            for (depth, edges) in buckets {
                let depth_weight = 1.0 / (depth as f32 + 1.0);
                for (_target, fact) in edges {
                    for episode_id in &fact.source_episodes {
                        candidates.push((
                            DocId::memory(episode_id),
                            depth_weight * self.config.weights.graph,
                        ));
                    }
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.truncate(top_k);

        stats.push(LayerStats {
            layer: "l5_graph".into(),
            input_count: entities.len() as i64,
            output_count: candidates.len(),
            time_ms: start.elapsed().as_secs_f64() * 1000.0,
        });
        candidates
    }

    // ------------------------------------------------------------------
    // Recall phase - sequential pipeline
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn sequential_recall(
        &self,
        query: &str,
        entities: &[String],
        keywords: &[String],
        temporal_context: Option<&TemporalContext>,
        temporal_candidates: Option<&HashSet<String>>,
        scores: &mut HashMap<String, f32>,
        stats: &mut Vec<LayerStats>,
    ) {
        // L3: inverted index union
        if self.config.l3_enabled {
            if let Some(inverted) = self.inverted {
                let start = Instant::now();
                let input = scores.len() as i64;
                let hits = inverted.search_any(keywords);
                for doc_id in hits.into_iter().take(self.config.l3_inverted_top_k) {
                    if temporal_candidates.is_some_and(|set| !set.contains(&doc_id)) {
                        continue;
                    }
                    *scores.entry(doc_id).or_default() += self.config.weights.inverted;
                }
                stats.push(LayerStats {
                    layer: "l3_inverted".into(),
                    input_count: input,
                    output_count: scores.len(),
                    time_ms: start.elapsed().as_secs_f64() * 1000.0,
                });
            }
        }

        // L4: entity mentions
        if self.config.l4_enabled && !entities.is_empty() {
            let start = Instant::now();
            let input = scores.len() as i64;
            for (doc_id, _) in self.entity_recall(entities, self.config.l4_entity_top_k, temporal_candidates)
            {
                *scores.entry(doc_id).or_default() += self.config.weights.entity;
            }
            stats.push(LayerStats {
                layer: "l4_entity".into(),
                input_count: input,
                output_count: scores.len(),
                time_ms: start.elapsed().as_secs_f64() * 1000.0,
            });
        }

        // L5: graph expansion
        if self.config.l5_enabled && !entities.is_empty() {
            for (doc_id, score) in
                self.graph_recall(entities, self.config.l5_graph_top_k, temporal_context, stats)
            {
                *scores.entry(doc_id).or_default() += score;
            }
        }

        // L6: n-gram fuzzy match
        if self.config.l6_enabled {
            if let Some(ngram) = self.ngram {
                let start = Instant::now();
                let input = scores.len() as i64;
                for (doc_id, _) in ngram
                    .search(query)
                    .into_iter()
                    .take(self.config.l6_ngram_top_k)
                {
                    if temporal_candidates.is_some_and(|set| !set.contains(&doc_id)) {
                        continue;
                    }
                    *scores.entry(doc_id).or_default() += self.config.weights.ngram;
                }
                stats.push(LayerStats {
                    layer: "l6_ngram".into(),
                    input_count: input,
                    output_count: scores.len(),
                    time_ms: start.elapsed().as_secs_f64() * 1000.0,
                });
            }
        }

        // L7: vector coarse
        if self.config.l7_enabled {
            let start = Instant::now();
            let input = scores.len() as i64;
            for (doc_id, score) in
                self.vector_recall(query, self.config.l7_vector_top_k, temporal_candidates)
            {
                *scores.entry(doc_id).or_default() += score * self.config.weights.vector;
            }
            stats.push(LayerStats {
                layer: "l7_vector_coarse".into(),
                input_count: input,
                output_count: scores.len(),
                time_ms: start.elapsed().as_secs_f64() * 1000.0,
            });
        }
    }

    // ------------------------------------------------------------------
    // Fallback
    // ------------------------------------------------------------------

    fn raw_text_fallback(
        &self,
        query: &str,
        scores: &mut HashMap<String, f32>,
        stats: &mut Vec<LayerStats>,
    ) {
        if !self.config.fallback_enabled {
            return;
        }
        let Some(ngram) = self.ngram else {
            return;
        };
        let start = Instant::now();
        let hits = if self.config.fallback_parallel {
            ngram.raw_search_parallel(
                query,
                self.config.fallback_max_results,
                self.config.fallback_workers,
            )
        } else {
            ngram.raw_search(query, self.config.fallback_max_results)
        };
        for doc_id in &hits {
            scores.insert(doc_id.clone(), 0.3);
        }
        stats.push(LayerStats {
            layer: "fallback_raw_scan".into(),
            input_count: -1,
            output_count: hits.len(),
            time_ms: start.elapsed().as_secs_f64() * 1000.0,
        });
    }

    // ------------------------------------------------------------------
    // Refine phase
    // ------------------------------------------------------------------

    fn l8_vector_fine(
        &self,
        query: &str,
        scores: &mut HashMap<String, f32>,
        stats: &mut Vec<LayerStats>,
    ) {
        let Some(vector) = self.vector else {
            return;
        };
        let start = Instant::now();
        let input = scores.len() as i64;
        let embedding = match self.embeddings.encode_with_cache(query) {
            Ok(Some(embedding)) => embedding,
            _ => return,
        };

        let ids: Vec<String> = scores.keys().cloned().collect();
        let stored = vector.store().vectors_for(ids.iter().map(|s| s.as_str()));
        for (doc_id, doc_vector) in stored {
            let cosine = crate::index::cosine_similarity(&embedding, doc_vector);
            if let Some(score) = scores.get_mut(&doc_id) {
                *score = 0.7 * cosine + 0.3 * *score;
            }
        }
        stats.push(LayerStats {
            layer: "l8_vector_fine".into(),
            input_count: input,
            output_count: scores.len(),
            time_ms: start.elapsed().as_secs_f64() * 1000.0,
        });
    }

    fn l9_rerank(
        &self,
        entities: &[String],
        keywords: &[String],
        scores: &mut HashMap<String, f32>,
        stats: &mut Vec<LayerStats>,
    ) {
        let start = Instant::now();
        let input = scores.len() as i64;
        let ids: Vec<String> = scores.keys().cloned().collect();
        for doc_id in ids {
            let content = self.content_of(&doc_id).to_lowercase();
            if content.is_empty() {
                continue;
            }
            let mut bonus = 0.0f32;
            for kw in keywords {
                if content.contains(&kw.to_lowercase()) {
                    bonus += 0.05;
                }
            }
            for entity in entities {
                if content.contains(&entity.to_lowercase()) {
                    bonus += 0.1;
                }
            }
            *scores.get_mut(&doc_id).expect("id came from map") += bonus;
        }
        stats.push(LayerStats {
            layer: "l9_rerank".into(),
            input_count: input,
            output_count: scores.len(),
            time_ms: start.elapsed().as_secs_f64() * 1000.0,
        });
    }

    fn l10_cross_encoder(
        &self,
        query: &str,
        scores: &mut HashMap<String, f32>,
        stats: &mut Vec<LayerStats>,
    ) {
        let Some(cross_encoder) = self.cross_encoder else {
            return;
        };
        let start = Instant::now();
        let input = scores.len() as i64;

        let mut ranked: Vec<(String, f32)> =
            scores.iter().map(|(id, s)| (id.clone(), *s)).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(self.config.l10_cross_encoder_top_k);

        let pairs: Vec<(String, String)> = ranked
            .iter()
            .map(|(id, _)| (query.to_string(), self.content_of(id)))
            .collect();
        match cross_encoder.predict(&pairs) {
            Ok(predictions) => {
                for ((doc_id, _), ce_score) in ranked.iter().zip(predictions) {
                    if let Some(score) = scores.get_mut(doc_id) {
                        *score = *score * 0.3 + ce_score * 0.7;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cross-encoder rerank failed, keeping prior scores");
            }
        }
        stats.push(LayerStats {
            layer: "l10_cross_encoder".into(),
            input_count: input,
            output_count: scores.len(),
            time_ms: start.elapsed().as_secs_f64() * 1000.0,
        });
    }

    // ------------------------------------------------------------------
    // Assembly
    // ------------------------------------------------------------------

    fn content_of(&self, doc_id: &str) -> String {
        self.ngram
            .and_then(|ngram| ngram.raw_text(doc_id))
            .unwrap_or_default()
            .to_string()
    }

    fn build_results(
        &self,
        scores: HashMap<String, f32>,
        top_k: usize,
    ) -> Vec<RetrievalResultItem> {
        let mut ranked: Vec<(String, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);
        ranked
            .into_iter()
            .map(|(id, score)| RetrievalResultItem {
                content: self.content_of(&id),
                entities: Vec::new(),
                id,
                score,
            })
            .collect()
    }
}

// ============================================================================
// L11: LLM JUDGE (async only)
// ============================================================================

#[derive(serde::Deserialize)]
struct JudgeScores {
    scores: Vec<f32>,
}

/// Ask the LLM for 0-10 relevance per doc and replace the scores with the
/// normalized judgement. On timeout or parse failure the prior order is kept
/// silently. Returns whether the judgement was applied.
pub async fn llm_judge_rerank(
    query: &str,
    items: &mut [RetrievalResultItem],
    llm: std::sync::Arc<dyn LlmProvider>,
    config: &RetrievalConfig,
    budget: Option<&BudgetManager>,
) -> bool {
    if items.is_empty() {
        return false;
    }
    let judged = items.len().min(config.l11_llm_top_k);

    let docs_text = items[..judged]
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let content: String = item.content.chars().take(500).collect();
            format!("[Doc {}] {}", i + 1, content)
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let prompt = format!(
        "Score each document's relevance to the query from 0 to 10.\n\n\
         Query: {query}\n\nDocuments:\n{docs_text}\n\n\
         Reply with JSON only: {{\"scores\": [8, 6, ...]}}"
    );

    if let Some(budget) = budget {
        let cost = BudgetManager::estimate_cost(prompt.len(), 200);
        if !budget.can_afford(cost, "llm_judge") {
            return false;
        }
    }

    let timeout = std::time::Duration::from_secs_f64(config.l11_llm_timeout_secs);
    let prompt_len = prompt.len();
    let call = tokio::task::spawn_blocking(move || llm.complete(&prompt, 200));
    let response = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(response))) => response,
        Ok(Ok(Err(e))) => {
            tracing::warn!(error = %e, "L11 judge failed, keeping prior order");
            return false;
        }
        Ok(Err(join_error)) => {
            tracing::warn!(error = %join_error, "L11 judge task panicked");
            return false;
        }
        Err(_) => {
            tracing::warn!("L11 judge timed out, keeping prior order");
            return false;
        }
    };
    if let Some(budget) = budget {
        budget.record_usage(prompt_len as u64 / 4, 100, "llm_judge");
    }

    let parsed: Option<JudgeScores> = extract_json(&response);
    let Some(parsed) = parsed else {
        tracing::warn!("L11 judge returned unparsable scores");
        return false;
    };
    for (item, llm_score) in items[..judged].iter_mut().zip(parsed.scores) {
        item.score = (llm_score / 10.0).clamp(0.0, 1.0);
    }
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    true
}

// ============================================================================
// TESTS
// ============================================================================
