//! Retrieval configuration
//!
//! Typed switches and quotas for the eleven-layer pipeline, with presets
//! (default / fast / accurate) and environment loading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// WEIGHTS
// ============================================================================

/// Per-layer score weights for recall fusion
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerWeights {
    pub inverted: f32,
    pub entity: f32,
    pub graph: f32,
    pub ngram: f32,
    pub vector: f32,
    pub temporal: f32,
}

impl Default for LayerWeights {
    fn default() -> Self {
        Self {
            inverted: 1.0,
            entity: 1.2,
            graph: 1.0,
            ngram: 0.8,
            vector: 1.0,
            temporal: 0.5,
        }
    }
}

// ============================================================================
// TEMPORAL CONTEXT
// ============================================================================

/// Time constraints attached to a query (feeds L2 and the graph arm)
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalContext {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Reference point for graph-traversal validity
    pub reference: Option<DateTime<Utc>>,
}

impl TemporalContext {
    pub fn has_time_constraint(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}

// ============================================================================
// STATS AND RESULTS
// ============================================================================

/// Per-layer execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerStats {
    pub layer: String,
    /// -1 means "whole corpus"
    pub input_count: i64,
    pub output_count: usize,
    pub time_ms: f64,
}

/// One retrieval hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResultItem {
    pub id: String,
    pub score: f32,
    pub content: String,
    #[serde(default)]
    pub entities: Vec<String>,
}

// ============================================================================
// CONFIG
// ============================================================================

/// Full pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    // Layer switches (L1-L11)
    pub l1_enabled: bool,
    pub l2_enabled: bool,
    pub l3_enabled: bool,
    pub l4_enabled: bool,
    pub l5_enabled: bool,
    pub l6_enabled: bool,
    pub l7_enabled: bool,
    pub l8_enabled: bool,
    pub l9_enabled: bool,
    pub l10_enabled: bool,
    pub l11_enabled: bool,

    // Per-layer quotas
    pub l2_temporal_top_k: usize,
    pub l3_inverted_top_k: usize,
    pub l4_entity_top_k: usize,
    pub l5_graph_top_k: usize,
    pub l6_ngram_top_k: usize,
    pub l7_vector_top_k: usize,
    pub fine_rank_threshold: usize,
    pub l10_cross_encoder_top_k: usize,
    pub l11_llm_top_k: usize,
    pub final_top_k: usize,

    // Graph traversal (L5)
    pub l5_graph_max_depth: u32,
    pub l5_graph_max_entities: usize,
    pub l5_graph_direction: String,

    // LLM judge (L11)
    pub l11_llm_timeout_secs: f64,

    // Parallel triple recall
    pub parallel_recall_enabled: bool,
    pub rrf_k: f32,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub entity_weight: f32,
    pub fallback_enabled: bool,
    pub fallback_parallel: bool,
    pub fallback_workers: usize,
    pub fallback_max_results: usize,

    pub weights: LayerWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            l1_enabled: true,
            l2_enabled: true,
            l3_enabled: true,
            l4_enabled: true,
            l5_enabled: true,
            l6_enabled: true,
            l7_enabled: true,
            l8_enabled: true,
            l9_enabled: true,
            l10_enabled: false,
            l11_enabled: false,
            l2_temporal_top_k: 500,
            l3_inverted_top_k: 100,
            l4_entity_top_k: 50,
            l5_graph_top_k: 100,
            l6_ngram_top_k: 30,
            l7_vector_top_k: 200,
            fine_rank_threshold: 100,
            l10_cross_encoder_top_k: 50,
            l11_llm_top_k: 20,
            final_top_k: 20,
            l5_graph_max_depth: 2,
            l5_graph_max_entities: 3,
            l5_graph_direction: "both".to_string(),
            l11_llm_timeout_secs: 10.0,
            parallel_recall_enabled: true,
            rrf_k: 60.0,
            vector_weight: 1.0,
            // The keyword arm is the 100%-recall arm, so it carries more weight
            keyword_weight: 1.2,
            entity_weight: 1.0,
            fallback_enabled: true,
            fallback_parallel: true,
            fallback_workers: 4,
            fallback_max_results: 50,
            weights: LayerWeights::default(),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl RetrievalConfig {
    /// Fast preset: heavy refinement layers off
    pub fn fast() -> Self {
        Self {
            l8_enabled: false,
            l9_enabled: false,
            l10_enabled: false,
            l11_enabled: false,
            l7_vector_top_k: 100,
            ..Default::default()
        }
    }

    /// Accurate preset: every layer on
    pub fn accurate() -> Self {
        Self {
            l10_enabled: true,
            l11_enabled: true,
            l7_vector_top_k: 300,
            l10_cross_encoder_top_k: 100,
            ..Default::default()
        }
    }

    /// Build from `RETRIEVAL_*` / `TRIPLE_RECALL_*` / `FALLBACK_*` env vars
    pub fn from_env() -> Self {
        Self::default().overlay_env()
    }

    /// Overlay any set env vars on top of this configuration
    pub fn overlay_env(self) -> Self {
        let default = self;
        Self {
            l1_enabled: env_bool("RETRIEVAL_L1_BLOOM_ENABLED", default.l1_enabled),
            l2_enabled: env_bool("RETRIEVAL_L2_TEMPORAL_ENABLED", default.l2_enabled),
            l3_enabled: env_bool("RETRIEVAL_L3_INVERTED_ENABLED", default.l3_enabled),
            l4_enabled: env_bool("RETRIEVAL_L4_ENTITY_ENABLED", default.l4_enabled),
            l5_enabled: env_bool("RETRIEVAL_L5_GRAPH_ENABLED", default.l5_enabled),
            l6_enabled: env_bool("RETRIEVAL_L6_NGRAM_ENABLED", default.l6_enabled),
            l7_enabled: env_bool("RETRIEVAL_L7_VECTOR_COARSE_ENABLED", default.l7_enabled),
            l8_enabled: env_bool("RETRIEVAL_L8_VECTOR_FINE_ENABLED", default.l8_enabled),
            l9_enabled: env_bool("RETRIEVAL_L9_RERANK_ENABLED", default.l9_enabled),
            l10_enabled: env_bool("RETRIEVAL_L10_CROSS_ENCODER_ENABLED", default.l10_enabled),
            l11_enabled: env_bool("RETRIEVAL_L11_LLM_ENABLED", default.l11_enabled),
            l2_temporal_top_k: env_usize("RETRIEVAL_L2_TEMPORAL_TOP_K", default.l2_temporal_top_k),
            l3_inverted_top_k: env_usize("RETRIEVAL_L3_INVERTED_TOP_K", default.l3_inverted_top_k),
            l4_entity_top_k: env_usize("RETRIEVAL_L4_ENTITY_TOP_K", default.l4_entity_top_k),
            l5_graph_top_k: env_usize("RETRIEVAL_L5_GRAPH_TOP_K", default.l5_graph_top_k),
            l6_ngram_top_k: env_usize("RETRIEVAL_L6_NGRAM_TOP_K", default.l6_ngram_top_k),
            l7_vector_top_k: env_usize("RETRIEVAL_L7_VECTOR_TOP_K", default.l7_vector_top_k),
            fine_rank_threshold: env_usize("RETRIEVAL_FINE_RANK_THRESHOLD", default.fine_rank_threshold),
            l10_cross_encoder_top_k: env_usize(
                "RETRIEVAL_L10_CROSS_ENCODER_TOP_K",
                default.l10_cross_encoder_top_k,
            ),
            l11_llm_top_k: env_usize("RETRIEVAL_L11_LLM_TOP_K", default.l11_llm_top_k),
            final_top_k: env_usize("RETRIEVAL_FINAL_TOP_K", default.final_top_k),
            l5_graph_max_depth: env_u32("RETRIEVAL_L5_GRAPH_MAX_DEPTH", default.l5_graph_max_depth),
            l5_graph_max_entities: env_usize(
                "RETRIEVAL_L5_GRAPH_MAX_ENTITIES",
                default.l5_graph_max_entities,
            ),
            l5_graph_direction: std::env::var("RETRIEVAL_L5_GRAPH_DIRECTION")
                .unwrap_or(default.l5_graph_direction),
            l11_llm_timeout_secs: env_f64("RETRIEVAL_L11_LLM_TIMEOUT", default.l11_llm_timeout_secs),
            parallel_recall_enabled: env_bool("TRIPLE_RECALL_ENABLED", default.parallel_recall_enabled),
            rrf_k: env_f32("TRIPLE_RECALL_RRF_K", default.rrf_k),
            vector_weight: env_f32("TRIPLE_RECALL_VECTOR_WEIGHT", default.vector_weight),
            keyword_weight: env_f32("TRIPLE_RECALL_KEYWORD_WEIGHT", default.keyword_weight),
            entity_weight: env_f32("TRIPLE_RECALL_ENTITY_WEIGHT", default.entity_weight),
            fallback_enabled: env_bool("FALLBACK_ENABLED", default.fallback_enabled),
            fallback_parallel: env_bool("FALLBACK_PARALLEL", default.fallback_parallel),
            fallback_workers: env_usize("FALLBACK_WORKERS", default.fallback_workers),
            fallback_max_results: env_usize("FALLBACK_MAX_RESULTS", default.fallback_max_results),
            weights: LayerWeights {
                inverted: env_f32("RETRIEVAL_WEIGHT_INVERTED", default.weights.inverted),
                entity: env_f32("RETRIEVAL_WEIGHT_ENTITY", default.weights.entity),
                graph: env_f32("RETRIEVAL_WEIGHT_GRAPH", default.weights.graph),
                ngram: env_f32("RETRIEVAL_WEIGHT_NGRAM", default.weights.ngram),
                vector: env_f32("RETRIEVAL_WEIGHT_VECTOR", default.weights.vector),
                temporal: env_f32("RETRIEVAL_WEIGHT_TEMPORAL", default.weights.temporal),
            },
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let fast = RetrievalConfig::fast();
        assert!(!fast.l8_enabled);
        assert!(!fast.l11_enabled);

        let accurate = RetrievalConfig::accurate();
        assert!(accurate.l10_enabled);
        assert!(accurate.l11_enabled);

        let default = RetrievalConfig::default();
        assert!(!default.l10_enabled);
        assert!(default.parallel_recall_enabled);
        assert_eq!(default.rrf_k, 60.0);
    }

    #[test]
    fn test_temporal_context_constraint() {
        let none = TemporalContext::default();
        assert!(!none.has_time_constraint());

        let bounded = TemporalContext {
            start: Some(Utc::now()),
            ..Default::default()
        };
        assert!(bounded.has_time_constraint());
    }
}
