//! # Engram Core
//!
//! Tri-temporal conversational memory engine. Stores dialogue turns
//! verbatim, extracts entities and inter-entity facts, and answers two
//! questions for a running conversation: which past information is relevant
//! right now, and does anything new conflict with what is already known.
//!
//! - **Tri-temporal fact graph**: every fact carries fact time (when it was
//!   true), knowledge time (when the engine learned it), and system time
//!   (when the record existed), so "what was true at time T" stays answerable
//!   after corrections.
//! - **Eleven-layer retrieval**: bloom and temporal filters, five recall
//!   arms (inverted, entity, graph BFS, n-gram, vector), RRF fusion, and
//!   progressive refinement up to an optional LLM judge.
//! - **Never-forget fallback**: when every structured index misses, a
//!   parallel raw-text scan over the verbatim episode log answers instead -
//!   ingested text cannot become unreachable.
//! - **Contradiction management**: rule and LLM detection over facts sharing
//!   a subject, with supersede / coexist / reject / manual resolutions and a
//!   durable pending log.
//! - **Token-budgeted context assembly**: persistent conditions, absolute
//!   rules, retrieved memory, and recent turns greedily packed into one
//!   prompt string.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use engram_core::{EngineConfig, MemoryEngine};
//!
//! let engine = MemoryEngine::new(EngineConfig::default())?;
//!
//! let added = engine.add("I live in Berlin.", "user-1", None, None)?;
//! println!("extracted: {:?}", added.entities);
//!
//! let hits = engine.search("where does the user live", "user-1", 5, None)?;
//! let context = engine.build_context("where does the user live", "user-1", None, 1000, None)?;
//! # Ok::<(), engram_core::EngineError>(())
//! ```
//!
//! ## Feature flags
//!
//! - `local-embeddings`: in-process embedding generation with fastembed
//! - `hnsw`: HNSW centroid quantizer for the IVF vector index (USearch)
//! - `full`: both of the above

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod consistency;
pub mod context;
pub mod contradiction;
pub mod engine;
pub mod error;
pub mod extract;
pub mod graph;
pub mod index;
pub mod memory;
pub mod providers;
pub mod retrieval;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Engine facade
pub use engine::{
    AddResult, BuiltContext, EngineStats, MemoryEngine, SearchFilters, SearchResult,
    StoreDiagnostics,
};

// Errors
pub use error::{EngineError, Result};

// Configuration
pub use config::{
    ConfigHandle, ConfigWatcher, EmbeddingMode, EngineConfig, RecallMode,
};

// Data model
pub use memory::{
    AbsoluteRule, ConditionConfig, ConditionType, Episode, Node, NodeType, PersistentCondition,
    Role, TemporalFact,
};

// Graph
pub use graph::{
    Direction, EdgeSpec, FactEventKind, GraphBackend, JsonBackend, RedbBackend, SnapshotDiff,
    TemporalGraph,
};

// Contradictions
pub use contradiction::{
    Contradiction, ContradictionManager, ContradictionStats, ContradictionType,
    DetectionStrategy, ResolutionResult, ResolutionStrategy,
};

// Extraction
pub use extract::{
    DedupConfig, DedupItem, Deduplicator, ExtractMode, ExtractedEntity, ExtractedRelation,
    Extraction, Extractor, MatchKind,
};

// Retrieval
pub use retrieval::{
    reciprocal_rank_fusion, weighted_score_fusion, LayerStats, LayerWeights, RetrievalConfig,
    RetrievalResultItem, Retriever, TemporalContext,
};

// Providers
pub use providers::{
    BudgetConfig, BudgetManager, CrossEncoderProvider, EmbeddingProvider, EmbeddingService,
    LlmProvider, OpenAiCompatEmbeddings, OpenAiCompatLlm, ProviderSettings, UsageStats,
};
#[cfg(feature = "local-embeddings")]
pub use providers::LocalEmbeddingProvider;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        AddResult, BuiltContext, EngineConfig, EngineError, MemoryEngine, RecallMode, Result,
        SearchFilters, SearchResult,
    };
    pub use crate::{
        Contradiction, ContradictionType, DetectionStrategy, ResolutionStrategy, TemporalFact,
    };
    pub use crate::{Direction, EdgeSpec, NodeType, TemporalGraph};
    pub use crate::{EmbeddingProvider, LlmProvider};
}
