//! Engine configuration
//!
//! One process-wide snapshot, atomically swappable. A request pins a snapshot
//! (`Arc`) at entry and uses it for its whole lifetime; the watcher thread
//! polls `core_settings.json` every two seconds and swaps in a fresh snapshot
//! when the file changes. Environment variables overlay the file on every
//! (re)load.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::contradiction::{DetectionStrategy, ResolutionStrategy};
use crate::error::Result;
use crate::extract::{DedupConfig, ExtractMode};
use crate::memory::ConditionConfig;
use crate::providers::BudgetConfig;
use crate::retrieval::RetrievalConfig;

// ============================================================================
// GROUPS
// ============================================================================

/// Which peripheral sub-systems run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecallMode {
    /// Conditions + absolute rules active
    #[default]
    Roleplay,
    /// Conditions only
    General,
    /// Pure retrieval
    KnowledgeBase,
}

impl RecallMode {
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "general" => RecallMode::General,
            "knowledge_base" | "knowledgebase" => RecallMode::KnowledgeBase,
            _ => RecallMode::Roleplay,
        }
    }

    pub fn conditions_enabled(&self) -> bool {
        !matches!(self, RecallMode::KnowledgeBase)
    }

    pub fn rules_enabled(&self) -> bool {
        matches!(self, RecallMode::Roleplay)
    }
}

/// Which embedding provider to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    #[default]
    None,
    Api,
    Local,
}

impl EmbeddingMode {
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "api" => EmbeddingMode::Api,
            "local" => EmbeddingMode::Local,
            _ => EmbeddingMode::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub mode: EmbeddingMode,
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub dimension: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::None,
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub timeout_secs: f64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30.0,
        }
    }
}

impl LlmSettings {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContradictionSettings {
    pub enabled: bool,
    pub strategy: DetectionStrategy,
    pub auto_resolve: bool,
    pub default_resolution: ResolutionStrategy,
    pub similarity_threshold: f32,
}

impl Default for ContradictionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: DetectionStrategy::Rule,
            auto_resolve: false,
            default_resolution: ResolutionStrategy::Manual,
            similarity_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    pub enabled: bool,
    /// `file` or `redb` (alias `kv`)
    pub backend: String,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: "file".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Inverted-index mutations between automatic flushes
    pub flush_every: usize,
    /// Bloom sizing input
    pub bloom_expected_items: usize,
    /// IVF coarse cells
    pub vector_nlist: usize,
    /// IVF cells probed per query
    pub vector_nprobe: usize,
    /// Vectors required before IVF training kicks in
    pub vector_train_threshold: usize,
    /// HNSW connectivity for the centroid quantizer
    pub vector_hnsw_m: usize,
    pub vector_ef_construction: usize,
    pub vector_ef_search: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            flush_every: 500,
            bloom_expected_items: 100_000,
            vector_nlist: 64,
            vector_nprobe: 8,
            vector_train_threshold: 256,
            vector_hnsw_m: 16,
            vector_ef_construction: 128,
            vector_ef_search: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorSettings {
    pub mode: ExtractMode,
    pub dedup: DedupConfig,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            mode: ExtractMode::Adaptive,
            dedup: DedupConfig::default(),
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// The full engine configuration snapshot
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: RecallMode,
    pub data_root: Option<PathBuf>,
    pub embedding: EmbeddingSettings,
    pub llm: LlmSettings,
    pub retrieval: RetrievalConfig,
    pub contradiction: ContradictionSettings,
    pub extractor: ExtractorSettings,
    pub conditions: ConditionConfig,
    pub budget: BudgetConfig,
    pub graph: GraphSettings,
    pub index: IndexSettings,
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_str(key).and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|v| v.to_lowercase() == "true" || v == "1")
}

impl EngineConfig {
    /// Load from `core_settings.json` (when present) and overlay env vars
    pub fn load(settings_file: Option<&Path>) -> Result<Self> {
        let mut config = match settings_file {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str(&text)?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Overlay every recognized env var on the current values
    pub fn apply_env(&mut self) {
        if let Some(mode) = env_str("RECALL_MODE") {
            self.mode = RecallMode::parse_name(&mode);
        }
        if let Some(root) = env_str("RECALL_DATA_ROOT") {
            self.data_root = Some(PathBuf::from(root));
        }

        if let Some(mode) = env_str("RECALL_EMBEDDING_MODE") {
            self.embedding.mode = EmbeddingMode::parse_name(&mode);
        }
        if let Some(v) = env_str("EMBEDDING_API_KEY") {
            self.embedding.api_key = v;
        }
        if let Some(v) = env_str("EMBEDDING_API_BASE") {
            self.embedding.api_base = v;
        }
        if let Some(v) = env_str("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = env_parse("EMBEDDING_DIMENSION") {
            self.embedding.dimension = v;
        }

        if let Some(v) = env_str("LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = env_str("LLM_API_BASE") {
            self.llm.api_base = v;
        }
        if let Some(v) = env_str("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env_parse("LLM_TIMEOUT") {
            self.llm.timeout_secs = v;
        }

        self.retrieval = self.retrieval.clone().overlay_env();

        if let Some(v) = env_bool("CONTRADICTION_DETECTION_ENABLED") {
            self.contradiction.enabled = v;
        }
        if let Some(v) = env_str("CONTRADICTION_DETECTION_STRATEGY") {
            self.contradiction.strategy = DetectionStrategy::parse_name(&v);
        }
        if let Some(v) = env_bool("CONTRADICTION_AUTO_RESOLVE") {
            self.contradiction.auto_resolve = v;
        }
        if let Some(v) = env_parse("CONTRADICTION_SIMILARITY_THRESHOLD") {
            self.contradiction.similarity_threshold = v;
        }

        if let Some(v) = env_str("SMART_EXTRACTOR_MODE") {
            self.extractor.mode = ExtractMode::parse_name(&v);
        }
        if let Some(v) = env_parse("DEDUP_JACCARD_THRESHOLD") {
            self.extractor.dedup.jaccard_threshold = v;
        }
        if let Some(v) = env_parse("DEDUP_SEMANTIC_HIGH") {
            self.extractor.dedup.semantic_high = v;
        }
        if let Some(v) = env_parse("DEDUP_SEMANTIC_LOW") {
            self.extractor.dedup.semantic_low = v;
        }
        if let Some(v) = env_bool("DEDUP_LLM_ENABLED") {
            self.extractor.dedup.llm_enabled = v;
        }

        if let Some(v) = env_parse("CONTEXT_MAX_PER_TYPE") {
            self.conditions.max_per_type = v;
        }
        if let Some(v) = env_parse("CONTEXT_MAX_TOTAL") {
            self.conditions.max_total = v;
        }
        if let Some(v) = env_parse("CONTEXT_DECAY_DAYS") {
            self.conditions.decay_days = v;
        }
        if let Some(v) = env_parse("CONTEXT_DECAY_RATE") {
            self.conditions.decay_rate = v;
        }
        if let Some(v) = env_parse("CONTEXT_MIN_CONFIDENCE") {
            self.conditions.min_confidence = v;
        }

        if let Some(v) = env_parse("BUDGET_DAILY_LIMIT") {
            self.budget.daily_limit = v;
        }
        if let Some(v) = env_parse("BUDGET_HOURLY_LIMIT") {
            self.budget.hourly_limit = v;
        }

        if let Some(v) = env_bool("TEMPORAL_GRAPH_ENABLED") {
            self.graph.enabled = v;
        }
        if let Some(v) = env_str("TEMPORAL_GRAPH_BACKEND") {
            self.graph.backend = v;
        }

        if let Some(v) = env_parse("VECTOR_IVF_NLIST") {
            self.index.vector_nlist = v;
        }
        if let Some(v) = env_parse("VECTOR_IVF_NPROBE") {
            self.index.vector_nprobe = v;
        }
        if let Some(v) = env_parse("VECTOR_IVF_HNSW_M") {
            self.index.vector_hnsw_m = v;
        }
        if let Some(v) = env_parse("VECTOR_IVF_HNSW_EF_CONSTRUCTION") {
            self.index.vector_ef_construction = v;
        }
        if let Some(v) = env_parse("VECTOR_IVF_HNSW_EF_SEARCH") {
            self.index.vector_ef_search = v;
        }
    }
}

// ============================================================================
// SNAPSHOT HANDLE + WATCHER
// ============================================================================

/// Atomically swappable configuration snapshot
pub struct ConfigHandle {
    current: RwLock<Arc<EngineConfig>>,
    settings_file: Option<PathBuf>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig, settings_file: Option<PathBuf>) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            settings_file,
        }
    }

    /// Pin the current snapshot for a request's lifetime
    pub fn snapshot(&self) -> Arc<EngineConfig> {
        self.current.read().expect("config lock poisoned").clone()
    }

    /// Reload from disk + env and swap the snapshot
    pub fn reload(&self) -> Result<()> {
        let fresh = EngineConfig::load(self.settings_file.as_deref())?;
        *self.current.write().expect("config lock poisoned") = Arc::new(fresh);
        Ok(())
    }
}

/// Polls the settings file and swaps the snapshot when its mtime changes.
/// Changes take effect within the poll interval (2 seconds).
pub struct ConfigWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ConfigWatcher {
    const POLL_INTERVAL: Duration = Duration::from_secs(2);

    pub fn spawn(config: Arc<ConfigHandle>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name("engram-config-watcher".into())
            .spawn(move || {
                let mut last_mtime = None;
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::sleep(Self::POLL_INTERVAL);
                    let Some(path) = config.settings_file.as_ref() else {
                        continue;
                    };
                    let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
                    if mtime.is_some() && mtime != last_mtime {
                        last_mtime = mtime;
                        if let Err(e) = config.reload() {
                            tracing::warn!(error = %e, "config reload failed, keeping snapshot");
                        } else {
                            tracing::info!(path = %path.display(), "configuration reloaded");
                        }
                    }
                }
            })
            .ok();

        Self { stop, handle }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            // The watcher sleeps in short intervals; detach rather than block
            drop(handle);
        }
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
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.mode, RecallMode::Roleplay);
        assert!(config.mode.rules_enabled());
        assert!(config.mode.conditions_enabled());
        assert_eq!(config.embedding.mode, EmbeddingMode::None);
        assert!(!config.llm.is_configured());
        assert_eq!(config.graph.backend, "file");
    }

    #[test]
    fn test_mode_gates() {
        assert!(!RecallMode::KnowledgeBase.conditions_enabled());
        assert!(!RecallMode::General.rules_enabled());
        assert_eq!(RecallMode::parse_name("knowledge_base"), RecallMode::KnowledgeBase);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("core_settings.json");
        std::fs::write(
            &path,
            r#"{"mode": "general", "graph": {"backend": "redb"}, "budget": {"daily_limit": 2.0}}"#,
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.mode, RecallMode::General);
        assert_eq!(config.graph.backend, "redb");
    }

    #[test]
    fn test_snapshot_swap() {
        let handle = ConfigHandle::new(EngineConfig::default(), None);
        let pinned = handle.snapshot();
        handle.reload().unwrap();
        // The pinned snapshot survives the swap untouched
        assert_eq!(pinned.mode, RecallMode::Roleplay);
        assert_eq!(handle.snapshot().mode, pinned.mode);
    }
}
