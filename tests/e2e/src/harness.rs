//! Isolated engine instances for tests
//!
//! Each harness owns a temporary data root that disappears on drop. The same
//! root can be reopened in place to exercise restart behaviour.

use std::path::PathBuf;
use std::sync::Arc;

use engram_core::{EmbeddingProvider, EngineConfig, LlmProvider, MemoryEngine};
use tempfile::TempDir;

use crate::mocks::BagOfWordsEmbedder;

/// An engine over a throwaway data root
pub struct EngineHarness {
    pub engine: MemoryEngine,
    temp_dir: Option<TempDir>,
    data_root: PathBuf,
    config: EngineConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    llm: Option<Arc<dyn LlmProvider>>,
}

impl EngineHarness {
    /// Engine with no providers: rules extraction, no vector arm
    pub fn bare() -> Self {
        Self::build(None, None, |config| config)
    }

    /// Engine with the deterministic bag-of-words embedder
    pub fn with_embeddings() -> Self {
        Self::build(Some(Arc::new(BagOfWordsEmbedder::new(64))), None, |config| config)
    }

    /// Engine with a scripted LLM and custom config tweaks
    pub fn with_llm(
        llm: Arc<dyn LlmProvider>,
        tweak: impl FnOnce(EngineConfig) -> EngineConfig,
    ) -> Self {
        Self::build(Some(Arc::new(BagOfWordsEmbedder::new(64))), Some(llm), tweak)
    }

    /// Engine with custom config tweaks, no providers
    pub fn with_config(tweak: impl FnOnce(EngineConfig) -> EngineConfig) -> Self {
        Self::build(None, None, tweak)
    }

    fn build(
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        llm: Option<Arc<dyn LlmProvider>>,
        tweak: impl FnOnce(EngineConfig) -> EngineConfig,
    ) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let data_root = temp_dir.path().to_path_buf();
        let config = tweak(EngineConfig {
            data_root: Some(data_root.clone()),
            ..Default::default()
        });
        let engine = MemoryEngine::with_providers(
            config.clone(),
            embedder.clone(),
            llm.clone(),
            None,
        )
        .expect("engine open");
        Self {
            engine,
            temp_dir: Some(temp_dir),
            data_root,
            config,
            embedder,
            llm,
        }
    }

    /// Drop the engine and reopen it over the same data root, simulating a
    /// process restart.
    pub fn restart(self) -> Self {
        let EngineHarness {
            engine,
            temp_dir,
            data_root,
            config,
            embedder,
            llm,
        } = self;
        drop(engine);
        let engine =
            MemoryEngine::with_providers(config.clone(), embedder.clone(), llm.clone(), None)
                .expect("engine reopen");
        Self {
            engine,
            temp_dir,
            data_root,
            config,
            embedder,
            llm,
        }
    }

    pub fn data_root(&self) -> &PathBuf {
        &self.data_root
    }
}
