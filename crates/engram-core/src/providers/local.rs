//! Local embedding provider (fastembed)
//!
//! ONNX-based local inference behind the `local-embeddings` feature. The
//! model loads lazily on first use and is shared process-wide.

use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::error::{EngineError, Result};

use super::EmbeddingProvider;

static MODEL: OnceLock<std::result::Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

const MODEL_DIMENSION: usize = 768;

fn cache_dir() -> std::path::PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "engram", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>> {
    let result = MODEL.get_or_init(|| {
        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_cache_dir(cache_dir())
            .with_show_download_progress(false);
        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| e.to_string())
    });
    match result {
        Ok(mutex) => mutex
            .lock()
            .map_err(|_| EngineError::Provider("embedding model lock poisoned".into())),
        Err(e) => Err(EngineError::Provider(format!("local model init: {e}"))),
    }
}

/// In-process embedder (`RECALL_EMBEDDING_MODE=local`)
pub struct LocalEmbeddingProvider;

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut model = model()?;
        let mut vectors = model
            .embed(vec![text.to_string()], None)
            .map_err(|e| EngineError::Provider(format!("local embed: {e}")))?;
        vectors
            .pop()
            .ok_or_else(|| EngineError::Provider("local embed: empty output".into()))
    }

    fn dimension(&self) -> usize {
        MODEL_DIMENSION
    }

    fn name(&self) -> &str {
        "nomic-embed-text-v1.5"
    }
}
