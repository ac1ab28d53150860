//! External providers
//!
//! The engine treats embedding and completion as functions supplied from
//! outside: `embed(text) -> vector` and `complete(prompt, max_tokens) ->
//! text`. Providers are synchronous and `Send + Sync`; the async entry points
//! wrap calls in `spawn_blocking` with an explicit timeout, so a slow remote
//! never stalls a request thread holding write locks.

mod budget;
#[cfg(feature = "local-embeddings")]
mod local;
mod openai;

pub use budget::{BudgetConfig, BudgetManager, UsageStats};
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbeddingProvider;
pub use openai::{OpenAiCompatEmbeddings, OpenAiCompatLlm, ProviderSettings};

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::error::Result;

// ============================================================================
// TRAITS
// ============================================================================

/// `embed(text) -> vector<f32, d>`
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output dimensionality
    fn dimension(&self) -> usize;

    fn name(&self) -> &str {
        "custom"
    }
}

/// `complete(prompt, max_tokens) -> text`
pub trait LlmProvider: Send + Sync {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;

    fn model(&self) -> &str {
        "unknown"
    }
}

/// Cross-attend (query, doc) pairs into relevance scores
pub trait CrossEncoderProvider: Send + Sync {
    fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>>;
}

// ============================================================================
// EMBEDDING SERVICE
// ============================================================================

/// Caching front for the configured embedding provider.
///
/// `None` provider means embedding is disabled (`RECALL_EMBEDDING_MODE=none`):
/// vector layers are skipped and the raw-text fallback carries recall.
pub struct EmbeddingService {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingService {
    const CACHE_CAPACITY: usize = 256;

    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            provider,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(Self::CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.provider.as_ref().map(|p| p.dimension())
    }

    /// Embed with an LRU cache over the raw text, so repeated queries and
    /// dedup probes do not re-pay the provider.
    pub fn encode_with_cache(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let Some(provider) = &self.provider else {
            return Ok(None);
        };
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(text) {
                return Ok(Some(hit.clone()));
            }
        }
        let vector = provider.embed(text)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(text.to_string(), vector.clone());
        }
        Ok(Some(vector))
    }

    /// Embed without touching the cache (used for document ingestion)
    pub fn encode(&self, text: &str) -> Result<Option<Vec<f32>>> {
        match &self.provider {
            Some(provider) => provider.embed(text).map(Some),
            None => Ok(None),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod tests {
    use super::test_support::HashEmbedder;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_disabled_service_returns_none() {
        let service = EmbeddingService::disabled();
        assert!(!service.is_enabled());
        assert!(service.encode_with_cache("anything").unwrap().is_none());
    }

    #[test]
    fn test_cache_avoids_repeat_calls() {
        let embedder = Arc::new(HashEmbedder::new(16));
        let service = EmbeddingService::new(Some(embedder.clone()));

        let first = service.encode_with_cache("repeated query").unwrap().unwrap();
        let second = service.encode_with_cache("repeated query").unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        service.encode_with_cache("different query").unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }
}
