//! Deterministic provider mocks
//!
//! The bag-of-words embedder gives stable, meaningful cosine similarity for
//! short English sentences; the scripted LLM replays canned responses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use engram_core::{EmbeddingProvider, LlmProvider, Result};

/// Hashed bag-of-words embedder: same words -> same direction
pub struct BagOfWordsEmbedder {
    dim: usize,
    calls: AtomicUsize,
}

impl BagOfWordsEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for BagOfWordsEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0f32; self.dim];
        for token in text.to_lowercase().split_whitespace() {
            let mut hash = 0usize;
            for byte in token.bytes() {
                hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
            }
            vector[hash % self.dim] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &str {
        "bag-of-words"
    }
}

/// An embedder that always fails, for exercising degraded paths
pub struct BrokenEmbedder;

impl EmbeddingProvider for BrokenEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(engram_core::EngineError::Provider("embedding offline".into()))
    }

    fn dimension(&self) -> usize {
        8
    }
}

/// Replays canned responses in order; the final one repeats forever
pub struct ScriptedLlm {
    responses: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
        }
    }
}

impl LlmProvider for ScriptedLlm {
    fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            Ok(responses.pop().unwrap())
        } else {
            Ok(responses.first().cloned().unwrap_or_default())
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
