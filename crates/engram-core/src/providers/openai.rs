//! OpenAI-compatible HTTP providers
//!
//! Talks to any endpoint exposing the `/embeddings` and `/chat/completions`
//! shapes. Blocking client with a per-call timeout; async entry points wrap
//! calls in `spawn_blocking`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

use super::{EmbeddingProvider, LlmProvider};

/// Connection settings shared by both provider kinds
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl ProviderSettings {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn map_error(operation: &str, timeout: Duration, e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::UpstreamTimeout {
            operation: operation.to_string(),
            elapsed_ms: timeout.as_millis() as u64,
        }
    } else {
        EngineError::Provider(format!("{operation}: {e}"))
    }
}

// ============================================================================
// EMBEDDINGS
// ============================================================================

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Deserialize)]
struct EmbeddingsDatum {
    embedding: Vec<f32>,
}

/// Remote embedding provider (`RECALL_EMBEDDING_MODE=api`)
pub struct OpenAiCompatEmbeddings {
    settings: ProviderSettings,
    dimension: usize,
    client: reqwest::blocking::Client,
}

impl OpenAiCompatEmbeddings {
    pub fn new(settings: ProviderSettings, dimension: usize) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| EngineError::Provider(format!("embedding client: {e}")))?;
        Ok(Self {
            settings,
            dimension,
            client,
        })
    }
}

impl EmbeddingProvider for OpenAiCompatEmbeddings {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(self.settings.endpoint("embeddings"))
            .bearer_auth(&self.settings.api_key)
            .json(&EmbeddingsRequest {
                model: &self.settings.model,
                input: [text],
            })
            .send()
            .map_err(|e| map_error("embed", self.settings.timeout, e))?;

        if !response.status().is_success() {
            return Err(EngineError::Provider(format!(
                "embed: http {}",
                response.status()
            )));
        }

        let body: EmbeddingsResponse = response
            .json()
            .map_err(|e| map_error("embed", self.settings.timeout, e))?;
        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EngineError::Provider("embed: empty response".into()))?;

        if vector.len() != self.dimension {
            return Err(EngineError::Provider(format!(
                "embed: expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.settings.model
    }
}

// ============================================================================
// COMPLETIONS
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Remote completion provider
pub struct OpenAiCompatLlm {
    settings: ProviderSettings,
    client: reqwest::blocking::Client,
}

impl OpenAiCompatLlm {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| EngineError::Provider(format!("llm client: {e}")))?;
        Ok(Self { settings, client })
    }
}

impl LlmProvider for OpenAiCompatLlm {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let response = self
            .client
            .post(self.settings.endpoint("chat/completions"))
            .bearer_auth(&self.settings.api_key)
            .json(&ChatRequest {
                model: &self.settings.model,
                messages: [ChatMessage {
                    role: "user",
                    content: prompt,
                }],
                max_tokens,
                temperature: 0.0,
            })
            .send()
            .map_err(|e| map_error("complete", self.settings.timeout, e))?;

        if !response.status().is_success() {
            return Err(EngineError::Provider(format!(
                "complete: http {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .map_err(|e| map_error("complete", self.settings.timeout, e))?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::Provider("complete: empty response".into()))
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_cleanly() {
        let settings = ProviderSettings {
            api_key: "k".into(),
            base_url: "https://api.example.com/v1/".into(),
            model: "m".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(settings.endpoint("embeddings"), "https://api.example.com/v1/embeddings");
    }

    #[test]
    fn test_response_shapes_parse() {
        let embed: EmbeddingsResponse =
            serde_json::from_str(r#"{"data": [{"embedding": [0.1, 0.2]}]}"#).unwrap();
        assert_eq!(embed.data[0].embedding.len(), 2);

        let chat: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "ok"}}]}"#,
        )
        .unwrap();
        assert_eq!(chat.choices[0].message.content, "ok");
    }
}
