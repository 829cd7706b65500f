//! Provider abstractions for the generation backend and the vector index.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod chroma;
pub mod noop;
pub mod ollama;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not implemented")]
    NotImplemented,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("backend returned status {status}: {body}")]
    BadStatus { status: u16, body: String },
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl ProviderError {
    /// Whether the failure is worth another attempt (rate limit, server
    /// error, or transport failure). 4xx responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RequestFailed(_) => true,
            ProviderError::BadStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
}

/// Per-call generation knobs. `None` leaves the backend default in place.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the backend to constrain output to a JSON object where supported.
    pub json: bool,
}

#[async_trait::async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Model identifier, part of every cache signature upstream.
    fn model(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GenerateResponse, ProviderError>;

    /// Cheap liveness probe used by the orchestrator preflight.
    async fn heartbeat(&self) -> Result<(), ProviderError>;
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    embeddings: HashMap<String, Arc<dyn EmbeddingProvider>>,
    generators: HashMap<String, Arc<dyn GenerationProvider>>,
    pub preferred_embedding: Option<String>,
    pub preferred_generation: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding(mut self, name: &str, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings.insert(name.to_string(), provider);
        self
    }

    pub fn with_generation(mut self, name: &str, provider: Arc<dyn GenerationProvider>) -> Self {
        self.generators.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_embedding(mut self, name: &str) -> Self {
        self.preferred_embedding = Some(name.to_string());
        self
    }

    pub fn set_preferred_generation(mut self, name: &str) -> Self {
        self.preferred_generation = Some(name.to_string());
        self
    }

    pub fn embedding(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_embedding.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no embedding provider configured".into())
            })?;
        self.embeddings
            .get(&key)
            .cloned()
            .ok_or(ProviderError::UnknownProvider(key))
    }

    pub fn generation(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn GenerationProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_generation.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no generation provider configured".into())
            })?;
        self.generators
            .get(&key)
            .cloned()
            .ok_or(ProviderError::UnknownProvider(key))
    }
}
