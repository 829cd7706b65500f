//! Client for an Ollama-style local backend (`/api/generate`, `/api/embed`).

use crate::{
    EmbedResponse, EmbeddingProvider, GenerateOptions, GenerateResponse, GenerationProvider,
    ProviderError,
};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub generate_model: String,
    pub embed_model: String,
    /// Per-request budget; the pipeline wraps calls in its own deadline too.
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            generate_model: "llama3.2".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

#[derive(Clone)]
pub struct OllamaProvider {
    client: Client,
    cfg: Arc<OllamaConfig>,
}

impl OllamaProvider {
    pub fn new(cfg: OllamaConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            cfg: Arc::new(cfg),
        })
    }

    /// POST with retry on transient failures. 4xx (except 429) fails fast;
    /// 429/5xx and transport errors back off and retry.
    async fn post_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let mut last_err = None;
        for attempt in 0..=self.cfg.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500u64 * (1u64 << (attempt - 1).min(4)));
                tokio::time::sleep(delay).await;
                debug!(url, attempt, "retrying backend call");
            }
            match self.client.post(url).json(body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json()
                            .await
                            .map_err(|e| ProviderError::RequestFailed(e.to_string()));
                    }
                    let body_text = resp.text().await.unwrap_or_default();
                    let err = ProviderError::BadStatus {
                        status: status.as_u16(),
                        body: body_text,
                    };
                    if !err.is_transient() {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(e) => {
                    last_err = Some(ProviderError::RequestFailed(format!(
                        "connection to {} failed: {}",
                        self.cfg.base_url, e
                    )));
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| ProviderError::RequestFailed("retries exhausted".to_string())))
    }
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait::async_trait]
impl GenerationProvider for OllamaProvider {
    fn model(&self) -> &str {
        &self.cfg.generate_model
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GenerateResponse, ProviderError> {
        let mut body = serde_json::json!({
            "model": self.cfg.generate_model,
            "prompt": prompt,
            "stream": false,
        });
        if options.json {
            body["format"] = serde_json::json!("json");
        }
        let mut opts = serde_json::Map::new();
        if let Some(t) = options.temperature {
            opts.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(n) = options.max_tokens {
            opts.insert("num_predict".into(), serde_json::json!(n));
        }
        if !opts.is_empty() {
            body["options"] = serde_json::Value::Object(opts);
        }

        let url = format!("{}/api/generate", self.cfg.base_url);
        let json = self.post_with_retry(&url, &body).await?;
        let parsed: OllamaGenerateResponse = serde_json::from_value(json)
            .map_err(|e| ProviderError::RequestFailed(format!("malformed response: {}", e)))?;
        Ok(GenerateResponse {
            response: parsed.response,
        })
    }

    async fn heartbeat(&self) -> Result<(), ProviderError> {
        let url = format!("{}/api/version", self.cfg.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| {
                ProviderError::RequestFailed(format!(
                    "backend not reachable at {}: {}",
                    self.cfg.base_url, e
                ))
            })?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::BadStatus {
                status: resp.status().as_u16(),
                body: String::new(),
            })
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model(&self) -> &str {
        &self.cfg.embed_model
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        let body = serde_json::json!({
            "model": self.cfg.embed_model,
            "input": texts,
        });
        let url = format!("{}/api/embed", self.cfg.base_url);
        let json = self.post_with_retry(&url, &body).await?;
        let parsed: OllamaEmbedResponse = serde_json::from_value(json)
            .map_err(|e| ProviderError::RequestFailed(format!("malformed response: {}", e)))?;
        Ok(EmbedResponse {
            vectors: parsed.embeddings,
        })
    }
}
