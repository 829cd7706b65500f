//! Inert providers for tests and offline composition.

use crate::{
    EmbedResponse, EmbeddingProvider, GenerateOptions, GenerateResponse, GenerationProvider,
    ProviderError,
};

const NOOP_DIM: usize = 16;

/// Stands in when no backend is configured. Generation always reports
/// unreachable so the pipeline takes its fallback path; embeddings are
/// deterministic hashes of the input so matcher geometry stays usable
/// in tests.
#[derive(Debug, Default)]
pub struct NoopProvider;

fn pseudo_embedding(text: &str) -> Vec<f32> {
    // Cheap seeded xorshift over the input bytes. Stable across runs.
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    for b in text.bytes() {
        state ^= b as u64;
        state = state.wrapping_mul(0x100_0000_01B3);
    }
    let mut out = Vec::with_capacity(NOOP_DIM);
    for _ in 0..NOOP_DIM {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.push(((state % 2000) as f32 / 1000.0) - 1.0);
    }
    out
}

#[async_trait::async_trait]
impl EmbeddingProvider for NoopProvider {
    fn model(&self) -> &str {
        "noop"
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: texts.iter().map(|t| pseudo_embedding(t)).collect(),
        })
    }
}

#[async_trait::async_trait]
impl GenerationProvider for NoopProvider {
    fn model(&self) -> &str {
        "noop"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<GenerateResponse, ProviderError> {
        Err(ProviderError::NotImplemented)
    }

    async fn heartbeat(&self) -> Result<(), ProviderError> {
        Err(ProviderError::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeddings_are_deterministic() {
        let p = NoopProvider;
        let a = p.embed(&["invoice".to_string()]).await.unwrap();
        let b = p.embed(&["invoice".to_string()]).await.unwrap();
        assert_eq!(a.vectors, b.vectors);
        assert_eq!(a.vectors[0].len(), NOOP_DIM);
    }

    #[tokio::test]
    async fn distinct_texts_get_distinct_vectors() {
        let p = NoopProvider;
        let resp = p
            .embed(&["alpha".to_string(), "omega".to_string()])
            .await
            .unwrap();
        assert_ne!(resp.vectors[0], resp.vectors[1]);
    }
}
