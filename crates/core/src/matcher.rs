//! Folder matcher: turns text into a cached embedding and ranks the
//! configured folders against the live folder-vector index.

use crate::cache::BoundedCache;
use crate::config::MatchingConfig;
use crate::deadline::with_deadline;
use crate::error::AnalysisError;
use crate::index::{BatchReport, VectorIndex, VectorRecord};
use crate::models::{FolderMatch, SmartFolder};
use futures::stream::{self, StreamExt};
use providers::EmbeddingProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct FolderMatcher {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    cfg: MatchingConfig,
    embed_budget: Duration,
    embed_cache: Mutex<BoundedCache<String, Vec<f32>>>,
    query_cache: Mutex<BoundedCache<String, Vec<FolderMatch>>>,
}

impl FolderMatcher {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        cfg: MatchingConfig,
        embed_budget: Duration,
        embed_capacity: usize,
        query_capacity: usize,
        query_ttl: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            cfg,
            embed_budget,
            embed_cache: Mutex::new(BoundedCache::new(embed_capacity, None)),
            query_cache: Mutex::new(BoundedCache::new(query_capacity, Some(query_ttl))),
        }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embed_model(&self) -> &str {
        self.embedder.model()
    }

    /// Embeds `text`, memoized by (text, model). Vectors are L2-normalized
    /// so squared-L2 distances stay within [0, 4] and the score mapping is
    /// calibrated.
    pub async fn embed_cached(&self, text: &str) -> Result<Vec<f32>, AnalysisError> {
        let key = hash_key(&[self.embedder.model(), text]);
        if let Some(hit) = self.embed_cache.lock().await.get(&key) {
            return Ok(hit);
        }
        let budget = self.embed_budget;
        let resp = with_deadline(
            budget,
            || AnalysisError::Timeout {
                stage: "embedding",
                budget_secs: budget.as_secs(),
            },
            async {
                self.embedder
                    .embed(&[text.to_string()])
                    .await
                    .map_err(AnalysisError::from)
            },
        )
        .await?;
        let mut vector = resp
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::Parse("empty embedding response".to_string()))?;
        normalize_l2(&mut vector);
        self.embed_cache.lock().await.insert(key, vector.clone());
        Ok(vector)
    }

    /// Rebuilds the folder-vector collection from the configured folders.
    /// Embedding calls run with small bounded concurrency; a folder whose
    /// embedding fails is skipped with a warning, not fatal for the rest.
    pub async fn rebuild_folders(
        &self,
        folders: &[SmartFolder],
    ) -> Result<BatchReport, AnalysisError> {
        let inputs: Vec<(String, String)> = folders
            .iter()
            .map(|f| (f.name.clone(), folder_document(f)))
            .collect();

        let results: Vec<Result<VectorRecord, (String, AnalysisError)>> = stream::iter(inputs)
            .map(|(name, doc)| async move {
                match self.embed_cached(&doc).await {
                    Ok(vector) => Ok(VectorRecord {
                        id: name.clone(),
                        vector,
                        meta: serde_json::json!({"name": name}),
                    }),
                    Err(e) => Err((name, e)),
                }
            })
            .buffer_unordered(self.cfg.embed_concurrency.max(1))
            .collect()
            .await;

        let mut records = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(record) => records.push(record),
                Err((name, e)) => warn!(folder = %name, error = %e, "folder embedding failed"),
            }
        }
        let report = self.index.upsert_folders(records).await?;
        // Any folder-vector write invalidates cached query results.
        self.query_cache.lock().await.clear();
        debug!(written = report.written, "folder vectors rebuilt");
        Ok(report)
    }

    /// Ranked candidates for `text`, scores in [0, 1], sorted descending.
    /// Results are cached briefly, keyed by (model, top-k, text), so a
    /// changed file naturally queries under a new key.
    pub async fn match_folders(&self, text: &str) -> Result<Vec<FolderMatch>, AnalysisError> {
        let top_k = self.cfg.top_k;
        let key = hash_key(&[self.embedder.model(), &top_k.to_string(), text]);
        if let Some(hit) = self.query_cache.lock().await.get(&key) {
            return Ok(hit);
        }
        let embedding = self.embed_cached(text).await?;
        let hits = self.index.query_folders(&embedding, top_k).await?;
        let mut matches: Vec<FolderMatch> = hits
            .into_iter()
            .map(|(folder, distance)| FolderMatch {
                folder,
                score: score_from_distance(distance),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.query_cache.lock().await.insert(key, matches.clone());
        Ok(matches)
    }

    /// The top candidate overrides the backend category only at or above
    /// the configured threshold; below it the original stands.
    pub fn refine_category(&self, original: &str, matches: &[FolderMatch]) -> String {
        match matches.first() {
            Some(top) if top.score >= self.cfg.override_threshold => top.folder.clone(),
            _ => original.to_string(),
        }
    }
}

/// `max(0, 1 − d/2)`: monotonic, floor-clamped. With unit vectors and
/// squared-L2 distances this equals clamped cosine similarity.
pub fn score_from_distance(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

fn normalize_l2(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn folder_document(folder: &SmartFolder) -> String {
    let mut doc = folder.name.clone();
    if !folder.description.is_empty() {
        doc.push_str(". ");
        doc.push_str(&folder.description);
    }
    if !folder.keywords.is_empty() {
        doc.push_str(". Keywords: ");
        doc.push_str(&folder.keywords.join(", "));
    }
    if !folder.tags.is_empty() {
        doc.push_str(". Tags: ");
        doc.push_str(&folder.tags.join(", "));
    }
    doc
}

fn hash_key(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use providers::{EmbedResponse, ProviderError};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Embedder with fixed geometry per known phrase, so ranking is exact.
    struct FixtureEmbedder {
        calls: AtomicU32,
        vectors: HashMap<&'static str, Vec<f32>>,
        fallback: Vec<f32>,
    }

    impl FixtureEmbedder {
        fn new() -> Self {
            let mut vectors = HashMap::new();
            vectors.insert("finance doc", vec![1.0, 0.1, 0.0]);
            vectors.insert("Finance. bills and invoices", vec![1.0, 0.0, 0.0]);
            vectors.insert("Vacation. trip photos", vec![0.0, 1.0, 0.0]);
            Self {
                calls: AtomicU32::new(0),
                vectors,
                fallback: vec![0.0, 0.0, 1.0],
            }
        }
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for FixtureEmbedder {
        fn model(&self) -> &str {
            "fixture"
        }

        async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EmbedResponse {
                vectors: texts
                    .iter()
                    .map(|t| {
                        self.vectors
                            .get(t.as_str())
                            .cloned()
                            .unwrap_or_else(|| self.fallback.clone())
                    })
                    .collect(),
            })
        }
    }

    fn folders() -> Vec<SmartFolder> {
        vec![
            SmartFolder {
                name: "Finance".into(),
                description: "bills and invoices".into(),
                path: String::new(),
                keywords: vec![],
                tags: vec![],
            },
            SmartFolder {
                name: "Vacation".into(),
                description: "trip photos".into(),
                path: String::new(),
                keywords: vec![],
                tags: vec![],
            },
        ]
    }

    fn matcher(embedder: Arc<FixtureEmbedder>) -> FolderMatcher {
        FolderMatcher::new(
            embedder,
            Arc::new(MemoryIndex::new()),
            MatchingConfig::default(),
            Duration::from_secs(5),
            64,
            16,
            Duration::from_secs(30),
        )
    }

    #[test]
    fn score_mapping_is_bounded_and_monotonic() {
        assert_eq!(score_from_distance(0.0), 1.0);
        assert_eq!(score_from_distance(2.0), 0.0);
        assert_eq!(score_from_distance(10.0), 0.0);
        assert!(score_from_distance(0.5) > score_from_distance(1.0));
        for d in [0.0f32, 0.3, 1.0, 1.9, 2.5] {
            let s = score_from_distance(d);
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[tokio::test]
    async fn matches_are_sorted_descending_and_in_range() {
        let embedder = Arc::new(FixtureEmbedder::new());
        let m = matcher(embedder);
        m.rebuild_folders(&folders()).await.unwrap();

        let matches = m.match_folders("finance doc").await.unwrap();
        assert_eq!(matches[0].folder, "Finance");
        for pair in matches.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for fm in &matches {
            assert!((0.0..=1.0).contains(&fm.score));
        }
    }

    #[tokio::test]
    async fn strong_match_overrides_weak_keeps() {
        let embedder = Arc::new(FixtureEmbedder::new());
        let m = matcher(embedder);
        m.rebuild_folders(&folders()).await.unwrap();

        let matches = m.match_folders("finance doc").await.unwrap();
        assert!(matches[0].score >= 0.55);
        assert_eq!(m.refine_category("Documents", &matches), "Finance");

        let weak = vec![FolderMatch {
            folder: "Finance".into(),
            score: 0.2,
        }];
        assert_eq!(m.refine_category("Documents", &weak), "Documents");
        assert_eq!(m.refine_category("Documents", &[]), "Documents");
    }

    #[tokio::test]
    async fn embeddings_are_cached_by_text() {
        let embedder = Arc::new(FixtureEmbedder::new());
        let m = matcher(embedder.clone());
        let a = m.embed_cached("finance doc").await.unwrap();
        let b = m.embed_cached("finance doc").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rebuild_invalidates_query_cache() {
        let embedder = Arc::new(FixtureEmbedder::new());
        let m = matcher(embedder.clone());
        m.rebuild_folders(&folders()).await.unwrap();
        let first = m.match_folders("finance doc").await.unwrap();
        assert_eq!(first[0].folder, "Finance");

        // Rebuild with only Vacation; the stale top hit must not survive.
        m.rebuild_folders(&folders()[1..]).await.unwrap();
        let second = m.match_folders("finance doc").await.unwrap();
        assert!(second.iter().any(|f| f.folder == "Vacation"));
    }

    #[tokio::test]
    async fn embedded_vectors_are_normalized() {
        let embedder = Arc::new(FixtureEmbedder::new());
        let m = matcher(embedder);
        let v = m.embed_cached("finance doc").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
