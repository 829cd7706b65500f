//! Application configuration. Every section has serde defaults so partial
//! config files work.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub index: IndexConfig,
    pub extraction: ExtractionConfig,
    pub caches: CacheConfig,
    pub matching: MatchingConfig,
    pub writeback: WriteBackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Provider name in the registry ("ollama" or "noop").
    pub provider: String,
    pub host: String,
    pub generate_model: String,
    pub embed_model: String,
    /// Per-request transport timeout inside the provider.
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Hard deadline for one classification call, retries included.
    pub generate_budget_secs: u64,
    /// Hard deadline for one embedding call.
    pub embed_budget_secs: u64,
    /// Preflight probe attempts before declaring the backend unreachable.
    pub preflight_attempts: u32,
    pub preflight_delay_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            host: "http://127.0.0.1:11434".to_string(),
            generate_model: "llama3.2".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            timeout_secs: 60,
            max_retries: 2,
            generate_budget_secs: 90,
            embed_budget_secs: 20,
            preflight_attempts: 2,
            preflight_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Base URL of the vector-index server. `None` selects the in-memory
    /// index (no persistence across runs).
    pub url: Option<String>,
    pub collection_prefix: String,
    pub init_timeout_secs: u64,
    pub health_interval_secs: u64,
    /// Command line used to spawn a local index process when the server is
    /// not already running, e.g. `chroma run --path {data_dir} --port 8000`.
    pub spawn_command: Option<String>,
    pub data_dir: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: None,
            collection_prefix: "smartsort".to_string(),
            init_timeout_secs: 20,
            health_interval_secs: 60,
            spawn_command: None,
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Precheck limit; larger files fail before any parse-time allocation.
    pub max_file_bytes: u64,
    /// Final cap applied on every extractor return path.
    pub max_text_chars: usize,
    pub text_timeout_secs: u64,
    /// Raster/OCR and large-spreadsheet paths get this larger budget.
    pub heavy_timeout_secs: u64,
    pub max_sheet_rows: usize,
    pub max_sheets: usize,
    pub max_archive_entries: usize,
    /// Delay before the single transient-failure retry.
    pub retry_delay_ms: u64,
    pub ocr: OcrConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 50 * 1024 * 1024,
            max_text_chars: 8_000,
            text_timeout_secs: 10,
            heavy_timeout_secs: 45,
            max_sheet_rows: 200,
            max_sheets: 10,
            max_archive_entries: 100,
            retry_delay_ms: 300,
            ocr: OcrConfig::default(),
        }
    }
}

/// OCR runs under stricter caps than plain extraction: bounded raster
/// dimensions and a lower size ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub max_file_bytes: u64,
    pub max_dimension: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            max_dimension: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub analysis_capacity: usize,
    pub analysis_ttl_secs: u64,
    pub embedding_capacity: usize,
    pub query_capacity: usize,
    pub query_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            analysis_capacity: 256,
            analysis_ttl_secs: 3_600,
            embedding_capacity: 512,
            query_capacity: 128,
            query_ttl_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub top_k: usize,
    /// The top candidate overrides the backend category only at or above
    /// this score.
    pub override_threshold: f32,
    /// Minimum weighted-sum score for a heuristic folder match.
    pub min_heuristic_score: f32,
    /// Bounded concurrency for folder-vector rebuilds.
    pub embed_concurrency: usize,
    /// Slice of extracted text appended to the refinement query.
    pub refine_excerpt_chars: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            override_threshold: 0.55,
            min_heuristic_score: 5.0,
            embed_concurrency: 4,
            refine_excerpt_chars: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBackConfig {
    pub max_batch: usize,
    /// Queue length that triggers an early flush.
    pub trigger_len: usize,
    pub flush_interval_secs: u64,
    /// Delay before retrying after the index reported offline.
    pub retry_delay_secs: u64,
}

impl Default for WriteBackConfig {
    fn default() -> Self {
        Self {
            max_batch: 32,
            trigger_len: 16,
            flush_interval_secs: 15,
            retry_delay_secs: 5,
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert!(cfg.extraction.max_text_chars > 0);
        assert!(cfg.matching.override_threshold > 0.0 && cfg.matching.override_threshold < 1.0);
        assert!(cfg.caches.analysis_capacity > 0);
    }
}
