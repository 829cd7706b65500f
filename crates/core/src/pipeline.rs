//! Per-file orchestration: cache check, backend preflight, extraction with
//! one transient retry, backend analysis, best-effort folder refinement,
//! then a cache write that re-verifies the file did not change mid-flight.
//!
//! The external contract is "always return an `AnalysisResult`, never
//! fail": every degraded branch converges to the heuristic classifier.

use crate::analysis::{folder_signature, AnalysisClient};
use crate::cache::BoundedCache;
use crate::config::AppConfig;
use crate::error::ExtractError;
use crate::extract::{self, Capabilities};
use crate::fallback;
use crate::matcher::FolderMatcher;
use crate::models::{
    AnalysisResult, ExtractionMethod, FileHandle, SmartFolder, WriteBackRecord,
};
use crate::normalize::excerpt;
use crate::writeback::WriteBackQueue;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Part of every cache signature; bump on result-schema changes so stale
/// entries never serve.
const SCHEMA_VERSION: &str = "analysis-v1";

pub struct Orchestrator {
    cfg: AppConfig,
    caps: Capabilities,
    analysis: AnalysisClient,
    matcher: Arc<FolderMatcher>,
    writeback: Arc<WriteBackQueue>,
    result_cache: Mutex<BoundedCache<String, AnalysisResult>>,
}

impl Orchestrator {
    pub fn new(
        cfg: AppConfig,
        analysis: AnalysisClient,
        matcher: Arc<FolderMatcher>,
        writeback: Arc<WriteBackQueue>,
    ) -> Self {
        let result_cache = BoundedCache::new(
            cfg.caches.analysis_capacity,
            Some(Duration::from_secs(cfg.caches.analysis_ttl_secs)),
        );
        Self {
            cfg,
            caps: Capabilities::detect(),
            analysis,
            matcher,
            writeback,
            result_cache: Mutex::new(result_cache),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Backend liveness, with the preflight retry budget.
    pub async fn preflight(&self) -> bool {
        self.analysis.preflight().await
    }

    /// Analyzes one file. Never fails; every degraded branch lands on the
    /// heuristic classifier with an explanatory `error` field.
    pub async fn analyze_file(&self, path: &Path, folders: &[SmartFolder]) -> AnalysisResult {
        let handle = match FileHandle::snapshot(path).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not stat file");
                return self.heuristic_for_path(
                    path,
                    folders,
                    Some(format!("file not readable: {}", e)),
                );
            }
        };

        // Media never goes through extraction or the backend.
        if extract::is_media_extension(&handle.extension) {
            debug!(file = %handle.file_name(), "media file, resolving by name");
            return self.heuristic(&handle, folders, ExtractionMethod::FilenameOnly, None);
        }

        let signature = self.cache_signature(&handle, folders);
        if let Some(hit) = self.result_cache.lock().await.get(&signature) {
            debug!(file = %handle.file_name(), "analysis cache hit");
            return hit;
        }

        // Probe backend liveness before paying for extraction.
        if !self.analysis.preflight().await {
            info!(file = %handle.file_name(), "backend unreachable, using filename heuristics");
            return self.heuristic(
                &handle,
                folders,
                ExtractionMethod::FilenameOnly,
                Some("backend unreachable; categorized by filename".to_string()),
            );
        }

        let extracted = match self.extract_with_retry(&handle).await {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!(file = %handle.file_name(), error = %e, "extraction failed");
                return self.heuristic(
                    &handle,
                    folders,
                    ExtractionMethod::FilenameOnly,
                    Some(format!("{}; {}", e, e.suggestion())),
                );
            }
        };

        if extracted.text.trim().is_empty() {
            debug!(file = %handle.file_name(), "no extractable text");
            return self.heuristic(
                &handle,
                folders,
                extracted.method,
                Some("no extractable text content".to_string()),
            );
        }

        let method = extracted.method;
        let mut result = match self
            .analysis
            .analyze(&extracted.text, &handle, folders, method)
            .await
        {
            Ok(result) => result,
            Err(failure) => {
                info!(file = %handle.file_name(), error = %failure, "backend analysis failed, using heuristics");
                return self.heuristic(&handle, folders, method, Some(failure.to_string()));
            }
        };

        // Build the refinement basis, then release the extracted text to
        // bound peak memory.
        let refine_basis = refine_basis(&result, &extracted.text, &self.cfg);
        drop(extracted);

        if !folders.is_empty() {
            self.refine_and_record(&handle, &mut result, &refine_basis)
                .await;
        }

        // Commit to cache only if the file is still the one we analyzed.
        if handle.still_matches().await {
            self.result_cache
                .lock()
                .await
                .insert(signature, result.clone());
        } else {
            debug!(file = %handle.file_name(), "file changed during analysis, result not cached");
        }
        result
    }

    /// Independent per-file pipelines with a caller-supplied concurrency
    /// bound. No cross-file ordering guarantee.
    pub async fn analyze_many(
        &self,
        paths: &[PathBuf],
        folders: &[SmartFolder],
        concurrency: usize,
    ) -> Vec<(PathBuf, AnalysisResult)> {
        stream::iter(paths.iter().cloned())
            .map(|path| async move {
                let result = self.analyze_file(&path, folders).await;
                (path, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Folder refinement is an enhancement: failures are logged and
    /// swallowed, the backend's own category stands.
    async fn refine_and_record(
        &self,
        handle: &FileHandle,
        result: &mut AnalysisResult,
        refine_basis: &str,
    ) {
        match self.matcher.match_folders(refine_basis).await {
            Ok(matches) if !matches.is_empty() => {
                let refined = self.matcher.refine_category(&result.category, &matches);
                if refined != result.category {
                    debug!(
                        from = %result.category,
                        to = %refined,
                        score = matches[0].score,
                        "category overridden by folder match"
                    );
                    result.category = refined;
                }
                result.folder_matches = matches;
            }
            Ok(_) => {}
            Err(e) => debug!(file = %handle.file_name(), error = %e, "folder refinement skipped"),
        }

        // Defer file-vector persistence to the write-back queue; the
        // embedding is almost always already cached from the match above.
        if let Ok(vector) = self.matcher.embed_cached(refine_basis).await {
            let id = blake3::hash(handle.path.to_string_lossy().as_bytes())
                .to_hex()
                .to_string();
            self.writeback
                .enqueue(WriteBackRecord {
                    id,
                    vector,
                    model: self.matcher.embed_model().to_string(),
                    meta: serde_json::json!({
                        "path": handle.path.to_string_lossy(),
                        "category": result.category,
                    }),
                    updated_at: chrono::Utc::now().timestamp(),
                })
                .await;
        }
    }

    async fn extract_with_retry(
        &self,
        handle: &FileHandle,
    ) -> Result<crate::models::ExtractedText, ExtractError> {
        match extract::extract(handle, &self.cfg.extraction, self.caps).await {
            // One retry after a short delay for transient I/O faults
            // (file locks, racing writers).
            Err(ExtractError::Io(e)) => {
                debug!(file = %handle.file_name(), error = %e, "transient extraction failure, retrying once");
                tokio::time::sleep(Duration::from_millis(self.cfg.extraction.retry_delay_ms)).await;
                extract::extract(handle, &self.cfg.extraction, self.caps).await
            }
            other => other,
        }
    }

    fn heuristic(
        &self,
        handle: &FileHandle,
        folders: &[SmartFolder],
        method: ExtractionMethod,
        error: Option<String>,
    ) -> AnalysisResult {
        let mut result = fallback::classify_by_name(
            handle.file_name(),
            &handle.extension,
            folders,
            self.cfg.matching.min_heuristic_score,
        );
        result.extraction_method = method;
        result.date = Some(handle.mtime_date());
        result.error = error;
        result
    }

    fn heuristic_for_path(
        &self,
        path: &Path,
        folders: &[SmartFolder],
        error: Option<String>,
    ) -> AnalysisResult {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let mut result = fallback::classify_by_name(
            file_name,
            &extension,
            folders,
            self.cfg.matching.min_heuristic_score,
        );
        result.error = error;
        result
    }

    /// Signature = schema tag + model + canonical folder set + path + size
    /// + mtime. A folder-set or model change never serves a stale result;
    /// neither does an on-disk edit.
    fn cache_signature(&self, handle: &FileHandle, folders: &[SmartFolder]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(SCHEMA_VERSION.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.analysis.model().as_bytes());
        hasher.update(&[0]);
        hasher.update(folder_signature(folders).as_bytes());
        hasher.update(&[0]);
        hasher.update(handle.path.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(&handle.size.to_le_bytes());
        hasher.update(&handle.mtime.to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

fn refine_basis(result: &AnalysisResult, text: &str, cfg: &AppConfig) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(3);
    if let Some(purpose) = &result.purpose {
        parts.push(purpose.clone());
    }
    if !result.keywords.is_empty() {
        parts.push(result.keywords.join(" "));
    }
    parts.push(excerpt(text, cfg.matching.refine_excerpt_chars));
    parts.join("\n")
}
