//! Vector index service: a narrow trait over two logical collections
//! (folder vectors, file vectors) with an owned process lifecycle.
//!
//! `ChromaIndex` drives a local Chroma-style server: idempotent
//! initialization under a mutex with an explicit state machine, a hard init
//! deadline that reverts state to allow retry, an optional spawned server
//! process, and a periodic health check that reinitializes transparently.
//! `MemoryIndex` is the offline/test stand-in with the same distance
//! semantics.

use crate::config::IndexConfig;
use crate::deadline::with_deadline;
use crate::error::IndexError;
use providers::chroma::{ChromaClient, QueryRequest, UpsertRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub meta: serde_json::Value,
}

/// Outcome of a batch write: malformed records are skipped and reported,
/// never fatal for the rest of the batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: usize,
    pub skipped: Vec<(String, String)>,
}

#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn ensure_ready(&self) -> Result<(), IndexError>;
    async fn health_check(&self) -> Result<(), IndexError>;
    async fn upsert_folders(&self, records: Vec<VectorRecord>) -> Result<BatchReport, IndexError>;
    async fn upsert_files(&self, records: Vec<VectorRecord>) -> Result<BatchReport, IndexError>;
    /// Nearest folder vectors: `(folder name, distance)`, nearest first.
    async fn query_folders(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>, IndexError>;
    async fn delete_files(&self, ids: Vec<String>) -> Result<(), IndexError>;
    async fn reset(&self) -> Result<(), IndexError>;
}

/// Drops malformed records (empty id, empty vector, non-finite values,
/// dimension mismatch within the batch) instead of aborting the batch.
fn split_valid(records: Vec<VectorRecord>) -> (Vec<VectorRecord>, Vec<(String, String)>) {
    let mut valid = Vec::with_capacity(records.len());
    let mut skipped = Vec::new();
    let mut dim: Option<usize> = None;
    for record in records {
        if record.id.trim().is_empty() {
            skipped.push((record.id, "empty id".to_string()));
            continue;
        }
        if record.vector.is_empty() {
            skipped.push((record.id, "empty vector".to_string()));
            continue;
        }
        if record.vector.iter().any(|v| !v.is_finite()) {
            skipped.push((record.id, "non-finite component".to_string()));
            continue;
        }
        match dim {
            Some(d) if d != record.vector.len() => {
                skipped.push((
                    record.id,
                    format!("dimension {} != {}", record.vector.len(), d),
                ));
                continue;
            }
            None => dim = Some(record.vector.len()),
            _ => {}
        }
        valid.push(record);
    }
    (valid, skipped)
}

// ---------------------------------------------------------------------------
// In-memory index
// ---------------------------------------------------------------------------

/// Brute-force index used when no server is configured and throughout the
/// tests. Distances match the server metric: squared L2.
#[derive(Default)]
pub struct MemoryIndex {
    folders: Mutex<HashMap<String, VectorRecord>>,
    files: Mutex<HashMap<String, VectorRecord>>,
    offline: AtomicBool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable index (tests only).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn file_count(&self) -> usize {
        self.files.lock().await.len()
    }

    fn check_online(&self) -> Result<(), IndexError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable("memory index offline".to_string()));
        }
        Ok(())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[async_trait::async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_ready(&self) -> Result<(), IndexError> {
        self.check_online()
    }

    async fn health_check(&self) -> Result<(), IndexError> {
        self.check_online()
    }

    async fn upsert_folders(&self, records: Vec<VectorRecord>) -> Result<BatchReport, IndexError> {
        self.check_online()?;
        let (valid, skipped) = split_valid(records);
        let written = valid.len();
        let mut folders = self.folders.lock().await;
        for record in valid {
            folders.insert(record.id.clone(), record);
        }
        Ok(BatchReport { written, skipped })
    }

    async fn upsert_files(&self, records: Vec<VectorRecord>) -> Result<BatchReport, IndexError> {
        self.check_online()?;
        let (valid, skipped) = split_valid(records);
        let written = valid.len();
        let mut files = self.files.lock().await;
        for record in valid {
            files.insert(record.id.clone(), record);
        }
        Ok(BatchReport { written, skipped })
    }

    async fn query_folders(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>, IndexError> {
        self.check_online()?;
        let folders = self.folders.lock().await;
        let mut scored: Vec<(String, f32)> = folders
            .values()
            .filter(|r| r.vector.len() == vector.len())
            .map(|r| {
                let name = r
                    .meta
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&r.id)
                    .to_string();
                (name, squared_l2(&r.vector, vector))
            })
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_files(&self, ids: Vec<String>) -> Result<(), IndexError> {
        self.check_online()?;
        let mut files = self.files.lock().await;
        for id in ids {
            files.remove(&id);
        }
        Ok(())
    }

    async fn reset(&self) -> Result<(), IndexError> {
        self.check_online()?;
        self.folders.lock().await.clear();
        self.files.lock().await.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chroma-backed index with process lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Initialized,
    Failed,
}

struct IndexState {
    lifecycle: Lifecycle,
    folders_id: Option<String>,
    files_id: Option<String>,
    child: Option<tokio::process::Child>,
}

pub struct ChromaIndex {
    client: ChromaClient,
    cfg: IndexConfig,
    state: Mutex<IndexState>,
}

impl ChromaIndex {
    pub fn new(client: ChromaClient, cfg: IndexConfig) -> Self {
        Self {
            client,
            cfg,
            state: Mutex::new(IndexState {
                lifecycle: Lifecycle::Uninitialized,
                folders_id: None,
                files_id: None,
                child: None,
            }),
        }
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        self.state.lock().await.lifecycle
    }

    /// Kills a spawned server process, if any, and returns to the
    /// uninitialized state.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(mut child) = state.child.take() {
            let _ = child.kill().await;
            info!("vector index process stopped");
        }
        state.lifecycle = Lifecycle::Uninitialized;
        state.folders_id = None;
        state.files_id = None;
    }

    /// Periodic health check; a failing heartbeat forces a transparent
    /// reinitialization on the spot.
    pub fn spawn_health_task(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let index = std::sync::Arc::clone(self);
        let interval = Duration::from_secs(index.cfg.health_interval_secs.max(5));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = index.health_check().await {
                    warn!(error = %e, "vector index health check failed");
                }
            }
        })
    }

    async fn ready_ids(&self) -> Result<(String, String), IndexError> {
        self.ensure_ready().await?;
        let state = self.state.lock().await;
        match (&state.folders_id, &state.files_id) {
            (Some(f), Some(d)) => Ok((f.clone(), d.clone())),
            _ => Err(IndexError::Unavailable(
                "collections missing after init".to_string(),
            )),
        }
    }

    async fn initialize(&self, state: &mut IndexState) -> Result<(), IndexError> {
        if self.client.heartbeat().await.is_err() {
            if let Some(command) = &self.cfg.spawn_command {
                if state.child.is_none() {
                    state.child = Some(spawn_index_process(command, self.cfg.data_dir.as_deref())?);
                    info!(command, "spawned local vector index process");
                }
            }
            // Poll until the server answers; the init deadline bounds this.
            loop {
                match self.client.heartbeat().await {
                    Ok(()) => break,
                    Err(_) => tokio::time::sleep(Duration::from_millis(250)).await,
                }
            }
        }

        // Squared L2 over normalized vectors keeps the score mapping
        // `1 - d/2` equal to clamped cosine similarity.
        let metadata = serde_json::json!({"hnsw:space": "l2"});
        let folders = self
            .client
            .get_or_create_collection(
                &format!("{}_folders", self.cfg.collection_prefix),
                Some(metadata.clone()),
            )
            .await?;
        let files = self
            .client
            .get_or_create_collection(
                &format!("{}_files", self.cfg.collection_prefix),
                Some(metadata),
            )
            .await?;
        state.folders_id = Some(folders.id);
        state.files_id = Some(files.id);
        Ok(())
    }

    async fn upsert_into(
        &self,
        collection_id: &str,
        records: Vec<VectorRecord>,
    ) -> Result<BatchReport, IndexError> {
        let (valid, skipped) = split_valid(records);
        for (id, reason) in &skipped {
            warn!(id, reason, "skipping malformed vector record");
        }
        if valid.is_empty() {
            return Ok(BatchReport {
                written: 0,
                skipped,
            });
        }
        let written = valid.len();
        let mut req = UpsertRequest::default();
        let mut metas = Vec::with_capacity(written);
        for record in valid {
            req.ids.push(record.id);
            req.embeddings.push(record.vector);
            metas.push(record.meta);
        }
        // Metadatas ride along so queries can answer with folder names.
        req.metadatas = Some(metas);
        self.client.upsert(collection_id, &req).await?;
        Ok(BatchReport { written, skipped })
    }
}

#[async_trait::async_trait]
impl VectorIndex for ChromaIndex {
    async fn ensure_ready(&self) -> Result<(), IndexError> {
        let mut state = self.state.lock().await;
        if state.lifecycle == Lifecycle::Initialized {
            return Ok(());
        }
        state.lifecycle = Lifecycle::Initializing;
        let budget = Duration::from_secs(self.cfg.init_timeout_secs);
        let outcome = with_deadline(
            budget,
            || IndexError::InitTimeout {
                budget_secs: budget.as_secs(),
            },
            self.initialize(&mut state),
        )
        .await;
        match outcome {
            Ok(()) => {
                state.lifecycle = Lifecycle::Initialized;
                info!("vector index initialized");
                Ok(())
            }
            Err(e) => {
                // Failed is observable, but the next caller may retry.
                state.lifecycle = Lifecycle::Failed;
                state.folders_id = None;
                state.files_id = None;
                Err(e)
            }
        }
    }

    async fn health_check(&self) -> Result<(), IndexError> {
        if self.client.heartbeat().await.is_ok() {
            return Ok(());
        }
        warn!("vector index heartbeat failed, forcing reinitialization");
        {
            let mut state = self.state.lock().await;
            state.lifecycle = Lifecycle::Uninitialized;
            state.folders_id = None;
            state.files_id = None;
        }
        self.ensure_ready().await
    }

    async fn upsert_folders(&self, records: Vec<VectorRecord>) -> Result<BatchReport, IndexError> {
        let (folders_id, _) = self.ready_ids().await?;
        self.upsert_into(&folders_id, records).await
    }

    async fn upsert_files(&self, records: Vec<VectorRecord>) -> Result<BatchReport, IndexError> {
        let (_, files_id) = self.ready_ids().await?;
        self.upsert_into(&files_id, records).await
    }

    async fn query_folders(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>, IndexError> {
        let (folders_id, _) = self.ready_ids().await?;
        let req = QueryRequest {
            query_embeddings: vec![vector.to_vec()],
            n_results: top_k,
            include: vec!["metadatas".to_string(), "distances".to_string()],
        };
        let resp = self.client.query(&folders_id, &req).await?;
        let ids = resp.ids.into_iter().next().unwrap_or_default();
        let distances = resp
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let metas = resp
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(ids.len());
        for (i, id) in ids.into_iter().enumerate() {
            let name = metas
                .get(i)
                .and_then(|m| m.as_ref())
                .and_then(|m| m.get("name"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or(id);
            let distance = distances.get(i).copied().unwrap_or(f32::MAX);
            out.push((name, distance));
        }
        debug!(hits = out.len(), "folder query complete");
        Ok(out)
    }

    async fn delete_files(&self, ids: Vec<String>) -> Result<(), IndexError> {
        let (_, files_id) = self.ready_ids().await?;
        self.client.delete(&files_id, ids).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), IndexError> {
        self.client
            .delete_collection(&format!("{}_folders", self.cfg.collection_prefix))
            .await?;
        self.client
            .delete_collection(&format!("{}_files", self.cfg.collection_prefix))
            .await?;
        let mut state = self.state.lock().await;
        state.lifecycle = Lifecycle::Uninitialized;
        state.folders_id = None;
        state.files_id = None;
        Ok(())
    }
}

fn spawn_index_process(
    command: &str,
    data_dir: Option<&str>,
) -> Result<tokio::process::Child, IndexError> {
    let rendered = match data_dir {
        Some(dir) => command.replace("{data_dir}", dir),
        None => command.to_string(),
    };
    let mut parts = rendered.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| IndexError::Unavailable("empty spawn command".to_string()))?;
    tokio::process::Command::new(program)
        .args(parts)
        .kill_on_drop(true)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| IndexError::Unavailable(format!("failed to spawn index process: {}", e)))
}
