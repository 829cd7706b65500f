//! REST client for a Chroma-style local vector index.
//!
//! The index process exposes collections over HTTP; this client keeps the
//! request/response surface narrow: heartbeat, get-or-create collection,
//! upsert, query, delete. Lifecycle (startup, health, reinit) lives upstream.

use crate::ProviderError;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct ChromaConfig {
    pub url: String,
}

#[derive(Clone)]
pub struct ChromaClient {
    client: Client,
    cfg: ChromaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default, Serialize)]
pub struct UpsertRequest {
    pub ids: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadatas: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct QueryRequest {
    pub query_embeddings: Vec<Vec<f32>>,
    pub n_results: usize,
    pub include: Vec<String>,
}

/// Chroma returns one inner list per query embedding.
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    pub ids: Vec<Vec<String>>,
    #[serde(default)]
    pub distances: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    pub metadatas: Option<Vec<Vec<Option<serde_json::Value>>>>,
}

#[derive(Debug, Deserialize)]
pub struct GetResponse {
    pub ids: Vec<String>,
}

impl ChromaClient {
    pub fn new(cfg: ChromaConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.cfg.url
    }

    pub async fn heartbeat(&self) -> Result<(), ProviderError> {
        let url = format!("{}/api/v1/heartbeat", self.cfg.url);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| {
                ProviderError::RequestFailed(format!(
                    "index not reachable at {}: {}",
                    self.cfg.url, e
                ))
            })?;
        check_status(resp).await.map(|_| ())
    }

    pub async fn get_or_create_collection(
        &self,
        name: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<CollectionInfo, ProviderError> {
        #[derive(Serialize)]
        struct CreateCollection<'a> {
            name: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            metadata: Option<serde_json::Value>,
            get_or_create: bool,
        }
        let url = format!("{}/api/v1/collections", self.cfg.url);
        let body = CreateCollection {
            name,
            metadata,
            get_or_create: true,
        };
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = check_status(resp).await?;
        resp.json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))
    }

    pub async fn upsert(
        &self,
        collection_id: &str,
        req: &UpsertRequest,
    ) -> Result<(), ProviderError> {
        let url = format!(
            "{}/api/v1/collections/{}/upsert",
            self.cfg.url, collection_id
        );
        let resp = self
            .client
            .post(url)
            .json(req)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        check_status(resp).await.map(|_| ())
    }

    pub async fn query(
        &self,
        collection_id: &str,
        req: &QueryRequest,
    ) -> Result<QueryResponse, ProviderError> {
        let url = format!(
            "{}/api/v1/collections/{}/query",
            self.cfg.url, collection_id
        );
        let resp = self
            .client
            .post(url)
            .json(req)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = check_status(resp).await?;
        resp.json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))
    }

    pub async fn get(
        &self,
        collection_id: &str,
        ids: Vec<String>,
    ) -> Result<GetResponse, ProviderError> {
        #[derive(Serialize)]
        struct GetRequest {
            ids: Vec<String>,
        }
        let url = format!("{}/api/v1/collections/{}/get", self.cfg.url, collection_id);
        let resp = self
            .client
            .post(url)
            .json(&GetRequest { ids })
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = check_status(resp).await?;
        resp.json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))
    }

    pub async fn delete(
        &self,
        collection_id: &str,
        ids: Vec<String>,
    ) -> Result<(), ProviderError> {
        #[derive(Serialize)]
        struct DeleteRequest {
            ids: Vec<String>,
        }
        let url = format!(
            "{}/api/v1/collections/{}/delete",
            self.cfg.url, collection_id
        );
        let resp = self
            .client
            .post(url)
            .json(&DeleteRequest { ids })
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        check_status(resp).await.map(|_| ())
    }

    pub async fn delete_collection(&self, name: &str) -> Result<(), ProviderError> {
        let url = format!("{}/api/v1/collections/{}", self.cfg.url, name);
        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        check_status(resp).await.map(|_| ())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
    Err(ProviderError::BadStatus {
        status: status.as_u16(),
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}
