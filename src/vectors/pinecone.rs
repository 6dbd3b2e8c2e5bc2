//! Pinecone data-plane client
//!
//! Speaks the index REST API directly; the index host comes from the Pinecone
//! console (`<index>-<project>.svc.<region>.pinecone.io`).

use super::backend::{RemoteError, RemoteResult, RemoteVectorBackend};
use super::types::{Metadata, MetadataFilter, MetadataValue, ScoredRecord, VectorRecord};
use crate::config::VectorStoreConfig;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

pub struct PineconeBackend {
    client: Client,
    host: String,
    api_key: String,
    namespace: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Deserialize)]
struct Match {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, FetchedVector>,
}

#[derive(Deserialize)]
struct FetchedVector {
    id: String,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

fn convert_metadata(raw: BTreeMap<String, Value>) -> Metadata {
    raw.into_iter()
        .filter_map(|(k, v)| MetadataValue::from_json(&v).map(|v| (k, v)))
        .collect()
}

/// Accept bare hosts as well as full URLs
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

impl PineconeBackend {
    pub fn new(
        host: &str,
        api_key: &str,
        namespace: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host: normalize_host(host),
            api_key: api_key.to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
            timeout,
        })
    }

    /// `None` when the config carries no credentials
    pub fn from_config(config: &VectorStoreConfig) -> Result<Option<Self>> {
        let Some((api_key, host)) = config.remote_credentials() else {
            return Ok(None);
        };

        Self::new(host, api_key, config.namespace.clone(), config.request_timeout()).map(Some)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    fn body(&self, mut body: Value) -> Value {
        if let (Some(ns), Some(fields)) = (&self.namespace, body.as_object_mut()) {
            fields.insert("namespace".to_string(), json!(ns));
        }
        body
    }

    fn classify(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Connectivity(err.to_string())
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let response = request
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", "2024-07")
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), error_text));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> RemoteResult<T> {
        let request = self.client.post(self.url(path)).json(&self.body(body));
        self.send(request).await
    }
}

#[async_trait]
impl RemoteVectorBackend for PineconeBackend {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn health_check(&self) -> RemoteResult<()> {
        let _: Value = self.post("/describe_index_stats", json!({})).await?;
        Ok(())
    }

    async fn upsert(&self, record: &VectorRecord) -> RemoteResult<()> {
        let mut vector = json!({
            "id": record.id,
            "values": record.embedding,
        });
        if !record.metadata.is_empty() {
            vector["metadata"] = json!(record.metadata);
        }

        let _: Value = self.post("/vectors/upsert", json!({ "vectors": [vector] })).await?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RemoteResult<Vec<ScoredRecord>> {
        let mut body = json!({
            "vector": embedding,
            "topK": top_k,
            "includeValues": true,
            "includeMetadata": true,
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter.to_pinecone();
        }

        let response: QueryResponse = self.post("/query", body).await?;
        Ok(response
            .matches
            .into_iter()
            .map(|m| ScoredRecord {
                record: VectorRecord {
                    id: m.id,
                    embedding: m.values,
                    metadata: convert_metadata(m.metadata),
                },
                score: m.score,
            })
            .collect())
    }

    async fn delete(&self, id: &str) -> RemoteResult<()> {
        let _: Value = self.post("/vectors/delete", json!({ "ids": [id] })).await?;
        Ok(())
    }

    async fn fetch(&self, id: &str) -> RemoteResult<Option<VectorRecord>> {
        let mut url = format!("{}?ids={}", self.url("/vectors/fetch"), urlencoding::encode(id));
        if let Some(ns) = &self.namespace {
            url.push_str(&format!("&namespace={}", urlencoding::encode(ns)));
        }

        let response: FetchResponse = self.send(self.client.get(url)).await?;
        Ok(response.vectors.into_values().find(|v| v.id == id).map(|v| VectorRecord {
            id: v.id,
            embedding: v.values,
            metadata: convert_metadata(v.metadata),
        }))
    }
}
