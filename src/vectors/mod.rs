//! Vector Store - embeddings behind a remote backend with a local safety net
//!
//! Calls go to the remote backend when one is configured. Classified remote
//! failures move the store into degraded mode and the call is retried once
//! against the in-process fallback index, so callers never branch on
//! configuration or outages.

pub mod backend;
pub mod local;
pub mod pinecone;
pub mod types;

pub use backend::{RemoteError, RemoteResult, RemoteVectorBackend};
pub use local::{LocalIndex, cosine_similarity};
pub use pinecone::PineconeBackend;
pub use types::{Metadata, MetadataFilter, MetadataValue, ScoredRecord, VectorRecord};

use crate::config::VectorStoreConfig;
use crate::error::{Result, StoreError};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which backend is serving calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    Unconfigured,
    RemoteActive,
    RemoteDegraded,
    LocalOnly,
}

#[derive(Debug, Clone)]
pub struct VectorStoreOptions {
    /// Upper bound on every remote call
    pub request_timeout: Duration,
    /// When false, remote failures surface as `VectorStoreUnavailable`
    pub fallback_enabled: bool,
    /// Also apply successful remote writes to the fallback index
    pub mirror_local: bool,
    /// Background probe that restores `RemoteActive` while degraded
    pub health_probe_interval: Option<Duration>,
}

impl Default for VectorStoreOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            fallback_enabled: true,
            mirror_local: false,
            health_probe_interval: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorStoreStats {
    pub state: BackendState,
    pub backend: Option<String>,
    pub fallback_count: u64,
    pub local_records: usize,
    pub dimension: Option<usize>,
}

/// Backend state shared with the health probe task
struct StateCell(Mutex<BackendState>);

impl StateCell {
    fn new(state: BackendState) -> Self {
        Self(Mutex::new(state))
    }

    fn get(&self) -> BackendState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to`, returning the previous state
    fn swap(&self, to: BackendState) -> BackendState {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, to)
    }

    fn recover(&self, backend: &str) {
        if self.swap(BackendState::RemoteActive) == BackendState::RemoteDegraded {
            info!(backend, "Remote vector backend recovered");
        }
    }
}

pub struct VectorStore {
    remote: Option<Arc<dyn RemoteVectorBackend>>,
    state: Arc<StateCell>,
    local: LocalIndex,
    dimension: Mutex<Option<usize>>,
    /// Serializes upserts until the first one is accepted
    first_insert: tokio::sync::Mutex<()>,
    fallback_count: AtomicU64,
    options: VectorStoreOptions,
    probe: Mutex<Option<JoinHandle<()>>>,
}

impl VectorStore {
    /// Build from configuration. Missing credentials give a local-only store.
    pub async fn connect(config: &VectorStoreConfig) -> Result<Self> {
        let options = config.options();
        match PineconeBackend::from_config(config)? {
            Some(backend) => Ok(Self::with_backend(Arc::new(backend), options).await),
            None => {
                info!("No remote vector backend configured; using local index only");
                Ok(Self::local_only(options))
            }
        }
    }

    /// Store permanently served by the fallback index
    pub fn local_only(options: VectorStoreOptions) -> Self {
        Self::build(None, BackendState::LocalOnly, options)
    }

    /// Store delegating to `backend`, checked once before returning.
    pub async fn with_backend(backend: Arc<dyn RemoteVectorBackend>, options: VectorStoreOptions) -> Self {
        let store = Self::build(Some(Arc::clone(&backend)), BackendState::Unconfigured, options);

        match store.guarded(backend.health_check()).await {
            Ok(()) => {
                store.state.swap(BackendState::RemoteActive);
                info!(backend = backend.name(), "Remote vector backend active");
            }
            Err(err) => {
                store.state.swap(BackendState::RemoteDegraded);
                warn!(
                    backend = backend.name(),
                    error = %err,
                    "Remote vector backend unreachable at startup; serving from fallback index"
                );
            }
        }

        if let Some(interval) = store.options.health_probe_interval {
            store.spawn_health_probe(interval);
        }
        store
    }

    fn build(
        remote: Option<Arc<dyn RemoteVectorBackend>>,
        state: BackendState,
        options: VectorStoreOptions,
    ) -> Self {
        Self {
            remote,
            state: Arc::new(StateCell::new(state)),
            local: LocalIndex::new(),
            dimension: Mutex::new(None),
            first_insert: tokio::sync::Mutex::new(()),
            fallback_count: AtomicU64::new(0),
            options,
            probe: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BackendState {
        self.state.get()
    }

    /// Number of calls served by the fallback index after a remote failure
    pub fn fallback_count(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    pub fn dimension(&self) -> Option<usize> {
        *self.dimension.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> VectorStoreStats {
        VectorStoreStats {
            state: self.state(),
            backend: self.remote.as_ref().map(|r| r.name().to_string()),
            fallback_count: self.fallback_count(),
            local_records: self.local.len(),
            dimension: self.dimension(),
        }
    }

    /// Insert or overwrite a record.
    ///
    /// The first accepted upsert fixes the store's dimensionality; later
    /// mismatches fail with [`StoreError::DimensionMismatch`] before any backend
    /// is touched. A failed upsert leaves the dimensionality unset.
    pub async fn upsert(&self, record: VectorRecord) -> Result<()> {
        let actual = record.embedding.len();
        let _first_insert = match self.dimension() {
            None => Some(self.first_insert.lock().await),
            Some(_) => None,
        };

        self.check_dimension(actual)?;
        self.write_record(record).await?;
        self.commit_dimension(actual);
        Ok(())
    }

    async fn write_record(&self, record: VectorRecord) -> Result<()> {
        if let Some(remote) = &self.remote {
            match self.guarded(remote.upsert(&record)).await {
                Ok(()) => {
                    self.state.recover(remote.name());
                    if self.options.mirror_local {
                        let id = record.id.clone();
                        if let Err(err) = self.local.upsert(record) {
                            warn!(id = %id, error = %err, "Mirror write to fallback index failed");
                        }
                    }
                    return Ok(());
                }
                Err(err) => {
                    self.engage_fallback("upsert", &err)?;
                    return self.local.upsert(record).map_err(|e| unavailable("upsert", &err, e));
                }
            }
        }

        self.local.upsert(record)
    }

    /// Up to `top_k` records by descending cosine similarity.
    pub async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        self.check_dimension(embedding.len())?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        if let Some(remote) = &self.remote {
            match self.guarded(remote.query(embedding, top_k, filter)).await {
                Ok(hits) => {
                    self.state.recover(remote.name());
                    return Ok(hits);
                }
                Err(err) => {
                    self.engage_fallback("query", &err)?;
                    return self
                        .local
                        .query(embedding, top_k, filter)
                        .map_err(|e| unavailable("query", &err, e));
                }
            }
        }

        self.local.query(embedding, top_k, filter)
    }

    /// Remove a record. Absent ids are a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if let Some(remote) = &self.remote {
            match self.guarded(remote.delete(id)).await {
                Ok(()) => {
                    self.state.recover(remote.name());
                    if self.options.mirror_local {
                        if let Err(err) = self.local.delete(id) {
                            warn!(id, error = %err, "Mirror delete on fallback index failed");
                        }
                    }
                    return Ok(());
                }
                Err(err) => {
                    self.engage_fallback("delete", &err)?;
                    return self
                        .local
                        .delete(id)
                        .map(|_| ())
                        .map_err(|e| unavailable("delete", &err, e));
                }
            }
        }

        self.local.delete(id).map(|_| ())
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<VectorRecord>> {
        if let Some(remote) = &self.remote {
            match self.guarded(remote.fetch(id)).await {
                Ok(record) => {
                    self.state.recover(remote.name());
                    return Ok(record);
                }
                Err(err) => {
                    self.engage_fallback("fetch", &err)?;
                    return self.local.fetch(id).map_err(|e| unavailable("fetch", &err, e));
                }
            }
        }

        self.local.fetch(id)
    }

    /// Ids held by the fallback index
    pub fn list_ids(&self) -> Result<Vec<String>> {
        self.local.ids()
    }

    /// Start the background health probe on the current tokio runtime.
    ///
    /// Returns false when there is no remote, no runtime, or a probe is already running.
    pub fn spawn_health_probe(&self, interval: Duration) -> bool {
        let Some(remote) = self.remote.clone() else {
            return false;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; health probe not started");
            return false;
        };

        let mut probe = self.probe.lock().unwrap_or_else(PoisonError::into_inner);
        if probe.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let state = Arc::clone(&self.state);
        let timeout = self.options.request_timeout;
        *probe = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if state.get() != BackendState::RemoteDegraded {
                    continue;
                }
                match tokio::time::timeout(timeout, remote.health_check()).await {
                    Ok(Ok(())) => state.recover(remote.name()),
                    Ok(Err(err)) => debug!(error = %err, "Health probe: remote still failing"),
                    Err(_) => debug!("Health probe: remote timed out"),
                }
            }
        }));
        true
    }

    /// Stop the health probe, if running
    pub fn close(&self) {
        if let Some(handle) = self.probe.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        match self.dimension() {
            Some(expected) if expected != actual => Err(StoreError::DimensionMismatch { expected, actual }),
            _ if actual == 0 => Err(StoreError::DimensionMismatch { expected: 1, actual }),
            _ => Ok(()),
        }
    }

    fn commit_dimension(&self, actual: usize) {
        self.dimension
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(actual);
    }

    async fn guarded<T>(&self, call: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        let timeout = self.options.request_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(RemoteError::Timeout(timeout)))
    }

    /// Record a remote failure and decide whether the fallback may serve the call.
    fn engage_fallback(&self, op: &str, err: &RemoteError) -> Result<()> {
        if err.degrades() {
            if self.state.swap(BackendState::RemoteDegraded) != BackendState::RemoteDegraded {
                warn!(op, error = %err, "Remote vector backend degraded; engaging fallback index");
            }
        } else {
            warn!(op, error = %err, "Remote vector backend rejected call; serving from fallback index");
        }

        if !self.options.fallback_enabled {
            return Err(StoreError::VectorStoreUnavailable(format!(
                "{} failed remotely and fallback is disabled: {}",
                op, err
            )));
        }

        let count = self.fallback_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(op, fallback_count = count, "Fallback engaged");
        Ok(())
    }
}

impl Drop for VectorStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn unavailable(op: &str, remote: &RemoteError, local: StoreError) -> StoreError {
    StoreError::VectorStoreUnavailable(format!(
        "{} failed remotely ({}) and on the fallback index ({})",
        op, remote, local
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Failure {
        None,
        Connectivity,
        Auth,
        Rejected,
        Hang,
    }

    /// Scripted remote: stores records in a map and fails on demand
    struct MockBackend {
        failure: Mutex<Failure>,
        records: Mutex<HashMap<String, VectorRecord>>,
        calls: AtomicUsize,
    }

    impl MockBackend {
        fn new(failure: Failure) -> Arc<Self> {
            Arc::new(Self {
                failure: Mutex::new(failure),
                records: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn set_failure(&self, failure: Failure) {
            *self.failure.lock().unwrap() = failure;
        }

        fn remote_len(&self) -> usize {
            self.records.lock().unwrap().len()
        }

        async fn outcome(&self) -> RemoteResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let failure = *self.failure.lock().unwrap();
            match failure {
                Failure::None => Ok(()),
                Failure::Connectivity => Err(RemoteError::Connectivity("connection refused".into())),
                Failure::Auth => Err(RemoteError::Authentication("401: invalid api key".into())),
                Failure::Rejected => Err(RemoteError::Rejected {
                    status: 400,
                    message: "bad request".into(),
                }),
                Failure::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            }
        }
    }

    #[async_trait]
    impl RemoteVectorBackend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        async fn health_check(&self) -> RemoteResult<()> {
            self.outcome().await
        }

        async fn upsert(&self, record: &VectorRecord) -> RemoteResult<()> {
            self.outcome().await?;
            self.records.lock().unwrap().insert(record.id.clone(), record.clone());
            Ok(())
        }

        async fn query(
            &self,
            embedding: &[f32],
            top_k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> RemoteResult<Vec<ScoredRecord>> {
            self.outcome().await?;
            let records = self.records.lock().unwrap();
            let mut hits: Vec<ScoredRecord> = records
                .values()
                .map(|r| ScoredRecord {
                    score: cosine_similarity(embedding, &r.embedding),
                    record: r.clone(),
                })
                .collect();
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.truncate(top_k);
            Ok(hits)
        }

        async fn delete(&self, id: &str) -> RemoteResult<()> {
            self.outcome().await?;
            self.records.lock().unwrap().remove(id);
            Ok(())
        }

        async fn fetch(&self, id: &str) -> RemoteResult<Option<VectorRecord>> {
            self.outcome().await?;
            Ok(self.records.lock().unwrap().get(id).cloned())
        }
    }

    fn options() -> VectorStoreOptions {
        VectorStoreOptions {
            request_timeout: Duration::from_millis(200),
            ..VectorStoreOptions::default()
        }
    }

    fn three_vectors() -> Vec<VectorRecord> {
        vec![
            VectorRecord::new("east", vec![1.0, 0.0]),
            VectorRecord::new("north", vec![0.0, 1.0]),
            VectorRecord::new("north-east", vec![0.7, 0.7]),
        ]
    }

    #[tokio::test]
    async fn test_local_only_without_configuration() {
        let store = VectorStore::connect(&VectorStoreConfig::default()).await.unwrap();
        assert_eq!(store.state(), BackendState::LocalOnly);

        for record in three_vectors() {
            store.upsert(record).await.unwrap();
        }

        let hits = store.query(&[1.0, 0.1], 2, None).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, ["east", "north-east"]);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(store.fallback_count(), 0);
        assert_eq!(store.list_ids().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_healthy_remote_serves_calls() {
        let backend = MockBackend::new(Failure::None);
        let store = VectorStore::with_backend(backend.clone(), options()).await;
        assert_eq!(store.state(), BackendState::RemoteActive);

        for record in three_vectors() {
            store.upsert(record).await.unwrap();
        }
        assert_eq!(backend.remote_len(), 3);
        assert_eq!(store.stats().local_records, 0);

        let hits = store.query(&[0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].record.id, "north");
        assert!(store.fetch("east").await.unwrap().is_some());

        store.delete("east").await.unwrap();
        assert_eq!(backend.remote_len(), 2);
        assert_eq!(store.fallback_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_remote_degrades_and_serves_locally() {
        let backend = MockBackend::new(Failure::Connectivity);
        let store = VectorStore::with_backend(backend.clone(), options()).await;
        assert_eq!(store.state(), BackendState::RemoteDegraded);

        for record in three_vectors() {
            store.upsert(record).await.unwrap();
        }
        let hits = store.query(&[1.0, 0.1], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "east");

        assert_eq!(store.state(), BackendState::RemoteDegraded);
        assert_eq!(store.fallback_count(), 4);
        assert_eq!(store.stats().local_records, 3);
    }

    #[tokio::test]
    async fn test_degraded_recovers_on_next_success() {
        let backend = MockBackend::new(Failure::None);
        let store = VectorStore::with_backend(backend.clone(), options()).await;

        backend.set_failure(Failure::Auth);
        store.upsert(VectorRecord::new("a", vec![1.0, 0.0])).await.unwrap();
        assert_eq!(store.state(), BackendState::RemoteDegraded);
        assert_eq!(store.fallback_count(), 1);

        backend.set_failure(Failure::None);
        store.upsert(VectorRecord::new("b", vec![0.0, 1.0])).await.unwrap();
        assert_eq!(store.state(), BackendState::RemoteActive);
        assert_eq!(backend.remote_len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_falls_back_without_degrading() {
        let backend = MockBackend::new(Failure::None);
        let store = VectorStore::with_backend(backend.clone(), options()).await;

        backend.set_failure(Failure::Rejected);
        store.upsert(VectorRecord::new("a", vec![1.0, 0.0])).await.unwrap();
        assert_eq!(store.state(), BackendState::RemoteActive);
        assert_eq!(store.fallback_count(), 1);
        assert!(store.list_ids().unwrap().contains(&"a".to_string()));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_connectivity_failure() {
        let backend = MockBackend::new(Failure::None);
        let store = VectorStore::with_backend(backend.clone(), options()).await;

        backend.set_failure(Failure::Hang);
        let hits = store.query(&[1.0, 0.0], 3, None).await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(store.state(), BackendState::RemoteDegraded);
    }

    #[tokio::test]
    async fn test_fallback_disabled_surfaces_unavailable() {
        let backend = MockBackend::new(Failure::Connectivity);
        let store = VectorStore::with_backend(
            backend,
            VectorStoreOptions {
                fallback_enabled: false,
                ..options()
            },
        )
        .await;

        let err = store
            .upsert(VectorRecord::new("a", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VectorStoreUnavailable(_)));
        assert_eq!(store.fallback_count(), 0);
        assert_eq!(store.stats().local_records, 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_does_not_mutate() {
        let backend = MockBackend::new(Failure::None);
        let store = VectorStore::with_backend(backend.clone(), options()).await;
        store.upsert(VectorRecord::new("a", vec![1.0, 0.0, 0.0])).await.unwrap();
        let calls_before = backend.calls.load(Ordering::SeqCst);

        let err = store
            .upsert(VectorRecord::new("b", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 3, actual: 2 }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), calls_before);
        assert_eq!(backend.remote_len(), 1);
        assert_eq!(store.dimension(), Some(3));

        let err = store.query(&[1.0], 1, None).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));

        let err = store.upsert(VectorRecord::new("c", vec![])).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { actual: 0, .. }));
    }

    #[tokio::test]
    async fn test_local_mode_rejects_mismatch_without_mutation() {
        let store = VectorStore::local_only(options());
        store.upsert(VectorRecord::new("a", vec![1.0, 0.0])).await.unwrap();

        let err = store
            .upsert(VectorRecord::new("a", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));

        let record = store.fetch("a").await.unwrap().unwrap();
        assert_eq!(record.embedding, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_mirrored_writes_survive_outage() {
        let backend = MockBackend::new(Failure::None);
        let store = VectorStore::with_backend(
            backend.clone(),
            VectorStoreOptions {
                mirror_local: true,
                ..options()
            },
        )
        .await;

        for record in three_vectors() {
            store.upsert(record).await.unwrap();
        }
        store.delete("north").await.unwrap();

        backend.set_failure(Failure::Connectivity);
        let hits = store.query(&[1.0, 0.0], 5, None).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, ["east", "north-east"]);
        assert_eq!(store.state(), BackendState::RemoteDegraded);
    }

    #[tokio::test]
    async fn test_filter_restricts_local_results() {
        let store = VectorStore::local_only(options());
        store
            .upsert(VectorRecord::new("aapl-1", vec![1.0, 0.0]).with_metadata("ticker", "AAPL"))
            .await
            .unwrap();
        store
            .upsert(VectorRecord::new("msft-1", vec![1.0, 0.0]).with_metadata("ticker", "MSFT"))
            .await
            .unwrap();

        let filter = MetadataFilter::new().eq("ticker", "AAPL");
        let hits = store.query(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "aapl-1");

        store.delete("aapl-1").await.unwrap();
        store.delete("never-existed").await.unwrap();
        assert!(store.query(&[1.0, 0.0], 10, Some(&filter)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_probe_restores_active() {
        let backend = MockBackend::new(Failure::Connectivity);
        let store = VectorStore::with_backend(
            backend.clone(),
            VectorStoreOptions {
                health_probe_interval: Some(Duration::from_millis(10)),
                ..options()
            },
        )
        .await;
        assert_eq!(store.state(), BackendState::RemoteDegraded);
        assert!(!store.spawn_health_probe(Duration::from_millis(10)));

        backend.set_failure(Failure::None);
        let mut recovered = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.state() == BackendState::RemoteActive {
                recovered = true;
                break;
            }
        }
        assert!(recovered);
        store.close();
    }

    #[tokio::test]
    async fn test_rejected_first_upsert_leaves_dimension_unset() {
        let backend = MockBackend::new(Failure::Connectivity);
        let store = VectorStore::with_backend(
            backend.clone(),
            VectorStoreOptions {
                fallback_enabled: false,
                ..options()
            },
        )
        .await;

        let err = store
            .upsert(VectorRecord::new("a", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VectorStoreUnavailable(_)));
        assert_eq!(store.dimension(), None);

        backend.set_failure(Failure::None);
        store.upsert(VectorRecord::new("b", vec![1.0, 0.0])).await.unwrap();
        assert_eq!(store.dimension(), Some(2));
    }

    #[tokio::test]
    async fn test_failed_fallback_write_leaves_dimension_unset() {
        let backend = MockBackend::new(Failure::Connectivity);
        let store = VectorStore::with_backend(backend.clone(), options()).await;
        store.local.poison();

        let err = store
            .upsert(VectorRecord::new("a", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VectorStoreUnavailable(_)));
        assert_eq!(store.dimension(), None);
    }

    #[tokio::test]
    async fn test_mirror_failure_does_not_fail_remote_write() {
        let backend = MockBackend::new(Failure::None);
        let store = VectorStore::with_backend(
            backend.clone(),
            VectorStoreOptions {
                mirror_local: true,
                ..options()
            },
        )
        .await;
        store.upsert(VectorRecord::new("a", vec![1.0, 0.0])).await.unwrap();

        store.local.poison();
        store.upsert(VectorRecord::new("b", vec![0.0, 1.0])).await.unwrap();
        store.delete("a").await.unwrap();

        assert_eq!(backend.remote_len(), 1);
        assert_eq!(store.state(), BackendState::RemoteActive);
        assert_eq!(store.fallback_count(), 0);
    }

    #[test]
    fn test_health_probe_needs_a_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = runtime.block_on(VectorStore::with_backend(
            MockBackend::new(Failure::Connectivity),
            options(),
        ));

        assert!(!store.spawn_health_probe(Duration::from_millis(10)));
        assert!(runtime.block_on(async { store.spawn_health_probe(Duration::from_millis(10)) }));
        store.close();
    }

    #[tokio::test]
    async fn test_concurrent_upserts_share_one_dimension() {
        let store = Arc::new(VectorStore::local_only(options()));
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .upsert(VectorRecord::new(format!("v{i}"), vec![i as f32, 1.0, 0.0]))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.list_ids().unwrap().len(), 32);
        assert_eq!(store.dimension(), Some(3));
    }
}
