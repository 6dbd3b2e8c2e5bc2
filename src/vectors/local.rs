//! Fallback index - exact linear-scan cosine similarity
//!
//! Non-persistent. Serves every call in local-only mode and the retried call
//! when the remote backend fails.

use super::types::{MetadataFilter, ScoredRecord, VectorRecord};
use crate::error::{Result, StoreError};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Entry {
    record: VectorRecord,
    /// Upsert sequence number, newer wins ties
    seq: u64,
}

#[derive(Default)]
struct IndexState {
    entries: HashMap<String, Entry>,
    dimension: Option<usize>,
    next_seq: u64,
}

#[derive(Default)]
pub struct LocalIndex {
    state: RwLock<IndexState>,
}

impl LocalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, record: VectorRecord) -> Result<()> {
        let mut state = self.write()?;
        let actual = record.embedding.len();
        match state.dimension {
            Some(expected) if expected != actual => {
                return Err(StoreError::DimensionMismatch { expected, actual });
            }
            _ => state.dimension = Some(actual),
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(record.id.clone(), Entry { record, seq });
        Ok(())
    }

    pub fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        let state = self.read()?;
        if top_k == 0 || state.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = state.dimension.filter(|d| *d != embedding.len()) {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }

        let mut hits: Vec<(&Entry, f32)> = state
            .entries
            .values()
            .filter(|entry| filter.is_none_or(|f| f.matches(&entry.record.metadata)))
            .map(|entry| (entry, cosine_similarity(embedding, &entry.record.embedding)))
            .collect();

        hits.sort_by(|(a, score_a), (b, score_b)| {
            score_b
                .total_cmp(score_a)
                .then_with(|| b.seq.cmp(&a.seq))
        });

        Ok(hits
            .into_iter()
            .take(top_k)
            .map(|(entry, score)| ScoredRecord {
                record: entry.record.clone(),
                score,
            })
            .collect())
    }

    pub fn fetch(&self, id: &str) -> Result<Option<VectorRecord>> {
        Ok(self.read()?.entries.get(id).map(|entry| entry.record.clone()))
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.entries.remove(id).is_some())
    }

    pub fn ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.read()?.entries.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Counts through a poisoned lock; entries are replaced whole, so the map stays coherent.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexState>> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexState>> {
        self.state.write().map_err(|_| poisoned())
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.state.write().unwrap();
            panic!("poisoning fallback index");
        }));
    }
}

fn poisoned() -> StoreError {
    StoreError::VectorStoreUnavailable("fallback index lock poisoned".to_string())
}

/// Cosine similarity; zero-magnitude or mismatched vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}
