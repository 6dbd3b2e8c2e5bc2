//! Result Store - analysis outputs keyed by ticker and session
//!
//! Thread-safe, copy-on-write map with optional JSON snapshot persistence.

pub mod record;
mod snapshot;

pub use record::{ResultRecord, ResultValue, result_key};

use crate::config::ResultStoreConfig;
use crate::error::{Result, StoreError};
use chrono::Utc;
use snapshot::SnapshotFile;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

type RecordMap = BTreeMap<String, ResultRecord>;

/// The result store.
///
/// Mutations hold the write lock through the snapshot write, so a mutation and
/// its durable copy form one critical section and same-key writes are linearized.
pub struct ResultStore {
    records: RwLock<Arc<RecordMap>>,
    snapshot: Option<SnapshotFile>,
}

impl ResultStore {
    /// Memory-only store
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(Arc::new(RecordMap::new())),
            snapshot: None,
        }
    }

    /// Open a store, loading the persisted snapshot when persistence is enabled.
    ///
    /// A snapshot that exists but cannot be parsed fails with
    /// [`StoreError::PersistenceCorrupt`]; the caller decides whether to start
    /// empty or abort.
    pub fn open(config: &ResultStoreConfig) -> Result<Self> {
        if !config.persist {
            debug!("Result store persistence disabled; running memory-only");
            return Ok(Self::in_memory());
        }

        let snapshot = SnapshotFile::new(config.persist_path.clone());
        let records = snapshot.load()?;
        info!(
            path = %snapshot.path().display(),
            records = records.len(),
            "Loaded result store snapshot"
        );

        Ok(Self {
            records: RwLock::new(Arc::new(records)),
            snapshot: Some(snapshot),
        })
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.snapshot.as_ref().map(SnapshotFile::path)
    }

    /// Insert or overwrite the record for `key`.
    ///
    /// NaN and infinite floats are stored as `Null`. On
    /// [`StoreError::PersistenceWriteFailed`] the new value is already visible
    /// in memory.
    pub fn put(&self, key: impl Into<String>, value: impl Into<ResultValue>) -> Result<ResultRecord> {
        let key = key.into();
        let value = value.into().into_finite();
        let now = Utc::now();

        let mut guard = self.write();
        let map = Arc::make_mut(&mut guard);
        let record = match map.get_mut(&key) {
            Some(existing) => {
                existing.overwrite(value, now);
                existing.clone()
            }
            None => {
                let record = ResultRecord::new(key.clone(), value, now);
                map.insert(key, record.clone());
                record
            }
        };

        self.persist(&guard)?;
        Ok(record)
    }

    /// Current record for `key`, or [`StoreError::NotFound`].
    pub fn get(&self, key: &str) -> Result<ResultRecord> {
        self.read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { key: key.to_string() })
    }

    /// Remove `key`. Absent keys are a no-op and skip the snapshot.
    pub fn delete(&self, key: &str) -> Result<Option<ResultRecord>> {
        let mut guard = self.write();
        if !guard.contains_key(key) {
            return Ok(None);
        }

        let removed = Arc::make_mut(&mut guard).remove(key);
        self.persist(&guard)?;
        Ok(removed)
    }

    /// Remove every record
    pub fn clear(&self) -> Result<()> {
        let mut guard = self.write();
        *guard = Arc::new(RecordMap::new());
        info!("Result store cleared");
        self.persist(&guard)
    }

    /// Snapshot of the records whose key starts with `prefix`, as of this call.
    pub fn list(&self, prefix: Option<&str>) -> Listing {
        Listing {
            snapshot: Arc::clone(&self.read()),
            prefix: prefix.unwrap_or_default().to_string(),
        }
    }

    /// Records whose payload is a map with `field` equal to `value`.
    pub fn find_by_field(&self, field: &str, value: &ResultValue) -> Vec<ResultRecord> {
        self.read()
            .values()
            .filter(|record| record.value.get(field) == Some(value))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn persist(&self, records: &RecordMap) -> Result<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };

        snapshot.write(records).inspect_err(|e| {
            warn!(error = %e, "Result snapshot failed; change kept in memory only");
        })
    }

    // Mutations replace whole entries, so a poisoned map is still coherent.
    fn read(&self) -> RwLockReadGuard<'_, Arc<RecordMap>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<RecordMap>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time view returned by [`ResultStore::list`].
///
/// Iteration is lazy and can be restarted any number of times; later writes
/// to the store are not visible.
#[derive(Clone)]
pub struct Listing {
    snapshot: Arc<RecordMap>,
    prefix: String,
}

impl Listing {
    pub fn iter(&self) -> ListingIter<'_> {
        let start: (Bound<&str>, Bound<&str>) = (Bound::Included(self.prefix.as_str()), Bound::Unbounded);
        ListingIter {
            range: self.snapshot.range::<str, _>(start),
            prefix: self.prefix.as_str(),
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn to_vec(&self) -> Vec<ResultRecord> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a Listing {
    type Item = &'a ResultRecord;
    type IntoIter = ListingIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct ListingIter<'a> {
    range: btree_map::Range<'a, String, ResultRecord>,
    prefix: &'a str,
}

impl<'a> Iterator for ListingIter<'a> {
    type Item = &'a ResultRecord;

    fn next(&mut self) -> Option<Self::Item> {
        // Keys sharing the prefix are contiguous in key order
        let (key, record) = self.range.next()?;
        key.starts_with(self.prefix).then_some(record)
    }
}
