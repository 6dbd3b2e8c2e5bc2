//! Durable snapshot file for the result store
//!
//! The whole map is written to a temp file beside the target and renamed over
//! it, so a failed write leaves the previous snapshot intact.

use super::record::{ResultRecord, ResultValue};
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// On-disk shape of one record; the key is the map key.
#[derive(Serialize)]
struct EntryRef<'a> {
    value: &'a ResultValue,
    created_at: &'a DateTime<Utc>,
    updated_at: &'a DateTime<Utc>,
}

#[derive(Deserialize)]
struct Entry {
    value: ResultValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

pub(crate) struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing or blank file is an empty store.
    pub fn load(&self) -> Result<BTreeMap<String, ResultRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.corrupt(e.to_string())),
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let entries: BTreeMap<String, Entry> =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(|(key, entry)| {
                let record = ResultRecord {
                    key: key.clone(),
                    value: entry.value,
                    created_at: entry.created_at,
                    updated_at: entry.updated_at,
                };
                (key, record)
            })
            .collect())
    }

    /// Write the full state and atomically replace the previous snapshot.
    pub fn write(&self, records: &BTreeMap<String, ResultRecord>) -> Result<()> {
        self.write_inner(records)
            .map_err(|source| StoreError::PersistenceWriteFailed {
                path: self.path.clone(),
                source,
            })
    }

    fn write_inner(&self, records: &BTreeMap<String, ResultRecord>) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let entries: BTreeMap<&str, EntryRef<'_>> = records
            .iter()
            .map(|(key, record)| {
                let entry = EntryRef {
                    value: &record.value,
                    created_at: &record.created_at,
                    updated_at: &record.updated_at,
                };
                (key.as_str(), entry)
            })
            .collect();

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &entries).map_err(io::Error::other)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        Ok(())
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::PersistenceCorrupt {
            path: self.path.clone(),
            reason,
        }
    }
}
