//! Raw artifact store.
//!
//! Layout: `{raw_dir}/{source}/{YYYY-MM-DD_HHMMSS}_{dataset}[@{qualifier}].json`
//!
//! Each file is a [`RawPayload`] envelope around the untouched API response.
//! Files are never modified after being written; a newer extraction writes a
//! newer file and readers pick the newest by name. Writes are atomic
//! (write to `.tmp`, rename into place).

use crate::source::{Dataset, DatasetKey, Source};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp prefix of raw file names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

#[derive(Debug, Error)]
pub enum RawStoreError {
    #[error("raw store I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed raw artifact {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("no raw artifact for {key}")]
    NotFound { key: String },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RawStoreError + '_ {
    move |source| RawStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Envelope persisted for every fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub source: Source,
    pub dataset: Dataset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    /// Endpoint path (or URL) the data came from.
    pub endpoint: String,
    pub retrieved_at: DateTime<Utc>,
    /// BLAKE3 hex digest of the serialized `data`.
    pub content_hash: String,
    pub data: Value,
}

impl RawPayload {
    pub fn new(
        key: &DatasetKey,
        endpoint: impl Into<String>,
        retrieved_at: DateTime<Utc>,
        data: Value,
    ) -> Self {
        let content_hash = hash_value(&data);
        Self {
            source: key.source(),
            dataset: key.dataset,
            qualifier: key.qualifier.clone(),
            endpoint: endpoint.into(),
            retrieved_at,
            content_hash,
            data,
        }
    }

    pub fn key(&self) -> DatasetKey {
        DatasetKey {
            dataset: self.dataset,
            qualifier: self.qualifier.clone(),
        }
    }

    /// Snapshot date every canonical record derived from this payload carries.
    pub fn snapshot_date(&self) -> NaiveDate {
        self.retrieved_at.date_naive()
    }

    /// Whether `content_hash` still matches `data`.
    pub fn verify(&self) -> bool {
        hash_value(&self.data) == self.content_hash
    }
}

fn hash_value(value: &Value) -> String {
    blake3::hash(value.to_string().as_bytes()).to_hex().to_string()
}

/// One file found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub path: PathBuf,
    pub key: DatasetKey,
    pub timestamp: NaiveDateTime,
    pub bytes: u64,
}

/// Per-dataset summary for `raw status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawDatasetStatus {
    pub source: Source,
    pub stem: String,
    pub files: usize,
    pub latest: Option<NaiveDateTime>,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct RawStore {
    root: PathBuf,
}

impl RawStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn source_dir(&self, source: Source) -> PathBuf {
        self.root.join(source.slug())
    }

    /// Path a payload with this key and timestamp is written to.
    pub fn path_for(&self, key: &DatasetKey, retrieved_at: DateTime<Utc>) -> PathBuf {
        self.source_dir(key.source()).join(format!(
            "{}_{}.json",
            retrieved_at.format(TIMESTAMP_FORMAT),
            key.file_stem()
        ))
    }

    /// Persist a payload. Returns the final path.
    pub fn write(&self, payload: &RawPayload) -> Result<PathBuf, RawStoreError> {
        let dir = self.source_dir(payload.source);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let path = self.path_for(&payload.key(), payload.retrieved_at);
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(payload).map_err(|e| RawStoreError::Malformed {
            path: path.clone(),
            reason: format!("serialization: {e}"),
        })?;
        fs::write(&tmp_path, body).map_err(io_err(&tmp_path))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            RawStoreError::Io {
                path: path.clone(),
                source: e,
            }
        })?;
        Ok(path)
    }

    pub fn read(&self, path: &Path) -> Result<RawPayload, RawStoreError> {
        let content = fs::read_to_string(path).map_err(io_err(path))?;
        serde_json::from_str(&content).map_err(|e| RawStoreError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Every recognizable artifact for a source, oldest first.
    ///
    /// Files whose names do not parse (temp files, strays) are ignored.
    pub fn list(&self, source: Source) -> Result<Vec<RawEntry>, RawStoreError> {
        let dir = self.source_dir(source);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_err(&dir))? {
            let entry = entry.map_err(io_err(&dir))?;
            let path = entry.path();
            let Some((timestamp, key)) = parse_file_name(&path) else {
                continue;
            };
            if key.source() != source {
                continue;
            }
            let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            entries.push(RawEntry {
                path,
                key,
                timestamp,
                bytes,
            });
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));
        Ok(entries)
    }

    /// Newest artifact for exactly this key.
    pub fn latest(&self, key: &DatasetKey) -> Result<Option<(PathBuf, RawPayload)>, RawStoreError> {
        let wanted = key.file_stem();
        let newest = self
            .list(key.source())?
            .into_iter()
            .filter(|e| e.key.file_stem() == wanted)
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp));
        match newest {
            Some(entry) => {
                let payload = self.read(&entry.path)?;
                Ok(Some((entry.path, payload)))
            }
            None => Ok(None),
        }
    }

    /// Like [`RawStore::latest`] but a missing artifact is an error.
    pub fn require_latest(&self, key: &DatasetKey) -> Result<(PathBuf, RawPayload), RawStoreError> {
        self.latest(key)?.ok_or_else(|| RawStoreError::NotFound {
            key: key.to_string(),
        })
    }

    /// Newest artifact for every qualifier of a qualified dataset, ordered by qualifier.
    pub fn latest_per_qualifier(
        &self,
        dataset: Dataset,
    ) -> Result<Vec<(PathBuf, RawPayload)>, RawStoreError> {
        let mut newest: BTreeMap<String, RawEntry> = BTreeMap::new();
        for entry in self.list(dataset.source())? {
            if entry.key.dataset != dataset {
                continue;
            }
            let stem = entry.key.file_stem();
            match newest.get(&stem) {
                Some(existing) if existing.timestamp >= entry.timestamp => {}
                _ => {
                    newest.insert(stem, entry);
                }
            }
        }
        newest
            .into_values()
            .map(|entry| {
                let payload = self.read(&entry.path)?;
                Ok((entry.path, payload))
            })
            .collect()
    }

    /// File count, newest timestamp and size per dataset stem across all sources.
    pub fn status(&self) -> Result<Vec<RawDatasetStatus>, RawStoreError> {
        let mut rows = Vec::new();
        for source in Source::ALL {
            let mut by_stem: BTreeMap<String, RawDatasetStatus> = BTreeMap::new();
            for entry in self.list(source)? {
                let stem = entry.key.file_stem();
                let row = by_stem.entry(stem.clone()).or_insert_with(|| RawDatasetStatus {
                    source,
                    stem,
                    files: 0,
                    latest: None,
                    bytes: 0,
                });
                row.files += 1;
                row.bytes += entry.bytes;
                row.latest = row.latest.max(Some(entry.timestamp));
            }
            rows.extend(by_stem.into_values());
        }
        Ok(rows)
    }

    /// Files that pruning to the newest `keep` per dataset stem would delete.
    pub fn prune_candidates(&self, keep: usize) -> Result<Vec<RawEntry>, RawStoreError> {
        let mut doomed = Vec::new();
        for source in Source::ALL {
            let mut by_stem: BTreeMap<String, Vec<RawEntry>> = BTreeMap::new();
            for entry in self.list(source)? {
                by_stem.entry(entry.key.file_stem()).or_default().push(entry);
            }
            for (_, mut files) in by_stem {
                // list() is oldest first
                if files.len() > keep {
                    let excess = files.len() - keep;
                    doomed.extend(files.drain(..excess));
                }
            }
        }
        Ok(doomed)
    }

    /// Delete the given entries. Returns bytes freed.
    pub fn remove(&self, entries: &[RawEntry]) -> Result<u64, RawStoreError> {
        let mut freed = 0;
        for entry in entries {
            fs::remove_file(&entry.path).map_err(io_err(&entry.path))?;
            freed += entry.bytes;
        }
        Ok(freed)
    }
}

/// Parse `{timestamp}_{stem}.json`.
fn parse_file_name(path: &Path) -> Option<(NaiveDateTime, DatasetKey)> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let name = path.file_stem()?.to_str()?;
    // "YYYY-MM-DD_HHMMSS" is 17 chars, then '_'
    let (ts, rest) = (name.get(..17)?, name.get(17..)?);
    let stem = rest.strip_prefix('_')?;
    let timestamp = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok()?;
    let key = DatasetKey::parse_stem(stem)?;
    Some((timestamp, key))
}
