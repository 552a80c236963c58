//! history.rs: durable per-source record of alerts that were already notified.
//!
//! The persisted form is a flat JSON object `alert id -> RFC 3339 expiry`, one record per
//! source. The store loads lazily on first use and writes at most once per cycle, only
//! when something changed. A failed write keeps the store dirty so the next cycle retries.
//! A failed read leaves the store unloaded so the next cycle reads again; only a record
//! that was read but cannot be parsed is replaced by an empty history.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tokio::fs;

/// Flat serialized form of one source's history.
pub type HistoryRecord = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum LoadError {
    /// The record was read but is not a history object.
    #[error("history record is corrupt: {0}")]
    Corrupt(String),
    /// The record could not be read this time.
    #[error("history record unavailable: {0:#}")]
    Unavailable(#[from] anyhow::Error),
}

#[async_trait::async_trait]
pub trait HistoryBackend: Send + Sync {
    /// `None` when the source has no record yet.
    async fn load(&self, source_id: &str) -> Result<Option<HistoryRecord>, LoadError>;
    async fn save(&self, source_id: &str, record: &HistoryRecord) -> Result<()>;
    /// Removing a record that does not exist is not an error.
    async fn remove(&self, source_id: &str) -> Result<()>;
}

/// One `nws_alerts_<source id>.json` file per source under `dir`.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("nws_alerts_{source_id}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait::async_trait]
impl HistoryBackend for JsonFileBackend {
    async fn load(&self, source_id: &str) -> Result<Option<HistoryRecord>, LoadError> {
        let path = self.path_for(source_id);
        match fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s)
                .map(Some)
                .map_err(|e| LoadError::Corrupt(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LoadError::Unavailable(
                anyhow::Error::new(e).context(format!("reading {}", path.display())),
            )),
        }
    }

    async fn save(&self, source_id: &str, record: &HistoryRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(source_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record).context("serializing history")?;
        fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    async fn remove(&self, source_id: &str) -> Result<()> {
        let path = self.path_for(source_id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "alert history removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}

/// In-process backend for embedding and tests. `fail_writes` simulates an unwritable store,
/// `failing_loads` a store that cannot be read for that many calls.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, HistoryRecord>>,
    fail_writes: std::sync::atomic::AtomicBool,
    failing_loads: std::sync::atomic::AtomicUsize,
    loads: std::sync::atomic::AtomicUsize,
    saves: std::sync::atomic::AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make the next `n` loads fail as if the store were unreachable.
    pub fn fail_loads(&self, n: usize) {
        self.failing_loads
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of load calls so far, failed ones included.
    pub fn load_count(&self) -> usize {
        self.loads.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn record(&self, source_id: &str) -> Option<HistoryRecord> {
        self.lock().get(source_id).cloned()
    }

    pub fn insert_record(&self, source_id: &str, record: HistoryRecord) {
        self.lock().insert(source_id.to_string(), record);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HistoryRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl HistoryBackend for MemoryBackend {
    async fn load(&self, source_id: &str) -> Result<Option<HistoryRecord>, LoadError> {
        use std::sync::atomic::Ordering;
        self.loads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow::anyhow!("history backend is unreachable").into());
        }
        Ok(self.record(source_id))
    }

    async fn save(&self, source_id: &str, record: &HistoryRecord) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("history backend is read-only");
        }
        self.insert_record(source_id, record.clone());
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, source_id: &str) -> Result<()> {
        self.lock().remove(source_id);
        Ok(())
    }
}

/// In-memory view of one source's history plus its backing record.
pub struct HistoryStore {
    source_id: String,
    backend: Arc<dyn HistoryBackend>,
    entries: BTreeMap<String, DateTime<Utc>>,
    loaded: bool,
    dirty: bool,
}

impl HistoryStore {
    pub fn new(source_id: impl Into<String>, backend: Arc<dyn HistoryBackend>) -> Self {
        Self {
            source_id: source_id.into(),
            backend,
            entries: BTreeMap::new(),
            loaded: false,
            dirty: false,
        }
    }

    /// Load the backing record once. A missing or corrupt record starts empty; a read
    /// failure is returned and the next call tries again.
    pub async fn ensure_loaded(&mut self) -> Result<(), LoadError> {
        if self.loaded {
            return Ok(());
        }

        match self.backend.load(&self.source_id).await {
            Ok(Some(record)) => {
                for (id, ts) in record {
                    match DateTime::parse_from_rfc3339(&ts) {
                        Ok(expires) => {
                            self.entries.insert(id, expires.with_timezone(&Utc));
                        }
                        Err(e) => {
                            tracing::warn!(source = %self.source_id, alert_id = %id, error = %e, "dropping unparseable history entry");
                            self.dirty = true;
                        }
                    }
                }
                tracing::debug!(source = %self.source_id, entries = self.entries.len(), "alert history loaded");
            }
            Ok(None) => {
                tracing::debug!(source = %self.source_id, "no alert history yet");
            }
            Err(LoadError::Corrupt(msg)) => {
                tracing::warn!(source = %self.source_id, error = %msg, "alert history corrupt, starting empty");
                self.dirty = true;
            }
            Err(e) => {
                tracing::warn!(source = %self.source_id, error = %e, "alert history unreadable, will retry next cycle");
                return Err(e);
            }
        }
        self.loaded = true;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(id).copied()
    }

    pub fn entries(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn insert(&mut self, id: impl Into<String>, expires: DateTime<Utc>) {
        let id = id.into();
        if self.entries.insert(id, expires) != Some(expires) {
            self.dirty = true;
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<DateTime<Utc>> {
        let removed = self.entries.remove(id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Serialized form written to the backend.
    pub fn to_record(&self) -> HistoryRecord {
        self.entries
            .iter()
            .map(|(id, ts)| (id.clone(), ts.to_rfc3339_opts(SecondsFormat::Secs, true)))
            .collect()
    }

    /// Write the record if it changed. Returns whether the backend now matches memory.
    pub async fn persist(&mut self) -> bool {
        if !self.dirty {
            return true;
        }
        match self.backend.save(&self.source_id, &self.to_record()).await {
            Ok(()) => {
                self.dirty = false;
                true
            }
            Err(e) => {
                tracing::warn!(source = %self.source_id, error = ?e, "saving alert history failed, will retry next cycle");
                false
            }
        }
    }
}
