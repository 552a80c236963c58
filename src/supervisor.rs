// src/supervisor.rs
//! One poll task per source. Cycles inside a task run strictly one after another;
//! ticks that fall due while a cycle is still running are skipped.
//!
//! Stopping signals the task, which exits at the next cycle boundary. A cycle still
//! running after `STOP_GRACE` is aborted; history is already written by then.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::SourceConfig;
use crate::history::HistoryBackend;
use crate::notify::BannerBoard;
use crate::snapshot::SnapshotHandle;
use crate::source::AlertSource;

/// What the query surface can see about a running source.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub config: SourceConfig,
    pub snapshot: SnapshotHandle,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub id: String,
    pub name: String,
    pub configuration_type: &'static str,
    pub selector: String,
    pub count: usize,
    pub last_updated: chrono::DateTime<Utc>,
}

impl SourceEntry {
    pub fn summary(&self) -> SourceSummary {
        let snap = self.snapshot.current();
        SourceSummary {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            configuration_type: self.config.selector.configuration_type(),
            selector: self.config.selector.to_string(),
            count: snap.count,
            last_updated: snap.last_updated,
        }
    }
}

/// Shared, id-ordered registry of running sources.
#[derive(Debug, Clone, Default)]
pub struct SourceDirectory {
    inner: Arc<RwLock<BTreeMap<String, SourceEntry>>>,
}

impl SourceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<SourceEntry> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn list(&self) -> Vec<SourceEntry> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn insert(&self, entry: SourceEntry) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.config.id.clone(), entry);
    }

    fn remove(&self, id: &str) -> Option<SourceEntry> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }
}

/// How long `stop` waits for an in-flight cycle before aborting it.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

struct Poller {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Supervisor {
    directory: SourceDirectory,
    backend: Arc<dyn HistoryBackend>,
    banners: BannerBoard,
    tasks: HashMap<String, Poller>,
}

impl Supervisor {
    pub fn new(
        directory: SourceDirectory,
        backend: Arc<dyn HistoryBackend>,
        banners: BannerBoard,
    ) -> Self {
        Self {
            directory,
            backend,
            banners,
            tasks: HashMap::new(),
        }
    }

    pub fn directory(&self) -> &SourceDirectory {
        &self.directory
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.tasks.get(id).is_some_and(|p| !p.task.is_finished())
    }

    /// Start polling `source`. Ids must be unique among running sources.
    pub fn spawn(&mut self, source: AlertSource) -> Result<()> {
        let id = source.id().to_string();
        if self.tasks.contains_key(&id) {
            bail!("source {id:?} is already running");
        }
        self.directory.insert(SourceEntry {
            config: source.config().clone(),
            snapshot: source.snapshot(),
        });
        tracing::info!(source = %id, interval_secs = source.config().interval.as_secs(), "starting poller");
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_source(source, stop_rx));
        self.tasks.insert(id, Poller { stop, task });
        Ok(())
    }

    /// Stop polling and wait for the task to end. History is kept.
    pub async fn stop(&mut self, id: &str) -> bool {
        self.directory.remove(id);
        let Some(Poller { stop, mut task }) = self.tasks.remove(id) else {
            return false;
        };
        let _ = stop.send(true);
        let joined = match time::timeout(STOP_GRACE, &mut task).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(source = %id, grace_secs = STOP_GRACE.as_secs(), "cycle still running, aborting poller");
                task.abort();
                task.await
            }
        };
        if let Err(e) = joined {
            if !e.is_cancelled() {
                tracing::warn!(source = %id, error = ?e, "poller ended abnormally");
            }
        }
        tracing::info!(source = %id, "poller stopped");
        true
    }

    /// Stop the source, then delete its history record and banners.
    pub async fn remove(&mut self, id: &str) -> Result<bool> {
        let was_running = self.stop(id).await;
        if !was_running {
            return Ok(false);
        }
        self.backend
            .remove(id)
            .await
            .with_context(|| format!("removing history of {id}"))?;
        let dismissed = self.banners.clear_source(id);
        tracing::info!(source = %id, dismissed, "source removed");
        Ok(true)
    }

    pub async fn shutdown(&mut self) {
        let ids: Vec<String> = self.tasks.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }
}

/// Poll loop of one source. Returns once `stop` flips to true or its sender is dropped,
/// checked between cycles.
pub async fn run_source(mut source: AlertSource, mut stop: watch::Receiver<bool>) {
    let mut ticker = time::interval(source.config().interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *stop.borrow() {
            break;
        }
        let report = source.poll_once(Utc::now()).await;
        if report.is_ok() {
            tracing::trace!(source = %report.source_id, count = report.snapshot.count, "tick ok");
        }
    }
    tracing::debug!(source = %source.id(), "poll loop exited");
}
