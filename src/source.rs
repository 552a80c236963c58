//! # Alert Source
//! One configured subscription: its feed query, dedup engine, channels and published
//! snapshot. `poll_once` runs a single cycle; the supervisor calls it on an interval.
//!
//! Cycle: resolve query (tracker lookup if needed) and fetch under the source timeout,
//! normalize, publish snapshot, classify, persist history, retract cleared, dispatch new.
//! History is written before any channel is called, so a cycle cut short during
//! delivery never leaves notified ids out of the durable record.
//! A fetch failure leaves history and the published snapshot untouched; an unreadable
//! history skips classification and delivery until a later cycle can read it.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use thiserror::Error;

use crate::config::{AppConfig, Selector, SourceConfig};
use crate::engine::{ClearReason, DedupEngine};
use crate::feed::nws::NwsClient;
use crate::feed::{FeedClient, FeedError, FeedQuery, RawRecord};
use crate::history::{HistoryBackend, HistoryStore, JsonFileBackend, LoadError};
use crate::normalize::normalize_batch;
use crate::notify::voice::CriticalSequence;
use crate::notify::{BannerBoard, ChannelHandle, ChannelRegistry, ChannelSet, DispatchReport, Dispatcher};
use crate::snapshot::{aggregate, Snapshot, SnapshotHandle};
use crate::tracker::{HaStateTracker, LocationProvider, TrackerError};

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("tracker lookup failed: {0}")]
    Tracker(#[from] TrackerError),
    #[error("{0} has no GPS location")]
    NoLocation(String),
    #[error("source follows {0} but no tracker is configured")]
    NoTracker(String),
    #[error(transparent)]
    History(#[from] LoadError),
}

/// Outcome of one cycle. On a fetch failure `snapshot` is empty and nothing else happened.
#[derive(Debug)]
pub struct CycleReport {
    pub source_id: String,
    pub snapshot: Snapshot,
    pub new: Vec<String>,
    pub cleared: Vec<(String, ClearReason)>,
    pub repeats: usize,
    pub already_expired: usize,
    pub unbounded: usize,
    pub deliveries: DispatchReport,
    pub persisted: bool,
    pub error: Option<PollError>,
}

impl CycleReport {
    fn failed(source_id: &str, now: DateTime<Utc>, error: PollError) -> Self {
        Self {
            source_id: source_id.to_string(),
            snapshot: Snapshot::empty(now),
            new: Vec::new(),
            cleared: Vec::new(),
            repeats: 0,
            already_expired: 0,
            unbounded: 0,
            deliveries: DispatchReport::default(),
            persisted: true,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct AlertSource {
    config: SourceConfig,
    feed: Arc<dyn FeedClient>,
    tracker: Option<Arc<dyn LocationProvider>>,
    engine: DedupEngine,
    dispatcher: Dispatcher,
    snapshot: SnapshotHandle,
}

impl AlertSource {
    pub fn new(
        config: SourceConfig,
        feed: Arc<dyn FeedClient>,
        tracker: Option<Arc<dyn LocationProvider>>,
        backend: Arc<dyn HistoryBackend>,
        channels: ChannelSet,
        sequence: CriticalSequence,
    ) -> Self {
        let engine = DedupEngine::new(HistoryStore::new(config.id.clone(), backend));
        let dispatcher = Dispatcher::new(config.id.clone(), config.notify.clone(), channels, sequence);
        Self {
            config,
            feed,
            tracker,
            engine,
            dispatcher,
            snapshot: SnapshotHandle::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn snapshot(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    pub fn engine(&self) -> &DedupEngine {
        &self.engine
    }

    pub async fn resolve_query(&self) -> Result<FeedQuery, PollError> {
        match &self.config.selector {
            Selector::Zones { zones } => Ok(FeedQuery::Zones(zones.clone())),
            Selector::Point { lat, lon } => Ok(FeedQuery::Point {
                lat: *lat,
                lon: *lon,
            }),
            Selector::Tracker { entity_id } => {
                let tracker = self
                    .tracker
                    .as_ref()
                    .ok_or_else(|| PollError::NoTracker(entity_id.clone()))?;
                match tracker.locate(entity_id).await? {
                    Some((lat, lon)) => Ok(FeedQuery::Point { lat, lon }),
                    None => Err(PollError::NoLocation(entity_id.clone())),
                }
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>, PollError> {
        let query = self.resolve_query().await?;
        tracing::debug!(source = %self.config.id, feed = self.feed.name(), %query, "polling");
        Ok(self.feed.fetch_active_alerts(&query).await?)
    }

    /// Run one poll cycle at `now`.
    pub async fn poll_once(&mut self, now: DateTime<Utc>) -> CycleReport {
        let id = self.config.id.clone();
        counter!("nws_poll_cycles_total", "source" => id.clone()).increment(1);
        gauge!("nws_poll_last_run_ts", "source" => id.clone()).set(now.timestamp() as f64);

        let timeout = self.config.timeout;
        let fetched = match tokio::time::timeout(timeout, self.fetch()).await {
            Ok(res) => res,
            Err(_) => Err(PollError::Feed(FeedError::Timeout(timeout))),
        };
        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => {
                counter!("nws_poll_failures_total", "source" => id.clone()).increment(1);
                tracing::warn!(source = %id, error = %e, "poll failed, keeping previous state");
                return CycleReport::failed(&id, now, e);
            }
        };

        let snapshot = aggregate(normalize_batch(&raw), now);
        self.snapshot.publish(snapshot.clone());
        gauge!("nws_alerts_active", "source" => id.clone()).set(snapshot.count as f64);

        let plan = match self.engine.evaluate(&snapshot.alerts, now).await {
            Ok(plan) => plan,
            Err(e) => {
                counter!("nws_poll_failures_total", "source" => id.clone()).increment(1);
                tracing::warn!(source = %id, error = %e, "history unavailable, not notifying this cycle");
                return CycleReport {
                    snapshot,
                    ..CycleReport::failed(&id, now, e.into())
                };
            }
        };
        let persisted = self.engine.commit().await;
        let mut deliveries = DispatchReport::default();

        for (alert_id, reason) in &plan.cleared {
            tracing::info!(source = %id, %alert_id, ?reason, "alert cleared");
            let r = self.dispatcher.retract(alert_id).await;
            deliveries.deliveries.extend(r.deliveries);
        }
        counter!("nws_alerts_cleared_total", "source" => id.clone()).increment(plan.cleared.len() as u64);

        let mut new = Vec::with_capacity(plan.new.len());
        for n in &plan.new {
            let alert = &snapshot.alerts[n.index];
            tracing::info!(source = %id, alert_id = %alert.id, event = %alert.event, expires = %n.expires, "new alert");
            let r = self.dispatcher.dispatch(alert, now).await;
            deliveries.deliveries.extend(r.deliveries);
            new.push(alert.id.clone());
        }
        counter!("nws_alerts_new_total", "source" => id.clone()).increment(new.len() as u64);

        if !plan.is_quiet() {
            tracing::debug!(
                source = %id,
                new = new.len(),
                cleared = plan.cleared.len(),
                repeats = plan.repeats.len(),
                tracked = self.engine.history().len(),
                "cycle done"
            );
        }

        CycleReport {
            source_id: id,
            snapshot,
            new,
            cleared: plan.cleared,
            repeats: plan.repeats.len(),
            already_expired: plan.already_expired.len(),
            unbounded: plan.unbounded.len(),
            deliveries,
            persisted,
            error: None,
        }
    }
}

/// Shared pieces every source is built from.
pub struct SourceFactory {
    pub feed: Arc<dyn FeedClient>,
    pub tracker: Option<Arc<dyn LocationProvider>>,
    pub backend: Arc<dyn HistoryBackend>,
    pub registry: ChannelRegistry,
    pub banners: BannerBoard,
    pub sequence: CriticalSequence,
}

impl SourceFactory {
    /// weather.gov client, JSON-file history and the declared channels from `cfg`.
    pub fn from_config(cfg: &AppConfig, banners: BannerBoard) -> Result<Self> {
        let tracker = cfg.tracker.as_ref().map(|t| {
            let token = std::env::var(&t.token_env).ok();
            if token.is_none() {
                tracing::warn!(env = %t.token_env, "tracker token not set, requests are unauthenticated");
            }
            Arc::new(HaStateTracker::new(&t.base_url, token)) as Arc<dyn LocationProvider>
        });
        Ok(Self {
            feed: Arc::new(NwsClient::new(&cfg.feed.endpoint, &cfg.feed.user_agent)),
            tracker,
            backend: Arc::new(JsonFileBackend::new(&cfg.storage.history_dir)),
            registry: ChannelRegistry::from_specs(&cfg.channels)?,
            banners,
            sequence: CriticalSequence::from_settings(&cfg.voice),
        })
    }

    pub fn channels_for(&self, config: &SourceConfig) -> ChannelSet {
        let p = &config.notify;
        let banner = p
            .persistent_notifications
            .then(|| Arc::new(self.banners.for_source(&config.id)) as ChannelHandle);
        ChannelSet {
            banner,
            critical_voice: self.registry.resolve(&p.announce_critical_targets),
            voice: self.registry.resolve(&p.announce_targets),
            critical_push: self.registry.resolve(&p.send_critical_targets),
            push: self.registry.resolve(&p.send_targets),
        }
    }

    pub fn build(&self, config: SourceConfig) -> AlertSource {
        let channels = self.channels_for(&config);
        AlertSource::new(
            config,
            self.feed.clone(),
            self.tracker.clone(),
            self.backend.clone(),
            channels,
            self.sequence.clone(),
        )
    }

    pub fn build_all(&self, cfg: &AppConfig) -> Vec<AlertSource> {
        cfg.sources.iter().cloned().map(|s| self.build(s)).collect()
    }
}
