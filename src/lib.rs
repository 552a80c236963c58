// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod alert;
pub mod api;
pub mod config;
pub mod engine;
pub mod feed;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod notify;
pub mod snapshot;
pub mod source;
pub mod supervisor;
pub mod tracker;
pub mod window;

// ---- Re-exports for stable public API ----
pub use crate::alert::Alert;
pub use crate::api::{router, AppState};
pub use crate::engine::{Classification, ClearReason, CyclePlan, DedupEngine};
pub use crate::snapshot::{Snapshot, SnapshotHandle};
pub use crate::source::{AlertSource, CycleReport, PollError, SourceFactory};
pub use crate::supervisor::{SourceDirectory, Supervisor};

use anyhow::{Context, Result};

/// Load configuration and start one poller per configured source. Returns the running
/// supervisor together with the banner board its sources write to.
pub async fn start_from_config(cfg: &config::AppConfig) -> Result<(Supervisor, notify::BannerBoard)> {
    let banners = notify::BannerBoard::new();
    let factory = SourceFactory::from_config(cfg, banners.clone()).context("building channels")?;
    let mut supervisor = Supervisor::new(SourceDirectory::new(), factory.backend.clone(), banners.clone());
    for source in factory.build_all(cfg) {
        supervisor.spawn(source)?;
    }
    tracing::info!(sources = cfg.sources.len(), channels = factory.registry.len(), "alert pollers started");
    Ok((supervisor, banners))
}
