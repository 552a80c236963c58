// src/notify/banner.rs
//! In-process persistent banners, the UI-facing channel. Upsert on send, dismissed on
//! retract or by the API.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Channel, Notice};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Banner {
    pub source: String,
    pub tag: String,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Shared by all sources; entries are keyed by `(source id, tag)`.
#[derive(Debug, Clone, Default)]
pub struct BannerBoard {
    inner: Arc<RwLock<BTreeMap<(String, String), Banner>>>,
}

impl BannerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel that writes banners on behalf of one source.
    pub fn for_source(&self, source_id: &str) -> BannerChannel {
        BannerChannel {
            board: self.clone(),
            source_id: source_id.to_string(),
        }
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<Banner> {
        let mut all: Vec<Banner> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.tag.cmp(&b.tag)));
        all
    }

    pub fn list_for(&self, source_id: &str) -> Vec<Banner> {
        self.list()
            .into_iter()
            .filter(|b| b.source == source_id)
            .collect()
    }

    /// Returns whether a banner was removed.
    pub fn dismiss(&self, source_id: &str, tag: &str) -> bool {
        self.write()
            .remove(&(source_id.to_string(), tag.to_string()))
            .is_some()
    }

    /// Drop every banner of a removed source.
    pub fn clear_source(&self, source_id: &str) -> usize {
        let mut guard = self.write();
        let before = guard.len();
        guard.retain(|(src, _), _| src != source_id);
        before - guard.len()
    }

    fn upsert(&self, banner: Banner) {
        self.write()
            .insert((banner.source.clone(), banner.tag.clone()), banner);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<(String, String), Banner>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<(String, String), Banner>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct BannerChannel {
    board: BannerBoard,
    source_id: String,
}

#[async_trait]
impl Channel for BannerChannel {
    fn name(&self) -> &str {
        "banner"
    }

    fn supports_retract(&self) -> bool {
        true
    }

    async fn send(&self, notice: &Notice) -> Result<()> {
        self.board.upsert(Banner {
            source: self.source_id.clone(),
            tag: notice.tag.clone(),
            title: notice.title.clone(),
            message: notice.body.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn retract(&self, tag: &str) -> Result<()> {
        if self.board.dismiss(&self.source_id, tag) {
            tracing::debug!(source = %self.source_id, tag, "banner dismissed");
        }
        Ok(())
    }
}
