// src/tracker.rs
//! Device-tracker lookups for sources that follow a moving device.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker returned HTTP {status} for {entity_id}")]
    Status { entity_id: String, status: u16 },
    #[error("tracker request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Current `(lat, lon)` of the entity, `None` when it reports no GPS fix.
    async fn locate(&self, entity_id: &str) -> Result<Option<(f64, f64)>, TrackerError>;
}

/// Home-Assistant style state API: `GET {base}/api/states/{entity}` with a bearer token.
pub struct HaStateTracker {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl HaStateTracker {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EntityState {
    #[serde(default)]
    attributes: Attributes,
}

#[derive(Debug, Default, Deserialize)]
struct Attributes {
    source_type: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

fn coordinates(state: &EntityState) -> Option<(f64, f64)> {
    let a = &state.attributes;
    a.source_type.as_ref()?;
    Some((a.latitude?, a.longitude?))
}

#[async_trait]
impl LocationProvider for HaStateTracker {
    async fn locate(&self, entity_id: &str) -> Result<Option<(f64, f64)>, TrackerError> {
        let url = format!("{}/api/states/{entity_id}", self.base_url);
        let mut req = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .header(ACCEPT, "application/json");
        if let Some(t) = &self.token {
            req = req.bearer_auth(t);
        }
        let rsp = req.send().await?;
        let status = rsp.status();
        if !status.is_success() {
            return Err(TrackerError::Status {
                entity_id: entity_id.to_string(),
                status: status.as_u16(),
            });
        }
        let state: EntityState = rsp.json().await?;
        Ok(coordinates(&state))
    }
}

/// Fixed positions, for offline runs and tests.
#[derive(Debug, Default)]
pub struct StaticLocations {
    positions: RwLock<HashMap<String, (f64, f64)>>,
}

impl StaticLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, entity_id: &str, lat: f64, lon: f64) {
        self.positions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entity_id.to_string(), (lat, lon));
    }

    pub fn clear(&self, entity_id: &str) {
        self.positions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(entity_id);
    }
}

#[async_trait]
impl LocationProvider for StaticLocations {
    async fn locate(&self, entity_id: &str) -> Result<Option<(f64, f64)>, TrackerError> {
        Ok(self
            .positions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(entity_id)
            .copied())
    }
}
