//! # Dedup Engine
//! Decides, for each poll cycle, which alerts are new, which are repeats and which
//! previously-notified alerts have cleared.
//!
//! `plan_cycle` is pure and does the classification against a history view.
//! `DedupEngine` applies a plan to its `HistoryStore`.
//!
//! Order per cycle: clears first (ids gone from the feed, or whose stored expiry has
//! passed), then classification of the current feed in feed order. An alert cleared
//! for expiry but still in the feed with a later bound is therefore new again.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::Alert;
use crate::history::{HistoryStore, LoadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    New,
    Repeat,
    AlreadyExpired,
    /// No `expires` and no `ends`; never notified.
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    /// No longer present in the feed.
    Removed,
    /// Stored expiry is at or before now.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    /// Position in the alert slice the plan was built from.
    pub index: usize,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CyclePlan {
    pub cleared: Vec<(String, ClearReason)>,
    pub new: Vec<NewAlert>,
    pub repeats: Vec<String>,
    pub already_expired: Vec<String>,
    pub unbounded: Vec<String>,
}

impl CyclePlan {
    pub fn is_quiet(&self) -> bool {
        self.cleared.is_empty() && self.new.is_empty()
    }
}

/// Classify one alert against the history as it stands after clears.
pub fn classify(
    history: &BTreeMap<String, DateTime<Utc>>,
    alert: &Alert,
    now: DateTime<Utc>,
) -> Classification {
    if history.contains_key(&alert.id) {
        return Classification::Repeat;
    }
    match alert.lifetime_bound() {
        None => Classification::Unbounded,
        Some(bound) if bound > now => Classification::New,
        Some(_) => Classification::AlreadyExpired,
    }
}

/// Same logic `DedupEngine::evaluate` applies, without touching storage.
pub fn plan_cycle(
    history: &BTreeMap<String, DateTime<Utc>>,
    alerts: &[Alert],
    now: DateTime<Utc>,
) -> CyclePlan {
    let mut plan = CyclePlan::default();
    let present: HashSet<&str> = alerts.iter().map(|a| a.id.as_str()).collect();

    // 1) Clears, in history key order
    let mut remaining = history.clone();
    for (id, expires) in history {
        let reason = if !present.contains(id.as_str()) {
            Some(ClearReason::Removed)
        } else if *expires <= now {
            Some(ClearReason::Expired)
        } else {
            None
        };
        if let Some(reason) = reason {
            remaining.remove(id);
            plan.cleared.push((id.clone(), reason));
        }
    }

    // 2) Classification in feed order; first occurrence of a duplicated id wins
    let mut seen = HashSet::new();
    for (index, alert) in alerts.iter().enumerate() {
        if !seen.insert(alert.id.as_str()) {
            continue;
        }
        match classify(&remaining, alert, now) {
            Classification::New => {
                // classify only returns New when a bound exists
                if let Some(expires) = alert.lifetime_bound() {
                    remaining.insert(alert.id.clone(), expires);
                    plan.new.push(NewAlert { index, expires });
                }
            }
            Classification::Repeat => plan.repeats.push(alert.id.clone()),
            Classification::AlreadyExpired => plan.already_expired.push(alert.id.clone()),
            Classification::Unbounded => plan.unbounded.push(alert.id.clone()),
        }
    }

    plan
}

/// Owns one source's history and keeps it in step with each cycle's plan.
pub struct DedupEngine {
    history: HistoryStore,
}

impl DedupEngine {
    pub fn new(history: HistoryStore) -> Self {
        Self { history }
    }

    /// Classify the cycle and apply it to the in-memory history. Nothing is written
    /// to the backend until `commit`. Fails without classifying when the history record
    /// cannot be read yet.
    pub async fn evaluate(
        &mut self,
        alerts: &[Alert],
        now: DateTime<Utc>,
    ) -> Result<CyclePlan, LoadError> {
        self.history.ensure_loaded().await?;
        let plan = plan_cycle(self.history.entries(), alerts, now);

        for (id, _) in &plan.cleared {
            self.history.remove(id);
        }
        for n in &plan.new {
            self.history.insert(alerts[n.index].id.clone(), n.expires);
        }
        for id in &plan.unbounded {
            tracing::info!(source = %self.history.source_id(), alert_id = %id, "alert has no expiry or end, not notifying");
        }
        Ok(plan)
    }

    /// Persist history if the cycle changed it. At most one write per call.
    pub async fn commit(&mut self) -> bool {
        self.history.persist().await
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }
}
