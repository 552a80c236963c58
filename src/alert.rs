//! alert.rs: canonical alert shape shared by the snapshot, the dedup engine and the
//! notification channels. One `Alert` per upstream feature, rebuilt on every poll.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Hash of `url` formatted as a UUID. Dedup key and notification tag.
    pub id: String,
    /// Upstream feature id the `id` was derived from.
    pub url: String,
    pub event: String,
    pub headline: String,
    pub description: String,
    pub instruction: String,
    pub severity: String,
    pub certainty: String,
    pub status: String,
    pub message_type: String,
    pub areas_affected: String,
    pub sent: Option<DateTime<FixedOffset>>,
    pub onset: Option<DateTime<FixedOffset>>,
    pub expires: Option<DateTime<FixedOffset>>,
    pub ends: Option<DateTime<FixedOffset>>,
    pub display_text: String,
    pub spoken_text: String,
}

impl Alert {
    /// When the alert stops being active: `expires`, falling back to `ends`.
    pub fn lifetime_bound(&self) -> Option<DateTime<Utc>> {
        self.expires
            .or(self.ends)
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Case-insensitive membership of `event` in a configured type list.
    pub fn event_in(&self, types: &[String]) -> bool {
        types.iter().any(|t| t.trim().eq_ignore_ascii_case(self.event.trim()))
    }

    /// Case-insensitive membership of `severity` in an allow-list; empty list allows all.
    pub fn severity_allowed(&self, severities: &[String]) -> bool {
        severities.is_empty()
            || severities
                .iter()
                .any(|s| s.trim().eq_ignore_ascii_case(self.severity.trim()))
    }
}
