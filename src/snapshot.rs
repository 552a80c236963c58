// src/snapshot.rs
//! Per-cycle aggregate of the normalized alerts, and the handle readers use to see it.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::Alert;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub count: usize,
    pub alerts: Vec<Alert>,
    pub last_updated: DateTime<Utc>,
}

impl Snapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            alerts: Vec::new(),
            last_updated: now,
        }
    }
}

/// Feed order is kept; `count` always equals `alerts.len()`.
pub fn aggregate(alerts: Vec<Alert>, now: DateTime<Utc>) -> Snapshot {
    Snapshot {
        count: alerts.len(),
        alerts,
        last_updated: now,
    }
}

/// Latest published snapshot of one source. Replaced wholesale, never merged.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Arc<Snapshot>>>,
}

impl SnapshotHandle {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    pub fn publish(&self, snapshot: Snapshot) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(snapshot);
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for SnapshotHandle {
    fn default() -> Self {
        Self::new(Snapshot::empty(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::test_support::alert;
    use chrono::{Duration, TimeZone};

    #[test]
    fn aggregate_keeps_feed_order_and_count() {
        let now = Utc.with_ymd_and_hms(2024, 4, 28, 19, 0, 0).unwrap();
        let alerts = vec![
            alert("b", "Flood Advisory", now + Duration::hours(1)),
            alert("a", "Heat Advisory", now + Duration::hours(2)),
        ];
        let snap = aggregate(alerts, now);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.alerts[0].id, "b");
        assert_eq!(snap.alerts[1].id, "a");
        assert_eq!(snap.last_updated, now);
    }

    #[test]
    fn empty_feed_yields_valid_snapshot() {
        let now = Utc.with_ymd_and_hms(2024, 4, 28, 19, 0, 0).unwrap();
        assert_eq!(aggregate(Vec::new(), now), Snapshot::empty(now));
    }

    #[test]
    fn publish_replaces_wholesale() {
        let now = Utc.with_ymd_and_hms(2024, 4, 28, 19, 0, 0).unwrap();
        let handle = SnapshotHandle::new(Snapshot::empty(now));
        let reader = handle.clone();
        handle.publish(aggregate(
            vec![alert("x", "Flood Advisory", now + Duration::hours(1))],
            now,
        ));
        assert_eq!(reader.current().count, 1);
        handle.publish(Snapshot::empty(now + Duration::minutes(1)));
        assert_eq!(reader.current().count, 0);
        assert!(reader.current().alerts.is_empty());
    }
}
