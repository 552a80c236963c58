// src/config/source.rs
//! Validated per-source configuration: what to watch and where to route new alerts.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::window::TimeWindow;

pub const DEFAULT_INTERVAL_MINUTES: u64 = 1;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

/// Exactly one way of locating the alerts a source watches.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selector {
    Zones { zones: Vec<String> },
    Point { lat: f64, lon: f64 },
    Tracker { entity_id: String },
}

impl Selector {
    /// Human label for the kind of selector.
    pub fn configuration_type(&self) -> &'static str {
        match self {
            Selector::Zones { .. } => "Zone ID",
            Selector::Point { .. } => "GPS Location",
            Selector::Tracker { .. } => "Device Tracker",
        }
    }

    /// Display label used for the source when no name is configured.
    pub fn device_label(&self) -> String {
        match self {
            Selector::Zones { zones } => format!("NWS Alerts (Zone: {})", zones.join(",")),
            Selector::Point { lat, lon } => {
                format!("NWS Alerts (GPS: {})", crate::feed::format_point(*lat, *lon))
            }
            Selector::Tracker { entity_id } => format!("NWS Alerts (Tracker: {entity_id})"),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Zones { zones } => write!(f, "zone={}", zones.join(",")),
            Selector::Point { lat, lon } => {
                write!(f, "point={}", crate::feed::format_point(*lat, *lon))
            }
            Selector::Tracker { entity_id } => write!(f, "tracker={entity_id}"),
        }
    }
}

/// Routing rules for one source. Targets are channel names from `[[channel]]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotifyPolicy {
    pub persistent_notifications: bool,
    pub announce_critical_types: Vec<String>,
    pub announce_critical_targets: Vec<String>,
    pub announce_types: Vec<String>,
    pub announce_targets: Vec<String>,
    pub announce_window: TimeWindow,
    pub send_critical_types: Vec<String>,
    pub send_critical_targets: Vec<String>,
    pub send_types: Vec<String>,
    pub send_targets: Vec<String>,
    pub send_window: TimeWindow,
    /// Applies to voice and push routes; banners show everything.
    pub severities: Vec<String>,
    pub utc_offset_minutes: Option<i32>,
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            persistent_notifications: false,
            announce_critical_types: Vec::new(),
            announce_critical_targets: Vec::new(),
            announce_types: Vec::new(),
            announce_targets: Vec::new(),
            announce_window: TimeWindow::default(),
            send_critical_types: Vec::new(),
            send_critical_targets: Vec::new(),
            send_types: Vec::new(),
            send_targets: Vec::new(),
            send_window: TimeWindow::default(),
            severities: Vec::new(),
            utc_offset_minutes: None,
        }
    }
}

impl NotifyPolicy {
    /// Every channel name referenced by a route.
    pub fn referenced_channels(&self) -> impl Iterator<Item = &String> {
        self.announce_critical_targets
            .iter()
            .chain(&self.announce_targets)
            .chain(&self.send_critical_targets)
            .chain(&self.send_targets)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub selector: Selector,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub notify: NotifyPolicy,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, selector: Selector) -> Self {
        let name = selector.device_label();
        Self {
            id: id.into(),
            name,
            selector,
            interval: Duration::from_secs(DEFAULT_INTERVAL_MINUTES * 60),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            notify: NotifyPolicy::default(),
        }
    }
}

/// Lower-case, `[a-z0-9_]` only, runs of anything else folded into one `_`.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs() {
        assert_eq!(slugify("Home Alerts"), "home_alerts");
        assert_eq!(slugify("  AZZ540 / AZC013 "), "azz540_azc013");
        assert_eq!(slugify("--"), "");
    }

    #[test]
    fn labels_per_selector() {
        let z = Selector::Zones {
            zones: vec!["AZZ540".into(), "AZC013".into()],
        };
        assert_eq!(z.configuration_type(), "Zone ID");
        assert_eq!(z.device_label(), "NWS Alerts (Zone: AZZ540,AZC013)");

        let p = Selector::Point {
            lat: 30.267153,
            lon: -97.743061,
        };
        assert_eq!(p.device_label(), "NWS Alerts (GPS: 30.2672,-97.7431)");
        assert_eq!(p.to_string(), "point=30.2672,-97.7431");

        let t = Selector::Tracker {
            entity_id: "device_tracker.phone".into(),
        };
        assert_eq!(t.configuration_type(), "Device Tracker");
    }

    #[test]
    fn defaults() {
        let s = SourceConfig::new("home", Selector::Zones { zones: vec!["AZZ540".into()] });
        assert_eq!(s.interval, Duration::from_secs(60));
        assert_eq!(s.timeout, Duration::from_secs(120));
        assert_eq!(s.notify.send_window, TimeWindow::default());
    }
}
