// src/feed/mod.rs
//! Upstream alert feed: query shapes, the client seam and its error type.

pub mod nws;
pub mod zones;

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// One GeoJSON feature exactly as the feed returned it.
pub type RawRecord = Value;

/// What to ask the feed for. A source resolves to exactly one of these per cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedQuery {
    Zones(Vec<String>),
    Point { lat: f64, lon: f64 },
}

impl FeedQuery {
    /// Query-string pair understood by `/alerts/active`.
    pub fn query_pair(&self) -> (&'static str, String) {
        match self {
            FeedQuery::Zones(zones) => ("zone", zones.join(",")),
            FeedQuery::Point { lat, lon } => ("point", format_point(*lat, *lon)),
        }
    }
}

impl fmt::Display for FeedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (key, value) = self.query_pair();
        write!(f, "{key}={value}")
    }
}

/// `lat,lon` limited to the four decimals the feed accepts, trailing zeros dropped.
pub fn format_point(lat: f64, lon: f64) -> String {
    format!("{},{}", format_coord(lat), format_coord(lon))
}

fn format_coord(v: f64) -> String {
    let s = format!("{v:.4}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("feed request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("feed payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("feed request timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait::async_trait]
pub trait FeedClient: Send + Sync {
    /// Active alerts for `query`. Never retries; the next scheduled cycle does.
    async fn fetch_active_alerts(&self, query: &FeedQuery) -> Result<Vec<RawRecord>, FeedError>;
    fn name(&self) -> &'static str;
}

/// `features` array of a FeatureCollection; anything else yields no records.
pub(crate) fn features_of(payload: Value) -> Vec<RawRecord> {
    match payload {
        Value::Object(mut map) => match map.remove("features") {
            Some(Value::Array(features)) => features,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn zone_query_is_comma_joined() {
        let q = FeedQuery::Zones(vec!["AZZ540".into(), "AZC013".into()]);
        assert_eq!(q.query_pair(), ("zone", "AZZ540,AZC013".to_string()));
    }

    #[test]
    fn point_query_trims_precision() {
        let q = FeedQuery::Point {
            lat: 30.267153,
            lon: -97.7430608,
        };
        assert_eq!(q.to_string(), "point=30.2672,-97.7431");
        assert_eq!(format_point(39.5, -98.0), "39.5,-98");
    }

    #[test]
    fn payload_without_features_is_empty() {
        assert!(features_of(json!({"type": "FeatureCollection"})).is_empty());
        assert_eq!(features_of(json!({"features": [{}, {}]})).len(), 2);
    }
}
