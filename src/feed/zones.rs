// src/feed/zones.rs
//! Point → zone ids, used to suggest a `zone_id` list when setting up a source.

use serde_json::Value;

use super::nws::NwsClient;
use super::{features_of, format_point, FeedError};

/// Ids of every forecast/county/fire zone containing the point, in feed order.
pub async fn lookup_zones(client: &NwsClient, lat: f64, lon: f64) -> Result<Vec<String>, FeedError> {
    let payload = client
        .get_json("/zones", &[("point", format_point(lat, lon))])
        .await?;

    let mut zones = Vec::new();
    for feature in features_of(payload) {
        if let Some(id) = feature.pointer("/properties/id").and_then(Value::as_str) {
            if !zones.iter().any(|z| z == id) {
                zones.push(id.to_string());
            }
        }
    }
    Ok(zones)
}

/// Comma-joined form accepted by `zone_id` in the source configuration.
pub async fn suggest_zone_list(client: &NwsClient, lat: f64, lon: f64) -> Result<String, FeedError> {
    Ok(lookup_zones(client, lat, lon).await?.join(","))
}
