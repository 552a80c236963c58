use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{Channel, Notice};

pub const MAX_ATTEMPTS: u8 = 8;

/// Mobile push via an HTTP notify service. Notifications carry the alert id as `tag`,
/// so a later `clear_notification` with the same tag removes them from the device.
#[derive(Clone)]
pub struct PushChannel {
    name: String,
    url: String,
    token: Option<String>,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl PushChannel {
    pub fn new(name: &str, url: &str, token: Option<String>, client: Client) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            token,
            client,
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }

    /// Attempts per call, clamped to 1..=MAX_ATTEMPTS.
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.clamp(1, MAX_ATTEMPTS);
        self
    }

    async fn post(&self, payload: &Value) -> Result<()> {
        post_with_retry(
            &self.client,
            &self.url,
            self.token.as_deref(),
            payload,
            self.timeout,
            self.max_retries,
        )
        .await
        .map_err(|e| anyhow!("push channel {}: {e}", self.name))
    }
}

/// Body of a push notification. Critical notices get the alarm-stream payload.
pub fn push_payload(notice: &Notice) -> Value {
    let data = if notice.critical {
        json!({
            "tag": notice.tag,
            "push": {
                "sound": { "name": "default", "critical": 1, "volume": 1.0 }
            },
            "ttl": 0,
            "priority": "high",
            "channel": "alarm_stream",
        })
    } else {
        json!({ "tag": notice.tag })
    };
    json!({
        "message": notice.body,
        "title": notice.title,
        "data": data,
    })
}

pub fn clear_payload(tag: &str) -> Value {
    json!({
        "message": "clear_notification",
        "data": { "tag": tag },
    })
}

#[async_trait]
impl Channel for PushChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_retract(&self) -> bool {
        true
    }

    async fn send(&self, notice: &Notice) -> Result<()> {
        self.post(&push_payload(notice)).await
    }

    async fn retract(&self, tag: &str) -> Result<()> {
        self.post(&clear_payload(tag)).await
    }
}

/// POST JSON, retrying non-2xx and transport errors with 500ms, 1s, 2s, ... backoff.
pub(crate) async fn post_with_retry(
    client: &Client,
    url: &str,
    token: Option<&str>,
    payload: &Value,
    timeout: Duration,
    max_retries: u8,
) -> Result<()> {
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        let mut req = client.post(url).timeout(timeout).json(payload);
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }

        let err = match req.send().await {
            Ok(rsp) => match rsp.error_for_status_ref() {
                Ok(_) => return Ok(()),
                Err(e) => anyhow!("HTTP error: {e}"),
            },
            Err(e) => anyhow!("request failed: {e}"),
        };

        if attempt >= max_retries {
            return Err(err);
        }
        tracing::debug!(%url, attempt, error = %err, "notify call failed, retrying");
        tokio::time::sleep(backoff(attempt)).await;
    }
}

/// Delay after failed attempt `attempt` (1-based), doubling from 500ms and capped at 64s.
fn backoff(attempt: u8) -> Duration {
    let exp = u32::from(attempt.saturating_sub(1)).min(7);
    Duration::from_millis(500u64 << exp)
}
