// src/feed/nws.rs
use async_trait::async_trait;
use metrics::histogram;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde_json::Value;

use super::{features_of, FeedClient, FeedError, FeedQuery, RawRecord};

pub const DEFAULT_ENDPOINT: &str = "https://api.weather.gov";
pub const DEFAULT_USER_AGENT: &str = "nws-alerts";

/// weather.gov alert client. Fixture mode serves a canned FeatureCollection for tests
/// and offline runs.
pub struct NwsClient {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        endpoint: String,
        user_agent: String,
        client: reqwest::Client,
    },
}

impl NwsClient {
    pub fn new(endpoint: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            mode: Mode::Http {
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
                user_agent: user_agent.into(),
                client: reqwest::Client::new(),
            },
        }
    }

    pub fn from_fixture_str(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    /// GET `{endpoint}{path}` with the identification headers the feed requires.
    pub(crate) async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, FeedError> {
        match &self.mode {
            Mode::Fixture(body) => Ok(serde_json::from_str(body)?),
            Mode::Http {
                endpoint,
                user_agent,
                client,
            } => {
                let url = format!("{endpoint}{path}");
                tracing::debug!(%url, ?query, "requesting weather.gov");
                let t0 = std::time::Instant::now();

                let resp = client
                    .get(&url)
                    .query(query)
                    .header(USER_AGENT, user_agent.as_str())
                    .header(ACCEPT, "application/geo+json")
                    .send()
                    .await?;
                let status = resp.status();
                let body = resp.text().await?;

                histogram!("nws_feed_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

                if !status.is_success() {
                    return Err(FeedError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Ok(serde_json::from_str(&body)?)
            }
        }
    }
}

#[async_trait]
impl FeedClient for NwsClient {
    async fn fetch_active_alerts(&self, query: &FeedQuery) -> Result<Vec<RawRecord>, FeedError> {
        let (key, value) = query.query_pair();
        let payload = self.get_json("/alerts/active", &[(key, value)]).await?;
        Ok(features_of(payload))
    }

    fn name(&self) -> &'static str {
        "weather.gov"
    }
}
