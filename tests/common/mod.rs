// tests/common/mod.rs
//
// Shared helpers for integration tests: a scripted feed, a recording channel and a
// local HTTP server that records what it receives.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    routing::any,
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use nws_alerts::feed::{FeedClient, FeedError, FeedQuery, RawRecord};
use nws_alerts::notify::{Channel, Notice};

pub const FIXTURE: &str = include_str!("../fixtures/nws_active.json");

pub fn fixture_records() -> Vec<RawRecord> {
    let v: Value = serde_json::from_str(FIXTURE).expect("fixture json");
    v["features"].as_array().cloned().unwrap_or_default()
}

/// 2024-04-28 12:00 CDT.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 28, 17, 0, 0).unwrap()
}

/// Minimal upstream feature.
pub fn feature(upstream_id: &str, event: &str, expires: DateTime<Utc>) -> RawRecord {
    json!({
        "id": format!("https://api.weather.gov/alerts/{upstream_id}"),
        "properties": {
            "event": event,
            "severity": "Severe",
            "status": "Actual",
            "messageType": "Alert",
            "expires": expires.to_rfc3339(),
            "description": format!("{event} for the test area."),
        }
    })
}

pub fn hours(h: i64) -> Duration {
    Duration::hours(h)
}

/// Feed that serves queued pages in order, repeating the last one. `None` is a failure.
#[derive(Default)]
pub struct ScriptedFeed {
    pages: Mutex<VecDeque<Option<Vec<RawRecord>>>>,
    last: Mutex<Option<Vec<RawRecord>>>,
    pub queries: Mutex<Vec<FeedQuery>>,
}

impl ScriptedFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, page: Vec<RawRecord>) {
        self.pages.lock().push_back(Some(page));
    }

    pub fn push_failure(&self) {
        self.pages.lock().push_back(None);
    }
}

#[async_trait]
impl FeedClient for ScriptedFeed {
    async fn fetch_active_alerts(&self, query: &FeedQuery) -> Result<Vec<RawRecord>, FeedError> {
        self.queries.lock().push(query.clone());
        let next = self.pages.lock().pop_front();
        match next {
            Some(Some(page)) => {
                *self.last.lock() = Some(page.clone());
                Ok(page)
            }
            Some(None) => Err(FeedError::Status {
                status: 503,
                body: "upstream unavailable".into(),
            }),
            None => Ok(self.last.lock().clone().unwrap_or_default()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send(Notice),
    Retract(String),
}

pub struct Recorder {
    name: String,
    retracts: bool,
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    pub fn new(name: &str, retracts: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            retracts,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn sent_tags(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send(n) => Some(n.tag),
                _ => None,
            })
            .collect()
    }

    pub fn retracted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Retract(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl Channel for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_retract(&self) -> bool {
        self.retracts
    }

    async fn send(&self, notice: &Notice) -> Result<()> {
        self.calls.lock().push(Call::Send(notice.clone()));
        Ok(())
    }

    async fn retract(&self, tag: &str) -> Result<()> {
        self.calls.lock().push(Call::Retract(tag.to_string()));
        Ok(())
    }
}

/// One request as seen by `RecordingServer`.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl Seen {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone)]
struct ServerState {
    seen: Arc<Mutex<Vec<Seen>>>,
    fail_first: Arc<Mutex<usize>>,
    reply: Arc<Value>,
}

/// Local HTTP server on an ephemeral port that records every request and answers with a
/// fixed JSON body. The first `fail_first` requests get a 500.
pub struct RecordingServer {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl RecordingServer {
    pub async fn start(reply: Value, fail_first: usize) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let state = ServerState {
            seen: seen.clone(),
            fail_first: Arc::new(Mutex::new(fail_first)),
            reply: Arc::new(reply),
        };
        let app = Router::new()
            .fallback(any(record))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, seen }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

async fn record(State(state): State<ServerState>, req: Request) -> (StatusCode, axum::Json<Value>) {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, 1024 * 1024)
        .await
        .unwrap_or_default();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    state.seen.lock().push(Seen {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect(),
        body,
    });

    let mut remaining = state.fail_first.lock();
    if *remaining > 0 {
        *remaining -= 1;
        return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(json!({"error": "boom"})));
    }
    (StatusCode::OK, axum::Json((*state.reply).clone()))
}
