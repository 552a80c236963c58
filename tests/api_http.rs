// tests/api_http.rs
//
// HTTP-level tests for the query router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /sources, /sources/{id}, /sources/{id}/alerts
// - GET /banners, DELETE /banners/{source}/{tag}
// - DELETE /sources/{id} (supervised and read-only state)

mod common;

use std::sync::Arc;

use axum::{
    body::{self, Body},
    Router,
};
use http::{Request, StatusCode};
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use nws_alerts::api::{self, AppState};
use nws_alerts::config::{Selector, SourceConfig};
use nws_alerts::feed::nws::NwsClient;
use nws_alerts::history::MemoryBackend;
use nws_alerts::notify::voice::CriticalSequence;
use nws_alerts::notify::{BannerBoard, Channel, ChannelHandle, ChannelSet, Notice};
use nws_alerts::{AlertSource, SourceDirectory, Supervisor};

const BODY_LIMIT: usize = 1024 * 1024;

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Json::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, json)
}

/// One polled source with the fixture page and a banner board with one banner.
async fn test_app() -> (Router, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let banners = BannerBoard::new();

    let mut cfg = SourceConfig::new(
        "travis",
        Selector::Zones {
            zones: vec!["TXC453".into()],
        },
    );
    cfg.name = "Travis County".into();
    let mut source = AlertSource::new(
        cfg,
        Arc::new(NwsClient::from_fixture_str(common::FIXTURE)),
        None,
        backend.clone(),
        ChannelSet {
            banner: Some(Arc::new(banners.for_source("travis")) as ChannelHandle),
            ..ChannelSet::default()
        },
        CriticalSequence::default().immediate(),
    );
    let report = source.poll_once(common::t0()).await;
    assert!(report.is_ok());

    banners
        .for_source("travis")
        .send(&Notice {
            title: "Flood Warning In Effect".into(),
            body: "Headline: Flood Warning In Effect".into(),
            tag: "abc".into(),
            critical: false,
        })
        .await
        .expect("banner send");

    let directory = SourceDirectory::new();
    let mut supervisor = Supervisor::new(directory, backend.clone(), banners.clone());
    supervisor.spawn(source).unwrap();
    let state = AppState::with_supervisor(supervisor, banners);
    (api::router(state), backend)
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _) = test_app().await;
    let (status, body) = call(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Json::String("OK".into()));
}

#[tokio::test]
async fn sources_list_and_state() {
    let (app, _) = test_app().await;

    let (status, body) = call(&app, "GET", "/sources").await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().expect("array");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], "travis");
    assert_eq!(list[0]["name"], "Travis County");
    assert_eq!(list[0]["configuration_type"], "Zone ID");
    assert_eq!(list[0]["selector"], "zone=TXC453");

    let (status, body) = call(&app, "GET", "/sources/travis").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["count"].as_u64().is_some());
    assert!(body["last_updated"].is_string());

    let (status, _) = call(&app, "GET", "/sources/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn source_alerts_lists_normalized_alerts() {
    let (app, _) = test_app().await;
    let (status, body) = call(&app, "GET", "/sources/travis/alerts").await;
    assert_eq!(status, StatusCode::OK);
    let alerts = body.as_array().expect("array");
    assert!(!alerts.is_empty());
    assert!(alerts.iter().all(|a| a["id"].as_str().is_some_and(|s| s.len() == 36)));
    assert!(alerts[0]["display_text"]
        .as_str()
        .unwrap()
        .starts_with("Headline: "));
}

#[tokio::test]
async fn banners_list_and_dismiss() {
    let (app, _) = test_app().await;
    let (status, body) = call(&app, "GET", "/banners").await;
    assert_eq!(status, StatusCode::OK);
    let before = body.as_array().unwrap().len();
    assert!(before >= 1);
    assert!(body
        .as_array()
        .unwrap()
        .iter()
        .any(|b| b["tag"] == "abc" && b["source"] == "travis"));

    let (status, _) = call(&app, "DELETE", "/banners/travis/abc").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "DELETE", "/banners/travis/abc").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = call(&app, "GET", "/banners").await;
    assert_eq!(body.as_array().unwrap().len(), before - 1);
}

#[tokio::test]
async fn delete_source_stops_and_removes_history() {
    let (app, backend) = test_app().await;
    assert!(backend.record("travis").is_some());

    let (status, _) = call(&app, "DELETE", "/sources/travis").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(backend.record("travis").is_none());

    let (status, _) = call(&app, "GET", "/sources/travis").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = call(&app, "GET", "/banners").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn read_only_state_refuses_removal() {
    let app = api::router(AppState::read_only(SourceDirectory::new(), BannerBoard::new()));
    let (status, _) = call(&app, "DELETE", "/sources/travis").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, body) = call(&app, "GET", "/sources").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));
}
