// tests/history_restart.rs
//
// History written by one process instance suppresses notifications in the next one.

mod common;

use std::sync::Arc;

use common::{feature, hours, t0, Recorder, ScriptedFeed};
use nws_alerts::config::{NotifyPolicy, Selector, SourceConfig};
use nws_alerts::history::{HistoryBackend, JsonFileBackend, MemoryBackend};
use nws_alerts::notify::voice::CriticalSequence;
use nws_alerts::notify::{ChannelHandle, ChannelSet};
use nws_alerts::{AlertSource, PollError};

fn source(
    id: &str,
    backend: Arc<dyn HistoryBackend>,
    feed: Arc<ScriptedFeed>,
    banner: Arc<Recorder>,
) -> AlertSource {
    let mut cfg = SourceConfig::new(
        id,
        Selector::Point {
            lat: 30.2672,
            lon: -97.7431,
        },
    );
    cfg.notify = NotifyPolicy {
        persistent_notifications: true,
        ..NotifyPolicy::default()
    };
    AlertSource::new(
        cfg,
        feed,
        None,
        backend,
        ChannelSet {
            banner: Some(banner as ChannelHandle),
            ..ChannelSet::default()
        },
        CriticalSequence::default().immediate(),
    )
}

#[tokio::test]
async fn restart_does_not_renotify() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn HistoryBackend> = Arc::new(JsonFileBackend::new(dir.path()));
    let page = vec![feature("x", "Flood Warning", t0() + hours(4))];

    let feed = ScriptedFeed::new();
    feed.push(page.clone());
    let banner = Recorder::new("banner", true);
    let mut first = source("austin", backend.clone(), feed, banner.clone());
    let report = first.poll_once(t0()).await;
    assert_eq!(report.new.len(), 1);
    drop(first);

    let file = dir.path().join("nws_alerts_austin.json");
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
    assert_eq!(saved[&report.new[0]], "2024-04-28T21:00:00Z");

    let feed = ScriptedFeed::new();
    feed.push(page);
    let banner_after = Recorder::new("banner", true);
    let mut second = source("austin", backend, feed, banner_after.clone());
    let report = second.poll_once(t0() + hours(1)).await;
    assert!(report.new.is_empty());
    assert_eq!(report.repeats, 1);
    assert!(banner_after.calls().is_empty());
}

#[tokio::test]
async fn sources_keep_independent_histories() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn HistoryBackend> = Arc::new(JsonFileBackend::new(dir.path()));
    let page = vec![feature("x", "Flood Warning", t0() + hours(4))];

    let mut sources = Vec::new();
    for id in ["home", "office"] {
        let feed = ScriptedFeed::new();
        feed.push(page.clone());
        let banner = Recorder::new("banner", true);
        sources.push((source(id, backend.clone(), feed, banner.clone()), banner));
    }
    for (src, banner) in sources.iter_mut() {
        let report = src.poll_once(t0()).await;
        assert_eq!(report.new.len(), 1, "each source notifies on its own");
        assert_eq!(banner.sent_tags().len(), 1);
    }
    assert!(dir.path().join("nws_alerts_home.json").exists());
    assert!(dir.path().join("nws_alerts_office.json").exists());
}

#[tokio::test]
async fn corrupt_history_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("nws_alerts_austin.json"), "{not json").unwrap();
    let backend: Arc<dyn HistoryBackend> = Arc::new(JsonFileBackend::new(dir.path()));

    let feed = ScriptedFeed::new();
    feed.push(vec![feature("x", "Flood Warning", t0() + hours(4))]);
    let banner = Recorder::new("banner", true);
    let mut src = source("austin", backend, feed, banner.clone());
    let report = src.poll_once(t0()).await;
    assert_eq!(report.new.len(), 1);
    assert!(report.persisted);

    let repaired: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("nws_alerts_austin.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(repaired.as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn unreadable_history_holds_notifications_until_it_loads() {
    let backend = Arc::new(MemoryBackend::new());
    let page = vec![feature("x", "Flood Warning", t0() + hours(4))];

    // A previous run already notified x
    let feed = ScriptedFeed::new();
    feed.push(page.clone());
    let banner = Recorder::new("banner", true);
    let mut first = source("austin", backend.clone(), feed, banner.clone());
    assert_eq!(first.poll_once(t0()).await.new.len(), 1);
    drop(first);
    let stored = backend.record("austin").unwrap();

    backend.fail_loads(1);
    let feed = ScriptedFeed::new();
    feed.push(page);
    let banner = Recorder::new("banner", true);
    let mut second = source("austin", backend.clone(), feed, banner.clone());

    let report = second.poll_once(t0() + hours(1)).await;
    assert!(matches!(report.error, Some(PollError::History(_))));
    assert_eq!(report.snapshot.count, 1);
    assert!(banner.calls().is_empty());
    assert_eq!(backend.record("austin"), Some(stored));

    let report = second.poll_once(t0() + hours(2)).await;
    assert!(report.is_ok());
    assert!(report.new.is_empty());
    assert_eq!(report.repeats, 1);
    assert!(banner.calls().is_empty());
    assert_eq!(backend.load_count(), 3);
}
