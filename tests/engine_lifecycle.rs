// tests/engine_lifecycle.rs
//
// Full poll cycles through `AlertSource`: classification, retracts, history writes and
// failure handling, with a scripted feed and recording channels.

mod common;

use std::sync::Arc;

use common::{feature, hours, t0, Recorder, ScriptedFeed};
use nws_alerts::config::{NotifyPolicy, Selector, SourceConfig};
use nws_alerts::history::MemoryBackend;
use nws_alerts::notify::voice::CriticalSequence;
use nws_alerts::notify::{ChannelHandle, ChannelSet};
use nws_alerts::{AlertSource, ClearReason};

struct Rig {
    feed: Arc<ScriptedFeed>,
    backend: Arc<MemoryBackend>,
    banner: Arc<Recorder>,
    phone: Arc<Recorder>,
    speaker: Arc<Recorder>,
    source: AlertSource,
}

fn rig() -> Rig {
    let feed = ScriptedFeed::new();
    let backend = Arc::new(MemoryBackend::new());
    let banner = Recorder::new("banner", true);
    let phone = Recorder::new("phone", true);
    let speaker = Recorder::new("kitchen", false);

    let mut cfg = SourceConfig::new(
        "home",
        Selector::Zones {
            zones: vec!["TXZ192".into()],
        },
    );
    cfg.notify = NotifyPolicy {
        persistent_notifications: true,
        announce_types: vec!["Flood Warning".into()],
        send_critical_types: vec!["Tornado Warning".into()],
        send_types: vec!["Flood Warning".into()],
        announce_window: nws_alerts::window::TimeWindow::all_day(),
        send_window: nws_alerts::window::TimeWindow::all_day(),
        ..NotifyPolicy::default()
    };
    let channels = ChannelSet {
        banner: Some(banner.clone() as ChannelHandle),
        voice: vec![speaker.clone() as ChannelHandle],
        critical_push: vec![phone.clone() as ChannelHandle],
        push: vec![phone.clone() as ChannelHandle],
        ..ChannelSet::default()
    };
    let source = AlertSource::new(
        cfg,
        feed.clone(),
        None,
        backend.clone(),
        channels,
        CriticalSequence::default().immediate(),
    );
    Rig {
        feed,
        backend,
        banner,
        phone,
        speaker,
        source,
    }
}

#[tokio::test]
async fn same_feed_twice_is_new_then_repeat() {
    let mut r = rig();
    r.feed.push(vec![feature("a", "Flood Warning", t0() + hours(1))]);

    let first = r.source.poll_once(t0()).await;
    assert_eq!(first.new.len(), 1);
    assert_eq!(r.banner.sent_tags(), first.new);
    assert_eq!(r.phone.sent_tags(), first.new);
    assert_eq!(r.speaker.sent_tags(), first.new);
    assert_eq!(r.backend.save_count(), 1);
    let stored = r.backend.record("home").unwrap();

    let second = r.source.poll_once(t0() + chrono::Duration::minutes(1)).await;
    assert!(second.new.is_empty());
    assert_eq!(second.repeats, 1);
    assert_eq!(r.banner.calls().len(), 1, "no second notification");
    assert_eq!(r.backend.save_count(), 1, "unchanged history is not rewritten");
    assert_eq!(r.backend.record("home").unwrap(), stored);
}

#[tokio::test]
async fn new_and_already_expired_then_cleared() {
    let mut r = rig();
    r.feed.push(vec![
        feature("x", "Flood Warning", t0() + hours(1)),
        feature("y", "Flood Warning", t0() - hours(1)),
    ]);

    let report = r.source.poll_once(t0()).await;
    assert_eq!(report.snapshot.count, 2, "snapshot lists everything in the feed");
    assert_eq!(report.new.len(), 1);
    assert_eq!(report.already_expired, 1);
    let x_id = report.new[0].clone();
    assert_eq!(r.source.engine().history().len(), 1);
    assert!(r.source.engine().history().contains(&x_id));

    r.feed.push(vec![]);
    let report = r.source.poll_once(t0() + hours(2)).await;
    assert_eq!(report.cleared, vec![(x_id.clone(), ClearReason::Removed)]);
    assert!(r.source.engine().history().is_empty());
    assert_eq!(r.banner.retracted(), vec![x_id.clone()]);
    // phone is on both push routes but is retracted once
    assert_eq!(r.phone.retracted(), vec![x_id]);
    assert!(r.speaker.retracted().is_empty());
    assert!(r.backend.record("home").unwrap().is_empty());
}

#[tokio::test]
async fn expired_history_entry_is_cleared_while_still_listed() {
    let mut r = rig();
    let page = vec![feature("x", "Flood Warning", t0() + hours(1))];
    r.feed.push(page.clone());
    let first = r.source.poll_once(t0()).await;
    let x_id = first.new[0].clone();

    r.feed.push(page);
    let later = r.source.poll_once(t0() + hours(1)).await;
    assert_eq!(later.cleared, vec![(x_id.clone(), ClearReason::Expired)]);
    assert_eq!(later.already_expired, 1);
    assert_eq!(r.banner.retracted(), vec![x_id]);
    assert!(later.new.is_empty());
}

#[tokio::test]
async fn feed_failure_changes_nothing() {
    let mut r = rig();
    r.feed.push(vec![feature("x", "Flood Warning", t0() + hours(3))]);
    r.source.poll_once(t0()).await;
    let published = r.source.snapshot().current();
    let saves = r.backend.save_count();
    r.banner.reset();

    r.feed.push_failure();
    let failed = r.source.poll_once(t0() + hours(1)).await;
    assert!(failed.error.is_some());
    assert_eq!(failed.snapshot.count, 0);
    assert_eq!(r.source.snapshot().current(), published);
    assert_eq!(r.source.engine().history().len(), 1);
    assert_eq!(r.backend.save_count(), saves);
    assert!(r.banner.calls().is_empty());
}

#[tokio::test]
async fn failed_save_is_retried_next_cycle() {
    let mut r = rig();
    r.backend.set_fail_writes(true);
    r.feed.push(vec![feature("x", "Flood Warning", t0() + hours(3))]);

    let first = r.source.poll_once(t0()).await;
    assert!(!first.persisted);
    assert_eq!(first.new.len(), 1);
    assert!(r.backend.record("home").is_none());

    r.backend.set_fail_writes(false);
    let second = r.source.poll_once(t0() + chrono::Duration::minutes(1)).await;
    assert!(second.persisted);
    assert!(second.new.is_empty(), "in-memory history still suppresses the repeat");
    assert_eq!(r.backend.record("home").unwrap().len(), 1);
}

#[tokio::test]
async fn critical_push_and_unbounded_alerts() {
    let mut r = rig();
    let mut unbounded = feature("u", "Tornado Warning", t0() + hours(1));
    unbounded["properties"]
        .as_object_mut()
        .unwrap()
        .remove("expires");
    r.feed.push(vec![
        unbounded,
        feature("t", "Tornado Warning", t0() + hours(1)),
    ]);

    let report = r.source.poll_once(t0()).await;
    assert_eq!(report.unbounded, 1);
    assert_eq!(report.new.len(), 1);
    let calls = r.phone.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        common::Call::Send(n) => assert!(n.critical),
        other => panic!("unexpected call {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_ids_notify_once() {
    let mut r = rig();
    r.feed.push(vec![
        feature("dup", "Flood Warning", t0() + hours(1)),
        feature("dup", "Flood Warning", t0() + hours(5)),
    ]);
    let report = r.source.poll_once(t0()).await;
    assert_eq!(report.new.len(), 1);
    assert_eq!(r.banner.sent_tags().len(), 1);
}
