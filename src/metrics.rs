use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe every metric the poller emits.
    /// Only one recorder can be installed per process.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!("nws_poll_cycles_total", "Poll cycles started, per source");
    describe_counter!(
        "nws_poll_failures_total",
        "Poll cycles that failed before classification (feed, timeout, tracker)"
    );
    describe_counter!(
        "nws_alerts_skipped_total",
        "Feed records dropped as malformed during normalization"
    );
    describe_counter!("nws_alerts_new_total", "Alerts classified as new and dispatched");
    describe_counter!(
        "nws_alerts_cleared_total",
        "Previously notified alerts that left the feed or expired"
    );
    describe_counter!(
        "nws_notifications_sent_total",
        "Successful channel calls, by channel and route"
    );
    describe_counter!(
        "nws_notifications_failed_total",
        "Failed channel calls, by channel and route"
    );
    describe_gauge!("nws_alerts_active", "Alerts in the latest snapshot, per source");
    describe_gauge!(
        "nws_poll_last_run_ts",
        Unit::Seconds,
        "Unix time of the last poll cycle, per source"
    );
    describe_histogram!(
        "nws_feed_fetch_ms",
        Unit::Milliseconds,
        "weather.gov request latency"
    );
}
