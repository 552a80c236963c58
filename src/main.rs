//! NWS alert service: binary entrypoint.
//! Loads the configuration, starts one poller per alert source and serves the query API
//! and Prometheus metrics.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;

use nws_alerts::{api, config, logging, metrics::Metrics};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    logging::init_tracing();

    let cfg = config::load_default().context("loading configuration")?;
    let metrics = Metrics::init()?;

    let (supervisor, banners) = nws_alerts::start_from_config(&cfg).await?;
    let state = api::AppState::with_supervisor(supervisor, banners);

    let router = api::router(state).merge(metrics.router());

    Ok(router.into())
}
