//! Runs a single poll cycle for every configured source and prints the snapshots.
//!
//! ```text
//! poll-once                     # cycle every source from the default config
//! poll-once --fixture FILE      # use a saved FeatureCollection instead of weather.gov
//! poll-once --zones-for LAT,LON # print the zone ids covering a point and exit
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use nws_alerts::config::{self, parse_coordinates};
use nws_alerts::feed::nws::NwsClient;
use nws_alerts::feed::zones::suggest_zone_list;
use nws_alerts::notify::BannerBoard;
use nws_alerts::SourceFactory;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    nws_alerts::logging::init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cfg = config::load_default().context("loading configuration")?;

    match args.first().map(String::as_str) {
        Some("--zones-for") => {
            let Some(point) = args.get(1) else {
                bail!("usage: poll-once --zones-for LAT,LON");
            };
            let (lat, lon) = parse_coordinates(point).context("invalid LAT,LON")?;
            let client = NwsClient::new(&cfg.feed.endpoint, &cfg.feed.user_agent);
            println!("{}", suggest_zone_list(&client, lat, lon).await?);
            return Ok(());
        }
        Some("--fixture") => {
            let Some(path) = args.get(1) else {
                bail!("usage: poll-once --fixture FILE");
            };
            let body = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            let mut factory = SourceFactory::from_config(&cfg, BannerBoard::new())?;
            factory.feed = Arc::new(NwsClient::from_fixture_str(&body));
            factory.sequence = factory.sequence.immediate();
            run(&factory, &cfg).await
        }
        Some(other) => bail!("unknown argument {other:?}"),
        None => {
            let mut factory = SourceFactory::from_config(&cfg, BannerBoard::new())?;
            factory.sequence = factory.sequence.immediate();
            run(&factory, &cfg).await
        }
    }
}

async fn run(factory: &SourceFactory, cfg: &config::AppConfig) -> Result<()> {
    if cfg.sources.is_empty() {
        println!("no alert sources configured");
        return Ok(());
    }
    for mut source in factory.build_all(cfg) {
        let report = source.poll_once(Utc::now()).await;
        if let Some(e) = &report.error {
            println!("[{}] poll failed: {e}", report.source_id);
            continue;
        }
        println!(
            "[{}] {} active, {} new, {} cleared, {} repeat",
            report.source_id,
            report.snapshot.count,
            report.new.len(),
            report.cleared.len(),
            report.repeats
        );
        println!("{}", serde_json::to_string_pretty(&report.snapshot)?);
    }
    Ok(())
}
