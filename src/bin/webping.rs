//! Probe process: measures a target URL on a cadence and publishes each
//! measurement to the bus.

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use regex::Regex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webping::config::Config;
use webping::probe::{Prober, DEFAULT_CONNECT_TIMEOUT};
use webping::{bus, shutdown};

/// Produces metrics about website availability.
#[derive(Debug, Parser)]
#[command(name = "webping")]
struct Args {
    /// Target url
    url: String,
    /// Follow HTTP redirects
    #[arg(short = 'r', long)]
    follow_redirect: bool,
    /// A regular expression to search in the page content
    #[arg(short = 's', long)]
    search_in_content: Option<String>,
    /// Delay between metrics, in seconds (default 60)
    #[arg(short = 'd', long)]
    delay: Option<u64>,
    /// Config file location
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("webping=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;
    let settings = cfg
        .operation
        .resolve(args.delay, args.follow_redirect, args.search_in_content);

    let pattern = settings
        .search_in_content
        .as_deref()
        .map(Regex::new)
        .transpose()?;
    let prober = Prober::new(
        &args.url,
        settings.follow_redirect,
        pattern,
        DEFAULT_CONNECT_TIMEOUT,
    )?;
    let producer = bus::producer(&cfg.kafka)?;
    let token = shutdown::install();

    tracing::info!("Probing {} every {}s", args.url, settings.delay);
    loop {
        let metric = match prober.run_cycle().await {
            Ok(metric) => metric,
            Err(e) => {
                // The partial record is still availability signal; publish it.
                tracing::warn!("probe cycle aborted: {}", e.error);
                *e.metric
            }
        };
        bus::publish(&producer, &cfg.kafka.topic, &metric).await?;
        tracing::debug!(timestamp = %metric.timestamp, "published metric");

        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("Exiting");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_secs(settings.delay)) => {}
        }
    }
}
