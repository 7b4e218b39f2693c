//! Ingestion process: consumes the metrics topic into PostgreSQL.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tokio_postgres::NoTls;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webping::config::Config;
use webping::{bus, ingest, shutdown};

/// Uploads metrics from Kafka to PostgreSQL.
#[derive(Debug, Parser)]
#[command(name = "webping-ingest")]
struct Args {
    /// Config file location
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
    let pg = cfg.postgresql()?;

    let (client, connection) = pg.connect_config().connect(NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("postgres connection error: {}", e);
        }
    });

    let consumer = bus::consumer(&cfg.kafka)?;
    let token = shutdown::install();

    tracing::info!("Ingesting topic {} into {}", cfg.kafka.topic, pg.dbname);
    ingest::run(&consumer, &client, &token).await?;
    tracing::info!("Exiting");
    Ok(())
}
