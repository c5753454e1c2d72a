//! Connector binary.
//!
//! Loads the YAML configuration (path from `--config` or `CONFIG_FILE`),
//! initialises JSON logging and the Prometheus recorder, and runs the
//! supervisor until a termination signal or a fatal error.

use canale_connector::config::Config;
use canale_connector::Connector;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "canale")]
#[command(about = "MongoDB to NATS JetStream change-data-capture bridge")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE", default_value = "connector.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut cfg = Config::load(&args.config)?;
    cfg.validate_and_set_defaults()?;

    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.connector.log.level)),
        )
        .init();

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("could not install metrics recorder: {e}"))?;
    canale_core::metrics::init_metrics();

    info!(version = env!("CARGO_PKG_VERSION"), "starting connector");

    let connector = Connector::new(cfg, metrics_handle).await?;
    connector.run().await?;

    info!("connector stopped gracefully");
    Ok(())
}
