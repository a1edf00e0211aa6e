use anyhow::{Context, Result};
use clap::Parser;
use gate::client::GateClient;
use gate::config::{Config, DEFAULT_CONFIG_PATH};
use gate::decoder::LineSource;
use gate::notifier::NotifierHandle;
use gate::scanner::{ScanMode, ScannerHandle};
use gate::shutdown::ShutdownSignals;
use gate::station::{GateAction, Station};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gated", version, about = "Scans devices in and out at a campus gate")]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Overrides `station.mode` from the config file.
    #[arg(long, value_enum)]
    mode: Option<ScanMode>,

    /// Overrides `station.action` from the config file.
    #[arg(long, value_enum)]
    action: Option<GateAction>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gated=info,gate=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(mode) = args.mode {
        config.station.mode = mode;
    }
    if let Some(action) = args.action {
        config.station.action = action;
    }

    info!(
        "Starting gated v{} ({:?}, {:?})",
        env!("CARGO_PKG_VERSION"),
        config.station.mode,
        config.station.action
    );

    let shutdown = ShutdownSignals::new();
    let api = GateClient::new(config.api.url.clone(), config.api.token.clone())
        .context("failed to build api client")?;
    let notifier = NotifierHandle::new(
        shutdown.clone(),
        config.slack.as_ref().map(|slack| slack.webhook_url.clone()),
    );
    let source = LineSource::new(config.decoder.source.clone());
    let (scanner, codes) = ScannerHandle::new(
        shutdown.clone(),
        Box::new(source),
        config.decoder.sample_interval(),
        config.decoder.debounce_window(),
    );

    let station = Station::new(
        Arc::new(api),
        notifier,
        scanner.clone(),
        config.station.mode,
        config.station.action,
        config.station.rearm,
    );

    scanner.start(config.station.mode).await?;
    let station = tokio::spawn(station.run(codes, shutdown.clone()));

    shutdown.wait_for_signal().await;
    scanner.close().await;
    _ = station.await;

    info!("gated stopped");
    Ok(())
}
