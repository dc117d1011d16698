//! bfut: Binance USD-M futures strategy runner.
//!
//! `run` trades the configured strategies live (testnet by default).
//! `backtest` replays them over historical candles and prints the report.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via BFUT_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trade live (default)
    Run,
    /// Replay strategies over historical candles
    Backtest {
        /// Candle JSON file; overrides backtest.data_file
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before any TLS connection.
    bfut_ws::init_crypto();

    let args = Args::parse();
    bfut_telemetry::init_logging()?;
    info!("Starting bfut v{}", env!("CARGO_PKG_VERSION"));

    let config_path = bfut_bot::AppConfig::resolve_path(args.config);
    info!(config_path = %config_path, "Loading configuration");
    let config = bfut_bot::AppConfig::load(&config_path)?;
    info!(
        testnet = config.venue.testnet,
        strategies = config.strategies.len(),
        "Configuration loaded"
    );

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            let credentials = config
                .credentials()
                .context("API credentials are required for live trading")?;
            bfut_bot::Application::new(config, credentials)?.run().await?;
        }
        Command::Backtest { data } => {
            let report = bfut_bot::run_backtest(&config, data).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
