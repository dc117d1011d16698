//! Backtest command: pick a candle source, replay, return the report.

use crate::config::AppConfig;
use crate::error::AppResult;
use bfut_backtest::{fetch_klines, load_klines_file, BacktestEngine, BacktestReport};
use bfut_core::Kline;
use bfut_venue::VenueClient;
use std::path::{Path, PathBuf};
use tracing::info;

/// Run the configured strategies over historical candles.
///
/// Candles come from `data` if given, else from `backtest.data_file`, else
/// from the public klines endpoint of the configured venue.
pub async fn run_backtest(config: &AppConfig, data: Option<PathBuf>) -> AppResult<BacktestReport> {
    let bt = &config.backtest;
    let klines = match data.or_else(|| bt.data_file.clone()) {
        Some(path) => load_file(&path, config)?,
        None => {
            // Public endpoint, no credentials.
            let venue = VenueClient::new(config.venue.venue_config(), None)?;
            info!(
                symbol = %bt.symbol,
                interval = %bt.interval,
                start_ms = ?bt.start_ms,
                end_ms = ?bt.end_ms,
                "Fetching candles"
            );
            fetch_klines(
                venue.rest().as_ref(),
                &bt.symbol,
                bt.interval,
                bt.start_ms,
                bt.end_ms,
            )
            .await?
        }
    };
    info!(bars = klines.len(), "Candles ready");

    let engine = BacktestEngine::new(bt.clone(), config.risk.clone());
    let report = engine.run(&config.strategies, &klines).await?;
    Ok(report)
}

fn load_file(path: &Path, config: &AppConfig) -> AppResult<Vec<Kline>> {
    info!(path = %path.display(), "Loading candles from file");
    Ok(load_klines_file(path, config.backtest.interval)?)
}
