//! Historical candle sources.
//!
//! Candles come from a JSON file or are fetched from the venue's `klines`
//! endpoint page by page. Two file layouts are accepted:
//!
//! - the venue's raw array rows (`[[openTime, "open", "high", ...], ...]`),
//! - a list of objects with named fields (`open_time`/`openTime`/`t`, ...).
//!
//! Either way the result is sorted by open time with duplicates removed.

use crate::error::{BacktestError, BacktestResult};
use bfut_core::{BoxFuture, Kline, KlineInterval, Price, Size};
use bfut_venue::{model::kline_from_row, RestClient, MAX_KLINES_PER_PAGE};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// Paged access to historical candles.
pub trait KlineSource: Send + Sync {
    fn klines(
        &self,
        symbol: String,
        interval: KlineInterval,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: u16,
    ) -> BoxFuture<'_, BacktestResult<Vec<Kline>>>;
}

impl KlineSource for RestClient {
    fn klines(
        &self,
        symbol: String,
        interval: KlineInterval,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: u16,
    ) -> BoxFuture<'_, BacktestResult<Vec<Kline>>> {
        Box::pin(async move {
            Ok(RestClient::klines(self, &symbol, interval, start_ms, end_ms, Some(limit)).await?)
        })
    }
}

/// Fetch candles in `[start_ms, end_ms]`, at most one page per request.
///
/// Without `start_ms` only the most recent page is fetched.
pub async fn fetch_klines(
    source: &dyn KlineSource,
    symbol: &str,
    interval: KlineInterval,
    start_ms: Option<i64>,
    end_ms: Option<i64>,
) -> BacktestResult<Vec<Kline>> {
    let symbol = symbol.to_uppercase();
    let step = interval.duration_ms();
    let mut klines: Vec<Kline> = Vec::new();
    let mut cursor = start_ms;
    let mut pages = 0usize;

    loop {
        let page = source
            .klines(symbol.clone(), interval, cursor, end_ms, MAX_KLINES_PER_PAGE)
            .await?;
        pages += 1;
        let page_len = page.len();
        let Some(last_open) = page.last().map(|k| k.open_time) else {
            break;
        };
        klines.extend(
            page.into_iter()
                .filter(|k| end_ms.map_or(true, |end| k.open_time <= end)),
        );
        debug!(symbol = %symbol, page = pages, rows = page_len, last_open, "Fetched candle page");

        let Some(prev) = cursor else {
            break;
        };
        let next = last_open + step;
        if page_len < usize::from(MAX_KLINES_PER_PAGE)
            || next <= prev
            || end_ms.map_or(false, |end| next > end)
        {
            break;
        }
        cursor = Some(next);
    }

    normalize(&mut klines);
    info!(symbol = %symbol, interval = %interval, candles = klines.len(), pages, "Historical candles fetched");
    Ok(klines)
}

pub fn load_klines_file(path: &Path, interval: KlineInterval) -> BacktestResult<Vec<Kline>> {
    let raw = std::fs::read_to_string(path)?;
    let klines = parse_klines_json(&raw, interval)?;
    info!(path = %path.display(), candles = klines.len(), "Historical candles loaded");
    Ok(klines)
}

/// Parse either file layout. `interval` fills in a missing close time.
pub fn parse_klines_json(raw: &str, interval: KlineInterval) -> BacktestResult<Vec<Kline>> {
    let rows: Vec<Value> = serde_json::from_str(raw)?;
    let mut klines = rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| match row {
            Value::Array(fields) => kline_from_row(&fields).map_err(BacktestError::from),
            Value::Object(_) => {
                let named: NamedKline = serde_json::from_value(row)?;
                Ok(named.into_kline(interval))
            }
            other => Err(BacktestError::InvalidData(format!(
                "row {i}: expected array or object, got {other}"
            ))),
        })
        .collect::<BacktestResult<Vec<_>>>()?;
    normalize(&mut klines);
    Ok(klines)
}

fn normalize(klines: &mut Vec<Kline>) {
    klines.sort_by_key(|k| k.open_time);
    klines.dedup_by_key(|k| k.open_time);
}

#[derive(Debug, Deserialize)]
struct NamedKline {
    #[serde(alias = "openTime", alias = "timestamp", alias = "t")]
    open_time: i64,
    #[serde(default, alias = "closeTime", alias = "T")]
    close_time: Option<i64>,
    #[serde(alias = "o")]
    open: Decimal,
    #[serde(alias = "h")]
    high: Decimal,
    #[serde(alias = "l")]
    low: Decimal,
    #[serde(alias = "c")]
    close: Decimal,
    #[serde(default, alias = "v")]
    volume: Decimal,
    #[serde(default, alias = "n")]
    trades: u64,
}

impl NamedKline {
    fn into_kline(self, interval: KlineInterval) -> Kline {
        Kline {
            open_time: self.open_time,
            close_time: self
                .close_time
                .unwrap_or(self.open_time + interval.duration_ms() - 1),
            open: Price::new(self.open),
            high: Price::new(self.high),
            low: Price::new(self.low),
            close: Price::new(self.close),
            volume: Size::new(self.volume),
            trades: self.trades,
            is_closed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_venue_rows() {
        let raw = r#"[
            [1700000060000,"101","102","100","101.5","3",1700000119999,"0",4,"0","0","0"],
            [1700000000000,"100","101","99","100.5","2",1700000059999,"0",3,"0","0","0"]
        ]"#;
        let klines = parse_klines_json(raw, KlineInterval::M1).unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].open_time, 1_700_000_000_000);
        assert_eq!(klines[1].close, Price::new(dec!(101.5)));
    }

    #[test]
    fn test_parse_named_objects_with_aliases() {
        let raw = r#"[
            {"timestamp":0,"open":"1","high":2,"low":"0.5","close":"1.5","volume":"10"},
            {"t":60000,"o":1.5,"h":2,"l":1,"c":1.8},
            {"open_time":60000,"open":9,"high":9,"low":9,"close":9}
        ]"#;
        let klines = parse_klines_json(raw, KlineInterval::M1).unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].close_time, 59_999);
        assert_eq!(klines[0].high, Price::new(dec!(2)));
        assert_eq!(klines[1].close, Price::new(dec!(1.8)));
        assert_eq!(klines[1].volume, Size::ZERO);
        assert!(klines.iter().all(|k| k.is_closed));
    }

    #[test]
    fn test_parse_rejects_scalars() {
        assert!(matches!(
            parse_klines_json("[1]", KlineInterval::M1),
            Err(BacktestError::InvalidData(_))
        ));
        assert!(matches!(
            parse_klines_json("{}", KlineInterval::M1),
            Err(BacktestError::Json(_))
        ));
    }
}
