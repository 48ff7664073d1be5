//! Kite Connect historical candles backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::backfill::{Granularity, ResolvedInstrument};
use crate::config::KiteConfig;
use crate::metrics;
use crate::store::Instrument;

use super::{Bar, DataSource, UpstreamError};

/// Split `[from, to]` into consecutive windows no wider than the upstream
/// accepts for `granularity`. Both ends of every window are inclusive.
pub fn request_windows(
    from: NaiveDate,
    to: NaiveDate,
    granularity: Granularity,
) -> Vec<(NaiveDate, NaiveDate)> {
    let span = TimeDelta::days(granularity.max_request_span_days() - 1);
    let mut windows = Vec::new();
    let mut start = from;

    while start <= to {
        let end = (start + span).min(to);
        windows.push((start, end));
        start = end + TimeDelta::days(1);
    }

    windows
}

/// Kite Connect implementation of [`DataSource`].
pub struct KiteDataSource {
    client: Client,
    config: KiteConfig,
}

impl KiteDataSource {
    /// Create a new data source with the given configuration.
    pub fn new(config: KiteConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("X-Kite-Version", "3").header(
            "Authorization",
            format!("token {}:{}", self.config.api_key, self.config.access_token),
        )
    }

    fn build_historical_url(
        &self,
        instrument_id: i64,
        from: NaiveDate,
        to: NaiveDate,
        granularity: Granularity,
    ) -> String {
        format!(
            "{}/instruments/historical/{}/{}?from={}+00:00:00&to={}+23:59:59&oi=1",
            self.base_url(),
            instrument_id,
            granularity.as_str(),
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d"),
        )
    }

    /// Fetch a single window of candles.
    async fn fetch_window(
        &self,
        instrument: &ResolvedInstrument,
        from: NaiveDate,
        to: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<Bar>, UpstreamError> {
        let url = self.build_historical_url(instrument.instrument_id, from, to, granularity);
        debug!(
            symbol = %instrument.symbol,
            %from,
            %to,
            interval = granularity.as_str(),
            "Fetching candles"
        );

        let start = Instant::now();
        let result = self.get(&url).await;
        metrics::record_upstream_request("historical", &result, start.elapsed());

        let response: HistoricalResponse = serde_json::from_str(&result?)
            .map_err(|e| UpstreamError::InvalidResponse(format!("failed to parse candles: {}", e)))?;

        if response.status != "success" {
            return Err(UpstreamError::InvalidResponse(format!(
                "unexpected status '{}'",
                response.status
            )));
        }

        let candles = response.data.map(|d| d.candles).unwrap_or_default();
        candles.into_iter().map(|c| parse_candle(&c)).collect()
    }

    /// Issue an authorized GET and return the body of a successful response.
    async fn get(&self, url: &str) -> Result<String, UpstreamError> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(map_error_status(status, &body))
        }
    }

    /// Download the instrument master for one exchange.
    pub async fn fetch_instruments(&self, exchange: &str) -> Result<Vec<Instrument>, UpstreamError> {
        let url = format!("{}/instruments/{}", self.base_url(), exchange);
        let start = Instant::now();
        let result = self.get(&url).await;
        metrics::record_upstream_request("instruments", &result, start.elapsed());

        parse_instruments_csv(&result?)
    }
}

#[async_trait]
impl DataSource for KiteDataSource {
    fn name(&self) -> &str {
        "kite"
    }

    async fn fetch_series(
        &self,
        instrument: &ResolvedInstrument,
        from: NaiveDate,
        to: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<Bar>, UpstreamError> {
        let mut bars = Vec::new();
        for (window_from, window_to) in request_windows(from, to, granularity) {
            let mut window = self
                .fetch_window(instrument, window_from, window_to, granularity)
                .await?;
            bars.append(&mut window);
        }
        Ok(bars)
    }
}

fn map_error_status(status: StatusCode, body: &str) -> UpstreamError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UpstreamError::Authentication(message),
        _ => UpstreamError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Parse one `[timestamp, open, high, low, close, volume, oi?]` candle.
fn parse_candle(candle: &[serde_json::Value]) -> Result<Bar, UpstreamError> {
    if candle.len() < 6 {
        return Err(UpstreamError::InvalidResponse(format!(
            "candle has {} fields, expected at least 6",
            candle.len()
        )));
    }

    let ts = candle[0]
        .as_str()
        .ok_or_else(|| UpstreamError::InvalidResponse("candle timestamp is not a string".into()))?;
    let timestamp = DateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%z")
        .map_err(|e| UpstreamError::InvalidResponse(format!("bad timestamp '{}': {}", ts, e)))?
        .with_timezone(&Utc);

    let number = |idx: usize, field: &str| {
        candle[idx]
            .as_f64()
            .ok_or_else(|| UpstreamError::InvalidResponse(format!("candle {} is not a number", field)))
    };

    Ok(Bar {
        timestamp,
        open: number(1, "open")?,
        high: number(2, "high")?,
        low: number(3, "low")?,
        close: number(4, "close")?,
        volume: number(5, "volume")? as i64,
        oi: candle.get(6).and_then(|v| v.as_f64()).map(|v| v as i64),
    })
}

fn parse_instruments_csv(body: &str) -> Result<Vec<Instrument>, UpstreamError> {
    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let mut instruments = Vec::new();

    for row in reader.deserialize::<InstrumentRow>() {
        let row = row.map_err(|e| UpstreamError::InvalidResponse(format!("bad instrument row: {}", e)))?;
        instruments.push(Instrument {
            instrument_token: row.instrument_token,
            exchange_token: row.exchange_token,
            tradingsymbol: row.tradingsymbol,
            name: row.name.unwrap_or_default(),
            exchange: row.exchange,
            segment: row.segment,
            instrument_type: row.instrument_type,
            tick_size: row.tick_size,
            lot_size: row.lot_size,
            expiry: row
                .expiry
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            strike: row.strike.filter(|s| *s > 0.0),
            last_price: row.last_price,
        });
    }

    Ok(instruments)
}

#[derive(Debug, Deserialize)]
struct HistoricalResponse {
    status: String,
    #[serde(default)]
    data: Option<HistoricalData>,
}

#[derive(Debug, Deserialize)]
struct HistoricalData {
    #[serde(default)]
    candles: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstrumentRow {
    instrument_token: i64,
    exchange_token: i64,
    tradingsymbol: String,
    name: Option<String>,
    last_price: f64,
    expiry: Option<String>,
    strike: Option<f64>,
    tick_size: f64,
    lot_size: i64,
    instrument_type: String,
    segment: String,
    exchange: String,
}
