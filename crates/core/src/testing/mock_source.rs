//! Mock data source for testing.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::probe::ConcurrencyProbe;
use crate::backfill::{Granularity, ResolvedInstrument};
use crate::source::{Bar, DataSource, UpstreamError};

/// A recorded fetch for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedFetch {
    pub instrument: ResolvedInstrument,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub granularity: Granularity,
    /// When the fetch started.
    pub started: Instant,
    /// When the fetch returned, if it did.
    pub finished: Option<Instant>,
}

/// Mock implementation of the DataSource trait.
///
/// Provides controllable behavior for testing:
/// - Return configurable bars, globally or per symbol
/// - Fail or panic for chosen symbols
/// - Simulate latency and measure overlapping fetches
///
/// # Example
///
/// ```rust,ignore
/// let source = MockDataSource::new();
/// source.set_bars(fixtures::daily_bars(start, 3)).await;
/// source.set_symbol_error("HDFC", UpstreamError::RateLimited).await;
///
/// // After a run
/// assert_eq!(source.fetch_count().await, 2);
/// assert!(source.max_concurrent() <= 4);
/// ```
#[derive(Debug, Default)]
pub struct MockDataSource {
    /// Bars returned for symbols without their own series.
    bars: Arc<RwLock<Vec<Bar>>>,
    /// Per-symbol series.
    symbol_bars: Arc<RwLock<HashMap<String, Vec<Bar>>>>,
    /// Symbols that fail with the given error.
    symbol_errors: Arc<RwLock<HashMap<String, UpstreamError>>>,
    /// Symbols whose fetch panics.
    panic_symbols: Arc<RwLock<HashSet<String>>>,
    /// Per-symbol latency, overriding `delay`.
    symbol_delays: Arc<RwLock<HashMap<String, Duration>>>,
    /// Simulated latency for every fetch.
    delay: Arc<RwLock<Option<Duration>>>,
    /// Recorded fetches, in start order.
    fetches: Arc<RwLock<Vec<RecordedFetch>>>,
    probe: ConcurrencyProbe,
}

impl MockDataSource {
    /// Create a new mock data source returning no bars.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bars returned for every symbol without its own series.
    pub async fn set_bars(&self, bars: Vec<Bar>) {
        *self.bars.write().await = bars;
    }

    /// Set the bars returned for one symbol.
    pub async fn set_symbol_bars(&self, symbol: &str, bars: Vec<Bar>) {
        self.symbol_bars
            .write()
            .await
            .insert(symbol.to_string(), bars);
    }

    /// Make every fetch for `symbol` fail.
    pub async fn set_symbol_error(&self, symbol: &str, error: UpstreamError) {
        self.symbol_errors
            .write()
            .await
            .insert(symbol.to_string(), error);
    }

    /// Make every fetch for `symbol` panic.
    pub async fn set_symbol_panic(&self, symbol: &str) {
        self.panic_symbols.write().await.insert(symbol.to_string());
    }

    /// Simulate latency on every fetch.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Simulate latency for one symbol.
    pub async fn set_symbol_delay(&self, symbol: &str, delay: Duration) {
        self.symbol_delays
            .write()
            .await
            .insert(symbol.to_string(), delay);
    }

    /// Get all recorded fetches.
    pub async fn recorded_fetches(&self) -> Vec<RecordedFetch> {
        self.fetches.read().await.clone()
    }

    /// Number of fetches started.
    pub async fn fetch_count(&self) -> usize {
        self.fetches.read().await.len()
    }

    /// Symbols fetched, in start order.
    pub async fn fetched_symbols(&self) -> Vec<String> {
        self.fetches
            .read()
            .await
            .iter()
            .map(|f| f.instrument.symbol.clone())
            .collect()
    }

    /// Highest number of fetches observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.probe.peak()
    }

    /// Fetches running right now.
    pub fn in_flight(&self) -> usize {
        self.probe.current()
    }

    /// Clear recorded fetches.
    pub async fn clear_history(&self) {
        self.fetches.write().await.clear();
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_series(
        &self,
        instrument: &ResolvedInstrument,
        from: NaiveDate,
        to: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<Bar>, UpstreamError> {
        let _guard = self.probe.enter();
        let symbol = instrument.symbol.as_str();

        let index = {
            let mut fetches = self.fetches.write().await;
            fetches.push(RecordedFetch {
                instrument: instrument.clone(),
                from,
                to,
                granularity,
                started: Instant::now(),
                finished: None,
            });
            fetches.len() - 1
        };

        let delay = match self.symbol_delays.read().await.get(symbol) {
            Some(delay) => Some(*delay),
            None => *self.delay.read().await,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(fetch) = self.fetches.write().await.get_mut(index) {
            fetch.finished = Some(Instant::now());
        }

        let should_panic = self.panic_symbols.read().await.contains(symbol);
        if should_panic {
            panic!("mock data source panic for {}", symbol);
        }

        if let Some(error) = self.symbol_errors.read().await.get(symbol) {
            return Err(error.clone());
        }

        if let Some(bars) = self.symbol_bars.read().await.get(symbol) {
            return Ok(bars.clone());
        }
        Ok(self.bars.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_mock_source_returns_configured_bars() {
        let source = MockDataSource::new();
        source
            .set_bars(fixtures::daily_bars(date("2024-01-01"), 2))
            .await;
        source
            .set_symbol_bars("INFY", fixtures::daily_bars(date("2024-01-01"), 5))
            .await;

        let tcs = fixtures::resolved("TCS", "NSE", 1);
        let infy = fixtures::resolved("INFY", "NSE", 2);
        let range = (date("2024-01-01"), date("2024-01-10"));

        let bars = source
            .fetch_series(&tcs, range.0, range.1, Granularity::Day)
            .await
            .unwrap();
        assert_eq!(bars.len(), 2);
        let bars = source
            .fetch_series(&infy, range.0, range.1, Granularity::Day)
            .await
            .unwrap();
        assert_eq!(bars.len(), 5);

        assert_eq!(source.fetched_symbols().await, vec!["TCS", "INFY"]);
        let fetches = source.recorded_fetches().await;
        assert!(fetches.iter().all(|f| f.finished.is_some()));
    }

    #[tokio::test]
    async fn test_mock_source_symbol_error() {
        let source = MockDataSource::new();
        source
            .set_symbol_error("SBIN", UpstreamError::Network("reset".into()))
            .await;

        let err = source
            .fetch_series(
                &fixtures::resolved("SBIN", "NSE", 3),
                date("2024-01-01"),
                date("2024-01-02"),
                Granularity::Day,
            )
            .await
            .unwrap_err();
        assert_eq!(err, UpstreamError::Network("reset".into()));
        assert_eq!(source.in_flight(), 0);
    }
}
