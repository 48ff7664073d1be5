//! Mock store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::probe::ConcurrencyProbe;
use crate::backfill::{Granularity, ResolvedInstrument};
use crate::source::Bar;
use crate::store::{Store, StoreError};

/// Series key: symbol and granularity.
type SeriesKey = (String, Granularity);

/// Mock implementation of the Store trait.
///
/// Instruments are keyed by (symbol, venue). Bars are upserted by timestamp
/// per symbol and granularity, so rewriting a series never duplicates rows.
///
/// # Example
///
/// ```rust,ignore
/// let store = MockStore::new();
/// store.add_instrument("RELIANCE", "NSE", 738561).await;
/// store.set_lookup_error("BSE", StoreError::Database("locked".into())).await;
///
/// // After a run
/// assert_eq!(store.bar_count("RELIANCE", Granularity::Day).await, 5);
/// ```
#[derive(Debug, Default)]
pub struct MockStore {
    instruments: Arc<RwLock<HashMap<(String, String), i64>>>,
    /// Lookups against these venues fail.
    lookup_errors: Arc<RwLock<HashMap<String, StoreError>>>,
    /// Writes for these symbols fail.
    write_errors: Arc<RwLock<HashMap<String, StoreError>>>,
    /// Recorded (symbol, venue) lookups, in call order.
    lookups: Arc<RwLock<Vec<(String, String)>>>,
    /// Persisted bars.
    series: Arc<RwLock<HashMap<SeriesKey, BTreeMap<DateTime<Utc>, Bar>>>>,
    writes: Arc<RwLock<usize>>,
    probe: ConcurrencyProbe,
}

impl MockStore {
    /// Create an empty mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// List `symbol` on `venue` with the given instrument id.
    pub async fn add_instrument(&self, symbol: &str, venue: &str, instrument_id: i64) {
        self.instruments
            .write()
            .await
            .insert((symbol.to_string(), venue.to_string()), instrument_id);
    }

    /// Make every lookup against `venue` fail.
    pub async fn set_lookup_error(&self, venue: &str, error: StoreError) {
        self.lookup_errors
            .write()
            .await
            .insert(venue.to_string(), error);
    }

    /// Make every write for `symbol` fail.
    pub async fn set_write_error(&self, symbol: &str, error: StoreError) {
        self.write_errors
            .write()
            .await
            .insert(symbol.to_string(), error);
    }

    /// Get all recorded lookups.
    pub async fn recorded_lookups(&self) -> Vec<(String, String)> {
        self.lookups.read().await.clone()
    }

    /// Number of `write_series` calls, including failed ones.
    pub async fn write_count(&self) -> usize {
        *self.writes.read().await
    }

    /// Distinct bars stored for a series.
    pub async fn bar_count(&self, symbol: &str, granularity: Granularity) -> usize {
        self.series
            .read()
            .await
            .get(&(symbol.to_string(), granularity))
            .map(|bars| bars.len())
            .unwrap_or(0)
    }

    /// Highest number of concurrent writes observed.
    pub fn max_concurrent_writes(&self) -> usize {
        self.probe.peak()
    }
}

#[async_trait]
impl Store for MockStore {
    async fn lookup_instrument(&self, symbol: &str, venue: &str) -> Result<Option<i64>, StoreError> {
        self.lookups
            .write()
            .await
            .push((symbol.to_string(), venue.to_string()));

        if let Some(error) = self.lookup_errors.read().await.get(venue) {
            return Err(error.clone());
        }

        Ok(self
            .instruments
            .read()
            .await
            .get(&(symbol.to_string(), venue.to_string()))
            .copied())
    }

    async fn write_series(
        &self,
        instrument: &ResolvedInstrument,
        granularity: Granularity,
        bars: &[Bar],
    ) -> Result<usize, StoreError> {
        let _guard = self.probe.enter();
        *self.writes.write().await += 1;

        if let Some(error) = self.write_errors.read().await.get(&instrument.symbol) {
            return Err(error.clone());
        }

        let mut series = self.series.write().await;
        let stored = series
            .entry((instrument.symbol.clone(), granularity))
            .or_default();
        for bar in bars {
            stored.insert(bar.timestamp, bar.clone());
        }
        Ok(bars.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_mock_store_upserts_by_timestamp() {
        let store = MockStore::new();
        let tcs = fixtures::resolved("TCS", "NSE", 2953217);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        let first = store
            .write_series(&tcs, Granularity::Day, &fixtures::daily_bars(start, 3))
            .await
            .unwrap();
        let second = store
            .write_series(&tcs, Granularity::Day, &fixtures::daily_bars(start, 3))
            .await
            .unwrap();

        assert_eq!(first, 3);
        assert_eq!(second, 3);
        assert_eq!(store.bar_count("TCS", Granularity::Day).await, 3);
        assert_eq!(store.bar_count("TCS", Granularity::Minute).await, 0);
        assert_eq!(store.write_count().await, 2);
    }

    #[tokio::test]
    async fn test_mock_store_lookup() {
        let store = MockStore::new();
        store.add_instrument("TCS", "NSE", 2953217).await;
        store
            .set_lookup_error("BSE", StoreError::Database("locked".into()))
            .await;

        assert_eq!(store.lookup_instrument("TCS", "NSE").await.unwrap(), Some(2953217));
        assert_eq!(store.lookup_instrument("INFY", "NSE").await.unwrap(), None);
        assert!(store.lookup_instrument("TCS", "BSE").await.is_err());
        assert_eq!(store.recorded_lookups().await.len(), 3);
    }
}
