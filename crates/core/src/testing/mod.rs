//! Testing utilities and mock implementations.
//!
//! Provides in-memory implementations of the [`DataSource`](crate::source::DataSource)
//! and [`Store`](crate::store::Store) traits so the dispatcher can be exercised
//! without a network or a database.
//!
//! # Example
//!
//! ```rust,ignore
//! use backfill_core::testing::{fixtures, MockDataSource, MockStore};
//!
//! let source = MockDataSource::new();
//! let store = MockStore::new();
//!
//! store.add_instrument("TCS", "NSE", 2953217).await;
//! source.set_bars(fixtures::daily_bars(start, 5)).await;
//! source.set_delay(Duration::from_millis(20)).await;
//!
//! // Run a backfill, then inspect what happened
//! assert_eq!(source.max_concurrent(), 1);
//! ```

mod mock_source;
mod mock_store;
mod probe;

pub use mock_source::{MockDataSource, RecordedFetch};
pub use mock_store::MockStore;
pub use probe::{ConcurrencyProbe, ProbeGuard};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};

    use crate::backfill::ResolvedInstrument;
    use crate::source::Bar;
    use crate::store::Instrument;

    /// Create an equity instrument row with reasonable defaults.
    pub fn instrument(symbol: &str, venue: &str, token: i64) -> Instrument {
        Instrument {
            instrument_token: token,
            exchange_token: token >> 8,
            tradingsymbol: symbol.to_string(),
            name: format!("{} LTD", symbol),
            exchange: venue.to_string(),
            segment: venue.to_string(),
            instrument_type: "EQ".to_string(),
            tick_size: 0.05,
            lot_size: 1,
            expiry: None,
            strike: None,
            last_price: 0.0,
        }
    }

    /// Create a resolved instrument.
    pub fn resolved(symbol: &str, venue: &str, instrument_id: i64) -> ResolvedInstrument {
        ResolvedInstrument {
            symbol: symbol.to_string(),
            venue: venue.to_string(),
            instrument_id,
        }
    }

    /// Create `count` consecutive daily bars starting at `start`.
    ///
    /// Timestamps sit at the 09:15 IST session open (03:45 UTC).
    pub fn daily_bars(start: NaiveDate, count: usize) -> Vec<Bar> {
        let open = NaiveTime::from_hms_opt(3, 45, 0).unwrap_or_default();
        (0..count)
            .map(|i| {
                let day = start + Duration::days(i as i64);
                let base = 100.0 + i as f64;
                Bar {
                    timestamp: Utc.from_utc_datetime(&day.and_time(open)),
                    open: base,
                    high: base + 2.0,
                    low: base - 1.0,
                    close: base + 1.0,
                    volume: 10_000 + i as i64 * 100,
                    oi: None,
                }
            })
            .collect()
    }
}
