//! Persistence for the instrument master and historical bars.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backfill::{Granularity, ResolvedInstrument};
use crate::source::Bar;

/// Errors from the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// A row of the instrument master, as published by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub instrument_token: i64,
    pub exchange_token: i64,
    pub tradingsymbol: String,
    pub name: String,
    pub exchange: String,
    pub segment: String,
    pub instrument_type: String,
    pub tick_size: f64,
    pub lot_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike: Option<f64>,
    pub last_price: f64,
}

/// Storage backend for the backfill.
///
/// Re-running a backfill only reports the same `rows_written` total when the
/// implementation upserts bars keyed by symbol and timestamp; the orchestrator
/// itself never deduplicates.
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up the instrument id for `symbol` on `venue`.
    ///
    /// Returns `Ok(None)` when the venue does not list the symbol.
    async fn lookup_instrument(&self, symbol: &str, venue: &str) -> Result<Option<i64>, StoreError>;

    /// Persist a series, returning the number of rows written.
    async fn write_series(
        &self,
        instrument: &ResolvedInstrument,
        granularity: Granularity,
        bars: &[Bar],
    ) -> Result<usize, StoreError>;
}
