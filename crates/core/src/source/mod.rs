//! Historical data source abstraction.
//!
//! This module provides a `DataSource` trait for fetching OHLCV series for a
//! resolved instrument, and the Kite Connect implementation.

mod kite;

pub use kite::{request_windows, KiteDataSource};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backfill::{Granularity, ResolvedInstrument};

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    /// Open interest, only reported for derivatives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oi: Option<i64>,
}

/// Errors from the upstream data provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Provider rejected the request for exceeding its rate limit.
    #[error("rate limited by upstream")]
    RateLimited,

    /// Credentials missing, invalid or expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Transport-level failure (connect, timeout, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// Non-success response not covered above.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Response body could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Fetches historical series from an upstream provider.
///
/// Implementations do not retry; a failed fetch fails the job.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Name of this data source, for logs.
    fn name(&self) -> &str;

    /// Fetch every bar for `instrument` between `from` and `to` (inclusive).
    async fn fetch_series(
        &self,
        instrument: &ResolvedInstrument,
        from: NaiveDate,
        to: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<Bar>, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_display() {
        assert_eq!(UpstreamError::RateLimited.to_string(), "rate limited by upstream");
        let err = UpstreamError::Api {
            status: 500,
            message: "internal".into(),
        };
        assert_eq!(err.to_string(), "API error (HTTP 500): internal");
    }

    #[test]
    fn test_bar_serialization_skips_missing_oi() {
        let bar = Bar {
            timestamp: "2024-01-02T03:45:00Z".parse().unwrap(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 100,
            oi: None,
        };
        let json = serde_json::to_string(&bar).unwrap();
        assert!(!json.contains("oi"));
        let parsed: Bar = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, bar);
    }
}
