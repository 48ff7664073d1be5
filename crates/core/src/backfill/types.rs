//! Types for the backfill orchestrator.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::UpstreamError;
use crate::store::StoreError;

/// Bar size requested from the data source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Granularity {
    #[serde(rename = "minute")]
    Minute,
    #[serde(rename = "5minute")]
    FiveMinute,
    #[serde(rename = "15minute")]
    FifteenMinute,
    #[default]
    #[serde(rename = "day")]
    Day,
}

impl Granularity {
    /// Interval name as used by the upstream API and the bars table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::FiveMinute => "5minute",
            Granularity::FifteenMinute => "15minute",
            Granularity::Day => "day",
        }
    }

    /// Widest date span (in days) a single upstream request may cover.
    pub fn max_request_span_days(&self) -> i64 {
        match self {
            Granularity::Minute => 60,
            Granularity::FiveMinute => 100,
            Granularity::FifteenMinute => 200,
            Granularity::Day => 2000,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "minute" => Ok(Granularity::Minute),
            "5minute" => Ok(Granularity::FiveMinute),
            "15minute" => Ok(Granularity::FifteenMinute),
            "day" => Ok(Granularity::Day),
            other => Err(format!(
                "unknown granularity '{}' (expected minute, 5minute, 15minute or day)",
                other
            )),
        }
    }
}

/// One unit of backfill work for a single symbol.
///
/// Jobs are immutable once built; the dispatcher consumes each one exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    symbol: String,
    from: NaiveDate,
    to: NaiveDate,
    granularity: Granularity,
    dry_run: bool,
}

impl Job {
    pub fn new(
        symbol: impl Into<String>,
        from: NaiveDate,
        to: NaiveDate,
        granularity: Granularity,
        dry_run: bool,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            from,
            to,
            granularity,
            dry_run,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Caller-facing description of a whole backfill run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillRequest {
    pub symbols: Vec<String>,
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default)]
    pub granularity: Granularity,
    pub max_concurrency: usize,
    #[serde(default)]
    pub dry_run: bool,
}

impl BackfillRequest {
    /// Expand the request into one job per symbol, in the given order.
    ///
    /// Duplicated symbols produce duplicated jobs.
    pub fn jobs(&self) -> Vec<Job> {
        self.symbols
            .iter()
            .map(|symbol| Job::new(symbol.trim(), self.from, self.to, self.granularity, self.dry_run))
            .collect()
    }
}

/// A symbol resolved to an instrument on a specific venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInstrument {
    pub symbol: String,
    pub venue: String,
    pub instrument_id: i64,
}

/// Coarse classification of a failure, as reported in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Upstream,
    Persistence,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a run before any job starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackfillError {
    /// The admission gate needs at least one slot.
    #[error("invalid max_concurrency {0}: must be at least 1")]
    InvalidConcurrency(usize),

    /// A job's range starts after it ends.
    #[error("invalid date range for {symbol}: from {from} is after to {to}")]
    InvalidDateRange {
        symbol: String,
        from: NaiveDate,
        to: NaiveDate,
    },

    /// A request's range starts after it ends.
    #[error("invalid date range: from {from} is after to {to}")]
    InvertedRange { from: NaiveDate, to: NaiveDate },

    /// A job was submitted without a symbol.
    #[error("job at position {0} has an empty symbol")]
    EmptySymbol(usize),

    /// The resolver has no venue to try.
    #[error("no venues configured for instrument resolution")]
    NoVenues,
}

impl BackfillError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

/// Errors captured into a single job's result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// No venue knows the symbol.
    #[error("instrument not found for {symbol} on venues [{}]", venues.join(", "))]
    NotFound { symbol: String, venues: Vec<String> },

    /// The data source failed.
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// The store failed to persist the series.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// The job's task panicked.
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::NotFound { .. } => ErrorKind::NotFound,
            JobError::Upstream(_) => ErrorKind::Upstream,
            JobError::Persistence(_) => ErrorKind::Persistence,
            JobError::Panicked(_) => ErrorKind::Internal,
        }
    }
}

/// Outcome of one job. Exactly one is produced per dispatched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub symbol: String,
    pub rows_written: usize,
    pub error: Option<JobError>,
}

impl JobResult {
    pub fn success(symbol: impl Into<String>, rows_written: usize) -> Self {
        Self {
            symbol: symbol.into(),
            rows_written,
            error: None,
        }
    }

    pub fn failure(symbol: impl Into<String>, error: JobError) -> Self {
        Self {
            symbol: symbol.into(),
            rows_written: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
