//! Reduction of job results into a run summary.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{ErrorKind, JobResult};

/// A failed symbol as recorded in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolError {
    pub symbol: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Final outcome of a backfill run.
///
/// `succeeded + failed == total_jobs` always holds. Jobs abandoned by a
/// cancelled run are counted in `abandoned` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub total_jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_rows_written: usize,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Failures in completion order. A symbol repeats only if it was submitted twice.
    pub per_symbol_errors: Vec<SymbolError>,
    #[serde(default)]
    pub abandoned: usize,
    #[serde(default)]
    pub cancelled: bool,
}

impl RunSummary {
    /// Summary of a run that had nothing to do.
    pub fn empty() -> Self {
        SummaryBuilder::new().finish(Duration::ZERO)
    }

    /// Reduce a complete result set.
    pub fn from_results<'a>(
        results: impl IntoIterator<Item = &'a JobResult>,
        duration: Duration,
    ) -> Self {
        let mut builder = SummaryBuilder::new();
        for result in results {
            builder.record(result);
        }
        builder.finish(duration)
    }

    /// Error kind recorded for `symbol`, if it failed.
    pub fn error_for(&self, symbol: &str) -> Option<ErrorKind> {
        self.per_symbol_errors
            .iter()
            .find(|e| e.symbol == symbol)
            .map(|e| e.kind)
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

/// Incremental aggregator fed one result at a time, in any order.
#[derive(Debug)]
pub struct SummaryBuilder {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    succeeded: usize,
    failed: usize,
    rows: usize,
    errors: Vec<SymbolError>,
    abandoned: usize,
    cancelled: bool,
}

impl Default for SummaryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryBuilder {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            succeeded: 0,
            failed: 0,
            rows: 0,
            errors: Vec::new(),
            abandoned: 0,
            cancelled: false,
        }
    }

    pub fn record(&mut self, result: &JobResult) {
        match &result.error {
            None => {
                self.succeeded += 1;
                self.rows += result.rows_written;
            }
            Some(error) => {
                self.failed += 1;
                self.errors.push(SymbolError {
                    symbol: result.symbol.clone(),
                    kind: error.kind(),
                    message: error.to_string(),
                });
            }
        }
    }

    /// Note jobs that never produced a result because the run was cancelled.
    pub fn record_abandoned(&mut self, count: usize) {
        self.abandoned += count;
        self.cancelled = true;
    }

    pub fn finish(self, duration: Duration) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            total_jobs: self.succeeded + self.failed,
            succeeded: self.succeeded,
            failed: self.failed,
            total_rows_written: self.rows,
            duration,
            per_symbol_errors: self.errors,
            abandoned: self.abandoned,
            cancelled: self.cancelled,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
