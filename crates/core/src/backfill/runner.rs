//! Bounded-concurrency backfill dispatcher.
//!
//! Every job is admitted through a counting semaphore, runs in its own task,
//! and produces exactly one [`JobResult`]. Failures stay inside their job.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::source::DataSource;
use crate::store::Store;

use super::progress::{notify, NoopReporter, ProgressReporter};
use super::resolver::InstrumentResolver;
use super::summary::{RunSummary, SummaryBuilder};
use super::types::{BackfillError, BackfillRequest, Job, JobError, JobResult};

/// Everything a single job needs, cloned into its task.
#[derive(Clone)]
struct JobWorker {
    source: Arc<dyn DataSource>,
    store: Arc<dyn Store>,
    resolver: InstrumentResolver,
    reporter: Arc<dyn ProgressReporter>,
}

impl JobWorker {
    /// Run one job to completion, or return `None` if the run is cancelled first.
    async fn run(self, job: Job, cancel: CancellationToken) -> Option<JobResult> {
        let symbol = job.symbol().to_string();
        notify(|| self.reporter.on_job_start(&symbol));

        metrics::JOBS_IN_FLIGHT.inc();
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = AssertUnwindSafe(self.execute(&job)).catch_unwind() => Some(outcome),
        };
        metrics::JOBS_IN_FLIGHT.dec();

        let Some(outcome) = outcome else {
            debug!(symbol = %symbol, "Job abandoned by cancellation");
            notify(|| self.reporter.on_job_abandoned(&symbol));
            return None;
        };

        let result = match outcome {
            Ok(Ok(rows)) => JobResult::success(symbol, rows),
            Ok(Err(e)) => JobResult::failure(symbol, e),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(symbol = %symbol, panic = %message, "Job panicked");
                JobResult::failure(symbol, JobError::Panicked(message))
            }
        };

        metrics::record_job(result.is_success(), result.rows_written, started.elapsed());
        notify(|| self.reporter.on_job_finish(&result));
        Some(result)
    }

    /// Resolve, then fetch and persist unless the job is a dry run.
    async fn execute(&self, job: &Job) -> Result<usize, JobError> {
        let instrument = self.resolver.resolve(job.symbol()).await?;

        if job.is_dry_run() {
            info!(
                symbol = %instrument.symbol,
                venue = %instrument.venue,
                instrument_id = instrument.instrument_id,
                from = %job.from(),
                to = %job.to(),
                "[dry run] Would fetch {} bars",
                job.granularity()
            );
            return Ok(0);
        }

        debug!(
            symbol = %instrument.symbol,
            instrument_id = instrument.instrument_id,
            source = self.source.name(),
            "Fetching series"
        );
        let bars = self
            .source
            .fetch_series(&instrument, job.from(), job.to(), job.granularity())
            .await?;

        let rows = self
            .store
            .write_series(&instrument, job.granularity(), &bars)
            .await?;
        debug!(symbol = %instrument.symbol, bars = bars.len(), rows, "Series persisted");

        Ok(rows)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The backfill orchestrator.
pub struct Backfiller {
    source: Arc<dyn DataSource>,
    store: Arc<dyn Store>,
    resolver: InstrumentResolver,
    reporter: Arc<dyn ProgressReporter>,
}

impl Backfiller {
    /// Create a backfiller that resolves symbols on `venues`, in order.
    pub fn new(source: Arc<dyn DataSource>, store: Arc<dyn Store>, venues: Vec<String>) -> Self {
        let resolver = InstrumentResolver::new(Arc::clone(&store), venues);
        Self {
            source,
            store,
            resolver,
            reporter: Arc::new(NoopReporter),
        }
    }

    /// Sets the progress reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn venues(&self) -> &[String] {
        self.resolver.venues()
    }

    /// Run a caller-facing request: one job per symbol.
    pub async fn backfill(&self, request: &BackfillRequest) -> Result<RunSummary, BackfillError> {
        self.backfill_until(request, CancellationToken::new()).await
    }

    /// Like [`Backfiller::backfill`], but stops when `cancel` fires.
    ///
    /// The request's range is checked before it is expanded, so an inverted
    /// range is rejected even when no symbols are given.
    pub async fn backfill_until(
        &self,
        request: &BackfillRequest,
        cancel: CancellationToken,
    ) -> Result<RunSummary, BackfillError> {
        if request.from > request.to {
            return Err(BackfillError::InvertedRange {
                from: request.from,
                to: request.to,
            });
        }
        self.run_until(request.jobs(), request.max_concurrency, cancel)
            .await
    }

    /// Run `jobs` with at most `max_concurrency` executing at once.
    pub async fn run(&self, jobs: Vec<Job>, max_concurrency: usize) -> Result<RunSummary, BackfillError> {
        self.run_until(jobs, max_concurrency, CancellationToken::new())
            .await
    }

    /// Like [`Backfiller::run`], but stops when `cancel` fires.
    ///
    /// After cancellation no further jobs are admitted and in-flight jobs are
    /// dropped at their next suspension point. Those jobs are reported in
    /// `abandoned` and are absent from the summary counters. A dropped job
    /// that had already started gets `on_job_abandoned` instead of
    /// `on_job_finish`; queued jobs get no event at all.
    pub async fn run_until(
        &self,
        jobs: Vec<Job>,
        max_concurrency: usize,
        cancel: CancellationToken,
    ) -> Result<RunSummary, BackfillError> {
        let started = Instant::now();
        let mut builder = SummaryBuilder::new();

        let abandoned = self
            .execute(jobs, max_concurrency, &cancel, |result| builder.record(&result))
            .await?;

        if abandoned > 0 {
            warn!(abandoned, "Backfill cancelled before all jobs finished");
            metrics::JOBS_ABANDONED.inc_by(abandoned as u64);
            builder.record_abandoned(abandoned);
        }

        let summary = builder.finish(started.elapsed());
        info!(
            run_id = %summary.run_id,
            total = summary.total_jobs,
            succeeded = summary.succeeded,
            failed = summary.failed,
            rows = summary.total_rows_written,
            duration_ms = summary.duration.as_millis() as u64,
            "Backfill finished"
        );
        Ok(summary)
    }

    /// Execute `jobs` and return every result, in completion order.
    pub async fn dispatch(
        &self,
        jobs: Vec<Job>,
        max_concurrency: usize,
    ) -> Result<Vec<JobResult>, BackfillError> {
        let mut results = Vec::with_capacity(jobs.len());
        self.execute(jobs, max_concurrency, &CancellationToken::new(), |result| {
            results.push(result)
        })
        .await?;
        Ok(results)
    }

    /// Reject runs that cannot start. Nothing has executed when this fails.
    fn validate(&self, jobs: &[Job], max_concurrency: usize) -> Result<(), BackfillError> {
        if max_concurrency == 0 {
            return Err(BackfillError::InvalidConcurrency(max_concurrency));
        }
        if self.resolver.venues().is_empty() {
            return Err(BackfillError::NoVenues);
        }
        for (idx, job) in jobs.iter().enumerate() {
            if job.symbol().trim().is_empty() {
                return Err(BackfillError::EmptySymbol(idx));
            }
            if job.from() > job.to() {
                return Err(BackfillError::InvalidDateRange {
                    symbol: job.symbol().to_string(),
                    from: job.from(),
                    to: job.to(),
                });
            }
        }
        Ok(())
    }

    /// Admit and run jobs, handing each result to `on_result` as it arrives.
    ///
    /// Returns the number of jobs abandoned by cancellation.
    async fn execute<F>(
        &self,
        jobs: Vec<Job>,
        max_concurrency: usize,
        cancel: &CancellationToken,
        mut on_result: F,
    ) -> Result<usize, BackfillError>
    where
        F: FnMut(JobResult),
    {
        self.validate(&jobs, max_concurrency)?;

        let total = jobs.len();
        info!(
            jobs = total,
            max_concurrency,
            venues = ?self.resolver.venues(),
            "Starting backfill"
        );

        let gate = Arc::new(Semaphore::new(max_concurrency.min(Semaphore::MAX_PERMITS)));
        let worker = JobWorker {
            source: Arc::clone(&self.source),
            store: Arc::clone(&self.store),
            resolver: self.resolver.clone(),
            reporter: Arc::clone(&self.reporter),
        };

        let mut tasks: JoinSet<Option<JobResult>> = JoinSet::new();
        let mut abandoned = 0;
        let mut pending = jobs.into_iter();
        let mut next = pending.next();

        // Admission: wait for a slot per job, draining finished tasks meanwhile.
        while let Some(job) = next.take() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    abandoned += 1 + pending.len();
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    abandoned += collect(joined, &mut on_result);
                    next = Some(job);
                }
                permit = Arc::clone(&gate).acquire_owned() => {
                    let Ok(permit) = permit else {
                        error!("Admission gate closed unexpectedly");
                        abandoned += 1 + pending.len();
                        break;
                    };
                    let worker = worker.clone();
                    let cancel = cancel.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        worker.run(job, cancel).await
                    });
                    next = pending.next();
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            abandoned += collect(joined, &mut on_result);
        }

        Ok(abandoned)
    }
}

/// Forward a finished task's result. Returns 1 if the job produced none.
fn collect<F>(joined: Result<Option<JobResult>, JoinError>, on_result: &mut F) -> usize
where
    F: FnMut(JobResult),
{
    match joined {
        Ok(Some(result)) => {
            on_result(result);
            0
        }
        Ok(None) => 1,
        Err(e) => {
            error!(error = %e, "Job task failed to join");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::{ErrorKind, Granularity};
    use crate::testing::{fixtures, MockDataSource, MockStore};
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn job(symbol: &str) -> Job {
        Job::new(symbol, date("2024-01-01"), date("2024-01-05"), Granularity::Day, false)
    }

    fn backfiller(source: &Arc<MockDataSource>, store: &Arc<MockStore>) -> Backfiller {
        Backfiller::new(
            Arc::clone(source) as Arc<dyn DataSource>,
            Arc::clone(store) as Arc<dyn Store>,
            vec!["NSE".to_string(), "BSE".to_string()],
        )
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let source = Arc::new(MockDataSource::new());
        let store = Arc::new(MockStore::new());
        let err = backfiller(&source, &store)
            .run(vec![job("TCS")], 0)
            .await
            .unwrap_err();
        assert_eq!(err, BackfillError::InvalidConcurrency(0));
        assert!(store.recorded_lookups().await.is_empty());
    }

    #[tokio::test]
    async fn test_inverted_range_rejected_before_any_job() {
        let source = Arc::new(MockDataSource::new());
        let store = Arc::new(MockStore::new());
        store.add_instrument("TCS", "NSE", 1).await;

        let jobs = vec![
            job("TCS"),
            Job::new("INFY", date("2024-02-01"), date("2024-01-01"), Granularity::Day, false),
        ];
        let err = backfiller(&source, &store).run(jobs, 2).await.unwrap_err();

        assert!(matches!(err, BackfillError::InvalidDateRange { .. }));
        assert!(store.recorded_lookups().await.is_empty());
        assert_eq!(source.fetch_count().await, 0);
    }

    #[tokio::test]
    async fn test_inverted_request_without_symbols_rejected() {
        let source = Arc::new(MockDataSource::new());
        let store = Arc::new(MockStore::new());
        let request = BackfillRequest {
            symbols: Vec::new(),
            from: date("2024-02-01"),
            to: date("2024-01-01"),
            granularity: Granularity::Day,
            max_concurrency: 2,
            dry_run: false,
        };

        let err = backfiller(&source, &store)
            .backfill(&request)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BackfillError::InvertedRange {
                from: date("2024-02-01"),
                to: date("2024-01-01"),
            }
        );
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_empty_symbol_rejected() {
        let source = Arc::new(MockDataSource::new());
        let store = Arc::new(MockStore::new());
        let err = backfiller(&source, &store)
            .run(vec![job("TCS"), job("  ")], 2)
            .await
            .unwrap_err();
        assert_eq!(err, BackfillError::EmptySymbol(1));
    }

    #[tokio::test]
    async fn test_no_venues_rejected() {
        let source = Arc::new(MockDataSource::new());
        let store = Arc::new(MockStore::new());
        let backfiller = Backfiller::new(source, store, Vec::new());
        let err = backfiller.run(vec![job("TCS")], 1).await.unwrap_err();
        assert_eq!(err, BackfillError::NoVenues);
    }

    #[tokio::test]
    async fn test_empty_job_list() {
        let source = Arc::new(MockDataSource::new());
        let store = Arc::new(MockStore::new());
        let backfiller = backfiller(&source, &store);

        assert!(backfiller.dispatch(Vec::new(), 3).await.unwrap().is_empty());

        let summary = backfiller.run(Vec::new(), 3).await.unwrap();
        assert_eq!(summary.total_jobs, 0);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.total_rows_written, 0);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_dispatch_returns_one_result_per_job() {
        let source = Arc::new(MockDataSource::new());
        let store = Arc::new(MockStore::new());
        for (i, symbol) in ["A", "B", "C", "D"].iter().enumerate() {
            store.add_instrument(symbol, "NSE", i as i64 + 1).await;
        }
        source
            .set_bars(fixtures::daily_bars(date("2024-01-01"), 3))
            .await;

        let results = backfiller(&source, &store)
            .dispatch(vec![job("A"), job("B"), job("C"), job("D"), job("MISSING")], 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 5);
        let mut symbols: Vec<_> = results.iter().map(|r| r.symbol.clone()).collect();
        symbols.sort();
        assert_eq!(symbols, vec!["A", "B", "C", "D", "MISSING"]);
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 4);
    }

    #[tokio::test]
    async fn test_dry_run_skips_fetch_and_write() {
        let source = Arc::new(MockDataSource::new());
        let store = Arc::new(MockStore::new());
        store.add_instrument("TCS", "NSE", 2953217).await;

        let dry = Job::new("TCS", date("2024-01-01"), date("2024-01-05"), Granularity::Day, true);
        let summary = backfiller(&source, &store).run(vec![dry], 1).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.total_rows_written, 0);
        assert_eq!(source.fetch_count().await, 0);
        assert_eq!(store.write_count().await, 0);
        assert_eq!(store.recorded_lookups().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_classified() {
        let source = Arc::new(MockDataSource::new());
        let store = Arc::new(MockStore::new());
        store.add_instrument("UP", "NSE", 1).await;
        store.add_instrument("DB", "NSE", 2).await;
        source
            .set_symbol_error("UP", crate::source::UpstreamError::RateLimited)
            .await;
        store
            .set_write_error("DB", crate::store::StoreError::Database("disk full".into()))
            .await;

        let summary = backfiller(&source, &store)
            .run(vec![job("UP"), job("DB"), job("GONE")], 3)
            .await
            .unwrap();

        assert_eq!(summary.failed, 3);
        assert_eq!(summary.error_for("UP"), Some(ErrorKind::Upstream));
        assert_eq!(summary.error_for("DB"), Some(ErrorKind::Persistence));
        assert_eq!(summary.error_for("GONE"), Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");
        let boxed: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_notify_swallows_panics() {
        notify(|| panic!("reporter exploded"));
    }
}
