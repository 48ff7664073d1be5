//! Per-job progress reporting.
//!
//! Reporters are fire-and-forget: they must never block a job and their
//! failures never reach the run summary.

use std::panic::AssertUnwindSafe;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics;

use super::types::{ErrorKind, JobResult};

/// Observability hooks invoked by the dispatcher around each job.
pub trait ProgressReporter: Send + Sync {
    fn on_job_start(&self, symbol: &str);

    fn on_job_finish(&self, result: &JobResult);

    /// A started job was dropped by cancellation and will never finish.
    fn on_job_abandoned(&self, _symbol: &str) {}
}

/// Invoke a reporter hook, swallowing any panic it raises.
pub(crate) fn notify(hook: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
        warn!("Progress reporter panicked; event dropped");
    }
}

/// Reporter that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_job_start(&self, _symbol: &str) {}

    fn on_job_finish(&self, _result: &JobResult) {}
}

/// Reporter that writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn on_job_start(&self, symbol: &str) {
        debug!(symbol, "Job started");
    }

    fn on_job_finish(&self, result: &JobResult) {
        match &result.error {
            None => info!(
                symbol = %result.symbol,
                rows = result.rows_written,
                "Job succeeded"
            ),
            Some(e) => warn!(
                symbol = %result.symbol,
                kind = %e.kind(),
                error = %e,
                "Job failed"
            ),
        }
    }

    fn on_job_abandoned(&self, symbol: &str) {
        warn!(symbol, "Job abandoned by cancellation");
    }
}

/// A progress event as delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        symbol: String,
    },
    Finished {
        symbol: String,
        rows_written: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Abandoned {
        symbol: String,
    },
}

impl ProgressEvent {
    pub fn symbol(&self) -> &str {
        match self {
            ProgressEvent::Started { symbol }
            | ProgressEvent::Finished { symbol, .. }
            | ProgressEvent::Abandoned { symbol } => symbol,
        }
    }
}

impl From<&JobResult> for ProgressEvent {
    fn from(result: &JobResult) -> Self {
        ProgressEvent::Finished {
            symbol: result.symbol.clone(),
            rows_written: result.rows_written,
            error: result.error.as_ref().map(|e| e.kind()),
            message: result.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Reporter that streams events into a bounded channel.
///
/// Uses `try_send`, so a full or closed channel drops the event.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// Create a reporter together with the receiving end of its channel.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    fn emit(&self, event: ProgressEvent) {
        if self.tx.try_send(event).is_err() {
            metrics::PROGRESS_EVENTS_DROPPED.inc();
        }
    }
}

impl ProgressReporter for ChannelReporter {
    fn on_job_start(&self, symbol: &str) {
        self.emit(ProgressEvent::Started {
            symbol: symbol.to_string(),
        });
    }

    fn on_job_finish(&self, result: &JobResult) {
        self.emit(ProgressEvent::from(result));
    }

    fn on_job_abandoned(&self, symbol: &str) {
        self.emit(ProgressEvent::Abandoned {
            symbol: symbol.to_string(),
        });
    }
}

/// Fans events out to several reporters.
///
/// A panicking child loses its own event only; later children still run.
pub struct CompositeReporter {
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl CompositeReporter {
    pub fn new(reporters: Vec<Box<dyn ProgressReporter>>) -> Self {
        Self { reporters }
    }
}

impl ProgressReporter for CompositeReporter {
    fn on_job_start(&self, symbol: &str) {
        for reporter in &self.reporters {
            notify(|| reporter.on_job_start(symbol));
        }
    }

    fn on_job_finish(&self, result: &JobResult) {
        for reporter in &self.reporters {
            notify(|| reporter.on_job_finish(result));
        }
    }

    fn on_job_abandoned(&self, symbol: &str) {
        for reporter in &self.reporters {
            notify(|| reporter.on_job_abandoned(symbol));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::JobError;
    use crate::source::UpstreamError;

    #[tokio::test]
    async fn test_channel_reporter_delivers_events() {
        let (reporter, mut rx) = ChannelReporter::channel(8);

        reporter.on_job_start("TCS");
        reporter.on_job_finish(&JobResult::success("TCS", 42));

        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressEvent::Started {
                symbol: "TCS".into()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressEvent::Finished {
                symbol: "TCS".into(),
                rows_written: 42,
                error: None,
                message: None,
            }
        );
    }

    #[test]
    fn test_channel_reporter_drops_when_full() {
        let (reporter, mut rx) = ChannelReporter::channel(1);
        let dropped_before = metrics::PROGRESS_EVENTS_DROPPED.get();

        reporter.on_job_start("A");
        reporter.on_job_start("B");

        assert!(metrics::PROGRESS_EVENTS_DROPPED.get() > dropped_before);
        assert_eq!(rx.try_recv().unwrap().symbol(), "A");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_reporter_ignores_closed_channel() {
        let (reporter, rx) = ChannelReporter::channel(4);
        drop(rx);
        reporter.on_job_start("A");
        reporter.on_job_finish(&JobResult::success("A", 0));
    }

    #[test]
    fn test_finished_event_carries_error_kind() {
        let result = JobResult::failure("X", JobError::Upstream(UpstreamError::RateLimited));
        let event = ProgressEvent::from(&result);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "finished");
        assert_eq!(json["error"], "upstream");
        assert_eq!(json["message"], "upstream error: rate limited by upstream");
    }

    #[tokio::test]
    async fn test_composite_reporter_fans_out() {
        let (first, mut rx1) = ChannelReporter::channel(4);
        let (second, mut rx2) = ChannelReporter::channel(4);
        let composite = CompositeReporter::new(vec![
            Box::new(first),
            Box::new(second),
            Box::new(TracingReporter),
        ]);

        composite.on_job_start("INFY");

        assert_eq!(rx1.recv().await.unwrap().symbol(), "INFY");
        assert_eq!(rx2.recv().await.unwrap().symbol(), "INFY");
    }

    struct Exploding;

    impl ProgressReporter for Exploding {
        fn on_job_start(&self, _symbol: &str) {
            panic!("reporter exploded");
        }

        fn on_job_finish(&self, _result: &JobResult) {
            panic!("reporter exploded");
        }
    }

    #[test]
    fn test_composite_reporter_survives_panicking_child() {
        let (counting, mut rx) = ChannelReporter::channel(8);
        let composite =
            CompositeReporter::new(vec![Box::new(Exploding), Box::new(counting)]);

        composite.on_job_start("SBIN");
        composite.on_job_finish(&JobResult::success("SBIN", 3));
        composite.on_job_abandoned("HDFC");

        assert!(matches!(rx.try_recv().unwrap(), ProgressEvent::Started { .. }));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ProgressEvent::Finished { rows_written: 3, .. }
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Abandoned {
                symbol: "HDFC".into()
            }
        );
    }

    #[test]
    fn test_abandoned_event_serializes() {
        let event = ProgressEvent::Abandoned {
            symbol: "TCS".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "abandoned");
        assert_eq!(event.symbol(), "TCS");
    }
}
