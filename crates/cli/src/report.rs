//! Terminal output: live progress, the final summary and the metrics textfile.

use std::path::Path;

use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::sync::mpsc;

use backfill_core::{metrics, ProgressEvent, RunSummary};

/// Print one line per finished job until every reporter handle is dropped.
pub async fn print_progress(mut events: mpsc::Receiver<ProgressEvent>, total: usize) {
    let mut finished = 0;
    while let Some(event) = events.recv().await {
        if let Some(line) = progress_line(&event, &mut finished, total) {
            println!("{}", line);
        }
    }
}

fn progress_line(event: &ProgressEvent, finished: &mut usize, total: usize) -> Option<String> {
    let width = total.to_string().len();
    let (symbol, rows_written, error, message) = match event {
        ProgressEvent::Started { .. } => return None,
        ProgressEvent::Abandoned { symbol } => {
            return Some(format!(
                "[{:>w$}/{}] {:<12} abandoned",
                "-",
                total,
                symbol,
                w = width
            ));
        }
        ProgressEvent::Finished {
            symbol,
            rows_written,
            error,
            message,
        } => (symbol, rows_written, error, message),
    };

    *finished += 1;
    let status = match (error, message) {
        (None, _) => format!("ok      {} rows", rows_written),
        (Some(kind), Some(message)) => format!("FAILED  {}: {}", kind, message),
        (Some(kind), None) => format!("FAILED  {}", kind),
    };
    Some(format!(
        "[{:>w$}/{}] {:<12} {}",
        finished,
        total,
        symbol,
        status,
        w = width
    ))
}

/// Print the run summary, as JSON or as a short human-readable report.
pub fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
        println!("{}", out);
        return Ok(());
    }

    println!("{}", render_summary(summary));
    Ok(())
}

fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Backfill run {}\n", summary.run_id));
    out.push_str(&format!("  Total symbols: {}\n", summary.total_jobs));
    out.push_str(&format!("  Successful:    {}\n", summary.succeeded));
    out.push_str(&format!("  Failed:        {}\n", summary.failed));
    out.push_str(&format!("  Total bars:    {}\n", summary.total_rows_written));
    out.push_str(&format!("  Duration:      {:.2?}\n", summary.duration));
    if summary.cancelled {
        out.push_str(&format!("  Cancelled:     {} jobs abandoned\n", summary.abandoned));
    }
    if !summary.per_symbol_errors.is_empty() {
        out.push_str("Failures:\n");
        for failure in &summary.per_symbol_errors {
            out.push_str(&format!(
                "  {:<12} {:<12} {}\n",
                failure.symbol, failure.kind, failure.message
            ));
        }
    }
    out.trim_end().to_string()
}

/// Write every backfill metric in the Prometheus text format.
pub fn write_metrics_textfile(path: &Path) -> Result<()> {
    let registry = Registry::new();
    for metric in metrics::all_metrics() {
        registry
            .register(metric)
            .context("Failed to register metric")?;
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    std::fs::write(path, buffer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backfill_core::{ErrorKind, JobError, JobResult, SummaryBuilder};
    use std::time::Duration;

    #[test]
    fn test_progress_line_counts_finished_jobs() {
        let mut finished = 0;
        let started = ProgressEvent::Started {
            symbol: "TCS".into(),
        };
        assert!(progress_line(&started, &mut finished, 12).is_none());

        let done = ProgressEvent::from(&JobResult::success("TCS", 250));
        let line = progress_line(&done, &mut finished, 12).unwrap();
        assert_eq!(finished, 1);
        assert!(line.starts_with("[ 1/12] TCS"));
        assert!(line.contains("250 rows"));
    }

    #[test]
    fn test_progress_line_shows_failure_kind() {
        let mut finished = 0;
        let failed = ProgressEvent::from(&JobResult::failure(
            "GHOST",
            JobError::NotFound {
                symbol: "GHOST".into(),
                venues: vec!["NSE".into()],
            },
        ));
        let line = progress_line(&failed, &mut finished, 1).unwrap();
        assert!(line.contains("FAILED  not_found"));
    }

    #[test]
    fn test_progress_line_marks_abandoned_jobs() {
        let mut finished = 0;
        let abandoned = ProgressEvent::Abandoned {
            symbol: "SLOW".into(),
        };
        let line = progress_line(&abandoned, &mut finished, 3).unwrap();
        assert_eq!(finished, 0);
        assert!(line.contains("SLOW"));
        assert!(line.ends_with("abandoned"));
    }

    #[test]
    fn test_render_summary_lists_failures() {
        let mut builder = SummaryBuilder::new();
        builder.record(&JobResult::success("TCS", 10));
        builder.record(&JobResult::failure(
            "GHOST",
            JobError::NotFound {
                symbol: "GHOST".into(),
                venues: vec!["NSE".into(), "BSE".into()],
            },
        ));
        let summary = builder.finish(Duration::from_millis(1500));

        let text = render_summary(&summary);
        assert!(text.contains("Total symbols: 2"));
        assert!(text.contains("Total bars:    10"));
        assert!(text.contains("GHOST"));
        assert!(!text.contains("Cancelled"));
        assert_eq!(summary.error_for("GHOST"), Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_write_metrics_textfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backfill.prom");
        metrics::record_job(true, 1, Duration::from_millis(3));

        write_metrics_textfile(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("backfill_jobs_total"));
    }
}
