//! Historical data backfill orchestrator.
//!
//! The orchestrator runs one job per symbol:
//! - **Resolution**: symbol to instrument id, trying venues in priority order
//! - **Fetch**: historical bars from the [`DataSource`](crate::source::DataSource)
//! - **Persist**: bars written through the [`Store`](crate::store::Store)
//!
//! Jobs run concurrently up to a fixed cap. A failing job is recorded in the
//! run summary and never affects its siblings.
//!
//! # Example
//!
//! ```ignore
//! use backfill_core::{Backfiller, BackfillRequest, ChannelReporter, Granularity};
//!
//! let (reporter, mut events) = ChannelReporter::channel(256);
//! let backfiller = Backfiller::new(source, store, vec!["NSE".into(), "BSE".into()])
//!     .with_reporter(Arc::new(reporter));
//!
//! let summary = backfiller.backfill(&BackfillRequest {
//!     symbols: vec!["RELIANCE".into(), "TCS".into()],
//!     from, to,
//!     granularity: Granularity::Day,
//!     max_concurrency: 5,
//!     dry_run: false,
//! }).await?;
//! ```

mod config;
mod progress;
mod resolver;
mod runner;
mod summary;
mod types;

pub use config::BackfillConfig;
pub use progress::{
    ChannelReporter, CompositeReporter, NoopReporter, ProgressEvent, ProgressReporter,
    TracingReporter,
};
pub use resolver::InstrumentResolver;
pub use runner::Backfiller;
pub use summary::{RunSummary, SummaryBuilder, SymbolError};
pub use types::{
    BackfillError, BackfillRequest, ErrorKind, Granularity, Job, JobError, JobResult,
    ResolvedInstrument,
};
