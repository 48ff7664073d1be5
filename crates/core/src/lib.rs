pub mod backfill;
pub mod config;
pub mod metrics;
pub mod source;
pub mod store;
pub mod testing;

pub use backfill::{
    BackfillConfig, BackfillError, BackfillRequest, Backfiller, ChannelReporter,
    CompositeReporter, ErrorKind, Granularity, InstrumentResolver, Job, JobError, JobResult,
    NoopReporter, ProgressEvent, ProgressReporter, ResolvedInstrument, RunSummary,
    SummaryBuilder, SymbolError, TracingReporter,
};
pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config,
    ConfigError, DatabaseConfig, KiteConfig, MetricsConfig, SanitizedConfig,
};
pub use source::{Bar, DataSource, KiteDataSource, UpstreamError};
pub use store::{Instrument, SqliteStore, Store, StoreError};
