//! Backfill configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::Granularity;

/// Configuration for the backfill dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Maximum jobs executing at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Venues tried, in priority order, when resolving a symbol.
    #[serde(default = "default_venues")]
    pub venues: Vec<String>,

    /// Default bar size when none is given on the command line.
    #[serde(default)]
    pub granularity: Granularity,

    /// Resolve instruments only, without fetching or writing.
    #[serde(default)]
    pub dry_run: bool,

    /// Stop waiting for jobs after this many seconds (unset = no deadline).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,

    /// Capacity of the progress event channel.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

fn default_max_concurrency() -> usize {
    5
}

fn default_venues() -> Vec<String> {
    vec!["NSE".to_string(), "BSE".to_string()]
}

fn default_progress_buffer() -> usize {
    256
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            venues: default_venues(),
            granularity: Granularity::default(),
            dry_run: false,
            deadline_secs: None,
            progress_buffer: default_progress_buffer(),
        }
    }
}

impl BackfillConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BackfillConfig::default();
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.venues, vec!["NSE", "BSE"]);
        assert_eq!(config.granularity, Granularity::Day);
        assert!(!config.dry_run);
        assert!(config.deadline().is_none());
        assert_eq!(config.progress_buffer, 256);
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: BackfillConfig = toml::from_str("dry_run = true").unwrap();
        assert!(config.dry_run);
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.venues.len(), 2);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            max_concurrency = 12
            venues = ["BSE", "NSE", "MCX"]
            granularity = "15minute"
            dry_run = false
            deadline_secs = 600
            progress_buffer = 32
        "#;
        let config: BackfillConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_concurrency, 12);
        assert_eq!(config.venues, vec!["BSE", "NSE", "MCX"]);
        assert_eq!(config.granularity, Granularity::FifteenMinute);
        assert_eq!(config.deadline(), Some(Duration::from_secs(600)));
        assert_eq!(config.progress_buffer, 32);
    }
}
