use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::backfill::BackfillConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kite: Option<KiteConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Named symbol lists usable with `--watchlist`
    #[serde(default)]
    pub watchlists: BTreeMap<String, Vec<String>>,
}

impl Config {
    /// Look up a watchlist by name, ignoring ASCII case.
    pub fn watchlist(&self, name: &str) -> Option<&[String]> {
        self.watchlists
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, symbols)| symbols.as_slice())
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("market_bridge.db")
}

/// Kite Connect API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KiteConfig {
    /// API root (default: "https://api.kite.trade")
    #[serde(default = "default_kite_url")]
    pub base_url: String,
    /// Kite Connect API key
    #[serde(default)]
    pub api_key: String,
    /// Session access token
    #[serde(default)]
    pub access_token: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for KiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_kite_url(),
            api_key: String::new(),
            access_token: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_kite_url() -> String {
    "https://api.kite.trade".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Metrics export configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Write the Prometheus text exposition here after each run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textfile: Option<PathBuf>,
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub database: DatabaseConfig,
    pub backfill: BackfillConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kite: Option<SanitizedKiteConfig>,
    pub metrics: MetricsConfig,
    pub watchlists: Vec<String>,
}

/// Sanitized Kite config (credentials hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedKiteConfig {
    pub base_url: String,
    pub api_key_configured: bool,
    pub access_token_configured: bool,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            database: config.database.clone(),
            backfill: config.backfill.clone(),
            kite: config.kite.as_ref().map(|k| SanitizedKiteConfig {
                base_url: k.base_url.clone(),
                api_key_configured: !k.api_key.is_empty(),
                access_token_configured: !k.access_token.is_empty(),
                timeout_secs: k.timeout_secs,
            }),
            metrics: config.metrics.clone(),
            watchlists: config.watchlists.keys().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::Granularity;

    #[test]
    fn test_deserialize_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "market_bridge.db");
        assert_eq!(config.backfill.max_concurrency, 5);
        assert!(config.kite.is_none());
        assert!(config.metrics.textfile.is_none());
        assert!(config.watchlists.is_empty());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[database]
path = "/data/bars.sqlite"

[backfill]
max_concurrency = 8
venues = ["NSE"]
granularity = "5minute"

[kite]
base_url = "http://localhost:9000"
api_key = "key"
access_token = "token"
timeout_secs = 10

[metrics]
textfile = "/var/lib/node_exporter/backfill.prom"

[watchlists]
NIFTY_IT = ["TCS", "INFY", "WIPRO"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "/data/bars.sqlite");
        assert_eq!(config.backfill.granularity, Granularity::FiveMinute);
        let kite = config.kite.as_ref().unwrap();
        assert_eq!(kite.base_url, "http://localhost:9000");
        assert_eq!(kite.timeout_secs, 10);
        assert!(config.metrics.textfile.is_some());
        assert_eq!(config.watchlist("nifty_it").unwrap(), ["TCS", "INFY", "WIPRO"]);
        assert!(config.watchlist("missing").is_none());
    }

    #[test]
    fn test_sanitized_config() {
        let config = Config {
            kite: Some(KiteConfig {
                api_key: "secret-key".to_string(),
                ..KiteConfig::default()
            }),
            ..Config::default()
        };

        let sanitized = SanitizedConfig::from(&config);
        let kite = sanitized.kite.as_ref().unwrap();
        assert!(kite.api_key_configured);
        assert!(!kite.access_token_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret-key"));
    }
}
