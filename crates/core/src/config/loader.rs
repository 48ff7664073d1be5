use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix for environment overrides, e.g. `BACKFILL_BACKFILL__MAX_CONCURRENCY=8`.
const ENV_PREFIX: &str = "BACKFILL_";

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from defaults and environment variables only
pub fn load_config_from_env() -> Result<Config, ConfigError> {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[database]
path = "bars.db"

[backfill]
max_concurrency = 3
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.backfill.max_concurrency, 3);
        assert_eq!(config.database.path.to_str().unwrap(), "bars.db");
    }

    #[test]
    fn test_load_config_from_str_bad_granularity() {
        let toml = r#"
[backfill]
granularity = "hourly"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/backfill.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[backfill]
venues = ["BSE"]

[kite]
api_key = "abc"
access_token = "def"

[watchlists]
banks = ["HDFCBANK", "ICICIBANK"]
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.backfill.venues, vec!["BSE"]);
        assert_eq!(config.backfill.max_concurrency, 5);
        let kite = config.kite.as_ref().unwrap();
        assert_eq!(kite.api_key, "abc");
        assert_eq!(kite.base_url, "https://api.kite.trade");
        assert_eq!(config.watchlist("banks").unwrap().len(), 2);
    }
}
