use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Concurrency cap is at least 1
/// - At least one non-blank venue
/// - Progress buffer is not 0
/// - Watchlists are not empty
/// - Kite timeout is not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let backfill = &config.backfill;

    if backfill.max_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "backfill.max_concurrency must be at least 1".to_string(),
        ));
    }

    if backfill.venues.is_empty() {
        return Err(ConfigError::ValidationError(
            "backfill.venues cannot be empty".to_string(),
        ));
    }

    if backfill.venues.iter().any(|v| v.trim().is_empty()) {
        return Err(ConfigError::ValidationError(
            "backfill.venues cannot contain blank entries".to_string(),
        ));
    }

    if backfill.progress_buffer == 0 {
        return Err(ConfigError::ValidationError(
            "backfill.progress_buffer cannot be 0".to_string(),
        ));
    }

    if let Some((name, _)) = config.watchlists.iter().find(|(_, s)| s.is_empty()) {
        return Err(ConfigError::ValidationError(format!(
            "watchlist '{}' has no symbols",
            name
        )));
    }

    if let Some(kite) = &config.kite {
        if kite.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "kite.timeout_secs cannot be 0".to_string(),
            ));
        }
    }

    Ok(())
}
