use super::{types::Config, ConfigError};
use crate::engine::MAX_RETENTION_HOURS;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Worker count, job timeout, retention and sweep interval are non-zero
/// - Retention does not exceed `MAX_RETENTION_HOURS`
/// - Upload limits grow with the caller tier
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    let engine = &config.engine;
    if engine.max_parallel_jobs == 0 {
        return invalid("engine.max_parallel_jobs must be at least 1");
    }
    if engine.job_timeout_secs == 0 {
        return invalid("engine.job_timeout_secs cannot be 0");
    }
    if engine.retention_hours == 0 {
        return invalid("engine.retention_hours cannot be 0");
    }
    if engine.retention_hours > MAX_RETENTION_HOURS {
        return Err(ConfigError::ValidationError(format!(
            "engine.retention_hours cannot exceed {}",
            MAX_RETENTION_HOURS
        )));
    }
    if engine.sweep_interval_secs == 0 {
        return invalid("engine.sweep_interval_secs cannot be 0");
    }

    let limits = &config.limits;
    if limits.anonymous_max_upload_bytes == 0 {
        return invalid("limits.anonymous_max_upload_bytes cannot be 0");
    }
    if limits.anonymous_max_upload_bytes > limits.registered_max_upload_bytes
        || limits.registered_max_upload_bytes > limits.premium_max_upload_bytes
    {
        return invalid("upload limits must satisfy anonymous <= registered <= premium");
    }

    Ok(())
}
