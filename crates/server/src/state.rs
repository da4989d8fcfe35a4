use chrono::{DateTime, Utc};
use shrinkwrap_core::{Config, SanitizedConfig, TransformEngine};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    config: Config,
    engine: Arc<TransformEngine>,
    config_hash: String,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<TransformEngine>, config_hash: String) -> Self {
        Self {
            config,
            engine,
            config_hash,
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn engine(&self) -> &Arc<TransformEngine> {
        &self.engine
    }

    /// Short hash of the loaded configuration, reported by `/health`.
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
