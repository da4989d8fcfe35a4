use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

use super::{types::Config, ConfigError};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "SHRINKWRAP_CONFIG";

/// Config file path from `SHRINKWRAP_CONFIG`, defaulting to `config.toml`.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"))
}

/// Load configuration from file with environment variable overrides
///
/// Nested keys use a double underscore: `SHRINKWRAP_ENGINE__MAX_PARALLEL_JOBS=8`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("SHRINKWRAP_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
