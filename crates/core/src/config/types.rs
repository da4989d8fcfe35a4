use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::engine::{EngineConfig, LimitsConfig};
use crate::transform::ToolsConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Where records, artifacts and in-flight uploads live.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    /// Finished artifacts, served until they expire.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Per-job scratch directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            artifact_dir: default_artifact_dir(),
            work_dir: default_work_dir(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("shrinkwrap.db")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("shrinkwrap-work")
}

/// Sanitized config for API responses (paths omitted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub limits: LimitsConfig,
    pub tools: SanitizedToolsConfig,
}

/// Which tools are configured, without their locations.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedToolsConfig {
    pub ffmpeg_configured: bool,
    pub ghostscript_configured: bool,
    pub ffmpeg_log_level: String,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            engine: config.engine.clone(),
            limits: config.limits.clone(),
            tools: SanitizedToolsConfig {
                ffmpeg_configured: !config.tools.ffmpeg_path.as_os_str().is_empty(),
                ghostscript_configured: !config.tools.ghostscript_path.as_os_str().is_empty(),
                ffmpeg_log_level: config.tools.ffmpeg_log_level.clone(),
            },
        }
    }
}
