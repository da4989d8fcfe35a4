//! External tool locations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Paths and flags for the external tools transformers drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Path to ffprobe binary.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Path to the Ghostscript binary.
    #[serde(default = "default_ghostscript_path")]
    pub ghostscript_path: PathBuf,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[serde(default = "default_log_level")]
    pub ffmpeg_log_level: String,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_ghostscript_path() -> PathBuf {
    PathBuf::from("gs")
}

fn default_log_level() -> String {
    "error".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            ghostscript_path: default_ghostscript_path(),
            ffmpeg_log_level: default_log_level(),
        }
    }
}

impl ToolsConfig {
    /// Creates a config with custom ffmpeg/ffprobe paths.
    pub fn with_ffmpeg(mut self, ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        self.ffmpeg_path = ffmpeg_path;
        self.ffprobe_path = ffprobe_path;
        self
    }

    pub fn with_ghostscript(mut self, path: PathBuf) -> Self {
        self.ghostscript_path = path;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ToolsConfig::default();
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.ffprobe_path, PathBuf::from("ffprobe"));
        assert_eq!(config.ghostscript_path, PathBuf::from("gs"));
    }

    #[test]
    fn test_config_builder() {
        let config = ToolsConfig::default()
            .with_ffmpeg(
                PathBuf::from("/usr/local/bin/ffmpeg"),
                PathBuf::from("/usr/local/bin/ffprobe"),
            )
            .with_ghostscript(PathBuf::from("/opt/gs/bin/gs"));

        assert_eq!(config.ffmpeg_path, PathBuf::from("/usr/local/bin/ffmpeg"));
        assert_eq!(config.ghostscript_path, PathBuf::from("/opt/gs/bin/gs"));
    }

    #[test]
    fn test_partial_toml() {
        let config: ToolsConfig = toml::from_str(r#"ffmpeg_log_level = "warning""#).unwrap();
        assert_eq!(config.ffmpeg_log_level, "warning");
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
    }
}
