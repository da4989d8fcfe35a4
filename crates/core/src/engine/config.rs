//! Configuration for the engine module.

use serde::{Deserialize, Serialize};

use crate::job::CallerTier;

const MIB: u64 = 1024 * 1024;

/// Longest accepted retention, ten years.
pub const MAX_RETENTION_HOURS: u64 = 24 * 365 * 10;

/// Worker pool and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum transformations running at once.
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,

    /// Upper bound on a single transformer invocation.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// How long a finished artifact stays downloadable.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// Interval between cleanup sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long `submit_and_wait` blocks before returning the current record.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
}

fn default_max_parallel_jobs() -> usize {
    4
}

fn default_job_timeout() -> u64 {
    300
}

fn default_retention_hours() -> u64 {
    24
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_wait_timeout() -> u64 {
    600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: default_max_parallel_jobs(),
            job_timeout_secs: default_job_timeout(),
            retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval(),
            wait_timeout_secs: default_wait_timeout(),
        }
    }
}

impl EngineConfig {
    pub fn with_max_parallel_jobs(mut self, max: usize) -> Self {
        self.max_parallel_jobs = max;
        self
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_retention_hours(mut self, hours: u64) -> Self {
        self.retention_hours = hours;
        self
    }

    pub fn with_sweep_interval(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    pub fn with_wait_timeout(mut self, secs: u64) -> Self {
        self.wait_timeout_secs = secs;
        self
    }

    /// Retention window, capped at [`MAX_RETENTION_HOURS`].
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours.min(MAX_RETENTION_HOURS) as i64)
    }

    pub fn job_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.job_timeout_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.wait_timeout_secs)
    }
}

/// Size limits per caller tier, as supplied by the auth collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_anonymous_upload")]
    pub anonymous_max_upload_bytes: u64,

    #[serde(default = "default_registered_upload")]
    pub registered_max_upload_bytes: u64,

    #[serde(default = "default_premium_upload")]
    pub premium_max_upload_bytes: u64,

    /// Outputs larger than this require a registered caller to download.
    #[serde(default = "default_anonymous_download")]
    pub anonymous_download_limit_bytes: u64,
}

fn default_anonymous_upload() -> u64 {
    50 * MIB
}

fn default_registered_upload() -> u64 {
    500 * MIB
}

fn default_premium_upload() -> u64 {
    2048 * MIB
}

fn default_anonymous_download() -> u64 {
    10 * MIB
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            anonymous_max_upload_bytes: default_anonymous_upload(),
            registered_max_upload_bytes: default_registered_upload(),
            premium_max_upload_bytes: default_premium_upload(),
            anonymous_download_limit_bytes: default_anonymous_download(),
        }
    }
}

impl LimitsConfig {
    /// Largest upload accepted from `tier`.
    pub fn max_upload_for(&self, tier: CallerTier) -> u64 {
        match tier {
            CallerTier::Anonymous => self.anonymous_max_upload_bytes,
            CallerTier::Registered => self.registered_max_upload_bytes,
            CallerTier::Premium => self.premium_max_upload_bytes,
        }
    }

    /// Whether `tier` may download an artifact of `size` bytes.
    pub fn may_download(&self, tier: CallerTier, size: u64) -> bool {
        tier != CallerTier::Anonymous || size <= self.anonymous_download_limit_bytes
    }

    pub fn with_upload_limit(mut self, tier: CallerTier, bytes: u64) -> Self {
        match tier {
            CallerTier::Anonymous => self.anonymous_max_upload_bytes = bytes,
            CallerTier::Registered => self.registered_max_upload_bytes = bytes,
            CallerTier::Premium => self.premium_max_upload_bytes = bytes,
        }
        self
    }

    pub fn with_anonymous_download_limit(mut self, bytes: u64) -> Self {
        self.anonymous_download_limit_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_parallel_jobs, 4);
        assert_eq!(config.job_timeout_secs, 300);
        assert_eq!(config.retention(), chrono::Duration::hours(24));
        assert_eq!(config.sweep_interval().as_secs(), 3600);
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::default()
            .with_max_parallel_jobs(8)
            .with_job_timeout(5)
            .with_retention_hours(1);

        assert_eq!(config.max_parallel_jobs, 8);
        assert_eq!(config.job_timeout().as_secs(), 5);
        assert_eq!(config.retention(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_retention_is_capped() {
        let config = EngineConfig::default().with_retention_hours(u64::MAX);
        assert_eq!(
            config.retention(),
            chrono::Duration::hours(MAX_RETENTION_HOURS as i64)
        );
    }

    #[test]
    fn test_limits_by_tier() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.max_upload_for(CallerTier::Anonymous), 50 * MIB);
        assert!(limits.max_upload_for(CallerTier::Registered) < limits.max_upload_for(CallerTier::Premium));
    }

    #[test]
    fn test_anonymous_download_threshold() {
        let limits = LimitsConfig::default().with_anonymous_download_limit(100);
        assert!(limits.may_download(CallerTier::Anonymous, 100));
        assert!(!limits.may_download(CallerTier::Anonymous, 101));
        assert!(limits.may_download(CallerTier::Registered, 101));
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let config: EngineConfig = toml::from_str("max_parallel_jobs = 2").unwrap();
        assert_eq!(config.max_parallel_jobs, 2);
        assert_eq!(config.retention_hours, 24);
    }
}
