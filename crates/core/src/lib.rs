pub mod config;
pub mod detect;
pub mod engine;
pub mod job;
pub mod lifecycle;
pub mod metrics;
pub mod store;
pub mod sweeper;
pub mod testing;
pub mod transform;

pub use config::{
    config_path, load_config, load_config_from_str, validate_config, Config, ConfigError,
    SanitizedConfig,
};
pub use detect::{detect, sniff, DetectedFormat, FormatFamily};
pub use engine::{
    Artifact, EngineConfig, EngineError, JobReport, LimitsConfig, PoolStatus, SubmitRequest,
    TransformEngine,
};
pub use job::{CallerTier, JobRecord, JobStatus, Operation};
pub use lifecycle::Lifecycle;
pub use metrics::{compression_ratio, SizeMetrics};
pub use store::{
    ArtifactStore, FsArtifactStore, JobFilter, JobStore, SqliteJobStore, StoreError,
};
pub use sweeper::{CleanupSweeper, SweepReport, SweeperHandle};
pub use transform::{
    QualityPreset, ToolsConfig, TransformError, TransformOptions, Transformer,
    TransformerRegistry,
};
