//! Format-specific transformers.
//!
//! Each [`Transformer`] handles one [`FormatFamily`](crate::detect::FormatFamily):
//!
//! - Images: decoded and re-encoded in-process with the `image` crate
//! - Video and audio: transcoded by ffmpeg, with progress from `-progress`
//! - Documents: rewritten or rasterized by Ghostscript
//!
//! The [`TransformerRegistry`] is the capability table the engine dispatches
//! through.
//!
//! # Example
//!
//! ```ignore
//! use shrinkwrap_core::transform::{ToolsConfig, TransformerRegistry};
//! use shrinkwrap_core::{FormatFamily, Operation};
//!
//! let registry = TransformerRegistry::with_defaults(&ToolsConfig::default());
//! let image = registry.get(FormatFamily::Image).unwrap();
//! let options = image.parse_options(Operation::Compress, &serde_json::json!({"quality": 70}))?;
//! ```

mod audio;
mod config;
mod document;
mod error;
mod ffmpeg;
mod image;
mod options;
mod registry;
mod traits;
mod types;
mod video;

pub use audio::AudioTransformer;
pub use config::ToolsConfig;
pub use document::DocumentTransformer;
pub use error::TransformError;
pub use ffmpeg::FfmpegRunner;
pub use image::ImageTransformer;
pub use options::{
    quality_to_audio_bitrate, quality_to_crf, AudioOptions, CompressionLevel, DocumentOptions,
    ImageFit, ImageOptions, QualityPreset, TransformOptions, VideoOptions, DEFAULT_QUALITY,
};
pub use registry::TransformerRegistry;
pub use traits::Transformer;
pub use types::{
    MediaInfo, ProgressSender, TransformJob, TransformOutput, TransformProgress, WorkerSlot,
};
