//! Transformer options and the named quality presets.
//!
//! Options arrive as JSON from the caller. Each family parses them into its
//! own struct (unknown keys are rejected), range-checks them, and fills any
//! unset quality knobs from the preset selected by the operation. The result
//! is what gets stored on the job record.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::TransformError;
use crate::detect::FormatFamily;
use crate::job::Operation;

/// Quality used when nothing else applies.
pub const DEFAULT_QUALITY: u32 = 80;

/// x264 speed presets accepted for video.
pub const VIDEO_SPEED_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Named default bundles. Compress favors size, convert favors fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    Compress,
    Convert,
}

impl QualityPreset {
    pub fn for_operation(operation: Operation) -> Self {
        match operation {
            Operation::Compress => Self::Compress,
            Operation::Convert => Self::Convert,
        }
    }

    pub fn image_quality(&self) -> u32 {
        match self {
            Self::Compress => 80,
            Self::Convert => 90,
        }
    }

    pub fn video_crf(&self) -> u32 {
        match self {
            Self::Compress => 28,
            Self::Convert => 23,
        }
    }

    pub fn video_speed_preset(&self) -> &'static str {
        "medium"
    }

    /// Audio track bitrate inside a video.
    pub fn video_audio_bitrate_kbps(&self) -> u32 {
        self.audio_bitrate_kbps()
    }

    pub fn audio_bitrate_kbps(&self) -> u32 {
        match self {
            Self::Compress => 128,
            Self::Convert => 192,
        }
    }

    pub fn document_level(&self) -> CompressionLevel {
        match self {
            Self::Compress => CompressionLevel::Medium,
            Self::Convert => CompressionLevel::Low,
        }
    }
}

/// Maps quality 1-100 onto the x264 CRF scale (100 -> 0, 1 -> 51).
pub fn quality_to_crf(quality: u32) -> u32 {
    let q = quality.clamp(1, 100);
    ((100 - q) as f64 * 51.0 / 99.0).round() as u32
}

/// Maps quality 1-100 onto 32-320 kbps.
pub fn quality_to_audio_bitrate(quality: u32) -> u32 {
    let q = quality.clamp(1, 100);
    32 + ((q - 1) as f64 * 288.0 / 99.0).round() as u32
}

fn check_range(name: &str, value: Option<u32>, min: u32, max: u32) -> Result<(), TransformError> {
    match value {
        Some(v) if v < min || v > max => Err(TransformError::invalid_options(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, v
        ))),
        _ => Ok(()),
    }
}

fn check_dimension(name: &str, value: Option<u32>) -> Result<(), TransformError> {
    check_range(name, value, 1, 16_384)
}

/// Deserializes a family's options; `null` means "all defaults".
fn from_json<T: DeserializeOwned + Default>(raw: &serde_json::Value) -> Result<T, TransformError> {
    if raw.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(raw.clone()).map_err(|e| TransformError::invalid_options(e.to_string()))
}

// =============================================================================
// Image
// =============================================================================

/// How a resize box is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFit {
    /// Fit inside the box, keeping aspect ratio.
    #[default]
    Contain,
    /// Fill the box, cropping the overflow.
    Cover,
    /// Stretch to exactly the box.
    Fill,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
    #[serde(default)]
    pub fit: ImageFit,
}

impl ImageOptions {
    pub fn parse(raw: &serde_json::Value, preset: QualityPreset) -> Result<Self, TransformError> {
        let mut options: Self = from_json(raw)?;
        check_range("quality", options.quality, 1, 100)?;
        check_dimension("max_width", options.max_width)?;
        check_dimension("max_height", options.max_height)?;
        if options.fit == ImageFit::Fill
            && (options.max_width.is_none() || options.max_height.is_none())
        {
            return Err(TransformError::invalid_options(
                "fit \"fill\" requires both max_width and max_height",
            ));
        }
        options.quality.get_or_insert(preset.image_quality());
        Ok(options)
    }

    pub fn quality(&self) -> u32 {
        self.quality.unwrap_or(DEFAULT_QUALITY)
    }

    pub fn has_resize(&self) -> bool {
        self.max_width.is_some() || self.max_height.is_some()
    }
}

// =============================================================================
// Video
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    /// Wins over `quality` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crf: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate_kbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate_kbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
}

impl VideoOptions {
    pub fn parse(raw: &serde_json::Value, preset: QualityPreset) -> Result<Self, TransformError> {
        let mut options: Self = from_json(raw)?;
        check_range("quality", options.quality, 1, 100)?;
        check_range("crf", options.crf, 0, 51)?;
        check_range("video_bitrate_kbps", options.video_bitrate_kbps, 64, 100_000)?;
        check_range("audio_bitrate_kbps", options.audio_bitrate_kbps, 32, 512)?;
        check_dimension("max_width", options.max_width)?;
        check_dimension("max_height", options.max_height)?;
        if let Some(ref speed) = options.preset {
            if !VIDEO_SPEED_PRESETS.contains(&speed.as_str()) {
                return Err(TransformError::invalid_options(format!(
                    "unknown preset: {}",
                    speed
                )));
            }
        }

        if options.crf.is_none() && options.quality.is_none() {
            options.crf = Some(preset.video_crf());
        }
        options
            .preset
            .get_or_insert_with(|| preset.video_speed_preset().to_string());
        options
            .audio_bitrate_kbps
            .get_or_insert(preset.video_audio_bitrate_kbps());
        Ok(options)
    }

    /// Effective CRF on the 0-51 scale.
    pub fn crf(&self) -> u32 {
        self.crf
            .or_else(|| self.quality.map(quality_to_crf))
            .unwrap_or_else(|| quality_to_crf(DEFAULT_QUALITY))
    }

    pub fn speed_preset(&self) -> &str {
        self.preset.as_deref().unwrap_or("medium")
    }

    pub fn audio_bitrate_kbps(&self) -> u32 {
        self.audio_bitrate_kbps.unwrap_or(128)
    }
}

// =============================================================================
// Audio
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    /// Wins over `quality` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate_hz: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
}

impl AudioOptions {
    pub fn parse(raw: &serde_json::Value, preset: QualityPreset) -> Result<Self, TransformError> {
        let mut options: Self = from_json(raw)?;
        check_range("quality", options.quality, 1, 100)?;
        check_range("bitrate_kbps", options.bitrate_kbps, 8, 512)?;
        check_range("sample_rate_hz", options.sample_rate_hz, 8_000, 192_000)?;
        check_range("channels", options.channels, 1, 8)?;
        if options.bitrate_kbps.is_none() && options.quality.is_none() {
            options.bitrate_kbps = Some(preset.audio_bitrate_kbps());
        }
        Ok(options)
    }

    pub fn bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps
            .or_else(|| self.quality.map(quality_to_audio_bitrate))
            .unwrap_or_else(|| quality_to_audio_bitrate(DEFAULT_QUALITY))
    }
}

// =============================================================================
// Document
// =============================================================================

/// Ghostscript preset bundle, from light to aggressive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    Low,
    Medium,
    High,
}

impl CompressionLevel {
    /// Value for `-dPDFSETTINGS`.
    pub fn pdf_settings(&self) -> &'static str {
        match self {
            Self::Low => "/printer",
            Self::Medium => "/ebook",
            Self::High => "/screen",
        }
    }

    /// Resolution embedded images are downsampled to.
    pub fn image_dpi(&self) -> u32 {
        match self {
            Self::Low => 300,
            Self::Medium => 150,
            Self::High => 72,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_level: Option<CompressionLevel>,
    /// JPEG quality for raster targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    /// Render resolution for raster targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,
}

impl DocumentOptions {
    pub fn parse(raw: &serde_json::Value, preset: QualityPreset) -> Result<Self, TransformError> {
        let mut options: Self = from_json(raw)?;
        check_range("quality", options.quality, 1, 100)?;
        check_range("dpi", options.dpi, 36, 600)?;
        options
            .compression_level
            .get_or_insert(preset.document_level());
        Ok(options)
    }

    pub fn level(&self) -> CompressionLevel {
        self.compression_level.unwrap_or(CompressionLevel::Medium)
    }

    pub fn quality(&self) -> u32 {
        self.quality.unwrap_or(DEFAULT_QUALITY)
    }

    pub fn dpi(&self) -> u32 {
        self.dpi.unwrap_or(150)
    }
}

// =============================================================================
// Union
// =============================================================================

/// Validated options for any family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TransformOptions {
    Image(ImageOptions),
    Video(VideoOptions),
    Audio(AudioOptions),
    Document(DocumentOptions),
}

impl TransformOptions {
    pub fn family(&self) -> FormatFamily {
        match self {
            Self::Image(_) => FormatFamily::Image,
            Self::Video(_) => FormatFamily::Video,
            Self::Audio(_) => FormatFamily::Audio,
            Self::Document(_) => FormatFamily::Document,
        }
    }

    /// Normalized JSON form stored on the job record.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }

    pub fn as_image(&self) -> Option<&ImageOptions> {
        match self {
            Self::Image(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_video(&self) -> Option<&VideoOptions> {
        match self {
            Self::Video(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioOptions> {
        match self {
            Self::Audio(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&DocumentOptions> {
        match self {
            Self::Document(o) => Some(o),
            _ => None,
        }
    }
}
