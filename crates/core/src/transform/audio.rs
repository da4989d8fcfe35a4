//! Audio transformer driving ffmpeg.

use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;

use super::error::TransformError;
use super::ffmpeg::FfmpegRunner;
use super::options::{AudioOptions, QualityPreset, TransformOptions};
use super::traits::{discard_output, Transformer};
use super::types::{ProgressSender, TransformJob, TransformOutput};
use crate::detect::FormatFamily;
use crate::job::Operation;

const INPUTS: &[&str] = &["mp3", "aac", "wav", "ogg", "flac", "m4a"];
const TARGETS: &[&str] = &["mp3", "wav", "aac", "ogg"];

/// Sample rate used when compressing WAV without an explicit rate.
pub const WAV_COMPRESS_SAMPLE_RATE: u32 = 22_050;

/// FLAC's strongest compression level.
const FLAC_COMPRESSION_LEVEL: u32 = 12;

fn codec_for(format: &str) -> &'static str {
    match format {
        "mp3" => "libmp3lame",
        "ogg" => "libvorbis",
        "wav" => "pcm_s16le",
        "flac" => "flac",
        // aac and m4a
        _ => "aac",
    }
}

fn is_lossless(format: &str) -> bool {
    matches!(format, "wav" | "flac")
}

/// Transcodes audio with ffmpeg.
pub struct AudioTransformer {
    runner: FfmpegRunner,
}

impl AudioTransformer {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }

    /// Builds ffmpeg arguments for writing `format`.
    pub(crate) fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        format: &str,
        options: &AudioOptions,
        operation: Operation,
    ) -> Vec<String> {
        let mut args = self.runner.input_args(input_path);

        // Drop embedded cover art and any video.
        args.push("-vn".to_string());
        args.extend(["-c:a".to_string(), codec_for(format).to_string()]);

        if !is_lossless(format) {
            args.extend(["-b:a".to_string(), format!("{}k", options.bitrate_kbps())]);
        }
        if format == "flac" {
            args.extend([
                "-compression_level".to_string(),
                FLAC_COMPRESSION_LEVEL.to_string(),
            ]);
        }

        // PCM can only get smaller by dropping samples.
        let sample_rate = match (format, operation) {
            ("wav", Operation::Compress) => {
                Some(options.sample_rate_hz.unwrap_or(WAV_COMPRESS_SAMPLE_RATE))
            }
            _ => options.sample_rate_hz,
        };
        if let Some(rate) = sample_rate {
            args.extend(["-ar".to_string(), rate.to_string()]);
        }
        if let Some(channels) = options.channels {
            args.extend(["-ac".to_string(), channels.to_string()]);
        }

        args.extend(self.runner.output_args(output_path));
        args
    }

    async fn transcode(
        &self,
        job: &TransformJob,
        format: &str,
        operation: Operation,
        progress: Option<ProgressSender>,
    ) -> Result<TransformOutput, TransformError> {
        let started = Instant::now();
        let options = job
            .options
            .as_audio()
            .ok_or_else(|| TransformError::invalid_options("expected audio options"))?;

        let duration = self.runner.probe_duration(&job.job_id, &job.input_path).await;

        let args = self.build_args(&job.input_path, &job.output_path, format, options, operation);
        if let Err(e) = self.runner.run(&job.job_id, &args, duration, progress).await {
            discard_output(&job.output_path).await;
            return Err(e);
        }

        TransformOutput::from_written(&job.output_path, format, started).await
    }
}

#[async_trait]
impl Transformer for AudioTransformer {
    fn name(&self) -> &str {
        "audio"
    }

    fn family(&self) -> FormatFamily {
        FormatFamily::Audio
    }

    fn supported_inputs(&self) -> &[&str] {
        INPUTS
    }

    fn supported_targets(&self) -> &[&str] {
        TARGETS
    }

    fn parse_options(
        &self,
        operation: Operation,
        raw: &serde_json::Value,
    ) -> Result<TransformOptions, TransformError> {
        AudioOptions::parse(raw, QualityPreset::for_operation(operation)).map(TransformOptions::Audio)
    }

    async fn compress(
        &self,
        job: &TransformJob,
        progress: Option<ProgressSender>,
    ) -> Result<TransformOutput, TransformError> {
        if !self.supports_input(&job.source_format) {
            return Err(TransformError::UnsupportedInputFormat {
                format: job.source_format.clone(),
            });
        }
        self.transcode(job, &job.source_format, Operation::Compress, progress)
            .await
    }

    async fn convert(
        &self,
        job: &TransformJob,
        target: &str,
        progress: Option<ProgressSender>,
    ) -> Result<TransformOutput, TransformError> {
        if !self.supports_target(target) {
            return Err(TransformError::unsupported_target(target));
        }
        self.transcode(job, target, Operation::Convert, progress).await
    }

    async fn validate(&self) -> Result<(), TransformError> {
        self.runner.validate().await
    }
}
