//! Video transformer driving ffmpeg.

use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;

use super::error::TransformError;
use super::ffmpeg::FfmpegRunner;
use super::options::{QualityPreset, TransformOptions, VideoOptions};
use super::traits::{discard_output, Transformer};
use super::types::{ProgressSender, TransformJob, TransformOutput};
use crate::detect::FormatFamily;
use crate::job::Operation;

const INPUTS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi"];
const TARGETS: &[&str] = &["mp4", "webm", "avi", "mov"];

/// Transcodes video containers with ffmpeg.
pub struct VideoTransformer {
    runner: FfmpegRunner,
}

impl VideoTransformer {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }

    /// Builds ffmpeg arguments for writing `container`.
    pub(crate) fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        container: &str,
        options: &VideoOptions,
    ) -> Vec<String> {
        let mut args = self.runner.input_args(input_path);
        let crf = options.crf();
        let audio_bitrate = format!("{}k", options.audio_bitrate_kbps());

        match container {
            "webm" => {
                // VP9 uses a 0-63 CRF scale; -b:v 0 selects constant quality.
                let vp9_crf = (crf as f64 * 63.0 / 51.0).round() as u32;
                let video_bitrate = options
                    .video_bitrate_kbps
                    .map(|k| format!("{}k", k))
                    .unwrap_or_else(|| "0".to_string());
                args.extend([
                    "-c:v".to_string(),
                    "libvpx-vp9".to_string(),
                    "-crf".to_string(),
                    vp9_crf.to_string(),
                    "-b:v".to_string(),
                    video_bitrate,
                    "-c:a".to_string(),
                    "libopus".to_string(),
                    "-b:a".to_string(),
                    audio_bitrate,
                ]);
            }
            "avi" => {
                args.extend(["-c:v".to_string(), "mpeg4".to_string()]);
                match options.video_bitrate_kbps {
                    Some(kbps) => args.extend(["-b:v".to_string(), format!("{}k", kbps)]),
                    None => {
                        let qscale = 2 + (crf as f64 * 29.0 / 51.0).round() as u32;
                        args.extend(["-q:v".to_string(), qscale.to_string()]);
                    }
                }
                args.extend([
                    "-c:a".to_string(),
                    "libmp3lame".to_string(),
                    "-b:a".to_string(),
                    audio_bitrate,
                ]);
            }
            // mp4, mov and mkv
            _ => {
                args.extend([
                    "-c:v".to_string(),
                    "libx264".to_string(),
                    "-crf".to_string(),
                    crf.to_string(),
                    "-preset".to_string(),
                    options.speed_preset().to_string(),
                    "-pix_fmt".to_string(),
                    "yuv420p".to_string(),
                ]);
                if let Some(kbps) = options.video_bitrate_kbps {
                    args.extend([
                        "-maxrate".to_string(),
                        format!("{}k", kbps),
                        "-bufsize".to_string(),
                        format!("{}k", kbps * 2),
                    ]);
                }
                args.extend([
                    "-c:a".to_string(),
                    "aac".to_string(),
                    "-b:a".to_string(),
                    audio_bitrate,
                ]);
                if matches!(container, "mp4" | "mov") {
                    args.extend(["-movflags".to_string(), "+faststart".to_string()]);
                }
            }
        }

        if options.max_width.is_some() || options.max_height.is_some() {
            let width = options.max_width.unwrap_or(u32::MAX);
            let height = options.max_height.unwrap_or(u32::MAX);
            // Downscale only, keep aspect, round to even dimensions for the encoders.
            args.extend([
                "-vf".to_string(),
                format!(
                    "scale='min({},iw)':'min({},ih)':force_original_aspect_ratio=decrease,scale=trunc(iw/2)*2:trunc(ih/2)*2",
                    width, height
                ),
            ]);
        }

        args.extend(self.runner.output_args(output_path));
        args
    }

    async fn transcode(
        &self,
        job: &TransformJob,
        container: &str,
        progress: Option<ProgressSender>,
    ) -> Result<TransformOutput, TransformError> {
        let started = Instant::now();
        let options = job
            .options
            .as_video()
            .ok_or_else(|| TransformError::invalid_options("expected video options"))?;

        let duration = self.runner.probe_duration(&job.job_id, &job.input_path).await;

        let args = self.build_args(&job.input_path, &job.output_path, container, options);
        if let Err(e) = self.runner.run(&job.job_id, &args, duration, progress).await {
            discard_output(&job.output_path).await;
            return Err(e);
        }

        TransformOutput::from_written(&job.output_path, container, started).await
    }
}

#[async_trait]
impl Transformer for VideoTransformer {
    fn name(&self) -> &str {
        "video"
    }

    fn family(&self) -> FormatFamily {
        FormatFamily::Video
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
        VideoOptions::parse(raw, QualityPreset::for_operation(operation)).map(TransformOptions::Video)
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
        self.transcode(job, &job.source_format, progress).await
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
        self.transcode(job, target, progress).await
    }

    async fn validate(&self) -> Result<(), TransformError> {
        self.runner.validate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::ToolsConfig;
    use serde_json::json;

    fn transformer() -> VideoTransformer {
        VideoTransformer::new(FfmpegRunner::new(ToolsConfig::default()))
    }

    fn args_for(container: &str, raw: serde_json::Value, operation: Operation) -> Vec<String> {
        let t = transformer();
        let options = VideoOptions::parse(&raw, QualityPreset::for_operation(operation)).unwrap();
        t.build_args(
            Path::new("/work/input.mp4"),
            Path::new(&format!("/work/output.{}", container)),
            container,
            &options,
        )
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_mp4_compress_uses_compress_preset() {
        let args = args_for("mp4", json!({}), Operation::Compress);
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-crf"), Some("28"));
        assert_eq!(value_after(&args, "-preset"), Some("medium"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-b:a"), Some("128k"));
        assert_eq!(args.last().unwrap(), "/work/output.mp4");
    }

    #[test]
    fn test_mp4_convert_uses_convert_preset() {
        let args = args_for("mp4", json!({}), Operation::Convert);
        assert_eq!(value_after(&args, "-crf"), Some("23"));
        assert_eq!(value_after(&args, "-b:a"), Some("192k"));
    }

    #[test]
    fn test_webm_rescales_crf() {
        let args = args_for("webm", json!({"crf": 51}), Operation::Convert);
        assert_eq!(value_after(&args, "-c:v"), Some("libvpx-vp9"));
        assert_eq!(value_after(&args, "-crf"), Some("63"));
        assert_eq!(value_after(&args, "-b:v"), Some("0"));
        assert_eq!(value_after(&args, "-c:a"), Some("libopus"));
    }

    #[test]
    fn test_avi_uses_qscale() {
        let args = args_for("avi", json!({"quality": 100}), Operation::Convert);
        assert_eq!(value_after(&args, "-c:v"), Some("mpeg4"));
        assert_eq!(value_after(&args, "-q:v"), Some("2"));
        assert_eq!(value_after(&args, "-c:a"), Some("libmp3lame"));
    }

    #[test]
    fn test_quality_maps_to_crf() {
        let args = args_for("mov", json!({"quality": 1}), Operation::Compress);
        assert_eq!(value_after(&args, "-crf"), Some("51"));
        assert!(args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn test_scaling_filter() {
        let args = args_for("mp4", json!({"max_width": 1280}), Operation::Compress);
        let filter = value_after(&args, "-vf").unwrap();
        assert!(filter.contains("min(1280,iw)"));
        assert!(filter.contains("force_original_aspect_ratio=decrease"));
    }

    #[test]
    fn test_bitrate_cap() {
        let args = args_for("mp4", json!({"video_bitrate_kbps": 2000}), Operation::Compress);
        assert_eq!(value_after(&args, "-maxrate"), Some("2000k"));
        assert_eq!(value_after(&args, "-bufsize"), Some("4000k"));
    }

    #[test]
    fn test_targets() {
        let t = transformer();
        assert!(t.supports_target("webm"));
        assert!(t.supports_target("mov"));
        assert!(!t.supports_target("mkv"));
        assert!(!t.supports_target("gif"));
        assert!(t.supports_input("mkv"));
    }
}
