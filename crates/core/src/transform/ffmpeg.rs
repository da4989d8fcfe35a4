//! Shared ffmpeg/ffprobe process handling for the video and audio transformers.

use regex_lite::Regex;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Duration;
use tracing::debug;

use super::config::ToolsConfig;
use super::error::TransformError;
use super::types::{MediaInfo, ProgressSender, TransformProgress};

/// Lines of ffmpeg error output kept for failure reports.
const MAX_ERROR_LINES: usize = 20;

/// Runs ffmpeg and ffprobe as child processes.
///
/// Children are spawned with `kill_on_drop`, so dropping the future (for
/// example when a timeout fires) terminates the transcode.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    config: ToolsConfig,
}

impl FfmpegRunner {
    pub fn new(config: ToolsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolsConfig {
        &self.config
    }

    /// Leading arguments: overwrite, input.
    pub fn input_args(&self, input_path: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-i".to_string(),
            input_path.to_string_lossy().to_string(),
        ]
    }

    /// Trailing arguments: log level, progress pipe, output.
    pub fn output_args(&self, output_path: &Path) -> Vec<String> {
        vec![
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            "-progress".to_string(),
            "pipe:2".to_string(),
            output_path.to_string_lossy().to_string(),
        ]
    }

    /// Probes a media file for its duration and main streams.
    pub async fn probe(&self, path: &Path) -> Result<MediaInfo, TransformError> {
        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e, "ffprobe", &self.config.ffprobe_path))?;

        if !output.status.success() {
            return Err(TransformError::failed(
                "ffprobe failed",
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
            ));
        }

        Self::parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Probes for the input duration used in progress reports.
    ///
    /// A failed probe only costs progress, so it yields None.
    pub async fn probe_duration(&self, job_id: &str, path: &Path) -> Option<f64> {
        match self.probe(path).await {
            Ok(info) => {
                debug!("Job {} input: {}", job_id, info);
                Some(info.duration_secs)
            }
            Err(e) => {
                debug!("Probe failed for job {}: {}", job_id, e);
                None
            }
        }
    }

    /// Parses ffprobe JSON output into MediaInfo.
    pub(crate) fn parse_probe_output(output: &str) -> Result<MediaInfo, TransformError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            codec_name: Option<String>,
            width: Option<u32>,
            height: Option<u32>,
        }

        let probe: ProbeOutput = serde_json::from_str(output)
            .map_err(|e| TransformError::decode(format!("Failed to parse ffprobe output: {}", e)))?;

        let video = probe.streams.iter().find(|s| s.codec_type == "video");
        let audio = probe.streams.iter().find(|s| s.codec_type == "audio");

        Ok(MediaInfo {
            duration_secs: probe
                .format
                .duration
                .as_ref()
                .and_then(|d| d.parse::<f64>().ok())
                .unwrap_or(0.0),
            format: probe
                .format
                .format_name
                .split(',')
                .next()
                .unwrap_or("unknown")
                .to_string(),
            video_codec: video.and_then(|s| s.codec_name.clone()),
            audio_codec: audio.and_then(|s| s.codec_name.clone()),
            width: video.and_then(|s| s.width),
            height: video.and_then(|s| s.height),
        })
    }

    /// Runs ffmpeg with `args`, streaming progress when a sender is given.
    pub async fn run(
        &self,
        job_id: &str,
        args: &[String],
        duration_secs: Option<f64>,
        progress_tx: Option<ProgressSender>,
    ) -> Result<(), TransformError> {
        debug!("Running {} {}", self.config.ffmpeg_path.display(), args.join(" "));

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e, "ffmpeg", &self.config.ffmpeg_path))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransformError::failed("ffmpeg stderr was not captured", None))?;
        let mut reader = BufReader::new(stderr).lines();

        let time_regex = Regex::new(r"out_time_ms=(\d+)").ok();
        let speed_regex = Regex::new(r"speed=\s*(\d+\.?\d*)x").ok();

        let mut current_time = 0.0;
        let mut current_speed = None;
        let mut last_progress_send = Instant::now();
        let progress_interval = Duration::from_millis(500);
        let mut error_lines: Vec<String> = Vec::new();

        while let Some(line) = reader.next_line().await? {
            if let Some(caps) = time_regex.as_ref().and_then(|re| re.captures(&line)) {
                if let Ok(us) = caps[1].parse::<f64>() {
                    // out_time_ms is reported in microseconds.
                    current_time = us / 1_000_000.0;
                }
                continue;
            }
            if let Some(caps) = speed_regex.as_ref().and_then(|re| re.captures(&line)) {
                current_speed = Some(format!("{}x", &caps[1]));
                continue;
            }
            if !line.contains('=') {
                if error_lines.len() == MAX_ERROR_LINES {
                    error_lines.remove(0);
                }
                error_lines.push(line);
            }

            if let Some(ref tx) = progress_tx {
                if last_progress_send.elapsed() >= progress_interval {
                    let _ = tx.try_send(TransformProgress {
                        job_id: job_id.to_string(),
                        percent: progress_percent(current_time, duration_secs),
                        time_secs: current_time,
                        speed: current_speed.clone(),
                    });
                    last_progress_send = Instant::now();
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(TransformError::failed(
                format!("ffmpeg exited with code: {:?}", status.code()),
                if error_lines.is_empty() {
                    None
                } else {
                    Some(error_lines.join("\n"))
                },
            ));
        }

        Ok(())
    }

    /// Checks that ffmpeg and ffprobe can be executed.
    pub async fn validate(&self) -> Result<(), TransformError> {
        for (tool, path) in [
            ("ffmpeg", &self.config.ffmpeg_path),
            ("ffprobe", &self.config.ffprobe_path),
        ] {
            Command::new(path)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map_err(|e| self.spawn_error(e, tool, path))?;
        }
        Ok(())
    }

    fn spawn_error(&self, e: std::io::Error, tool: &str, path: &Path) -> TransformError {
        if e.kind() == std::io::ErrorKind::NotFound {
            TransformError::tool_not_found(tool, path)
        } else {
            TransformError::Io(e)
        }
    }
}

/// Percentage of `duration_secs` covered by `time_secs`, capped at 100.
fn progress_percent(time_secs: f64, duration_secs: Option<f64>) -> f32 {
    match duration_secs {
        Some(dur) if dur > 0.0 => (time_secs / dur * 100.0).min(100.0) as f32,
        _ => 0.0,
    }
}
