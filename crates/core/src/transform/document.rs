//! PDF transformer driving Ghostscript.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

use super::config::ToolsConfig;
use super::error::TransformError;
use super::options::{DocumentOptions, QualityPreset, TransformOptions};
use super::traits::{discard_output, Transformer};
use super::types::{ProgressSender, TransformJob, TransformOutput};
use crate::detect::FormatFamily;
use crate::job::Operation;

const INPUTS: &[&str] = &["pdf"];
const TARGETS: &[&str] = &["pdf", "png", "jpeg"];

/// Rewrites PDFs or renders their first page with Ghostscript.
pub struct DocumentTransformer {
    config: ToolsConfig,
}

impl DocumentTransformer {
    pub fn new(config: ToolsConfig) -> Self {
        Self { config }
    }

    /// Builds Ghostscript arguments for writing `target`.
    pub(crate) fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        target: &str,
        options: &DocumentOptions,
    ) -> Vec<String> {
        let mut args = vec![
            "-dNOPAUSE".to_string(),
            "-dBATCH".to_string(),
            "-dQUIET".to_string(),
            "-dSAFER".to_string(),
        ];

        match target {
            "png" | "jpeg" => {
                let device = if target == "png" { "png16m" } else { "jpeg" };
                args.extend([
                    format!("-sDEVICE={}", device),
                    format!("-r{}", options.dpi()),
                    "-dFirstPage=1".to_string(),
                    "-dLastPage=1".to_string(),
                ]);
                if target == "jpeg" {
                    args.push(format!("-dJPEGQ={}", options.quality()));
                }
            }
            _ => {
                let level = options.level();
                let dpi = level.image_dpi();
                args.extend([
                    "-sDEVICE=pdfwrite".to_string(),
                    "-dCompatibilityLevel=1.5".to_string(),
                    format!("-dPDFSETTINGS={}", level.pdf_settings()),
                    "-dDetectDuplicateImages=true".to_string(),
                    "-dCompressFonts=true".to_string(),
                    "-dSubsetFonts=true".to_string(),
                    "-dDownsampleColorImages=true".to_string(),
                    "-dDownsampleGrayImages=true".to_string(),
                    "-dDownsampleMonoImages=true".to_string(),
                    format!("-dColorImageResolution={}", dpi),
                    format!("-dGrayImageResolution={}", dpi),
                    format!("-dMonoImageResolution={}", dpi),
                ]);
            }
        }

        args.push(format!("-sOutputFile={}", output_path.to_string_lossy()));
        args.push(input_path.to_string_lossy().to_string());
        args
    }

    async fn render(
        &self,
        job: &TransformJob,
        target: &str,
    ) -> Result<TransformOutput, TransformError> {
        let started = Instant::now();
        let options = job
            .options
            .as_document()
            .ok_or_else(|| TransformError::invalid_options("expected document options"))?;

        let args = self.build_args(&job.input_path, &job.output_path, target, options);
        debug!("Running {} {}", self.config.ghostscript_path.display(), args.join(" "));

        let result = Command::new(&self.config.ghostscript_path)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                discard_output(&job.output_path).await;
                return Err(if e.kind() == std::io::ErrorKind::NotFound {
                    TransformError::tool_not_found("ghostscript", &self.config.ghostscript_path)
                } else {
                    TransformError::Io(e)
                });
            }
        };

        if !output.status.success() {
            discard_output(&job.output_path).await;
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TransformError::failed(
                format!("ghostscript exited with code: {:?}", output.status.code()),
                if stderr.is_empty() { None } else { Some(stderr) },
            ));
        }

        TransformOutput::from_written(&job.output_path, target, started).await
    }
}

#[async_trait]
impl Transformer for DocumentTransformer {
    fn name(&self) -> &str {
        "document"
    }

    fn family(&self) -> FormatFamily {
        FormatFamily::Document
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
        DocumentOptions::parse(raw, QualityPreset::for_operation(operation))
            .map(TransformOptions::Document)
    }

    async fn compress(
        &self,
        job: &TransformJob,
        _progress: Option<ProgressSender>,
    ) -> Result<TransformOutput, TransformError> {
        if !self.supports_input(&job.source_format) {
            return Err(TransformError::UnsupportedInputFormat {
                format: job.source_format.clone(),
            });
        }
        self.render(job, "pdf").await
    }

    async fn convert(
        &self,
        job: &TransformJob,
        target: &str,
        _progress: Option<ProgressSender>,
    ) -> Result<TransformOutput, TransformError> {
        if !self.supports_target(target) {
            return Err(TransformError::unsupported_target(target));
        }
        self.render(job, target).await
    }

    async fn validate(&self) -> Result<(), TransformError> {
        Command::new(&self.config.ghostscript_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TransformError::tool_not_found("ghostscript", &self.config.ghostscript_path)
                } else {
                    TransformError::Io(e)
                }
            })?;
        Ok(())
    }
}
