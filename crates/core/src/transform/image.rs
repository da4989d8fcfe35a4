//! In-process image transformer built on the `image` crate.

use async_trait::async_trait;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, Frame, ImageFormat};
use std::io::Cursor;
use std::time::Instant;
use tracing::debug;

use super::error::TransformError;
use super::options::{ImageFit, ImageOptions, QualityPreset, TransformOptions};
use super::traits::{discard_output, Transformer};
use super::types::{ProgressSender, TransformJob, TransformOutput};
use crate::detect::FormatFamily;
use crate::job::Operation;

const INPUTS: &[&str] = &["jpeg", "png", "gif", "webp"];
const TARGETS: &[&str] = &["jpeg", "png", "webp", "gif"];

/// Decodes, optionally downsizes, and re-encodes raster images.
///
/// Work runs on the blocking pool under the job's worker slot. Lossy WebP
/// output goes through libwebp. Animated GIFs keep every frame when written
/// back as GIF; other animated output is refused.
#[derive(Debug, Default, Clone)]
pub struct ImageTransformer;

impl ImageTransformer {
    pub fn new() -> Self {
        Self
    }

    async fn transcode(
        &self,
        job: &TransformJob,
        format: &str,
    ) -> Result<TransformOutput, TransformError> {
        let started = Instant::now();
        let options = job
            .options
            .as_image()
            .cloned()
            .ok_or_else(|| TransformError::invalid_options("expected image options"))?;

        let input = tokio::fs::read(&job.input_path).await?;
        let target = format.to_string();
        let encoded = job
            .slot
            .run_blocking(move || encode(&input, &target, &options))
            .await?;

        if let Err(e) = tokio::fs::write(&job.output_path, &encoded).await {
            discard_output(&job.output_path).await;
            return Err(e.into());
        }

        debug!(
            "Encoded {} as {} ({} bytes) for job {}",
            job.input_path.display(),
            format,
            encoded.len(),
            job.job_id
        );

        TransformOutput::from_written(&job.output_path, format, started).await
    }
}

/// Decodes `input` and encodes it as `format`.
pub(crate) fn encode(
    input: &[u8],
    format: &str,
    options: &ImageOptions,
) -> Result<Vec<u8>, TransformError> {
    match image::guess_format(input) {
        Ok(ImageFormat::Gif) => {
            let frames = GifDecoder::new(Cursor::new(input))?
                .into_frames()
                .collect_frames()?;
            if frames.len() > 1 {
                if format != "gif" {
                    return Err(TransformError::failed(
                        format!("animated GIF ({} frames) cannot be written as {}", frames.len(), format),
                        None,
                    ));
                }
                return encode_animation(frames, options);
            }
        }
        Ok(ImageFormat::WebP) => {
            if WebPDecoder::new(Cursor::new(input))?.has_animation() {
                return Err(TransformError::failed("animated WebP is not supported", None));
            }
        }
        _ => {}
    }

    let img = image::load_from_memory(input)?;
    let img = resize(img, options);
    let quality = options.quality().clamp(1, 100);

    let mut buffer = Vec::new();
    match format {
        "jpeg" => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality as u8);
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
        }
        "png" => {
            // PNG is lossless; quality selects how hard the encoder works.
            let compression = match quality {
                90..=100 => CompressionType::Fast,
                50..=89 => CompressionType::Default,
                _ => CompressionType::Best,
            };
            let encoder = PngEncoder::new_with_quality(&mut buffer, compression, PngFilter::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        "webp" => {
            let rgba = img.to_rgba8();
            let encoder = webp::Encoder::from_rgba(&rgba, rgba.width(), rgba.height());
            buffer = encoder.encode(quality as f32).to_vec();
        }
        "gif" => {
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Gif)?;
        }
        other => return Err(TransformError::unsupported_target(other)),
    }

    Ok(buffer)
}

/// Re-encodes every frame of an animation as a looping GIF.
fn encode_animation(frames: Vec<Frame>, options: &ImageOptions) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buffer);
        encoder.set_repeat(Repeat::Infinite)?;
        // Decoded frames are composited onto the full canvas.
        let resized = frames.into_iter().map(|frame| {
            let delay = frame.delay();
            let img = resize(DynamicImage::ImageRgba8(frame.into_buffer()), options);
            Frame::from_parts(img.to_rgba8(), 0, 0, delay)
        });
        encoder.encode_frames(resized)?;
    }
    Ok(buffer)
}

/// Applies the resize box. Images are never enlarged.
fn resize(img: DynamicImage, options: &ImageOptions) -> DynamicImage {
    if !options.has_resize() {
        return img;
    }

    let (width, height) = (img.width(), img.height());
    let box_w = options.max_width.unwrap_or(width).min(width);
    let box_h = options.max_height.unwrap_or(height).min(height);
    if box_w == width && box_h == height {
        return img;
    }

    let both = options.max_width.is_some() && options.max_height.is_some();
    match options.fit {
        ImageFit::Cover if both => img.resize_to_fill(box_w, box_h, FilterType::Lanczos3),
        ImageFit::Fill => img.resize_exact(box_w, box_h, FilterType::Lanczos3),
        _ => img.resize(box_w, box_h, FilterType::Lanczos3),
    }
}

#[async_trait]
impl Transformer for ImageTransformer {
    fn name(&self) -> &str {
        "image"
    }

    fn family(&self) -> FormatFamily {
        FormatFamily::Image
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
        let preset = QualityPreset::for_operation(operation);
        ImageOptions::parse(raw, preset).map(TransformOptions::Image)
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
        self.transcode(job, &job.source_format).await
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
        self.transcode(job, target).await
    }
}
