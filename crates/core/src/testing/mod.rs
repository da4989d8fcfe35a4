//! Testing utilities and mock implementations.
//!
//! Lets the engine run end to end without ffmpeg or Ghostscript installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use shrinkwrap_core::testing::{fixtures, MockTransformer};
//!
//! let mock = MockTransformer::new(FormatFamily::Video);
//! registry.register(Arc::new(mock.clone()));
//!
//! engine.submit(SubmitRequest::compress(fixtures::mp4_bytes(), "clip.mp4")).await?;
//! ```

mod mock_transformer;

pub use mock_transformer::{MockTransformer, RecordedTransform};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::io::Cursor;

    use crate::detect::{mime_for_format, FormatFamily};
    use crate::job::{NewJob, Operation};

    /// A small, valid PNG.
    pub fn png_bytes() -> Vec<u8> {
        encode(image::ImageFormat::Png, 16, 16)
    }

    /// A valid JPEG of the given size with a smooth gradient.
    pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        encode(image::ImageFormat::Jpeg, width, height)
    }

    fn encode(format: image::ImageFormat, width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                128,
            ])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).expect("encode fixture image");
        out.into_inner()
    }

    /// A looping 32x32 GIF with `frames` distinct frames.
    pub fn animated_gif_bytes(frames: u32) -> Vec<u8> {
        use image::codecs::gif::{GifEncoder, Repeat};
        use image::{Delay, Frame, Rgba, RgbaImage};

        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            encoder.set_repeat(Repeat::Infinite).expect("set gif repeat");
            let frames = (0..frames).map(|i| {
                let shade = (i * 255 / frames.max(1)) as u8;
                let buffer = RgbaImage::from_pixel(32, 32, Rgba([shade, 255 - shade, 64, 255]));
                Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(100, 1))
            });
            encoder.encode_frames(frames).expect("encode fixture gif");
        }
        out
    }

    /// An ISO media header; enough to be detected as MP4.
    pub fn mp4_bytes() -> Vec<u8> {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x20];
        bytes.extend_from_slice(b"ftypisom");
        bytes.extend_from_slice(&[0u8; 1024]);
        bytes
    }

    /// A RIFF/WAVE header followed by silence.
    pub fn wav_bytes() -> Vec<u8> {
        let mut bytes = b"RIFF\x24\x08\x00\x00WAVEfmt ".to_vec();
        bytes.extend_from_slice(&[0u8; 2048]);
        bytes
    }

    /// A minimal PDF.
    pub fn pdf_bytes() -> Vec<u8> {
        b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\ntrailer << /Root 1 0 R >>\n%%EOF\n"
            .to_vec()
    }

    /// A compress job for a store, without going through the engine.
    pub fn new_job(original_name: &str, family: FormatFamily, format: &str) -> NewJob {
        NewJob {
            original_name: original_name.to_string(),
            original_size: 1024,
            mime_type: mime_for_format(format).to_string(),
            declared_mime_type: None,
            family,
            source_format: format.to_string(),
            operation: Operation::Compress,
            target_format: None,
            options: serde_json::json!({}),
        }
    }
}
