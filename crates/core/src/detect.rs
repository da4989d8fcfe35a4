//! Content-based format detection.
//!
//! Uploads are classified by their leading bytes, never by file name alone.
//! A declared MIME type is only used to flag disagreements in the logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Broad family of a file, used to pick a transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFamily {
    Image,
    Video,
    Audio,
    Document,
}

impl FormatFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    /// Family implied by a MIME type such as `video/mp4`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        let (top, sub) = mime.split_once('/')?;
        match top {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "application" if sub == "pdf" => Some(Self::Document),
            _ => None,
        }
    }
}

impl fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "document" => Ok(Self::Document),
            other => Err(format!("unknown format family: {}", other)),
        }
    }
}

/// Result of sniffing an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedFormat {
    pub family: FormatFamily,
    /// Short format name (`jpeg`, `mp4`, `pdf`, ...).
    pub format: String,
    pub mime: String,
}

impl DetectedFormat {
    fn new(family: FormatFamily, format: &str) -> Self {
        Self {
            family,
            format: format.to_string(),
            mime: mime_for_format(format).to_string(),
        }
    }
}

/// Identifies a file from its magic bytes.
pub fn sniff(bytes: &[u8]) -> Option<DetectedFormat> {
    use FormatFamily::*;

    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(DetectedFormat::new(Image, "jpeg"));
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(DetectedFormat::new(Image, "png"));
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(DetectedFormat::new(Image, "gif"));
    }
    if bytes.starts_with(b"%PDF-") {
        return Some(DetectedFormat::new(Document, "pdf"));
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") {
        return match &bytes[8..12] {
            b"WEBP" => Some(DetectedFormat::new(Image, "webp")),
            b"WAVE" => Some(DetectedFormat::new(Audio, "wav")),
            b"AVI " => Some(DetectedFormat::new(Video, "avi")),
            _ => None,
        };
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return match &bytes[8..12] {
            b"qt  " => Some(DetectedFormat::new(Video, "mov")),
            b"M4A " | b"M4B " => Some(DetectedFormat::new(Audio, "m4a")),
            // HEIF and AVIF stills; no transformer reads them.
            b"heic" | b"heix" | b"mif1" | b"msf1" | b"avif" | b"avis" => None,
            _ => Some(DetectedFormat::new(Video, "mp4")),
        };
    }
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        // The EBML DocType sits in the first few dozen bytes.
        let head = &bytes[..bytes.len().min(64)];
        let is_webm = head.windows(4).any(|w| w == b"webm");
        return Some(DetectedFormat::new(Video, if is_webm { "webm" } else { "mkv" }));
    }
    if bytes.starts_with(b"OggS") {
        return Some(DetectedFormat::new(Audio, "ogg"));
    }
    if bytes.starts_with(b"fLaC") {
        return Some(DetectedFormat::new(Audio, "flac"));
    }
    if bytes.starts_with(b"ID3") {
        return Some(DetectedFormat::new(Audio, "mp3"));
    }
    if bytes.len() >= 2 && bytes[0] == 0xFF {
        // ADTS: 12-bit sync, layer bits 00.
        if bytes[1] & 0xF6 == 0xF0 {
            return Some(DetectedFormat::new(Audio, "aac"));
        }
        // MPEG audio frame sync with a non-reserved layer.
        if bytes[1] & 0xE0 == 0xE0 && bytes[1] & 0x06 != 0 {
            return Some(DetectedFormat::new(Audio, "mp3"));
        }
    }

    None
}

/// Detects the format of an upload.
///
/// Content wins over the declared MIME type and file name. A mismatch is
/// logged but does not fail detection.
pub fn detect(
    bytes: &[u8],
    declared_mime: Option<&str>,
    file_name: &str,
) -> Option<DetectedFormat> {
    let detected = sniff(bytes)?;

    if let Some(declared) = declared_mime.and_then(FormatFamily::from_mime) {
        if declared != detected.family {
            warn!(
                "Declared type of {} is {} but content is {} ({}), using content",
                file_name, declared, detected.family, detected.format
            );
        }
    }

    Some(detected)
}

/// Canonical MIME type for a short format name.
pub fn mime_for_format(format: &str) -> &'static str {
    match format {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mp3" => "audio/mpeg",
        "aac" => "audio/aac",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// File extension used when naming an output of the given format.
pub fn extension_for_format(format: &str) -> &str {
    match format {
        "jpeg" => "jpg",
        other => other,
    }
}

/// Normalizes user-supplied target names (`JPG`, `.webp`, ...).
pub fn normalize_format_name(name: &str) -> String {
    let name = name.trim().trim_start_matches('.').to_ascii_lowercase();
    match name.as_str() {
        "jpg" => "jpeg".to_string(),
        "quicktime" => "mov".to_string(),
        _ => name,
    }
}
