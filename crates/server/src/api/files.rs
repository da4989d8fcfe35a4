//! Artifact download handler.

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use shrinkwrap_core::Artifact;
use std::sync::Arc;

use super::error::ApiError;
use super::middleware::Tier;
use crate::state::AppState;

/// Download an artifact by its identity.
///
/// Expired or unknown identities are 404; anonymous callers asking for a
/// large artifact get 401.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Tier(tier): Tier,
    Path(identity): Path<String>,
) -> Result<Response, ApiError> {
    let artifact = state.engine().download(&identity, tier).await?;
    Ok(artifact_response(artifact))
}

fn artifact_response(artifact: Artifact) -> Response {
    let content_type = content_type_for(&artifact);
    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);

    let mut response = artifact.bytes.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// The artifact's MIME type, or a guess from its extension when the format is unknown.
fn content_type_for(artifact: &Artifact) -> String {
    if artifact.mime != "application/octet-stream" {
        return artifact.mime.clone();
    }
    mime_guess::from_path(&artifact.file_name)
        .first_or_octet_stream()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(file_name: &str, mime: &str) -> Artifact {
        Artifact {
            bytes: vec![1, 2, 3],
            file_name: file_name.to_string(),
            mime: mime.to_string(),
            size: 3,
        }
    }

    #[test]
    fn test_known_mime_is_kept() {
        let a = artifact("photo_compress_1_abcd1234.jpg", "image/jpeg");
        assert_eq!(content_type_for(&a), "image/jpeg");
    }

    #[test]
    fn test_unknown_mime_guessed_from_extension() {
        let a = artifact("clip_convert_1_abcd1234.mp4", "application/octet-stream");
        assert_eq!(content_type_for(&a), "video/mp4");

        let b = artifact("blob_compress_1_abcd1234.zzz", "application/octet-stream");
        assert_eq!(content_type_for(&b), "application/octet-stream");
    }

    #[test]
    fn test_response_headers() {
        let response = artifact_response(artifact("scan_convert_1_abcd1234.png", "image/png"));
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"scan_convert_1_abcd1234.png\""
        );
    }
}
