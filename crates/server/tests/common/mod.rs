//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process router
//! backed by a real engine, the SQLite store and mock transformers, so the
//! HTTP surface can be exercised without ffmpeg or ghostscript.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use shrinkwrap_core::{
    testing::MockTransformer, Config, EngineConfig, FormatFamily, FsArtifactStore, JobStore,
    Lifecycle, LimitsConfig, SqliteJobStore, TransformEngine, TransformerRegistry,
};
use shrinkwrap_server::api::{create_router, CALLER_TIER_HEADER};
use shrinkwrap_server::state::AppState;

/// Re-export fixtures for test convenience
pub use shrinkwrap_core::testing::fixtures;

const BOUNDARY: &str = "----shrinkwrap-test-boundary";

/// Test fixture for API testing with mock transformers.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Engine behind the router, for direct assertions
    pub engine: Arc<TransformEngine>,
    /// Mock image transformer - control delay, failures, output
    pub image: MockTransformer,
    /// Mock video transformer
    pub video: MockTransformer,
    /// Temporary directory for the database, artifacts and work files
    pub temp_dir: TempDir,
}

/// Response from a JSON endpoint
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Response with the raw body, for downloads and metrics
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub bytes: Vec<u8>,
}

/// A multipart upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub fields: Vec<(String, String)>,
    pub tier: Option<String>,
}

impl Upload {
    pub fn compress(file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            bytes,
            fields: vec![("operation".to_string(), "compress".to_string())],
            tier: None,
        }
    }

    pub fn convert(file_name: &str, bytes: Vec<u8>, target: &str) -> Self {
        Self::compress(file_name, bytes)
            .field("operation", "convert")
            .field("target_format", target)
    }

    /// Adds a text field, replacing an earlier one with the same name.
    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.fields.retain(|(n, _)| n != name);
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub fn tier(mut self, tier: &str) -> Self {
        self.tier = Some(tier.to_string());
        self
    }

    fn body(&self, include_file: bool) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in &self.fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if include_file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY, self.file_name
                )
                .as_bytes(),
            );
            body.extend_from_slice(&self.bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }
}

impl TestFixture {
    /// Create a new test fixture with default limits.
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default(), LimitsConfig::default()).await
    }

    /// Create a test fixture with custom engine config and limits.
    pub async fn with_config(engine_config: EngineConfig, limits: LimitsConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let image = MockTransformer::new(FormatFamily::Image);
        let video = MockTransformer::new(FormatFamily::Video);
        let mut registry = TransformerRegistry::new();
        registry.register(Arc::new(image.clone()));
        registry.register(Arc::new(video.clone()));

        let jobs: Arc<dyn JobStore> = Arc::new(
            SqliteJobStore::new(&temp_dir.path().join("test.db"))
                .expect("Failed to create job store"),
        );
        let artifacts = Arc::new(
            FsArtifactStore::new(temp_dir.path().join("artifacts"))
                .expect("Failed to create artifact store"),
        );
        let lifecycle = Arc::new(Lifecycle::new(jobs, artifacts, engine_config.retention()));

        let config = Config {
            engine: engine_config.clone(),
            limits: limits.clone(),
            ..Config::default()
        };

        let engine = Arc::new(TransformEngine::new(
            engine_config,
            limits,
            registry,
            lifecycle,
            temp_dir.path().join("work"),
        ));
        engine.start().await;

        let state = Arc::new(AppState::new(config, Arc::clone(&engine), "test".to_string()));
        let router = create_router(state);

        Self {
            router,
            engine,
            image,
            video,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request without a body.
    pub async fn post(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a GET request and keep the raw body.
    pub async fn get_raw(&self, path: &str, tier: Option<&str>) -> RawResponse {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(tier) = tier {
            builder = builder.header(CALLER_TIER_HEADER, tier);
        }
        self.send_raw(builder.body(Body::empty()).unwrap()).await
    }

    /// Upload a file to `/api/v1/jobs`.
    pub async fn upload(&self, upload: &Upload) -> TestResponse {
        self.upload_to("/api/v1/jobs", upload).await
    }

    /// Upload a file and wait for the job to finish.
    pub async fn upload_and_wait(&self, upload: &Upload) -> TestResponse {
        self.upload_to("/api/v1/jobs?wait=true", upload).await
    }

    /// Upload a form with no file part.
    pub async fn upload_without_file(&self, upload: &Upload) -> TestResponse {
        let request = self.multipart_request("/api/v1/jobs", upload, false);
        to_json(self.send_raw(request).await)
    }

    async fn upload_to(&self, path: &str, upload: &Upload) -> TestResponse {
        let request = self.multipart_request(path, upload, true);
        to_json(self.send_raw(request).await)
    }

    fn multipart_request(&self, path: &str, upload: &Upload, include_file: bool) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            );
        if let Some(tier) = &upload.tier {
            builder = builder.header(CALLER_TIER_HEADER, tier.as_str());
        }
        builder.body(Body::from(upload.body(include_file))).unwrap()
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        to_json(self.send_raw(request).await)
    }

    async fn send_raw(&self, request: Request<Body>) -> RawResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes()
            .to_vec();

        RawResponse {
            status,
            headers,
            bytes,
        }
    }
}

fn to_json(raw: RawResponse) -> TestResponse {
    let body: Value = if raw.bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&raw.bytes).unwrap_or(Value::Null)
    };
    TestResponse {
        status: raw.status,
        body,
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
