//! Caller tier extraction and metrics middleware for API routes.

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use shrinkwrap_core::CallerTier;
use std::future::Future;
use std::time::Instant;
use tracing::debug;

use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};

/// Header set by the upstream auth layer.
pub const CALLER_TIER_HEADER: &str = "x-caller-tier";

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Extractor for the caller's tier.
///
/// Reads the `x-caller-tier` header. A missing or unrecognised value is
/// treated as anonymous, the most restricted tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier(pub CallerTier);

impl<S> FromRequestParts<S> for Tier
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let tier = match parts
            .headers
            .get(CALLER_TIER_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(value) => value.parse().unwrap_or_else(|e| {
                debug!("Ignoring caller tier header: {}", e);
                CallerTier::Anonymous
            }),
            None => CallerTier::Anonymous,
        };
        std::future::ready(Ok(Tier(tier)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn echo_tier(Tier(tier): Tier) -> String {
        tier.to_string()
    }

    fn app() -> Router {
        Router::new()
            .route("/tier", get(echo_tier))
            .layer(middleware::from_fn(metrics_middleware))
    }

    async fn tier_for(header: Option<&str>) -> String {
        let mut builder = Request::builder().uri("/tier");
        if let Some(value) = header {
            builder = builder.header(CALLER_TIER_HEADER, value);
        }
        let response = app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_header_is_anonymous() {
        assert_eq!(tier_for(None).await, "anonymous");
    }

    #[tokio::test]
    async fn test_header_sets_tier() {
        assert_eq!(tier_for(Some("premium")).await, "premium");
        assert_eq!(tier_for(Some("Registered")).await, "registered");
    }

    #[tokio::test]
    async fn test_unknown_tier_falls_back_to_anonymous() {
        assert_eq!(tier_for(Some("admin")).await, "anonymous");
    }

    #[tokio::test]
    async fn test_metrics_middleware_counts_requests() {
        let before = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/tier", "200"])
            .get();
        tier_for(None).await;
        let after = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/tier", "200"])
            .get();
        assert!(after > before);
    }
}
