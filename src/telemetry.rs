//! HTTP request tracing.
//!
//! Every request gets an `http.request` span carrying the request id, method
//! and path. Access tokens travel in some paths, so paths are redacted with
//! [`mask_token`] before they reach a span.

use axum::http::Request;
use tower_http::{
    classify::{SharedClassifier, StatusInRangeAsFailures},
    trace::{
        DefaultOnBodyChunk, DefaultOnEos, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse,
        MakeSpan, TraceLayer,
    },
};

use crate::services::tokens::mask_token;

const TOKEN_ROUTE_PREFIX: &str = "/api/v1/tokens/";
const STATIC_TOKEN_ROUTES: &[&str] = &["metrics", "rotate"];

/// Builds `http.request` spans with a redacted path
#[derive(Debug, Clone, Default)]
pub struct RequestSpanMaker;

impl<B> MakeSpan<B> for RequestSpanMaker {
    fn make_span(&mut self, request: &Request<B>) -> tracing::Span {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");

        tracing::info_span!(
            "http.request",
            request_id = %request_id,
            method = %request.method(),
            path = %redact_path(request.uri().path()),
        )
    }
}

/// Replaces the token segment of `/api/v1/tokens/{token}` with its mask.
pub fn redact_path(path: &str) -> String {
    match path.strip_prefix(TOKEN_ROUTE_PREFIX) {
        Some(rest) if !rest.is_empty() && !STATIC_TOKEN_ROUTES.contains(&rest) => {
            format!("{}{}", TOKEN_ROUTE_PREFIX, mask_token(rest))
        }
        _ => path.to_string(),
    }
}

pub type HttpTraceLayer = TraceLayer<
    SharedClassifier<StatusInRangeAsFailures>,
    RequestSpanMaker,
    DefaultOnRequest,
    DefaultOnResponse,
    DefaultOnBodyChunk,
    DefaultOnEos,
    DefaultOnFailure,
>;

/// Tracing layer that treats 5xx responses as failures
pub fn configure_http_tracing() -> HttpTraceLayer {
    TraceLayer::new(SharedClassifier::new(StatusInRangeAsFailures::new(500..=599)))
        .make_span_with(RequestSpanMaker)
        .on_request(DefaultOnRequest::default())
        .on_response(DefaultOnResponse::default())
        .on_body_chunk(DefaultOnBodyChunk::default())
        .on_eos(DefaultOnEos::default())
        .on_failure(DefaultOnFailure::default())
}
