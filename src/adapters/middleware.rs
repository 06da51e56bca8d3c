//! Axum middleware shared by the distribution service and the mock agent.
use axum::{
    extract::{MatchedPath, Request},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use crate::{metrics, tracing_setup::create_request_span};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Times every request and records it under its matched route, so that path parameters do not
/// explode metric cardinality.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "fallback".to_string());

    let timer = metrics::RequestTimer::new(&path, &method);
    let response = next.run(req).await;
    metrics::increment_request_total(&path, &method, response.status().as_u16());
    drop(timer);

    response
}

/// Reuse the caller's `X-Request-ID` or mint one, run the request inside a span carrying it and
/// echo it on the response.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = create_request_span(req.method().as_str(), req.uri().path(), &request_id);
    let start = std::time::Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;

    span.record("http.status_code", response.status().as_u16());
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    tracing::debug!(parent: &span, status = %response.status(), "request completed");

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}
