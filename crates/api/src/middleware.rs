//! Per-request execution context, request id and access logging.

use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use common::{CancelHandle, ExecutionContext, RequestMeta};
use tracing::Instrument;

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header overriding the request deadline, e.g. `250ms`, `5s`, `2m`.
pub const TIMEOUT_HEADER: &str = "x-timeout-duration";

/// What every handler runs under: the request's context and metadata.
///
/// Inserted into the request extensions by [`request_context`].
#[derive(Debug, Clone)]
pub struct RequestScope {
    pub ctx: ExecutionContext,
    pub meta: RequestMeta,
}

/// Cancels the request context if the request future is dropped before the
/// handler produced a response.
struct CancelOnDrop {
    handle: Option<CancelHandle>,
}

impl CancelOnDrop {
    fn new(handle: CancelHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::warn!("request dropped before completion, cancelling");
            handle.cancel();
        }
    }
}

/// Builds the [`RequestScope`] for a request and logs its completion.
///
/// The deadline is `default_timeout` unless the client sends a parsable
/// `X-Timeout-Duration`. The request id is taken from `X-Request-ID`, or
/// generated, and echoed on the response.
pub async fn request_context(
    State(default_timeout): State<Duration>,
    mut req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let meta = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(RequestMeta::new)
        .unwrap_or_else(RequestMeta::generate);

    let timeout = req
        .headers()
        .get(TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_duration)
        .unwrap_or(default_timeout);

    let (ctx, handle) = ExecutionContext::cancellable();
    let ctx = ctx.with_timeout(timeout);
    let guard = CancelOnDrop::new(handle);

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = tracing::info_span!(
        "request",
        request_id = %meta.request_id,
        %method,
        %path,
    );

    req.extensions_mut().insert(RequestScope {
        ctx,
        meta: meta.clone(),
    });

    let mut response = next.run(req).instrument(span.clone()).await;
    guard.disarm();

    let status = response.status().as_u16();
    let duration = started.elapsed();
    metrics::counter!("http_requests_total", "method" => method.to_string(), "status" => status.to_string())
        .increment(1);
    metrics::histogram!("http_request_duration_seconds", "method" => method.to_string())
        .record(duration.as_secs_f64());

    let duration_ms = duration.as_millis() as u64;
    span.in_scope(|| {
        if status >= 500 {
            tracing::error!(status, duration_ms, "request completed with server error");
        } else if status >= 400 {
            tracing::warn!(status, duration_ms, "request completed with client error");
        } else {
            tracing::info!(status, duration_ms, "request completed");
        }
    });

    if let Ok(value) = HeaderValue::from_str(&meta.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Parses durations like `250ms`, `5s`, `1.5s` or `1m30s`.
///
/// Accepted units are `ns`, `us`, `µs`, `ms`, `s`, `m` and `h`. A bare `0` is
/// zero. Returns `None` for anything else, including negative values.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input == "0" {
        return Some(Duration::ZERO);
    }
    if input.is_empty() {
        return None;
    }

    let mut rest = input;
    let mut total_nanos = 0.0_f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total_nanos += value * nanos_per_unit;
    }

    if !total_nanos.is_finite() || total_nanos >= u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total_nanos.round() as u64))
}
