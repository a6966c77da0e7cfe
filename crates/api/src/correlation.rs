//! Correlation ID propagation.
//!
//! Every request gets a correlation ID, taken from the `X-Correlation-ID`
//! header or generated. It is stored in the request extensions, attached to
//! the request span, echoed on the response and readable through
//! [`current`] while the request is handled, so error bodies can carry it.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use common::CorrelationId;
use tracing::Instrument;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

const MAX_LEN: usize = 128;

tokio::task_local! {
    static CURRENT: CorrelationId;
}

/// Correlation ID of the request being handled on this task, if any.
pub fn current() -> Option<CorrelationId> {
    CURRENT.try_with(CorrelationId::clone).ok()
}

/// Runs `fut` with `correlation_id` as the current correlation ID.
pub async fn scope<F: Future>(correlation_id: CorrelationId, fut: F) -> F::Output {
    CURRENT.scope(correlation_id, fut).await
}

pub async fn correlation_middleware(mut req: Request, next: Next) -> Response {
    let correlation_id = req
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_LEN)
        .map(CorrelationId::new)
        .unwrap_or_else(CorrelationId::generate);

    req.extensions_mut().insert(correlation_id.clone());

    let span = tracing::info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let mut response = scope(correlation_id.clone(), next.run(req))
        .instrument(span)
        .await;
    metrics::counter!("http_responses_total", "status" => response.status().as_u16().to_string())
        .increment(1);

    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}
