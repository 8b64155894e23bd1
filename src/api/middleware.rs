use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Log every API call by outcome: 4xx at warn, 5xx at error, the rest at debug.
///
/// Only the path is logged; start requests carry the stream key in their
/// body, never in the URI.
pub async fn log_request_errors(req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    let method = req.method().clone();
    let started = Instant::now();

    let response = next.run(req).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match status.as_u16() {
        400..=499 => warn!(%method, %path, %status, elapsed_ms, "Client error"),
        500..=599 => error!(%method, %path, %status, elapsed_ms, "Server error"),
        _ => debug!(%method, %path, %status, elapsed_ms, "Request handled"),
    }

    response
}
