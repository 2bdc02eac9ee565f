//! Prometheus metrics for bucketgate.
//!
//! Installs a global Prometheus recorder with its own HTTP listener using
//! `metrics-exporter-prometheus`, defines metric name constants, and
//! provides the axum middleware that records HTTP RED metrics.

use axum::http::{header, Method, Request};
use axum::response::Response;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::errors::ProxyError;
use crate::storage::backend::FetchedObject;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, status.
pub const HTTP_REQUESTS_TOTAL: &str = "bucketgate_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "bucketgate_http_request_duration_seconds";

/// Backend fetches (counter). Labels: backend, outcome.
pub const BACKEND_FETCHES_TOTAL: &str = "bucketgate_backend_fetches_total";

/// Total bytes sent in response bodies (counter).
pub const BYTES_SENT_TOTAL: &str = "bucketgate_bytes_sent_total";

// -- Exporter installation ----------------------------------------------------

/// Install the global recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn install_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    Ok(())
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(BACKEND_FETCHES_TOTAL, "Object fetches by backend and outcome");
    describe_counter!(BYTES_SENT_TOTAL, "Total bytes sent (response bodies)");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Request paths are object keys, so they are never used as a label.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    let method = method_label(req.method());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method, "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method).record(duration);

    let sent = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(sent) = sent {
        counter!(BYTES_SENT_TOTAL).increment(sent);
    }

    response
}

/// Record the outcome of one backend fetch.
pub fn record_backend_fetch(backend: &'static str, result: &Result<FetchedObject, ProxyError>) {
    counter!(BACKEND_FETCHES_TOTAL, "backend" => backend, "outcome" => fetch_outcome(result))
        .increment(1);
}

fn fetch_outcome(result: &Result<FetchedObject, ProxyError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    }
}

/// Bound the method label to the standard verbs.
fn method_label(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::HEAD => "HEAD",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::OPTIONS => "OPTIONS",
        _ => "OTHER",
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_method_label_standard_verbs() {
        assert_eq!(method_label(&Method::GET), "GET");
        assert_eq!(method_label(&Method::DELETE), "DELETE");
    }

    #[test]
    fn test_method_label_extension_collapses() {
        let custom = Method::from_bytes(b"PROPFIND").unwrap();
        assert_eq!(method_label(&custom), "OTHER");
    }

    #[test]
    fn test_fetch_outcome_ok() {
        let result = Ok(FetchedObject::from_bytes("x"));
        assert_eq!(fetch_outcome(&result), "ok");
    }

    #[test]
    fn test_fetch_outcome_uses_error_kind() {
        let result = Err(ProxyError::ObjectFetch {
            status: StatusCode::FORBIDDEN,
            body: String::new(),
        });
        assert_eq!(fetch_outcome(&result), "upstream");

        let result = Err(ProxyError::FileNotFound {
            path: "a".to_string(),
        });
        assert_eq!(fetch_outcome(&result), "not_found");
    }

    #[test]
    fn test_record_without_recorder_is_noop() {
        record_backend_fetch("local", &Ok(FetchedObject::from_bytes("x")));
    }
}
