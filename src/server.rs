//! Axum router construction and the object handler.
//!
//! Every path is an object identifier, so the router has no routes of its
//! own: a single fallback handler serves `GET` for any path and answers
//! every other method with 501.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::errors::{generate_request_id, ProxyError};
use crate::metrics::metrics_middleware;
use crate::storage::backend::FetchedObject;
use crate::AppState;

/// Build the axum [`Router`].
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(handle_request)
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware is outer (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}

// -- Common headers middleware -----------------------------------------------

/// Adds to every response:
/// - `x-request-id`: 16-character uppercase hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `bucketgate`
async fn common_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert(header::DATE, value);
    }
    headers.insert(header::SERVER, HeaderValue::from_static("bucketgate"));

    response
}

// -- Object handler ----------------------------------------------------------

/// Serve `GET /<identifier>` from the configured backend.
async fn handle_request(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
) -> Response {
    let passthrough = state.config.proxy.passthrough_upstream_status;

    match serve_object(&state, &method, &uri).await {
        Ok(object) => object_response(object),
        Err(err) => {
            match &err {
                ProxyError::MethodNotImplemented { .. } => {
                    debug!(method = %method, "method not implemented")
                }
                ProxyError::ObjectFetch { .. }
                | ProxyError::FileNotFound { .. }
                | ProxyError::InvalidPath { .. } => {
                    warn!(path = %uri.path(), kind = err.kind(), error = %err, "request failed")
                }
                _ => error!(path = %uri.path(), kind = err.kind(), error = %err, "request failed"),
            }
            err.into_response_with(passthrough)
        }
    }
}

async fn serve_object(
    state: &AppState,
    method: &Method,
    uri: &Uri,
) -> Result<FetchedObject, ProxyError> {
    if *method != Method::GET {
        return Err(ProxyError::MethodNotImplemented {
            method: method.to_string(),
        });
    }

    let identifier = request_identifier(uri.path())?;
    state.storage.get(&identifier).await
}

/// The request path without its leading `/`, percent-decoded.
fn request_identifier(path: &str) -> Result<String, ProxyError> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    percent_decode_str(trimmed)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ProxyError::InvalidPath {
            path: path.to_string(),
        })
}

/// 200 with the object bytes and the content headers the backend reported.
fn object_response(object: FetchedObject) -> Response {
    let mut response = (StatusCode::OK, object.data).into_response();
    let headers = response.headers_mut();

    match object
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        Some(value) => {
            headers.insert(header::CONTENT_TYPE, value);
        }
        None => {
            headers.remove(header::CONTENT_TYPE);
        }
    }
    if let Some(length) = object.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    response
}
