//! Proxy error types.
//!
//! Every failure on the request path is a [`ProxyError`]. The enum
//! implements [`axum::response::IntoResponse`] so handlers can return it
//! directly; the response is always plain text.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::sigv4::SigningError;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The signing context could not be built (configuration defect).
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The object store could not be reached, or the call timed out.
    #[error("unable to fetch object from S3: {0}")]
    FetchTransport(#[source] reqwest::Error),

    /// The object store answered with a non-200 status.
    #[error("upstream returned {status}: {body}")]
    ObjectFetch { status: StatusCode, body: String },

    /// Local backend: no file at the resolved path.
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    /// The requested path escapes the served directory or is not valid UTF-8.
    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    /// Local backend: any other filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Only `GET` is served.
    #[error("Method {method} not implemented")]
    MethodNotImplemented { method: String },
}

impl ProxyError {
    /// Short, stable label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Signing(_) => "signing",
            ProxyError::FetchTransport(_) => "transport",
            ProxyError::ObjectFetch { .. } => "upstream",
            ProxyError::FileNotFound { .. } => "not_found",
            ProxyError::InvalidPath { .. } => "invalid_path",
            ProxyError::Io(_) => "io",
            ProxyError::MethodNotImplemented { .. } => "method",
        }
    }

    /// HTTP status for this error.
    ///
    /// Everything except an unsupported method collapses to 500. With
    /// `passthrough_upstream` set, an upstream rejection keeps its own status.
    pub fn status_code(&self, passthrough_upstream: bool) -> StatusCode {
        match self {
            ProxyError::MethodNotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            ProxyError::ObjectFetch { status, .. } if passthrough_upstream => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render as a plain-text response, optionally passing upstream status through.
    pub fn into_response_with(self, passthrough_upstream: bool) -> Response {
        let status = self.status_code(passthrough_upstream);
        let body = match self {
            ProxyError::ObjectFetch { body, .. } if passthrough_upstream => body,
            other => other.to_string(),
        };

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.into_response_with(false)
    }
}
