//! S3 storage backend.
//!
//! Each request is turned into a SigV4 presigned `GET` (see [`crate::sigv4`])
//! and fetched with a plain HTTP client. No AWS SDK is involved; any
//! S3-compatible store that accepts query-string auth works.
//!
//! Key mapping: `{prefix}{request path}`.

use axum::http::{header, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument, Span};

use super::backend::{FetchedObject, StorageBackend};
use crate::config::S3StorageConfig;
use crate::errors::ProxyError;
use crate::metrics;
use crate::sigv4::{self, Credentials, PresignedRequest, SigningContext};

/// Backend that signs and fetches objects from one S3 bucket.
pub struct S3Backend {
    credentials: Credentials,
    context: SigningContext,
    /// Key prefix prepended to every request path.
    prefix: String,
    client: reqwest::Client,
    span: Span,
}

impl S3Backend {
    pub fn new(
        credentials: Credentials,
        context: SigningContext,
        prefix: impl Into<String>,
        client: reqwest::Client,
        span: Span,
    ) -> Self {
        Self {
            credentials,
            context,
            prefix: prefix.into(),
            client,
            span,
        }
    }

    /// Build a backend from configuration, with an HTTP client bounded by `timeout`.
    ///
    /// Fails on an unknown addressing style, an out-of-range expiry, or a
    /// missing endpoint or bucket.
    pub fn from_config(
        config: &S3StorageConfig,
        timeout: Duration,
        span: Span,
    ) -> Result<Self, ProxyError> {
        let context = SigningContext::new(
            &config.endpoint_url,
            config.region.clone(),
            config.bucket.clone(),
            &config.addressing_style,
            config.presign_expires_seconds,
        )?;
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;

        span.in_scope(|| {
            info!(
                bucket = %context.bucket(),
                region = %context.region(),
                host = %context.host(),
                style = %context.style(),
                prefix = %config.prefix,
                "S3 backend initialized"
            )
        });

        Ok(Self::new(credentials, context, config.prefix.clone(), client, span))
    }

    /// The object key a request path maps to.
    pub fn object_key(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }

    /// The object key for `path`, if it can be fetched as a single object.
    ///
    /// An empty key would address the bucket itself (a listing), and `.` or
    /// `..` segments are collapsed by the HTTP client after signing.
    fn checked_key(&self, path: &str) -> Result<String, ProxyError> {
        let key = self.object_key(path);
        let unsignable = key.is_empty() || key.split('/').any(|s| s == "." || s == "..");
        if unsignable {
            return Err(ProxyError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(key)
    }

    /// Presign a `GET` for a request path, as of now.
    pub fn presign(&self, path: &str) -> PresignedRequest {
        sigv4::presign_get(&self.credentials, &self.context, &self.object_key(path))
    }
}

impl StorageBackend for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn get(
        &self,
        identifier: &str,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedObject, ProxyError>> + Send + '_>> {
        let identifier = identifier.to_string();
        let span = self.span.clone();
        Box::pin(
            async move {
                let key = match self.checked_key(&identifier) {
                    Ok(key) => key,
                    Err(err) => {
                        warn!(path = %identifier, error = %err, "rejected object key");
                        let result = Err(err);
                        metrics::record_backend_fetch(self.name(), &result);
                        return result;
                    }
                };

                let presigned =
                    sigv4::presign_get(&self.credentials, &self.context, &key);

                debug!(
                    key = %key,
                    host = %presigned.host,
                    path = %presigned.canonical_uri,
                    amz_date = %presigned.amz_date,
                    "fetching object"
                );

                let started = Instant::now();
                let result = fetch_object(&self.client, &presigned.url).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                match &result {
                    Ok(object) => debug!(
                        key = %key,
                        bytes = object.data.len(),
                        elapsed_ms,
                        "object fetched"
                    ),
                    Err(ProxyError::ObjectFetch { status, .. }) => warn!(
                        key = %key,
                        host = %presigned.host,
                        path = %presigned.canonical_uri,
                        status = status.as_u16(),
                        elapsed_ms,
                        "upstream rejected request"
                    ),
                    Err(err) => error!(
                        key = %key,
                        host = %presigned.host,
                        path = %presigned.canonical_uri,
                        error = %err,
                        elapsed_ms,
                        "object fetch failed"
                    ),
                }

                metrics::record_backend_fetch(self.name(), &result);
                result
            }
            .instrument(span),
        )
    }
}

// ── Object fetcher ──────────────────────────────────────────────────

/// `GET` a presigned URL and read the whole object into memory.
///
/// - transport failure or timeout, including while reading an error body:
///   [`ProxyError::FetchTransport`]
/// - any status other than 200: [`ProxyError::ObjectFetch`] with the body text
/// - 200: body plus `Content-Type` / `Content-Length`
///
/// The response is consumed or dropped before returning, which releases the
/// connection on every path.
pub async fn fetch_object(client: &reqwest::Client, url: &str) -> Result<FetchedObject, ProxyError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(transport_error)?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.map_err(transport_error)?;
        return Err(ProxyError::ObjectFetch { status, body });
    }

    let headers = response.headers();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let data = response.bytes().await.map_err(transport_error)?;

    Ok(FetchedObject {
        data,
        content_type,
        content_length,
    })
}

/// The request URL carries a live signature, so it is stripped from the error.
fn transport_error(err: reqwest::Error) -> ProxyError {
    ProxyError::FetchTransport(err.without_url())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, RawQuery};
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;

    async fn spawn_upstream(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn backend(addr: SocketAddr, prefix: &str) -> S3Backend {
        let context = SigningContext::new(
            &format!("http://{addr}"),
            "us-east-1",
            "examplebucket",
            "path",
            3600,
        )
        .unwrap();
        S3Backend::new(
            Credentials::new("AKID", "secret"),
            context,
            prefix,
            client(),
            Span::none(),
        )
    }

    #[test]
    fn test_object_key_applies_prefix() {
        let context =
            SigningContext::new("s3.amazonaws.com", "us-east-1", "b", "vhost", 60).unwrap();
        let backend = S3Backend::new(
            Credentials::new("AKID", "secret"),
            context,
            "assets/",
            client(),
            Span::none(),
        );
        assert_eq!(backend.object_key("img/logo.png"), "assets/img/logo.png");
        assert!(backend
            .presign("img/logo.png")
            .url
            .starts_with("https://b.s3.amazonaws.com/assets/img/logo.png?"));
    }

    #[test]
    fn test_from_config_rejects_invalid_style() {
        let config = S3StorageConfig {
            endpoint_url: "s3.amazonaws.com".to_string(),
            bucket: "b".to_string(),
            addressing_style: "subdomain".to_string(),
            ..S3StorageConfig::default()
        };
        let err = S3Backend::from_config(&config, Duration::from_secs(5), Span::none())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ProxyError::Signing(sigv4::SigningError::InvalidAddressingStyle(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_object_ok_copies_content_headers() {
        let router = Router::new().route(
            "/obj",
            get(|| async { ([(header::CONTENT_TYPE, "text/plain")], "hello") }),
        );
        let addr = spawn_upstream(router).await;

        let object = fetch_object(&client(), &format!("http://{addr}/obj"))
            .await
            .unwrap();
        assert_eq!(&object.data[..], b"hello");
        assert_eq!(object.content_type.as_deref(), Some("text/plain"));
        assert_eq!(object.content_length, Some(5));
    }

    #[tokio::test]
    async fn test_fetch_object_non_200_carries_status_and_body() {
        let router = Router::new().route(
            "/missing",
            get(|| async {
                (
                    StatusCode::NOT_FOUND,
                    "<Error><Code>NoSuchKey</Code></Error>",
                )
            }),
        );
        let addr = spawn_upstream(router).await;

        let err = fetch_object(&client(), &format!("http://{addr}/missing"))
            .await
            .unwrap_err();
        match err {
            ProxyError::ObjectFetch { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert!(body.contains("NoSuchKey"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_object_connection_refused_is_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetch_object(&client(), &format!("http://{addr}/obj"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::FetchTransport(_)));
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_presigned_url() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = backend(addr, "").get("hello.txt").await.unwrap_err();
        assert!(matches!(err, ProxyError::FetchTransport(_)));
        let message = err.to_string();
        assert!(!message.contains("X-Amz-Signature"), "{message}");
        assert!(!message.contains("X-Amz-Credential"), "{message}");
        assert!(!message.contains("hello.txt"), "{message}");
    }

    #[tokio::test]
    async fn test_stalled_error_body_is_transport_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 100\r\n\r\n<Error>")
                .await
                .unwrap();
            // Hold the connection open without sending the rest of the body.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_millis(300))
            .build()
            .unwrap();

        let err = fetch_object(&client, &format!("http://{addr}/obj"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::FetchTransport(_)), "{err:?}");
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn test_empty_key_rejected_before_fetch() {
        // Nothing listens here; a fetch attempt would be a transport error.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = backend(addr, "").get("").await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidPath { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_dot_segments_rejected_before_fetch() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = backend(addr, "site/");
        for path in ["../secret.txt", "a/./b.txt", "a/..", "."] {
            let err = backend.get(path).await.unwrap_err();
            assert!(matches!(err, ProxyError::InvalidPath { .. }), "{path}: {err:?}");
        }
    }

    #[test]
    fn test_checked_key_allows_prefix_only_and_dotted_names() {
        let context =
            SigningContext::new("s3.amazonaws.com", "us-east-1", "b", "path", 60).unwrap();
        let backend = S3Backend::new(
            Credentials::new("AKID", "secret"),
            context,
            "site/",
            client(),
            Span::none(),
        );
        assert_eq!(backend.checked_key("").unwrap(), "site/");
        assert_eq!(backend.checked_key("..hidden/v1.2..txt").unwrap(), "site/..hidden/v1.2..txt");
    }

    #[test]
    fn test_from_config_builds_backend() {
        let config = S3StorageConfig {
            endpoint_url: "http://127.0.0.1:9000".to_string(),
            region: "us-east-1".to_string(),
            bucket: "b".to_string(),
            addressing_style: "path".to_string(),
            ..S3StorageConfig::default()
        };
        let span = tracing::info_span!("backend", kind = "s3");
        let backend = S3Backend::from_config(&config, Duration::from_secs(5), span).unwrap();
        assert!(backend.presign("k").url.starts_with("http://127.0.0.1:9000/b/k?"));
    }

    #[tokio::test]
    async fn test_fetch_object_timeout_is_transport_error() {
        let router = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let addr = spawn_upstream(router).await;
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        let err = fetch_object(&client, &format!("http://{addr}/slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::FetchTransport(ref e) if e.is_timeout()));
    }

    #[tokio::test]
    async fn test_backend_get_requests_presigned_path() {
        let router = Router::new().route(
            "/examplebucket/*key",
            get(|Path(key): Path<String>, RawQuery(query): RawQuery| async move {
                let query = query.unwrap_or_default();
                if query.contains("X-Amz-Signature=") && query.contains("X-Amz-Expires=3600") {
                    (StatusCode::OK, key)
                } else {
                    (StatusCode::FORBIDDEN, "unsigned".to_string())
                }
            }),
        );
        let addr = spawn_upstream(router).await;

        let object = backend(addr, "site/").get("docs/index.html").await.unwrap();
        assert_eq!(&object.data[..], b"site/docs/index.html");
    }
}
