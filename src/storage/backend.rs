//! Abstract storage backend trait.
//!
//! Every backend implements [`StorageBackend`]. The server holds exactly one
//! of them, chosen when the process starts, and never switches.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

use crate::errors::ProxyError;

/// A resolved object and the content headers to pass through.
#[derive(Debug, Clone)]
pub struct FetchedObject {
    /// Raw bytes of the object.
    pub data: Bytes,
    /// Upstream `Content-Type`, if the backend knows one.
    pub content_type: Option<String>,
    /// Upstream `Content-Length`, if the backend knows one.
    pub content_length: Option<u64>,
}

impl FetchedObject {
    /// An object with no content metadata beyond its bytes.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
            content_length: None,
        }
    }
}

/// Read-only object retrieval contract.
pub trait StorageBackend: Send + Sync + 'static {
    /// Backend label for logs and metrics (`s3`, `local`).
    fn name(&self) -> &'static str;

    /// Resolve `identifier` (the request path without its leading `/`).
    fn get(
        &self,
        identifier: &str,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedObject, ProxyError>> + Send + '_>>;
}
