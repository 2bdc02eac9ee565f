//! Object storage backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where objects
//! live. Implementations are a presigning S3 client and a local directory.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, ServiceKind};
use crate::errors::ProxyError;

pub mod backend;
pub mod local;
pub mod s3;

use backend::StorageBackend;

/// Construct the backend selected by `storage.service`.
///
/// Each backend gets its own span so log lines carry the backend kind.
pub fn build_backend(config: &Config) -> Result<Arc<dyn StorageBackend>, ProxyError> {
    let backend: Arc<dyn StorageBackend> = match config.storage.service {
        ServiceKind::S3 => {
            let span = tracing::info_span!("backend", kind = "s3");
            let timeout = Duration::from_secs(config.timeout_seconds);
            Arc::new(s3::S3Backend::from_config(&config.storage.s3, timeout, span)?)
        }
        ServiceKind::Local => {
            let directory = &config.storage.local.directory;
            let span = tracing::info_span!("backend", kind = "local");
            info!(directory = %directory, "local backend initialized");
            Arc::new(local::LocalBackend::new(directory, span))
        }
    };
    Ok(backend)
}
