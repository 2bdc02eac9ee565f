//! bucketgate library: serve objects over HTTP from S3 or a local directory.
//!
//! S3 access uses SigV4 presigned URLs built in [`sigv4`] and fetched with a
//! plain HTTP client.

use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod metrics;
pub mod server;
pub mod sigv4;
pub mod storage;

use crate::config::Config;
use crate::storage::backend::StorageBackend;

/// Shared application state passed to the handler via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// The one backend chosen at startup.
    pub storage: Arc<dyn StorageBackend>,
}
