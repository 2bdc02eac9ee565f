//! Local filesystem storage backend.
//!
//! Serves files from a directory. The request path is used directly as a
//! path relative to that directory.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tracing::{debug, warn, Instrument, Span};

use super::backend::{FetchedObject, StorageBackend};
use crate::errors::ProxyError;
use crate::metrics;

/// Reads objects from the local filesystem.
pub struct LocalBackend {
    /// Directory all identifiers are resolved against.
    directory: PathBuf,
    span: Span,
}

impl LocalBackend {
    pub fn new(directory: impl Into<PathBuf>, span: Span) -> Self {
        Self {
            directory: directory.into(),
            span,
        }
    }

    /// Resolve an identifier to a file path under the served directory.
    ///
    /// Identifiers containing `..` or an absolute root are rejected.
    fn resolve(&self, name: &str) -> Result<PathBuf, ProxyError> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes {
            return Err(ProxyError::InvalidPath {
                path: name.to_string(),
            });
        }
        Ok(self.directory.join(relative))
    }
}

impl StorageBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn get(
        &self,
        identifier: &str,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedObject, ProxyError>> + Send + '_>> {
        let identifier = identifier.to_string();
        let span = self.span.clone();
        Box::pin(
            async move {
                let path = self.resolve(&identifier)?;

                let result = match tokio::fs::read(&path).await {
                    Ok(content) => {
                        debug!(path = %path.display(), bytes = content.len(), "file read");
                        Ok(FetchedObject::from_bytes(content))
                    }
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        Err(ProxyError::FileNotFound {
                            path: path.display().to_string(),
                        })
                    }
                    Err(err) => Err(ProxyError::Io(err)),
                };

                if let Err(ref err) = result {
                    warn!(path = %path.display(), error = %err, "file read failed");
                }
                metrics::record_backend_fetch(self.name(), &result);
                result
            }
            .instrument(span),
        )
    }
}
