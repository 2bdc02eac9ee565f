//! Configuration loading and types for bucketgate.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct. Missing S3 credentials, region and endpoint are then
//! filled from the standard AWS environment variables by
//! [`Config::apply_env_fallbacks`].

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::sigv4::DEFAULT_PRESIGN_EXPIRES;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upper bound on one outbound fetch, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Which backend serves objects, and its settings.
    pub storage: StorageConfig,

    /// Response policy.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics exporter settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Selects the one backend the server runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    S3,
    Local,
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `s3` or `local`.
    pub service: ServiceKind,

    /// Local directory configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// S3 configuration.
    #[serde(default)]
    pub s3: S3StorageConfig,
}

/// Local filesystem configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Directory files are served from.
    #[serde(default = "default_directory")]
    pub directory: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
        }
    }
}

/// S3 configuration.
///
/// `Debug` output redacts the secret key.
#[derive(Clone, Deserialize)]
pub struct S3StorageConfig {
    /// Access key (falls back to `AWS_ACCESS_KEY_ID`).
    #[serde(alias = "access_key", default)]
    pub access_key_id: String,

    /// Secret key (falls back to `AWS_SECRET_ACCESS_KEY`).
    #[serde(alias = "secret_key", default)]
    pub secret_access_key: String,

    /// Region (falls back to `AWS_DEFAULT_REGION`).
    #[serde(default)]
    pub region: String,

    /// Endpoint host or URL, e.g. `s3.amazonaws.com` or `http://minio:9000`
    /// (falls back to `AWS_ENDPOINT_URL_S3`).
    #[serde(alias = "endpoint", default)]
    pub endpoint_url: String,

    /// Bucket name.
    #[serde(default)]
    pub bucket: String,

    /// Key prefix prepended to every request path.
    #[serde(default)]
    pub prefix: String,

    /// `path` or `vhost`.
    #[serde(alias = "link_style", default = "default_addressing_style")]
    pub addressing_style: String,

    /// Lifetime of generated presigned URLs.
    #[serde(default = "default_presign_expires")]
    pub presign_expires_seconds: u64,
}

impl Default for S3StorageConfig {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            region: String::new(),
            endpoint_url: String::new(),
            bucket: String::new(),
            prefix: String::new(),
            addressing_style: default_addressing_style(),
            presign_expires_seconds: default_presign_expires(),
        }
    }
}

impl fmt::Debug for S3StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3StorageConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("addressing_style", &self.addressing_style)
            .field("presign_expires_seconds", &self.presign_expires_seconds)
            .finish()
    }
}

/// Response policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    /// Answer with the upstream status on an S3 rejection instead of 500.
    #[serde(default)]
    pub passthrough_upstream_status: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Observability settings.
///
/// Metrics are served by a separate listener so that no object path is
/// shadowed on the main port.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus exporter.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Exporter bind address.
    #[serde(default = "default_metrics_listen")]
    pub metrics_listen: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_listen: default_metrics_listen(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_seconds() -> u64 {
    5
}

fn default_directory() -> String {
    ".".to_string()
}

fn default_addressing_style() -> String {
    "vhost".to_string()
}

fn default_presign_expires() -> u64 {
    DEFAULT_PRESIGN_EXPIRES
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_listen() -> String {
    "0.0.0.0:9090".to_string()
}

// -- Environment fallbacks ---------------------------------------------------

impl Config {
    /// Fill empty S3 settings from the process environment.
    pub fn apply_env_fallbacks(&mut self) {
        self.apply_env_fallbacks_with(|name| std::env::var(name).ok());
    }

    /// Fill empty S3 settings using `lookup` to read variables.
    ///
    /// Only applies when the S3 service is selected.
    pub fn apply_env_fallbacks_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.storage.service != ServiceKind::S3 {
            return;
        }

        let s3 = &mut self.storage.s3;
        fill_from_env(&mut s3.access_key_id, "access_key_id", "AWS_ACCESS_KEY_ID", &lookup);
        fill_from_env(
            &mut s3.secret_access_key,
            "secret_access_key",
            "AWS_SECRET_ACCESS_KEY",
            &lookup,
        );
        fill_from_env(&mut s3.endpoint_url, "endpoint_url", "AWS_ENDPOINT_URL_S3", &lookup);
        fill_from_env(&mut s3.region, "region", "AWS_DEFAULT_REGION", &lookup);
    }
}

fn fill_from_env<F>(field: &mut String, name: &str, var: &str, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if field.is_empty() {
        info!("{name} not configured, using {var}");
        if let Some(value) = lookup(var) {
            *field = value;
        }
    }
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
///
/// Environment fallbacks are not applied here; call
/// [`Config::apply_env_fallbacks`] once logging is up.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.
pub fn parse_config(yaml: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(yaml)?;
    Ok(config)
}
