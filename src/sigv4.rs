//! AWS Signature Version 4 presigned URLs for S3 `GET` requests.
//!
//! The signature is carried entirely in the query string, so the resulting
//! URL can be fetched by any plain HTTP client. The algorithm:
//! 1. Build a canonical request (method, URI, query, `host` header, payload hash)
//! 2. Build a string-to-sign over the SHA-256 of the canonical request
//! 3. Derive a signing key via the date/region/service HMAC chain
//! 4. Sign, then append `X-Amz-Signature` to the query
//!
//! Reference: <https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-query-string-auth.html>

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm identifier.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Payload hash sentinel for presigned requests; no body is ever signed.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Default presigned URL lifetime (24 hours).
pub const DEFAULT_PRESIGN_EXPIRES: u64 = 86400;

/// Longest lifetime S3 accepts for a presigned URL (7 days).
pub const MAX_PRESIGN_EXPIRES: u64 = 604800;

const SERVICE: &str = "s3";
const TERMINATOR: &str = "aws4_request";
const SIGNED_HEADERS: &str = "host";

/// Escape set for the final URL query serialization.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Errors raised while building a signing context.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The addressing style is neither `path` nor `vhost`.
    #[error("invalid addressing style '{0}': expected 'path' or 'vhost'")]
    InvalidAddressingStyle(String),

    /// The presign expiry is outside `1..=604800` seconds.
    #[error("presigned URL expiry must be between 1 and 604800 seconds, got {0}")]
    InvalidExpiry(u64),

    /// No endpoint host was configured.
    #[error("S3 endpoint is not configured")]
    MissingEndpoint,

    /// No bucket was configured.
    #[error("S3 bucket is not configured")]
    MissingBucket,
}

// ── Credentials and context ─────────────────────────────────────────

/// An access key pair. The secret never appears in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// How the bucket name is embedded in the request URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingStyle {
    /// `https://endpoint/bucket/key`
    Path,
    /// `https://bucket.endpoint/key`
    VirtualHosted,
}

impl FromStr for AddressingStyle {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "path" => Ok(AddressingStyle::Path),
            "vhost" => Ok(AddressingStyle::VirtualHosted),
            other => Err(SigningError::InvalidAddressingStyle(other.to_string())),
        }
    }
}

impl fmt::Display for AddressingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressingStyle::Path => f.write_str("path"),
            AddressingStyle::VirtualHosted => f.write_str("vhost"),
        }
    }
}

/// Everything about the target store that is fixed for the lifetime of a
/// backend: region, bucket, endpoint and addressing style.
#[derive(Debug, Clone)]
pub struct SigningContext {
    region: String,
    bucket: String,
    scheme: &'static str,
    endpoint: String,
    style: AddressingStyle,
    expires_seconds: u64,
}

impl SigningContext {
    /// Build a context from configuration values.
    ///
    /// `endpoint_url` may carry an `http://` or `https://` scheme (default
    /// `https`); a trailing slash and the scheme's default port are dropped so
    /// the signed `host` matches what the HTTP client sends.
    pub fn new(
        endpoint_url: &str,
        region: impl Into<String>,
        bucket: impl Into<String>,
        style: &str,
        expires_seconds: u64,
    ) -> Result<Self, SigningError> {
        let style: AddressingStyle = style.parse()?;

        if expires_seconds == 0 || expires_seconds > MAX_PRESIGN_EXPIRES {
            return Err(SigningError::InvalidExpiry(expires_seconds));
        }

        let (scheme, endpoint) = split_endpoint(endpoint_url);
        if endpoint.is_empty() {
            return Err(SigningError::MissingEndpoint);
        }

        let bucket = bucket.into();
        if bucket.is_empty() {
            return Err(SigningError::MissingBucket);
        }

        Ok(Self {
            region: region.into(),
            bucket,
            scheme,
            endpoint: endpoint.to_string(),
            style,
            expires_seconds,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn style(&self) -> AddressingStyle {
        self.style
    }

    pub fn expires_seconds(&self) -> u64 {
        self.expires_seconds
    }

    /// The `host` value that is both signed and requested.
    pub fn host(&self) -> String {
        match self.style {
            AddressingStyle::Path => self.endpoint.clone(),
            AddressingStyle::VirtualHosted => format!("{}.{}", self.bucket, self.endpoint),
        }
    }

    /// The canonical URI for `key`: `/bucket/key` or `/key` depending on style.
    pub fn canonical_uri(&self, key: &str) -> String {
        let escaped_key = uri_encode(key, false);
        match self.style {
            AddressingStyle::Path => format!("/{}/{}", uri_encode(&self.bucket, true), escaped_key),
            AddressingStyle::VirtualHosted => format!("/{escaped_key}"),
        }
    }
}

/// Split an endpoint URL into (scheme, authority).
fn split_endpoint(endpoint_url: &str) -> (&'static str, &str) {
    let trimmed = endpoint_url.trim();
    let (scheme, default_port, rest) = match trimmed.strip_prefix("http://") {
        Some(rest) => ("http", ":80", rest),
        None => (
            "https",
            ":443",
            trimmed.strip_prefix("https://").unwrap_or(trimmed),
        ),
    };
    let authority = rest.trim_end_matches('/');
    (scheme, authority.strip_suffix(default_port).unwrap_or(authority))
}

// ── Canonical request construction ──────────────────────────────────

/// S3 URI encoding (RFC 3986 unreserved set).
///
/// - `A-Z`, `a-z`, `0-9`, `-`, `_`, `.`, `~` are kept.
/// - Every other byte of the UTF-8 form is `%XX` with uppercase hex.
/// - `/` is kept only when `encode_slash` is false (object key paths).
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

    let mut encoded = String::with_capacity(input.len() + 16);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            b'/' if !encode_slash => encoded.push('/'),
            _ => {
                encoded.push('%');
                encoded.push(HEX_UPPER[(byte >> 4) as usize] as char);
                encoded.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    encoded
}

/// Build the canonical query string.
///
/// Each name and value is encoded on its own, then pairs are sorted by
/// encoded name and then by encoded value (byte order).
pub fn canonical_query_string(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort();

    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the canonical request string.
///
/// ```text
/// HTTPMethod + '\n' +
/// CanonicalURI + '\n' +
/// CanonicalQueryString + '\n' +
/// "host:" + Host + '\n' + '\n' +
/// "host" + '\n' +
/// UNSIGNED-PAYLOAD
/// ```
pub fn canonical_request(
    method: &str,
    canonical_uri: &str,
    params: &[(String, String)],
    host: &str,
) -> String {
    let canonical_query = canonical_query_string(params);
    let canonical_headers = format!("host:{host}\n");

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{SIGNED_HEADERS}\n{UNSIGNED_PAYLOAD}"
    )
}

/// The `date/region/s3/aws4_request` scope string.
pub fn credential_scope(date_stamp: &str, region: &str) -> String {
    format!("{date_stamp}/{region}/{SERVICE}/{TERMINATOR}")
}

/// Build the string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn string_to_sign(timestamp: &str, credential_scope: &str, canonical_request: &str) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{hash}")
}

// ── Signing key derivation ──────────────────────────────────────────

/// Derive the S3 signing key for a date and region.
///
/// ```text
/// kDate    = HMAC-SHA256("AWS4" + secret, dateStamp)
/// kRegion  = HMAC-SHA256(kDate, region)
/// kService = HMAC-SHA256(kRegion, "s3")
/// kSigning = HMAC-SHA256(kService, "aws4_request")
/// ```
pub fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str) -> [u8; 32] {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    hmac_sha256(&k_service, TERMINATOR.as_bytes())
}

/// HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&mac.finalize().into_bytes());
    output
}

// ── Presigned URL ───────────────────────────────────────────────────

/// A signed, ready-to-fetch URL plus the pieces that are safe to log.
#[derive(Debug, Clone)]
pub struct PresignedRequest {
    /// Full URL including `X-Amz-Signature`.
    pub url: String,
    /// Signed `host` value.
    pub host: String,
    /// Canonical (already escaped) path.
    pub canonical_uri: String,
    /// The `X-Amz-Date` timestamp the URL was signed at.
    pub amz_date: String,
}

/// Presign a `GET` for `key`, sampling the clock once.
pub fn presign_get(
    credentials: &Credentials,
    context: &SigningContext,
    key: &str,
) -> PresignedRequest {
    presign_get_at(credentials, context, key, Utc::now())
}

/// Presign a `GET` for `key` as of `now`.
pub fn presign_get_at(
    credentials: &Credentials,
    context: &SigningContext,
    key: &str,
    now: DateTime<Utc>,
) -> PresignedRequest {
    let host = context.host();
    let canonical_uri = context.canonical_uri(key);

    // Both values come from the same instant.
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let scope = credential_scope(&date_stamp, context.region());
    let mut params: Vec<(String, String)> = vec![
        ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
        (
            "X-Amz-Credential".to_string(),
            format!("{}/{scope}", credentials.access_key_id),
        ),
        ("X-Amz-Date".to_string(), amz_date.clone()),
        (
            "X-Amz-Expires".to_string(),
            context.expires_seconds().to_string(),
        ),
        ("X-Amz-SignedHeaders".to_string(), SIGNED_HEADERS.to_string()),
    ];

    let canonical = canonical_request("GET", &canonical_uri, &params, &host);
    let to_sign = string_to_sign(&amz_date, &scope, &canonical);
    let signing_key = derive_signing_key(
        &credentials.secret_access_key,
        &date_stamp,
        context.region(),
    );
    let signature = compute_signature(&signing_key, &to_sign);

    params.push(("X-Amz-Signature".to_string(), signature));

    let query = params
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, QUERY_ENCODE_SET),
                utf8_percent_encode(v, QUERY_ENCODE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&");

    PresignedRequest {
        url: format!("{}://{host}{canonical_uri}?{query}", context.scheme),
        host,
        canonical_uri,
        amz_date,
    }
}

// ── Tests ───────────────────────────────────────────────────────────
