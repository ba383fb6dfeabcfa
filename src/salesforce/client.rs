//! Authenticated Salesforce HTTP transport with safe logging.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::USER_AGENT;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use url::Url;

use crate::error::AppError;
use crate::salesforce::DEFAULT_API_VERSION;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all Salesforce API requests.
const CLIENT_USER_AGENT: &str = concat!("sf-bulk-loader/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "refresh_token",
    "client_secret",
    "code",
    "token",
    "sid",
    "session",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/services/data/v60.0/jobs/ingest`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// OrgCredentials
// ─────────────────────────────────────────────────────────────────────────────

/// Connection details for one org: where to send requests and which bearer
/// token to send. Obtaining and refreshing the token is the caller's concern.
#[derive(Clone)]
pub struct OrgCredentials {
    /// Instance URL (e.g., "https://na1.salesforce.com")
    pub instance_url: String,
    /// OAuth access token (wrapped for security)
    pub access_token: SecretString,
    /// Salesforce API version without the leading `v` (e.g., "60.0")
    pub api_version: String,
}

impl std::fmt::Debug for OrgCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgCredentials")
            .field("instance_url", &self.instance_url)
            .field("access_token", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl OrgCredentials {
    pub fn new(instance_url: impl Into<String>, access_token: SecretString) -> Self {
        Self {
            instance_url: instance_url.into(),
            access_token,
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Log Redaction
// ─────────────────────────────────────────────────────────────────────────────

/// Salesforce record ids are 15 or 18 alphanumeric characters.
fn looks_like_record_id(segment: &str) -> bool {
    matches!(segment.len(), 15 | 18)
        && segment.bytes().all(|b| b.is_ascii_alphanumeric())
        && segment.bytes().any(|b| b.is_ascii_digit())
}

fn is_sensitive_param(key: &str) -> bool {
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|sensitive| key.eq_ignore_ascii_case(sensitive))
}

/// Shortens an id for logging (first 8 chars).
pub(crate) fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}

/// Renders a request URL for the logs.
///
/// Scheme, host and fragment are always dropped and record ids in the path
/// (job ids, mostly) are shortened. The query string is only kept in
/// `PathAndQueryRedacted` mode, with sensitive values masked.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let mut out = String::new();
    match url.path_segments() {
        Some(segments) => {
            for segment in segments {
                out.push('/');
                if looks_like_record_id(segment) {
                    out.push_str(&redact_id(segment));
                } else {
                    out.push_str(segment);
                }
            }
        }
        None => out.push('/'),
    }

    if mode == LoggingMode::PathOnly {
        return out;
    }

    let query: Vec<String> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if is_sensitive_param(&key) {
                "***".into()
            } else {
                value
            };
            format!("{}={}", key, value)
        })
        .collect();
    if !query.is_empty() {
        out.push('?');
        out.push_str(&query.join("&"));
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// SalesforceClient
// ─────────────────────────────────────────────────────────────────────────────

/// Bearer-authenticated HTTP client bound to one org.
///
/// Cheap to clone; the underlying `reqwest::Client` connection pool is shared.
#[derive(Clone)]
pub struct SalesforceClient {
    http: Arc<reqwest::Client>,
    creds: OrgCredentials,
    logging_mode: LoggingMode,
}

impl SalesforceClient {
    /// Creates a client with its own connection pool and request timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(creds: OrgCredentials, timeout: Duration) -> Result<Self, AppError> {
        let http = build_http_client(timeout)?;
        Ok(Self::with_http(Arc::new(http), creds))
    }

    /// Creates a client on top of an existing shared HTTP client.
    pub fn with_http(http: Arc<reqwest::Client>, creds: OrgCredentials) -> Self {
        Self {
            http,
            creds,
            logging_mode: LoggingMode::default(),
        }
    }

    /// Updates the logging mode for URL sanitization.
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    pub fn credentials(&self) -> &OrgCredentials {
        &self.creds
    }

    /// Returns the REST base `{instance}/services/data/v{version}/`.
    ///
    /// `api_version` overrides the version carried by the credentials.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no instance URL is configured or it
    /// cannot be parsed.
    pub fn api_base(&self, api_version: Option<&str>) -> Result<Url, AppError> {
        let version = api_version.unwrap_or(&self.creds.api_version);
        let version = version.trim_start_matches('v');
        self.instance_url()?
            .join(&format!("/services/data/v{}/", version))
            .map_err(|e| AppError::Internal(format!("Failed to build API base URL: {}", e)))
    }

    /// Resolves a URL handed out by Salesforce (absolute, or relative to the
    /// instance root such as a job's `contentUrl`).
    pub fn resolve(&self, url_or_path: &str) -> Result<Url, AppError> {
        let path = if url_or_path.contains("://") || url_or_path.starts_with('/') {
            url_or_path.to_string()
        } else {
            format!("/{}", url_or_path)
        };
        self.instance_url()?
            .join(&path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", url_or_path)))
    }

    fn instance_url(&self) -> Result<Url, AppError> {
        if self.creds.instance_url.is_empty() {
            return Err(AppError::Config("No instance URL configured".to_string()));
        }
        Url::parse(&self.creds.instance_url)
            .map_err(|_| AppError::Config("Invalid instance URL".to_string()))
    }

    /// Starts an authenticated request.
    pub fn request(&self, method: Method, url: &Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url.as_str())
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .bearer_auth(self.creds.access_token.expose_secret())
    }

    /// Sends a request with timing and sanitized logging.
    ///
    /// # Security
    ///
    /// - Never logs the Authorization header
    /// - Never logs request/response bodies
    /// - Error messages never contain raw URLs or tokens
    pub async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        method: &Method,
        url: &Url,
    ) -> Result<reqwest::Response, AppError> {
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(url, self.logging_mode);

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                let x_request_id = response
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");

                info!(
                    "[SFDC] {} {} {} {}ms {}",
                    method,
                    sanitized_url,
                    response.status().as_u16(),
                    duration_ms,
                    x_request_id
                );

                Ok(response)
            }
            Err(e) => {
                info!("[SFDC] {} {} FAILED {}ms", method, sanitized_url, duration_ms);

                // The raw reqwest error may embed the full URL.
                let reason = if e.is_timeout() {
                    "Request to Salesforce timed out"
                } else {
                    "Connection to Salesforce failed"
                };
                Err(AppError::ConnectionFailed(reason.to_string()))
            }
        }
    }
}

/// Builds the configured HTTP client.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
