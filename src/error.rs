use std::fmt;

use serde::ser::SerializeStruct;
use serde::Serialize;
use thiserror::Error;

use crate::ingest::OperationStatus;

/// Patterns (lowercase) that indicate sensitive data not safe for display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "refresh_token",
    "access_token",
    "client_secret",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
pub(crate) fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// Low-level failure cause shared by every pipeline stage.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Data source ───────────────────────────────────────────────────────────
    #[error("Data source {path} is not readable: {reason}")]
    DataSourceUnreadable { path: String, reason: String },

    #[error("Data source {path} is {size_bytes} bytes, exceeding the maximum of {max_bytes} bytes")]
    DataSourceTooLarge {
        path: String,
        size_bytes: u64,
        max_bytes: u64,
    },

    // ── Requests ──────────────────────────────────────────────────────────────
    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    // ── API ───────────────────────────────────────────────────────────────────
    #[error("Salesforce error: {0}")]
    SalesforceError(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    // ── Results ───────────────────────────────────────────────────────────────
    #[error("Invalid CSV: {0}")]
    CsvInvalid(String),

    #[error("Operation cancelled")]
    Cancelled,

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Setup ─────────────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pipeline stage at which a bulk load stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BulkStage {
    DataSource,
    JobCreate,
    Upload,
    JobClose,
    Monitor,
    Results,
}

impl fmt::Display for BulkStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BulkStage::DataSource => "Data source",
            BulkStage::JobCreate => "Job creation",
            BulkStage::Upload => "Upload",
            BulkStage::JobClose => "Job close",
            BulkStage::Monitor => "Job monitoring",
            BulkStage::Results => "Result collection",
        };
        f.write_str(label)
    }
}

/// Failure of a whole bulk load.
///
/// Names the stage that failed, wraps the underlying [`AppError`], and carries
/// the [`OperationStatus`] accumulated up to that point. The status is absent
/// only when the data source was rejected before anything else happened.
#[derive(Debug, Error)]
#[error("{summary} {stage} error: {source}")]
pub struct BulkError {
    summary: String,
    stage: BulkStage,
    #[source]
    source: AppError,
    status: Option<Box<OperationStatus>>,
}

impl BulkError {
    /// Builds a stage error for a `{operation}` load of `{object}` records.
    pub fn new(
        stage: BulkStage,
        operation: &str,
        object: &str,
        source: AppError,
        status: Option<OperationStatus>,
    ) -> Self {
        Self {
            summary: format!("Bulk {} of {} records failed.", operation, object),
            stage,
            source,
            status: status.map(Box::new),
        }
    }

    pub fn stage(&self) -> BulkStage {
        self.stage
    }

    /// The underlying cause.
    pub fn cause(&self) -> &AppError {
        &self.source
    }

    /// Progress recorded before the failure, if any.
    pub fn status(&self) -> Option<&OperationStatus> {
        self.status.as_deref()
    }

    pub fn into_status(self) -> Option<OperationStatus> {
        self.status.map(|s| *s)
    }
}

// Serialized for machine-readable CLI output; the message is scrubbed first.
impl Serialize for BulkError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("BulkError", 3)?;
        s.serialize_field("stage", &self.stage)?;
        s.serialize_field(
            "message",
            &sanitize_message(&self.to_string(), &self.summary),
        )?;
        s.serialize_field("status", &self.status)?;
        s.end()
    }
}
