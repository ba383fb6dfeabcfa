//! Salesforce HTTP client and Bulk API 2.0 ingest layer.
//!
//! This module provides the transport the load pipeline runs on:
//!
//! - **Bearer credentials** held in `secrecy::SecretString`
//! - **Safe logging** that never leaks tokens or sensitive URL parameters
//! - **Typed wire models** for the ingest job endpoints
//! - **Concurrency limiting** for independent loads

pub mod bulk_ingest_v2;
pub mod bulk_scheduler;
pub mod client;

use serde::{Deserialize, Serialize};

pub use bulk_ingest_v2::{
    BulkIngestV2Client, BulkOperation, ColumnDelimiter, ContentType, JobCreateRequest, JobInfo,
    JobStatus, LineEnding, ResultKind, UploadAck,
};
pub use bulk_scheduler::{LoadPermit, LoadScheduler};
pub use client::{sanitize_url_for_logs, LoggingMode, OrgCredentials};

/// API version used when neither the credentials nor the caller name one.
pub const DEFAULT_API_VERSION: &str = "60.0";

/// Lifecycle state of a Bulk API 2.0 ingest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BulkJobState {
    /// Job accepts data uploads.
    Open,
    /// Upload closed; queued for processing.
    UploadComplete,
    /// Salesforce is processing the data.
    InProgress,
    /// Processing finished. Individual records may still have failed.
    JobComplete,
    /// The job as a whole failed.
    Failed,
    /// The job was aborted.
    Aborted,
}

impl BulkJobState {
    /// Returns true once no further state transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BulkJobState::JobComplete | BulkJobState::Failed | BulkJobState::Aborted
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}
