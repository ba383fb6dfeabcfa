//! Salesforce Bulk API v2 ingest client.
//!
//! One method per REST call of an ingest job's lifecycle: create, upload,
//! close, info, and the two result downloads. Callers sequence them.
//!
//! Logging is limited to method, path and status code. Upload bodies and
//! auth headers never reach the log.

use std::fmt;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::error::AppError;
use crate::salesforce::client::{redact_id, SalesforceClient};
use crate::salesforce::BulkJobState;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Operation an ingest job applies to its rows.
///
/// Serializes as the lower camel-case names Salesforce expects
/// ("insert", "update", "upsert", "delete", "hardDelete").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BulkOperation {
    /// Create new rows.
    Insert,
    /// Modify rows matched by `Id`.
    Update,
    /// Create or modify rows keyed on `externalIdFieldName`.
    Upsert,
    /// Soft delete by `Id`; rows go to the recycle bin.
    Delete,
    /// Permanent delete by `Id`.
    HardDelete,
}

impl BulkOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOperation::Insert => "insert",
            BulkOperation::Update => "update",
            BulkOperation::Upsert => "upsert",
            BulkOperation::Delete => "delete",
            BulkOperation::HardDelete => "hardDelete",
        }
    }
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload format. Bulk API 2.0 ingest only accepts CSV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    #[default]
    #[serde(rename = "CSV")]
    Csv,
}

/// Column delimiter used in the uploaded CSV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnDelimiter {
    Backquote,
    Caret,
    #[default]
    Comma,
    Pipe,
    Semicolon,
    Tab,
}

/// Row terminator of the uploaded CSV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineEnding {
    #[default]
    LF,
    CRLF,
}

/// Body of `POST /jobs/ingest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreateRequest {
    /// Target sObject API name, e.g. `Account`.
    pub object: String,
    pub operation: BulkOperation,
    /// Always CSV.
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_delimiter: Option<ColumnDelimiter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_ending: Option<LineEnding>,
    /// Only meaningful for upsert. Omitted when unset; Salesforce rejects an
    /// explicit null here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id_field_name: Option<String>,
}

impl JobCreateRequest {
    pub fn new(object: impl Into<String>, operation: BulkOperation) -> Self {
        Self {
            object: object.into(),
            operation,
            content_type: ContentType::Csv,
            column_delimiter: None,
            line_ending: None,
            external_id_field_name: None,
        }
    }

    /// Checks the request locally before it is sent.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidRequest` if `object` is blank or an upsert has no
    /// external ID field.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.object.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "object name is required".to_string(),
            ));
        }

        let has_external_id = self
            .external_id_field_name
            .as_deref()
            .is_some_and(|f| !f.trim().is_empty());
        if self.operation == BulkOperation::Upsert && !has_external_id {
            return Err(AppError::InvalidRequest(
                "externalIdFieldName is required for upsert".to_string(),
            ));
        }

        Ok(())
    }
}

/// Job descriptor returned by create, close and info calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    pub state: BulkJobState,
    pub object: String,
    pub operation: BulkOperation,
    #[serde(default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub column_delimiter: Option<ColumnDelimiter>,
    #[serde(default)]
    pub line_ending: Option<LineEnding>,
    #[serde(default)]
    pub external_id_field_name: Option<String>,
    /// Where job data is uploaded, usually relative to the instance root.
    #[serde(default)]
    pub content_url: Option<String>,
    #[serde(default)]
    pub created_by_id: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub system_modstamp: Option<String>,
    #[serde(default)]
    pub concurrency_mode: Option<String>,
    #[serde(default)]
    pub api_version: Option<f64>,
}

/// Full job information from the info endpoint, including processing counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(flatten)]
    pub job: JobInfo,
    #[serde(default)]
    pub number_records_processed: Option<u64>,
    #[serde(default)]
    pub number_records_failed: Option<u64>,
    #[serde(default)]
    pub retries: Option<u64>,
    /// Milliseconds.
    #[serde(default)]
    pub total_processing_time: Option<u64>,
    #[serde(default)]
    pub api_active_processing_time: Option<u64>,
    #[serde(default)]
    pub apex_processing_time: Option<u64>,
    #[serde(default)]
    pub job_type: Option<String>,
    /// Set by Salesforce when the job ends in `Failed`.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl JobStatus {
    pub fn state(&self) -> BulkJobState {
        self.job.state
    }
}

/// Acknowledgement of a data upload, carrying the real HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    pub status_code: u16,
    pub content_url: String,
}

/// One of the two result partitions of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultKind {
    Successful,
    Failed,
}

impl ResultKind {
    /// Endpoint segment and file suffix, e.g. `successfulResults`.
    pub fn results_name(&self) -> &'static str {
        match self {
            ResultKind::Successful => "successfulResults",
            ResultKind::Failed => "failedResults",
        }
    }

    /// Columns Salesforce adds to every row of this partition.
    pub fn marker_columns(&self) -> [&'static str; 2] {
        match self {
            ResultKind::Successful => ["sf__Id", "sf__Created"],
            ResultKind::Failed => ["sf__Id", "sf__Error"],
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultKind::Successful => f.write_str("successful"),
            ResultKind::Failed => f.write_str("failed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Body of the close `PATCH`.
#[derive(Debug, Serialize)]
struct UpdateJobStateRequest {
    state: BulkJobState,
}

/// One entry of the JSON error array Salesforce returns on 4xx/5xx.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SalesforceError {
    message: String,
    error_code: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkIngestV2Client
// ─────────────────────────────────────────────────────────────────────────────

/// Bulk API 2.0 ingest endpoints over an authenticated [`SalesforceClient`].
///
/// Every method is a single HTTP exchange; nothing is retried.
#[derive(Clone)]
pub struct BulkIngestV2Client {
    client: SalesforceClient,
}

impl BulkIngestV2Client {
    pub fn new(client: SalesforceClient) -> Self {
        Self { client }
    }

    /// `POST /jobs/ingest`. The job comes back `Open` with its `contentUrl`.
    ///
    /// `api_version` overrides the credentials' version for this call only.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidRequest` when [`JobCreateRequest::validate`] fails
    /// - `AppError::SalesforceError` when Salesforce rejects the call
    /// - `AppError::RateLimited` on HTTP 429 or `REQUEST_LIMIT_EXCEEDED`
    /// - `AppError::ConnectionFailed` when the request never completes
    pub async fn create_job(
        &self,
        req: &JobCreateRequest,
        api_version: Option<&str>,
    ) -> Result<JobInfo, AppError> {
        req.validate()?;
        let url = self.build_jobs_url(api_version)?;

        info!(
            "[BULK-INGEST] POST /jobs/ingest (creating {} job for {})",
            req.operation, req.object
        );

        let request = self
            .client
            .request(Method::POST, &url)
            .header(ACCEPT, "application/json")
            .json(req);
        let response = self.client.execute(request, &Method::POST, &url).await?;

        let status = response.status();
        info!("[BULK-INGEST] POST /jobs/ingest -> {}", status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        response.json().await.map_err(|e| {
            AppError::SalesforceError(format!("Failed to parse job creation response: {}", e))
        })
    }

    /// Uploads CSV data to a job's content URL in a single PUT.
    ///
    /// # Errors
    ///
    /// - `AppError::SalesforceError` when Salesforce rejects the call
    /// - `AppError::ConnectionFailed` when the request never completes
    pub async fn upload_job_data(
        &self,
        content_url: &str,
        body: Vec<u8>,
    ) -> Result<UploadAck, AppError> {
        let url = self.client.resolve(content_url)?;
        let size = body.len();

        info!("[BULK-INGEST] PUT {} ({} bytes)", url.path(), size);

        let request = self
            .client
            .request(Method::PUT, &url)
            .header(CONTENT_TYPE, "text/csv")
            .body(body);
        let response = self.client.execute(request, &Method::PUT, &url).await?;

        let status = response.status();
        info!("[BULK-INGEST] PUT {} -> {}", url.path(), status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        Ok(UploadAck {
            status_code: status.as_u16(),
            content_url: content_url.to_string(),
        })
    }

    /// Moves the job to `UploadComplete`, which queues it for processing.
    ///
    /// # Errors
    ///
    /// - `AppError::SalesforceError` when Salesforce rejects the call
    /// - `AppError::ConnectionFailed` when the request never completes
    pub async fn close_job(&self, job_id: &str) -> Result<JobInfo, AppError> {
        let url = self.build_job_url(job_id)?;

        info!(
            "[BULK-INGEST] PATCH /jobs/ingest/{} (closing)",
            redact_id(job_id)
        );

        let request = self
            .client
            .request(Method::PATCH, &url)
            .header(ACCEPT, "application/json")
            .json(&UpdateJobStateRequest {
                state: BulkJobState::UploadComplete,
            });
        let response = self.client.execute(request, &Method::PATCH, &url).await?;

        let status = response.status();
        info!(
            "[BULK-INGEST] PATCH /jobs/ingest/{} -> {}",
            redact_id(job_id),
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        response.json().await.map_err(|e| {
            AppError::SalesforceError(format!("Failed to parse job close response: {}", e))
        })
    }

    /// Fetches the job's info record with its processing counters.
    ///
    /// A job in `Failed` or `Aborted` state is returned as-is; the caller
    /// decides what a terminal state means.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for an unknown job id
    /// - `AppError::SalesforceError` when Salesforce rejects the call
    /// - `AppError::ConnectionFailed` when the request never completes
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, AppError> {
        let url = self.build_job_url(job_id)?;

        info!(
            "[BULK-INGEST] GET /jobs/ingest/{} (status)",
            redact_id(job_id)
        );

        let request = self
            .client
            .request(Method::GET, &url)
            .header(ACCEPT, "application/json");
        let response = self.client.execute(request, &Method::GET, &url).await?;

        let status = response.status();
        info!(
            "[BULK-INGEST] GET /jobs/ingest/{} -> {}",
            redact_id(job_id),
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        response.json().await.map_err(|e| {
            AppError::SalesforceError(format!("Failed to parse job status response: {}", e))
        })
    }

    /// Downloads one result partition as raw CSV text.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for an unknown job id
    /// - `AppError::SalesforceError` when Salesforce rejects the call
    /// - `AppError::ConnectionFailed` when the request or body read fails
    pub async fn get_results(&self, job_id: &str, kind: ResultKind) -> Result<String, AppError> {
        let url = self.build_results_url(job_id, kind)?;

        info!(
            "[BULK-INGEST] GET /jobs/ingest/{}/{} (downloading)",
            redact_id(job_id),
            kind.results_name()
        );

        let request = self
            .client
            .request(Method::GET, &url)
            .header(ACCEPT, "text/csv");
        let response = self.client.execute(request, &Method::GET, &url).await?;

        let status = response.status();
        info!(
            "[BULK-INGEST] GET /jobs/ingest/{}/{} -> {}",
            redact_id(job_id),
            kind.results_name(),
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        response.text().await.map_err(|e| {
            AppError::ConnectionFailed(format!(
                "Error reading {} body: {}",
                kind.results_name(),
                e.without_url()
            ))
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // URL Builders
    // ─────────────────────────────────────────────────────────────────────────

    /// `{base}/jobs/ingest`
    fn build_jobs_url(&self, api_version: Option<&str>) -> Result<Url, AppError> {
        self.client
            .api_base(api_version)?
            .join("jobs/ingest")
            .map_err(|e| AppError::Internal(format!("Failed to build jobs URL: {}", e)))
    }

    /// `{base}/jobs/ingest/{job_id}`
    fn build_job_url(&self, job_id: &str) -> Result<Url, AppError> {
        self.client
            .api_base(None)?
            .join(&format!("jobs/ingest/{}", job_id))
            .map_err(|e| AppError::Internal(format!("Failed to build job URL: {}", e)))
    }

    /// `{base}/jobs/ingest/{job_id}/{kind}Results/`
    fn build_results_url(&self, job_id: &str, kind: ResultKind) -> Result<Url, AppError> {
        self.client
            .api_base(None)?
            .join(&format!("jobs/ingest/{}/{}/", job_id, kind.results_name()))
            .map_err(|e| AppError::Internal(format!("Failed to build results URL: {}", e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Maps a non-success response onto the matching `AppError` variant.
async fn parse_error_response(
    response: reqwest::Response,
    status: reqwest::StatusCode,
) -> AppError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return AppError::NotFound("Bulk ingest job not found".to_string());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    if let Ok(errors) = serde_json::from_str::<Vec<SalesforceError>>(&body) {
        if let Some(first_error) = errors.first() {
            if first_error.error_code == "REQUEST_LIMIT_EXCEEDED" {
                return AppError::RateLimited {
                    retry_after_secs: None,
                };
            }

            return AppError::SalesforceError(format!(
                "[{}] {}",
                first_error.error_code, first_error.message
            ));
        }
    }

    AppError::SalesforceError(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
