//! Insert-load pipeline on top of the Bulk API 2.0 ingest client.
//!
//! A load runs strictly in sequence: validate the data source, create the
//! job, upload the CSV, close the job, monitor it until it settles, then
//! collect the successful and failed result partitions.
//!
//! Every stage talks to Salesforce through [`IngestClientOps`], so tests can
//! drive the pipeline with fakes instead of a live org.

pub mod data_source;
pub mod monitor;
pub mod orchestrator;
pub mod results;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::pin::Pin;

use crate::error::AppError;
use crate::salesforce::{
    BulkIngestV2Client, JobCreateRequest, JobInfo, JobStatus, ResultKind, UploadAck,
};

pub use data_source::{DataSourceDescriptor, MAX_SOURCE_SIZE};
pub use monitor::{IntervalOptions, JobMonitor, PollSchedule, DEFAULT_GRACE_PERIOD};
pub use orchestrator::{bulk2_insert, bulk2_insert_many};
pub use results::{results_path, ResultRecord};
pub use status::OperationStatus;

/// Boxed future returned by [`IngestClientOps`] methods.
pub type OpsFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

// ─────────────────────────────────────────────────────────────────────────────
// Traits for Testing
// ─────────────────────────────────────────────────────────────────────────────

/// Ingest endpoints the load pipeline depends on, allowing test fakes.
pub trait IngestClientOps: Send + Sync + Clone {
    /// Creates a new ingest job.
    fn create_job<'a>(
        &'a self,
        req: &'a JobCreateRequest,
        api_version: Option<&'a str>,
    ) -> OpsFuture<'a, JobInfo>;

    /// Uploads CSV data to the job's content URL.
    fn upload_job_data<'a>(&'a self, content_url: &'a str, body: Vec<u8>)
        -> OpsFuture<'a, UploadAck>;

    /// Closes the job to start processing.
    fn close_job<'a>(&'a self, job_id: &'a str) -> OpsFuture<'a, JobInfo>;

    /// Gets the current job status. Terminal failure states are not errors.
    fn get_job_status<'a>(&'a self, job_id: &'a str) -> OpsFuture<'a, JobStatus>;

    /// Downloads one result partition as raw CSV.
    fn get_results<'a>(&'a self, job_id: &'a str, kind: ResultKind) -> OpsFuture<'a, String>;
}

impl IngestClientOps for BulkIngestV2Client {
    fn create_job<'a>(
        &'a self,
        req: &'a JobCreateRequest,
        api_version: Option<&'a str>,
    ) -> OpsFuture<'a, JobInfo> {
        Box::pin(BulkIngestV2Client::create_job(self, req, api_version))
    }

    fn upload_job_data<'a>(
        &'a self,
        content_url: &'a str,
        body: Vec<u8>,
    ) -> OpsFuture<'a, UploadAck> {
        Box::pin(BulkIngestV2Client::upload_job_data(self, content_url, body))
    }

    fn close_job<'a>(&'a self, job_id: &'a str) -> OpsFuture<'a, JobInfo> {
        Box::pin(BulkIngestV2Client::close_job(self, job_id))
    }

    fn get_job_status<'a>(&'a self, job_id: &'a str) -> OpsFuture<'a, JobStatus> {
        Box::pin(BulkIngestV2Client::get_job_status(self, job_id))
    }

    fn get_results<'a>(&'a self, job_id: &'a str, kind: ResultKind) -> OpsFuture<'a, String> {
        Box::pin(BulkIngestV2Client::get_results(self, job_id, kind))
    }
}
