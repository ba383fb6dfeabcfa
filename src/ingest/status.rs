use std::path::PathBuf;

use serde::Serialize;

use crate::ingest::results::ResultRecord;
use crate::salesforce::{BulkJobState, JobInfo, JobStatus};

/// Progress of one bulk load, filled in stage by stage.
///
/// Everything except `data_source_path` stays `None` until the stage that
/// produces it has finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    pub data_source_path: PathBuf,
    pub data_source_size: Option<u64>,
    pub successful_results_path: Option<PathBuf>,
    pub failed_results_path: Option<PathBuf>,
    /// Job descriptor returned at creation.
    pub initial_job_status: Option<JobInfo>,
    /// Last status seen by the monitor.
    pub current_job_status: Option<JobStatus>,
    pub successful_results: Option<Vec<ResultRecord>>,
    pub failed_results: Option<Vec<ResultRecord>>,
}

impl OperationStatus {
    pub fn new(data_source_path: PathBuf) -> Self {
        Self {
            data_source_path,
            data_source_size: None,
            successful_results_path: None,
            failed_results_path: None,
            initial_job_status: None,
            current_job_status: None,
            successful_results: None,
            failed_results: None,
        }
    }

    /// Id of the job created for this load, once there is one.
    pub fn job_id(&self) -> Option<&str> {
        self.initial_job_status.as_ref().map(|job| job.id.as_str())
    }

    /// Most recent job state known for this load.
    pub fn job_state(&self) -> Option<BulkJobState> {
        self.current_job_status
            .as_ref()
            .map(JobStatus::state)
            .or_else(|| self.initial_job_status.as_ref().map(|job| job.state))
    }

    pub fn successful_count(&self) -> usize {
        self.successful_results.as_ref().map_or(0, Vec::len)
    }

    pub fn failed_count(&self) -> usize {
        self.failed_results.as_ref().map_or(0, Vec::len)
    }
}
