//! Scripted `IngestClientOps` fake shared by the pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::ingest::{IngestClientOps, OpsFuture};
use crate::salesforce::{
    BulkJobState, BulkOperation, ContentType, JobCreateRequest, JobInfo, JobStatus, ResultKind,
    UploadAck,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FakeCall {
    Create,
    Upload,
    Close,
    Status,
    Results,
}

pub(crate) fn job_info(id: &str, state: BulkJobState) -> JobInfo {
    JobInfo {
        id: id.to_string(),
        state,
        object: "Account".to_string(),
        operation: BulkOperation::Insert,
        content_type: Some(ContentType::Csv),
        column_delimiter: None,
        line_ending: None,
        external_id_field_name: None,
        content_url: Some(format!("services/data/v60.0/jobs/ingest/{}/batches", id)),
        created_by_id: None,
        created_date: Some("2024-01-10T18:00:00.000+0000".to_string()),
        system_modstamp: Some("2024-01-10T18:00:00.000+0000".to_string()),
        concurrency_mode: Some("Parallel".to_string()),
        api_version: Some(60.0),
    }
}

pub(crate) fn job_status(id: &str, state: BulkJobState) -> JobStatus {
    JobStatus {
        job: job_info(id, state),
        number_records_processed: Some(0),
        number_records_failed: Some(0),
        retries: Some(0),
        total_processing_time: Some(0),
        api_active_processing_time: Some(0),
        apex_processing_time: Some(0),
        job_type: Some("V2Ingest".to_string()),
        error_message: None,
    }
}

/// Fake ingest client driven by a script of job states and result bodies.
///
/// Each status poll consumes the next scripted state; the last one repeats.
#[derive(Clone)]
pub(crate) struct FakeIngestClient {
    states: Arc<Mutex<VecDeque<BulkJobState>>>,
    results: HashMap<ResultKind, String>,
    failures: Arc<Mutex<HashMap<FakeCall, AppError>>>,
    omit_content_url: bool,
    cancel_after_polls: Option<(usize, CancellationToken)>,
    job_counter: Arc<AtomicUsize>,
    open_jobs: Arc<AtomicUsize>,
    max_open_jobs: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<FakeCall>>>,
    poll_times: Arc<Mutex<Vec<Instant>>>,
    uploads: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    create_requests: Arc<Mutex<Vec<(JobCreateRequest, Option<String>)>>>,
}

impl FakeIngestClient {
    pub(crate) fn new() -> Self {
        let mut results = HashMap::new();
        results.insert(ResultKind::Successful, "sf__Id,sf__Created\n".to_string());
        results.insert(ResultKind::Failed, "sf__Id,sf__Error\n".to_string());

        Self {
            states: Arc::new(Mutex::new(VecDeque::from([BulkJobState::JobComplete]))),
            results,
            failures: Arc::new(Mutex::new(HashMap::new())),
            omit_content_url: false,
            cancel_after_polls: None,
            job_counter: Arc::new(AtomicUsize::new(0)),
            open_jobs: Arc::new(AtomicUsize::new(0)),
            max_open_jobs: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
            poll_times: Arc::new(Mutex::new(Vec::new())),
            uploads: Arc::new(Mutex::new(Vec::new())),
            create_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn with_states(self, states: impl IntoIterator<Item = BulkJobState>) -> Self {
        *self.states.lock().unwrap() = states.into_iter().collect();
        self
    }

    pub(crate) fn with_results(mut self, kind: ResultKind, body: &str) -> Self {
        self.results.insert(kind, body.to_string());
        self
    }

    /// Makes the next `call` fail with `err`.
    pub(crate) fn fail_on(self, call: FakeCall, err: AppError) -> Self {
        self.failures.lock().unwrap().insert(call, err);
        self
    }

    pub(crate) fn fail_results_with(self, err: AppError) -> Self {
        self.fail_on(FakeCall::Results, err)
    }

    pub(crate) fn without_content_url(mut self) -> Self {
        self.omit_content_url = true;
        self
    }

    /// Cancels `token` once `polls` status polls have been answered.
    pub(crate) fn cancel_after_polls(mut self, polls: usize, token: CancellationToken) -> Self {
        self.cancel_after_polls = Some((polls, token));
        self
    }

    pub(crate) fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn poll_count(&self) -> usize {
        self.poll_times.lock().unwrap().len()
    }

    pub(crate) fn poll_times(&self) -> Vec<Instant> {
        self.poll_times.lock().unwrap().clone()
    }

    pub(crate) fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }

    pub(crate) fn create_requests(&self) -> Vec<(JobCreateRequest, Option<String>)> {
        self.create_requests.lock().unwrap().clone()
    }

    /// Most jobs that were open (created, results not yet collected) at once.
    pub(crate) fn max_open_jobs(&self) -> usize {
        self.max_open_jobs.load(Ordering::SeqCst)
    }

    fn record(&self, call: FakeCall) -> Result<(), AppError> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().remove(&call) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_state(&self) -> BulkJobState {
        let mut states = self.states.lock().unwrap();
        if states.len() > 1 {
            states.pop_front().unwrap_or(BulkJobState::JobComplete)
        } else {
            states.front().copied().unwrap_or(BulkJobState::JobComplete)
        }
    }
}

impl IngestClientOps for FakeIngestClient {
    fn create_job<'a>(
        &'a self,
        req: &'a JobCreateRequest,
        api_version: Option<&'a str>,
    ) -> OpsFuture<'a, JobInfo> {
        Box::pin(async move {
            if let Err(e) = self.record(FakeCall::Create) {
                return Err(e);
            }
            self.create_requests
                .lock()
                .unwrap()
                .push((req.clone(), api_version.map(str::to_string)));

            let n = self.job_counter.fetch_add(1, Ordering::SeqCst);
            let open = self.open_jobs.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open_jobs.fetch_max(open, Ordering::SeqCst);

            let mut job = job_info(&format!("750fake{:010}", n), BulkJobState::Open);
            job.object = req.object.clone();
            job.operation = req.operation;
            if self.omit_content_url {
                job.content_url = None;
            }
            Ok(job)
        })
    }

    fn upload_job_data<'a>(
        &'a self,
        content_url: &'a str,
        body: Vec<u8>,
    ) -> OpsFuture<'a, UploadAck> {
        Box::pin(async move {
            if let Err(e) = self.record(FakeCall::Upload) {
                return Err(e);
            }
            self.uploads
                .lock()
                .unwrap()
                .push((content_url.to_string(), body));
            Ok(UploadAck {
                status_code: 201,
                content_url: content_url.to_string(),
            })
        })
    }

    fn close_job<'a>(&'a self, job_id: &'a str) -> OpsFuture<'a, JobInfo> {
        Box::pin(async move {
            if let Err(e) = self.record(FakeCall::Close) {
                return Err(e);
            }
            Ok(job_info(job_id, BulkJobState::UploadComplete))
        })
    }

    fn get_job_status<'a>(&'a self, job_id: &'a str) -> OpsFuture<'a, JobStatus> {
        Box::pin(async move {
            if let Err(e) = self.record(FakeCall::Status) {
                return Err(e);
            }
            let polls = {
                let mut times = self.poll_times.lock().unwrap();
                times.push(Instant::now());
                times.len()
            };
            if let Some((after, token)) = &self.cancel_after_polls {
                if polls >= *after {
                    token.cancel();
                }
            }
            Ok(job_status(job_id, self.next_state()))
        })
    }

    fn get_results<'a>(&'a self, _job_id: &'a str, kind: ResultKind) -> OpsFuture<'a, String> {
        Box::pin(async move {
            if kind == ResultKind::Failed {
                self.open_jobs.fetch_sub(1, Ordering::SeqCst);
            }
            if let Err(e) = self.record(FakeCall::Results) {
                return Err(e);
            }
            Ok(self.results.get(&kind).cloned().unwrap_or_default())
        })
    }
}
