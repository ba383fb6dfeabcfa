//! Bulk insert orchestration.
//!
//! `bulk2_insert` drives one data file through every stage in order and
//! records progress in an [`OperationStatus`]. On failure the returned
//! [`BulkError`] names the stage and carries the status gathered so far.
//! Nothing is retried and a created job is never aborted.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{AppError, BulkError, BulkStage};
use crate::ingest::data_source;
use crate::ingest::monitor::{IntervalOptions, JobMonitor};
use crate::ingest::results::{fetch_partition, results_path};
use crate::ingest::status::OperationStatus;
use crate::ingest::IngestClientOps;
use crate::salesforce::client::redact_id;
use crate::salesforce::{
    BulkJobState, BulkOperation, JobCreateRequest, JobInfo, LoadScheduler, ResultKind, UploadAck,
};

// ─────────────────────────────────────────────────────────────────────────────
// Stages
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the ingest job.
pub async fn submit_job<C: IngestClientOps>(
    client: &C,
    request: &JobCreateRequest,
    api_version: Option<&str>,
) -> Result<JobInfo, AppError> {
    let job = client.create_job(request, api_version).await?;
    info!(
        "[BULK-LOAD] Created {} job {} for {}",
        job.operation,
        redact_id(&job.id),
        job.object
    );
    Ok(job)
}

/// Re-validates the data source and uploads it to `content_url` in one request.
pub async fn upload_data<C: IngestClientOps>(
    client: &C,
    path: &Path,
    content_url: &str,
) -> Result<UploadAck, AppError> {
    let body = data_source::read_contents(path).await?;
    let size = body.len();
    let ack = client.upload_job_data(content_url, body).await?;
    info!(
        "[BULK-LOAD] Uploaded {} bytes (HTTP {})",
        size, ack.status_code
    );
    Ok(ack)
}

/// Marks the job's upload complete.
pub async fn close_job<C: IngestClientOps>(client: &C, job_id: &str) -> Result<JobInfo, AppError> {
    let job = client.close_job(job_id).await?;
    info!(
        "[BULK-LOAD] Closed job {} ({:?})",
        redact_id(job_id),
        job.state
    );
    Ok(job)
}

// ─────────────────────────────────────────────────────────────────────────────
// bulk2_insert
// ─────────────────────────────────────────────────────────────────────────────

/// Inserts the records of one CSV file through a Bulk API 2.0 ingest job.
///
/// The request's operation is forced to `insert`. `interval_options` tunes
/// job monitoring (defaults apply when `None`). `api_version` only affects
/// job creation. `cancel` is observed between monitor polls.
///
/// # Errors
///
/// A [`BulkError`] naming the failed stage. Its status is `None` only when
/// the data source was rejected.
pub async fn bulk2_insert<C: IngestClientOps>(
    client: &C,
    request: JobCreateRequest,
    data_source_path: impl AsRef<Path>,
    interval_options: Option<IntervalOptions>,
    api_version: Option<&str>,
    cancel: Option<CancellationToken>,
) -> Result<OperationStatus, BulkError> {
    let path = data_source_path.as_ref().to_path_buf();
    let span = info_span!(
        "bulk_load",
        load_id = %Uuid::new_v4(),
        object = %request.object,
        data_source = %path.display()
    );

    run_insert(
        client,
        request,
        path,
        interval_options.unwrap_or_default(),
        api_version,
        cancel.unwrap_or_default(),
    )
    .instrument(span)
    .await
}

async fn run_insert<C: IngestClientOps>(
    client: &C,
    mut request: JobCreateRequest,
    path: PathBuf,
    interval_options: IntervalOptions,
    api_version: Option<&str>,
    cancel: CancellationToken,
) -> Result<OperationStatus, BulkError> {
    request.operation = BulkOperation::Insert;
    let operation = request.operation.as_str();
    let object = request.object.clone();
    let fail = |stage: BulkStage, cause: AppError, status: Option<OperationStatus>| {
        warn!("[BULK-LOAD] {} stage failed: {}", stage, cause);
        BulkError::new(stage, operation, &object, cause, status)
    };

    info!("[BULK-LOAD] Starting {} of {} records", operation, object);

    // 1. Data source
    let descriptor = data_source::validate(&path)
        .await
        .map_err(|e| fail(BulkStage::DataSource, e, None))?;

    let mut status = OperationStatus::new(path.clone());
    status.data_source_size = Some(descriptor.size_bytes);

    // 2. Create
    let job = match submit_job(client, &request, api_version).await {
        Ok(job) => job,
        Err(e) => return Err(fail(BulkStage::JobCreate, e, Some(status))),
    };
    let job_id = job.id.clone();
    let content_url = job.content_url.clone();
    status.initial_job_status = Some(job);

    // 3. Upload
    let content_url = match content_url {
        Some(url) if !url.is_empty() => url,
        _ => {
            let cause =
                AppError::SalesforceError("Job response did not include a contentUrl".to_string());
            return Err(fail(BulkStage::Upload, cause, Some(status)));
        }
    };
    if let Err(e) = upload_data(client, &path, &content_url).await {
        return Err(fail(BulkStage::Upload, e, Some(status)));
    }

    // 4. Close
    if let Err(e) = close_job(client, &job_id).await {
        return Err(fail(BulkStage::JobClose, e, Some(status)));
    }

    // 5. Monitor
    let monitor = JobMonitor::new(client, interval_options);
    let current = match monitor.wait_for_completion(&job_id, &cancel).await {
        Ok(current) => current,
        Err(e) => return Err(fail(BulkStage::Monitor, e, Some(status))),
    };
    match current.state() {
        BulkJobState::JobComplete => {}
        BulkJobState::Failed | BulkJobState::Aborted => warn!(
            "[BULK-LOAD] Job {} ended {:?}: {}",
            redact_id(&job_id),
            current.state(),
            current.error_message.as_deref().unwrap_or("no error message")
        ),
        state => warn!(
            "[BULK-LOAD] Job {} still {:?} when monitoring stopped",
            redact_id(&job_id),
            state
        ),
    }
    status.current_job_status = Some(current);

    // 6. Results
    for kind in [ResultKind::Successful, ResultKind::Failed] {
        let target = results_path(&path, kind);
        match kind {
            ResultKind::Successful => status.successful_results_path = Some(target),
            ResultKind::Failed => status.failed_results_path = Some(target),
        }

        let records = match fetch_partition(client, &job_id, kind, &path).await {
            Ok(records) => records,
            Err(e) => return Err(fail(BulkStage::Results, e, Some(status))),
        };
        match kind {
            ResultKind::Successful => status.successful_results = Some(records),
            ResultKind::Failed => status.failed_results = Some(records),
        }
    }

    info!(
        "[BULK-LOAD] Finished {} of {} records: {} successful, {} failed",
        operation,
        object,
        status.successful_count(),
        status.failed_count()
    );

    Ok(status)
}

// ─────────────────────────────────────────────────────────────────────────────
// bulk2_insert_many
// ─────────────────────────────────────────────────────────────────────────────

/// Runs one [`bulk2_insert`] per data file, at most
/// `scheduler.max_concurrent()` at a time.
///
/// Each file gets its own job and status. Results come back in the order of
/// `data_source_paths`.
pub async fn bulk2_insert_many<C>(
    client: &C,
    request: &JobCreateRequest,
    data_source_paths: Vec<PathBuf>,
    interval_options: Option<IntervalOptions>,
    api_version: Option<&str>,
    scheduler: &LoadScheduler,
    cancel: Option<CancellationToken>,
) -> Vec<Result<OperationStatus, BulkError>>
where
    C: IngestClientOps + 'static,
{
    let cancel = cancel.unwrap_or_default();
    let mut handles = Vec::with_capacity(data_source_paths.len());

    info!(
        "[BULK-LOAD] Scheduling {} loads ({} at a time)",
        data_source_paths.len(),
        scheduler.max_concurrent()
    );

    for path in data_source_paths {
        let client = client.clone();
        let request = request.clone();
        let api_version = api_version.map(str::to_string);
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let not_started = |cause: AppError| {
                BulkError::new(
                    BulkStage::DataSource,
                    BulkOperation::Insert.as_str(),
                    &request.object,
                    cause,
                    None,
                )
            };

            // A queued load must not create a job once the batch is cancelled.
            let acquired = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AppError::Cancelled),
                permit = scheduler.acquire() => permit,
            };
            let _permit = match acquired {
                Ok(permit) => permit,
                Err(e) => return Err(not_started(e)),
            };
            if cancel.is_cancelled() {
                info!("[BULK-LOAD] Skipping {} after cancellation", path.display());
                return Err(not_started(AppError::Cancelled));
            }

            bulk2_insert(
                &client,
                request,
                path,
                interval_options,
                api_version.as_deref(),
                Some(cancel),
            )
            .await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => results.push(Err(BulkError::new(
                BulkStage::DataSource,
                BulkOperation::Insert.as_str(),
                &request.object,
                AppError::Internal(format!("Load task did not finish: {}", e)),
                None,
            ))),
        }
    }
    results
}
