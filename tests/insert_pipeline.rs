//! End-to-end insert loads against a mocked Salesforce org.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use tempfile::TempDir;
use wiremock::matchers::{body_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sf_bulk_loader::salesforce::client::{OrgCredentials, SalesforceClient};
use sf_bulk_loader::salesforce::BulkJobState;
use sf_bulk_loader::{
    bulk2_insert, AppError, BulkIngestV2Client, BulkOperation, BulkStage, IntervalOptions,
    JobCreateRequest,
};

const JOB_ID: &str = "7505g00000ABCDEFGH";
const JOBS_PATH: &str = "/services/data/v60.0/jobs/ingest";

fn client_for(server: &MockServer) -> BulkIngestV2Client {
    let creds = OrgCredentials::new(server.uri(), SecretString::from("test_token".to_string()));
    BulkIngestV2Client::new(SalesforceClient::with_http(
        Arc::new(reqwest::Client::new()),
        creds,
    ))
}

fn fast_polling() -> IntervalOptions {
    IntervalOptions {
        initial: 0.0,
        increment_by: 0.0,
        maximum: 0.0,
        timeout: 600.0,
    }
}

fn job_body(state: &str) -> serde_json::Value {
    serde_json::json!({
        "id": JOB_ID,
        "operation": "insert",
        "object": "Account",
        "createdById": "0055g00000XXXXXAAA",
        "createdDate": "2024-03-01T10:00:00.000+0000",
        "systemModstamp": "2024-03-01T10:00:00.000+0000",
        "state": state,
        "concurrencyMode": "Parallel",
        "contentType": "CSV",
        "apiVersion": 60.0,
        "contentUrl": format!("services/data/v60.0/jobs/ingest/{}/batches", JOB_ID),
        "lineEnding": "LF",
        "columnDelimiter": "COMMA"
    })
}

fn status_body(state: &str, processed: u64) -> serde_json::Value {
    let mut body = job_body(state);
    body["jobType"] = serde_json::json!("V2Ingest");
    body["numberRecordsProcessed"] = serde_json::json!(processed);
    body["numberRecordsFailed"] = serde_json::json!(0);
    body["retries"] = serde_json::json!(0);
    body["totalProcessingTime"] = serde_json::json!(1200);
    body["apiActiveProcessingTime"] = serde_json::json!(1000);
    body["apexProcessingTime"] = serde_json::json!(0);
    body
}

fn accounts_csv(rows: usize) -> String {
    let mut csv = String::from("Name,Industry\n");
    for i in 1..=rows {
        csv.push_str(&format!("Account {},Technology\n", i));
    }
    csv
}

fn successful_results(rows: usize) -> String {
    let mut csv = String::from("\"sf__Id\",\"sf__Created\",Name,Industry\n");
    for i in 1..=rows {
        csv.push_str(&format!(
            "\"0015g00000ACC{:05}\",\"true\",\"Account {}\",\"Technology\"\n",
            i, i
        ));
    }
    csv
}

fn write_source(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("accounts.csv");
    std::fs::write(&path, contents).unwrap();
    path
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}", path.display(), suffix))
}

#[tokio::test]
async fn inserts_ten_accounts_end_to_end() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let csv = accounts_csv(10);
    let source = write_source(&dir, &csv);

    Mock::given(method("POST"))
        .and(path(JOBS_PATH))
        .and(header("Authorization", "Bearer test_token"))
        .and(body_json(serde_json::json!({
            "object": "Account",
            "operation": "insert",
            "contentType": "CSV"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_body("Open")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path(format!("{}/{}/batches", JOBS_PATH, JOB_ID)))
        .and(header("Content-Type", "text/csv"))
        .and(body_string(csv.clone()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path(format!("{}/{}", JOBS_PATH, JOB_ID)))
        .and(body_json(serde_json::json!({ "state": "UploadComplete" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_body("UploadComplete")))
        .expect(1)
        .mount(&server)
        .await;

    // First poll sees the job in progress, every later one sees it complete.
    Mock::given(method("GET"))
        .and(path(format!("{}/{}", JOBS_PATH, JOB_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("InProgress", 0)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/{}", JOBS_PATH, JOB_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("JobComplete", 10)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/{}/successfulResults/", JOBS_PATH, JOB_ID)))
        .and(header("Accept", "text/csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(successful_results(10)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/{}/failedResults/", JOBS_PATH, JOB_ID)))
        .and(header("Accept", "text/csv"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("\"sf__Id\",\"sf__Error\",Name,Industry\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = JobCreateRequest::new("Account", BulkOperation::Insert);

    let status = bulk2_insert(&client, request, &source, Some(fast_polling()), None, None)
        .await
        .expect("load should succeed");

    assert_eq!(status.data_source_size, Some(csv.len() as u64));
    assert_eq!(status.job_id(), Some(JOB_ID));
    let current = status.current_job_status.as_ref().unwrap();
    assert_eq!(current.state(), BulkJobState::JobComplete);
    assert_eq!(current.number_records_processed, Some(10));

    let successful = status.successful_results.as_ref().unwrap();
    assert_eq!(successful.len(), 10);
    assert_eq!(status.failed_count(), 0);
    for (i, record) in successful.iter().enumerate() {
        assert!(record.sf_id().is_some_and(|id| id.starts_with("001")));
        assert_eq!(record.sf_created(), Some(true));
        assert_eq!(record.get("Name"), Some(format!("Account {}", i + 1).as_str()));
    }

    let successful_path = sibling(&source, "successfulResults");
    assert_eq!(status.successful_results_path.as_ref(), Some(&successful_path));
    assert_eq!(
        std::fs::read_to_string(&successful_path).unwrap(),
        successful_results(10)
    );
    assert!(sibling(&source, "failedResults").exists());
}

#[tokio::test]
async fn create_rejection_reports_job_create_stage() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let source = write_source(&dir, &accounts_csv(2));

    Mock::given(method("POST"))
        .and(path(JOBS_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!([{
            "errorCode": "INVALIDJOB",
            "message": "Unable to find object: Acount"
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = JobCreateRequest::new("Acount", BulkOperation::Insert);

    let err = bulk2_insert(&client, request, &source, Some(fast_polling()), None, None)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), BulkStage::JobCreate);
    assert!(err
        .to_string()
        .starts_with("Bulk insert of Acount records failed."));
    assert!(matches!(err.cause(), AppError::SalesforceError(msg) if msg.contains("INVALIDJOB")));
    let status = err.status().unwrap();
    assert!(status.data_source_size.is_some());
    assert!(status.initial_job_status.is_none());
}

#[tokio::test]
async fn upload_rejection_keeps_created_job() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let source = write_source(&dir, &accounts_csv(2));

    Mock::given(method("POST"))
        .and(path(JOBS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_body("Open")))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    // Nothing after the upload may be attempted.
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = JobCreateRequest::new("Account", BulkOperation::Insert);

    let err = bulk2_insert(&client, request, &source, Some(fast_polling()), None, None)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), BulkStage::Upload);
    let status = err.into_status().unwrap();
    assert_eq!(
        status.initial_job_status.as_ref().map(|j| j.state),
        Some(BulkJobState::Open)
    );
    assert!(status.current_job_status.is_none());
}

#[tokio::test]
async fn oversized_source_never_reaches_salesforce() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let source = write_source(&dir, &"x".repeat(1_048_577));

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = JobCreateRequest::new("Account", BulkOperation::Insert);

    let err = bulk2_insert(&client, request, &source, None, None, None)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), BulkStage::DataSource);
    assert!(matches!(err.cause(), AppError::DataSourceTooLarge { .. }));
    assert!(err.status().is_none());
}
