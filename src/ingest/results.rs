//! Result partition download, persistence and parsing.
//!
//! Each partition is written verbatim next to the data source as
//! `{data_source}.successfulResults` / `{data_source}.failedResults` before
//! it is parsed, so a malformed body can still be inspected on disk.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::AppError;
use crate::ingest::IngestClientOps;
use crate::salesforce::ResultKind;

/// One row of a result partition.
///
/// Keys are the uploaded column names plus the partition's `sf__` marker
/// columns, in the order Salesforce returned them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRecord(IndexMap<String, String>);

impl ResultRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    /// Record id assigned by Salesforce (`sf__Id`).
    pub fn sf_id(&self) -> Option<&str> {
        self.get("sf__Id")
    }

    /// `sf__Created` parsed as a boolean; successful rows only.
    pub fn sf_created(&self) -> Option<bool> {
        self.get("sf__Created")
            .map(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Failure reason (`sf__Error`); failed rows only.
    pub fn sf_error(&self) -> Option<&str> {
        self.get("sf__Error")
    }

    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.0
    }

    pub fn into_fields(self) -> IndexMap<String, String> {
        self.0
    }
}

impl FromIterator<(String, String)> for ResultRecord {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Where the raw body of a `kind` partition is stored for `data_source`.
pub fn results_path(data_source: &Path, kind: ResultKind) -> PathBuf {
    let mut name = OsString::from(data_source.as_os_str());
    name.push(".");
    name.push(kind.results_name());
    PathBuf::from(name)
}

/// Downloads a result partition, saves it next to the data source, and
/// parses it.
///
/// # Errors
///
/// - Any error from the download (`SalesforceError`, `NotFound`, ...)
/// - `AppError::Internal` - The sibling file could not be written
/// - `AppError::CsvInvalid` - The body is not a well-formed partition
pub async fn fetch_partition<C: IngestClientOps>(
    client: &C,
    job_id: &str,
    kind: ResultKind,
    data_source_path: &Path,
) -> Result<Vec<ResultRecord>, AppError> {
    let body = client.get_results(job_id, kind).await?;

    let target = results_path(data_source_path, kind);
    let bytes = body.len();
    let write_target = target.clone();
    let write_body = body.clone();
    tokio::task::spawn_blocking(move || write_atomic(&write_target, write_body.as_bytes()))
        .await
        .map_err(|e| AppError::Internal(format!("Result writer task failed: {}", e)))??;

    info!(
        "[BULK-LOAD] Saved {} ({} bytes) to {}",
        kind.results_name(),
        bytes,
        target.display()
    );

    let records = parse_results(&body, kind)?;
    info!("[BULK-LOAD] Parsed {} {} records", records.len(), kind);
    Ok(records)
}

/// Parses a result partition body.
///
/// A leading UTF-8 BOM is ignored and an empty body yields no records.
///
/// # Errors
///
/// `AppError::CsvInvalid` if the header lacks the partition's marker columns
/// or a row does not match the header.
pub fn parse_results(body: &str, kind: ResultKind) -> Result<Vec<ResultRecord>, AppError> {
    let body = body.strip_prefix('\u{feff}').unwrap_or(body);
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| AppError::CsvInvalid(format!("Unreadable {} header: {}", kind, e)))?
        .clone();

    for marker in kind.marker_columns() {
        if !headers.iter().any(|h| h == marker) {
            return Err(AppError::CsvInvalid(format!(
                "{} header is missing the {} column",
                kind.results_name(),
                marker
            )));
        }
    }

    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row.map_err(|e| {
            AppError::CsvInvalid(format!("{} row {}: {}", kind.results_name(), idx + 1, e))
        })?;
        records.push(
            headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect(),
        );
    }

    Ok(records)
}

/// Writes `contents` to a temp file in the target's directory, then
/// persists it over `path`.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AppError> {
    use std::io::Write;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp_file = NamedTempFile::new_in(parent)
        .map_err(|e| AppError::Internal(format!("Failed to create temporary file: {}", e)))?;

    temp_file
        .write_all(contents)
        .and_then(|_| temp_file.flush())
        .map_err(|e| AppError::Internal(format!("Failed to write results: {}", e)))?;

    temp_file.persist(path).map_err(|e| {
        AppError::Internal(format!(
            "Failed to persist file to {}: {}",
            path.display(),
            e.error
        ))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::testing::FakeIngestClient;
    use tempfile::TempDir;

    const SUCCESS_BODY: &str = "\"sf__Id\",\"sf__Created\",Name,Industry\n\
                                \"001xx0000001\",\"true\",Acme,Energy\n\
                                \"001xx0000002\",\"true\",\"Globex, Inc\",Retail\n";

    const FAILED_BODY: &str = "\"sf__Id\",\"sf__Error\",Name\n\
                               \"\",\"REQUIRED_FIELD_MISSING:Required fields are missing: [Name]:Name --\",\"\"\n";

    #[test]
    fn results_path_appends_partition_suffix() {
        assert_eq!(
            results_path(Path::new("/tmp/accounts.csv"), ResultKind::Successful),
            PathBuf::from("/tmp/accounts.csv.successfulResults")
        );
        assert_eq!(
            results_path(Path::new("accounts.csv"), ResultKind::Failed),
            PathBuf::from("accounts.csv.failedResults")
        );
    }

    #[test]
    fn parses_successful_rows_in_column_order() {
        let records = parse_results(SUCCESS_BODY, ResultKind::Successful).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sf_id(), Some("001xx0000001"));
        assert_eq!(records[0].sf_created(), Some(true));
        assert_eq!(records[1].get("Name"), Some("Globex, Inc"));

        let columns: Vec<&str> = records[0].fields().keys().map(String::as_str).collect();
        assert_eq!(columns, ["sf__Id", "sf__Created", "Name", "Industry"]);
    }

    #[test]
    fn parses_failed_rows() {
        let records = parse_results(FAILED_BODY, ResultKind::Failed).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sf_id(), Some(""));
        assert!(records[0]
            .sf_error()
            .unwrap()
            .starts_with("REQUIRED_FIELD_MISSING"));
    }

    #[test]
    fn empty_body_has_no_records() {
        assert!(parse_results("", ResultKind::Successful).unwrap().is_empty());
        assert!(parse_results("\u{feff}", ResultKind::Failed).unwrap().is_empty());
    }

    #[test]
    fn header_only_body_has_no_records() {
        let records = parse_results("\"sf__Id\",\"sf__Error\",Name\n", ResultKind::Failed).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn leading_bom_is_ignored() {
        let body = format!("\u{feff}{}", SUCCESS_BODY);
        let records = parse_results(&body, ResultKind::Successful).unwrap();
        assert_eq!(records[0].sf_id(), Some("001xx0000001"));
    }

    #[test]
    fn missing_marker_column_is_malformed() {
        let result = parse_results("Id,Name\n1,Acme\n", ResultKind::Successful);
        assert!(matches!(result, Err(AppError::CsvInvalid(_))));

        // A successful header is not a valid failed header.
        let result = parse_results(SUCCESS_BODY, ResultKind::Failed);
        assert!(matches!(result, Err(AppError::CsvInvalid(msg)) if msg.contains("sf__Error")));
    }

    #[test]
    fn ragged_row_is_malformed() {
        let body = "sf__Id,sf__Created,Name\n001,true\n";
        assert!(matches!(
            parse_results(body, ResultKind::Successful),
            Err(AppError::CsvInvalid(_))
        ));
    }

    #[tokio::test]
    async fn fetch_writes_raw_body_before_parsing() {
        let dir = TempDir::new().unwrap();
        let data_source = dir.path().join("accounts.csv");
        let client = FakeIngestClient::new()
            .with_results(ResultKind::Successful, "sf__Id,Name\n001,Acme\n");

        let result = fetch_partition(&client, "750xx", ResultKind::Successful, &data_source).await;

        assert!(matches!(result, Err(AppError::CsvInvalid(_))));
        let saved = std::fs::read_to_string(dir.path().join("accounts.csv.successfulResults"))
            .expect("raw body should be on disk");
        assert_eq!(saved, "sf__Id,Name\n001,Acme\n");
    }

    #[tokio::test]
    async fn fetch_replaces_previous_results_file() {
        let dir = TempDir::new().unwrap();
        let data_source = dir.path().join("accounts.csv");
        let target = results_path(&data_source, ResultKind::Failed);
        std::fs::write(&target, "stale").unwrap();

        let client = FakeIngestClient::new().with_results(ResultKind::Failed, FAILED_BODY);
        let records = fetch_partition(&client, "750xx", ResultKind::Failed, &data_source)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), FAILED_BODY);
    }

    #[tokio::test]
    async fn fetch_propagates_download_errors_without_writing() {
        let dir = TempDir::new().unwrap();
        let data_source = dir.path().join("accounts.csv");
        let client = FakeIngestClient::new().fail_results_with(AppError::NotFound(
            "Bulk ingest job not found".to_string(),
        ));

        let result = fetch_partition(&client, "750xx", ResultKind::Successful, &data_source).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(!results_path(&data_source, ResultKind::Successful).exists());
    }
}
