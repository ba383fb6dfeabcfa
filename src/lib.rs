//! Salesforce Bulk API 2.0 insert loader.
//!
//! Loads a CSV file into a Salesforce object through a single ingest job,
//! watches the job with adaptive polling, and returns the per-record
//! results alongside copies saved next to the source file.

pub mod config;
pub mod error;
pub mod ingest;
pub mod salesforce;

pub use config::LoaderConfig;
pub use error::{AppError, BulkError, BulkStage};
pub use ingest::{
    bulk2_insert, bulk2_insert_many, IngestClientOps, IntervalOptions, OperationStatus,
    ResultRecord,
};
pub use salesforce::{BulkIngestV2Client, BulkOperation, JobCreateRequest, LoadScheduler};
