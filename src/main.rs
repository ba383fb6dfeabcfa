use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sf_bulk_loader::salesforce::client::SalesforceClient;
use sf_bulk_loader::salesforce::{ColumnDelimiter, LineEnding, LoggingMode};
use sf_bulk_loader::{
    bulk2_insert_many, AppError, BulkIngestV2Client, BulkOperation, IntervalOptions,
    JobCreateRequest, LoadScheduler, LoaderConfig,
};

/// Insert CSV files into a Salesforce object with Bulk API 2.0.
///
/// Connection settings come from the environment (or a `.env` file):
/// `SF_INSTANCE_URL`, `SF_ACCESS_TOKEN`, and optionally `SF_API_VERSION`.
#[derive(Debug, Parser)]
#[command(name = "sf-bulk-insert", version)]
struct Cli {
    /// Target object API name, e.g. Account
    #[arg(short, long)]
    object: String,

    /// CSV files to load; each gets its own ingest job
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// API version for job creation (overrides SF_API_VERSION)
    #[arg(long)]
    api_version: Option<String>,

    #[arg(long, value_enum)]
    delimiter: Option<DelimiterArg>,

    #[arg(long, value_enum)]
    line_ending: Option<LineEndingArg>,

    /// Seconds before the first status poll
    #[arg(long, allow_negative_numbers = true)]
    poll_initial: Option<f64>,

    /// Seconds added to the poll interval after each poll
    #[arg(long, allow_negative_numbers = true)]
    poll_increment: Option<f64>,

    /// Upper bound on the poll interval, in seconds
    #[arg(long, allow_negative_numbers = true)]
    poll_max: Option<f64>,

    /// Seconds to keep polling before giving up
    #[arg(long, allow_negative_numbers = true)]
    poll_timeout: Option<f64>,

    /// Loads allowed to run at once (overrides BULK_MAX_CONCURRENT_JOBS)
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Include query strings (sensitive values masked) in request logs
    #[arg(long)]
    log_query: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DelimiterArg {
    Backquote,
    Caret,
    Comma,
    Pipe,
    Semicolon,
    Tab,
}

impl From<DelimiterArg> for ColumnDelimiter {
    fn from(arg: DelimiterArg) -> Self {
        match arg {
            DelimiterArg::Backquote => ColumnDelimiter::Backquote,
            DelimiterArg::Caret => ColumnDelimiter::Caret,
            DelimiterArg::Comma => ColumnDelimiter::Comma,
            DelimiterArg::Pipe => ColumnDelimiter::Pipe,
            DelimiterArg::Semicolon => ColumnDelimiter::Semicolon,
            DelimiterArg::Tab => ColumnDelimiter::Tab,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LineEndingArg {
    Lf,
    Crlf,
}

impl From<LineEndingArg> for LineEnding {
    fn from(arg: LineEndingArg) -> Self {
        match arg {
            LineEndingArg::Lf => LineEnding::LF,
            LineEndingArg::Crlf => LineEnding::CRLF,
        }
    }
}

impl Cli {
    fn interval_options(&self, base: IntervalOptions) -> IntervalOptions {
        IntervalOptions {
            initial: self.poll_initial.unwrap_or(base.initial),
            increment_by: self.poll_increment.unwrap_or(base.increment_by),
            maximum: self.poll_max.unwrap_or(base.maximum),
            timeout: self.poll_timeout.unwrap_or(base.timeout),
        }
    }

    fn logging_mode(&self) -> LoggingMode {
        if self.log_query {
            LoggingMode::PathAndQueryRedacted
        } else {
            LoggingMode::PathOnly
        }
    }

    fn job_request(&self) -> JobCreateRequest {
        let mut request = JobCreateRequest::new(self.object.clone(), BulkOperation::Insert);
        request.column_delimiter = self.delimiter.map(Into::into);
        request.line_ending = self.line_ending.map(Into::into);
        request
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sf_bulk_loader=info,sf_bulk_insert=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            println!("{}", json!({ "error": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}

/// Runs every load and prints one JSON line per file. Returns whether all
/// loads succeeded.
async fn run(cli: Cli) -> Result<bool, AppError> {
    // --- Configuration ---
    let config = LoaderConfig::from_env()?;
    tracing::info!(
        instance = %config.instance_url,
        api_version = %config.api_version,
        "Loaded loader configuration"
    );

    let client = BulkIngestV2Client::new(
        SalesforceClient::new(config.credentials(), config.http_timeout())?
            .with_logging_mode(cli.logging_mode()),
    );
    let scheduler = LoadScheduler::new(cli.max_concurrent.unwrap_or(config.max_concurrent_jobs));
    let options = cli.interval_options(config.poll);
    let request = cli.job_request();

    // --- Cancellation ---
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping at the next status poll");
            on_signal.cancel();
        }
    });

    let results = bulk2_insert_many(
        &client,
        &request,
        cli.files.clone(),
        Some(options),
        cli.api_version.as_deref(),
        &scheduler,
        Some(cancel),
    )
    .await;

    let mut all_ok = true;
    for (file, result) in cli.files.iter().zip(results) {
        let file = file.display().to_string();
        let line = match result {
            Ok(status) => json!({ "dataSource": file, "status": status }),
            Err(err) => {
                all_ok = false;
                json!({ "dataSource": file, "error": err })
            }
        };
        println!("{}", line);
    }

    Ok(all_ok)
}
