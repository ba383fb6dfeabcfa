use std::time::Duration;

use secrecy::SecretString;

use crate::error::AppError;
use crate::ingest::IntervalOptions;
use crate::salesforce::bulk_scheduler::DEFAULT_MAX_CONCURRENT_LOADS;
use crate::salesforce::client::DEFAULT_TIMEOUT_SECS;
use crate::salesforce::{OrgCredentials, DEFAULT_API_VERSION};

/// Loader configuration loaded from environment variables.
///
/// Only the org location and token are required; everything else has a
/// default suitable for small interactive loads.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Instance base URL, e.g. `https://mydomain.my.salesforce.com`.
    pub instance_url: String,
    pub access_token: SecretString,
    /// API version used to build `/services/data/v{version}/` (default: `60.0`).
    pub api_version: String,
    /// Per-request HTTP timeout in seconds (default: `300`).
    pub http_timeout_secs: u64,
    /// Job monitoring intervals (defaults: 5 / 5 / 30 / 600 seconds).
    pub poll: IntervalOptions,
    /// Loads allowed to run at once (default: `3`).
    pub max_concurrent_jobs: usize,
}

impl LoaderConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default    |
    /// |----------------------------|------------|
    /// | `SF_INSTANCE_URL`          | (required) |
    /// | `SF_ACCESS_TOKEN`          | (required) |
    /// | `SF_API_VERSION`           | `60.0`     |
    /// | `SF_HTTP_TIMEOUT_SECS`     | `300`      |
    /// | `BULK_POLL_INITIAL_SECS`   | `5`        |
    /// | `BULK_POLL_INCREMENT_SECS` | `5`        |
    /// | `BULK_POLL_MAX_SECS`       | `30`       |
    /// | `BULK_POLL_TIMEOUT_SECS`   | `600`      |
    /// | `BULK_MAX_CONCURRENT_JOBS` | `3`        |
    ///
    /// # Errors
    ///
    /// `AppError::Config` when a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let instance_url = get("SF_INSTANCE_URL")
            .ok_or_else(|| AppError::Config("SF_INSTANCE_URL must be set".into()))?;
        let access_token = get("SF_ACCESS_TOKEN")
            .map(SecretString::from)
            .ok_or_else(|| AppError::Config("SF_ACCESS_TOKEN must be set".into()))?;

        let api_version = get("SF_API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.into());

        let http_timeout_secs: u64 = parse_or(&get, "SF_HTTP_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;

        let defaults = IntervalOptions::default();
        let poll = IntervalOptions {
            initial: parse_or(&get, "BULK_POLL_INITIAL_SECS", defaults.initial)?,
            increment_by: parse_or(&get, "BULK_POLL_INCREMENT_SECS", defaults.increment_by)?,
            maximum: parse_or(&get, "BULK_POLL_MAX_SECS", defaults.maximum)?,
            timeout: parse_or(&get, "BULK_POLL_TIMEOUT_SECS", defaults.timeout)?,
        };

        let max_concurrent_jobs: usize =
            parse_or(&get, "BULK_MAX_CONCURRENT_JOBS", DEFAULT_MAX_CONCURRENT_LOADS)?;
        if max_concurrent_jobs == 0 {
            return Err(AppError::Config(
                "BULK_MAX_CONCURRENT_JOBS must be at least 1".into(),
            ));
        }

        Ok(Self {
            instance_url,
            access_token,
            api_version,
            http_timeout_secs,
            poll,
            max_concurrent_jobs,
        })
    }

    pub fn credentials(&self) -> OrgCredentials {
        OrgCredentials::new(self.instance_url.clone(), self.access_token.clone())
            .with_api_version(self.api_version.clone())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a valid number, got {:?}", key, raw))),
        None => Ok(default),
    }
}
