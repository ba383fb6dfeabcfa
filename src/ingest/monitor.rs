//! Adaptive polling of a closed ingest job.
//!
//! The monitor sleeps, polls, then widens the interval by a fixed step up to
//! a ceiling. It stops when the job reaches a terminal state or when the next
//! sleep would overrun the deadline. Running out of time is not an error; the
//! caller gets whatever status was seen last.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::ingest::IngestClientOps;
use crate::salesforce::client::redact_id;
use crate::salesforce::JobStatus;

/// Pause after the final poll before results are requested.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

// Keeps `Instant` arithmetic in range for absurd inputs (about 136 years).
const MAX_NORMALIZED_SECS: f64 = u32::MAX as f64;

/// Polling intervals in seconds, as supplied by callers.
///
/// Values are normalised before use: negatives are taken as their absolute
/// value and fractions are rounded to the nearest second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalOptions {
    pub initial: f64,
    pub increment_by: f64,
    pub maximum: f64,
    pub timeout: f64,
}

impl Default for IntervalOptions {
    fn default() -> Self {
        Self {
            initial: 5.0,
            increment_by: 5.0,
            maximum: 30.0,
            timeout: 600.0,
        }
    }
}

impl IntervalOptions {
    pub fn schedule(&self) -> PollSchedule {
        PollSchedule {
            initial: normalize_secs(self.initial),
            increment_by: normalize_secs(self.increment_by),
            maximum: normalize_secs(self.maximum),
            timeout: normalize_secs(self.timeout),
        }
    }
}

fn normalize_secs(value: f64) -> Duration {
    if value.is_nan() {
        return Duration::ZERO;
    }
    Duration::from_secs(value.abs().round().min(MAX_NORMALIZED_SECS) as u64)
}

/// Normalised polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub initial: Duration,
    pub increment_by: Duration,
    pub maximum: Duration,
    pub timeout: Duration,
}

impl PollSchedule {
    /// Interval to use after a poll that waited `current`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_add(self.increment_by).min(self.maximum)
    }
}

/// Polls a job until it settles or the schedule runs out.
pub struct JobMonitor<'a, C> {
    client: &'a C,
    schedule: PollSchedule,
    grace_period: Duration,
}

impl<'a, C: IngestClientOps> JobMonitor<'a, C> {
    pub fn new(client: &'a C, options: IntervalOptions) -> Self {
        Self {
            client,
            schedule: options.schedule(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    /// Runs the polling loop for `job_id` and returns the last status seen.
    ///
    /// `cancel` is checked once per iteration, before the sleep. A job that
    /// ends `Failed` or `Aborted` is returned as `Ok`.
    ///
    /// # Errors
    ///
    /// - `AppError::Cancelled` - `cancel` was triggered
    /// - Any error from the status call
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, AppError> {
        let started = Instant::now();
        let deadline = started.checked_add(self.schedule.timeout);
        let mut interval = self.schedule.initial;
        let mut polls = 0u32;

        info!(
            "[BULK-MONITOR] Watching job {} (initial {}s, max {}s, timeout {}s)",
            redact_id(job_id),
            self.schedule.initial.as_secs(),
            self.schedule.maximum.as_secs(),
            self.schedule.timeout.as_secs()
        );

        let status = loop {
            if cancel.is_cancelled() {
                info!(
                    "[BULK-MONITOR] Monitoring of job {} cancelled after {} polls",
                    redact_id(job_id),
                    polls
                );
                return Err(AppError::Cancelled);
            }

            sleep(interval).await;

            let status = self.client.get_job_status(job_id).await?;
            polls += 1;

            debug!(
                "[BULK-MONITOR] Job {} poll {} after {}s: {:?}",
                redact_id(job_id),
                polls,
                interval.as_secs(),
                status.state()
            );

            interval = self.schedule.next_interval(interval);

            let next_poll = Instant::now().checked_add(interval);
            let out_of_time = match (next_poll, deadline) {
                (Some(next), Some(deadline)) => next > deadline,
                (None, _) => true,
                (Some(_), None) => false,
            };
            if out_of_time {
                if status.state().is_active() {
                    warn!(
                        "[BULK-MONITOR] Job {} still {:?} after {}s; giving up on polling",
                        redact_id(job_id),
                        status.state(),
                        started.elapsed().as_secs()
                    );
                }
                break status;
            }

            if status.state().is_terminal() {
                break status;
            }
        };

        info!(
            "[BULK-MONITOR] Job {} settled as {:?} after {} polls",
            redact_id(job_id),
            status.state(),
            polls
        );

        sleep(self.grace_period).await;
        Ok(status)
    }
}
