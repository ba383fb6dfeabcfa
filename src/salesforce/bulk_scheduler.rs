//! Concurrency control for independent bulk loads.
//!
//! Limits how many ingest jobs run against an org at once so a batch of
//! loads does not exhaust the org's Bulk API allocation. Default maximum is
//! 3 concurrent loads.
//!
//! # Usage
//!
//! ```ignore
//! let scheduler = LoadScheduler::new(3);
//!
//! // Waits if all slots are taken
//! let permit = scheduler.acquire().await?;
//!
//! // Run the load while holding the permit...
//!
//! // Slot is released when the permit is dropped
//! drop(permit);
//! ```

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AppError;

/// Default number of loads allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// LoadScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Limits the number of loads in flight.
///
/// Clones share the same slots.
#[derive(Clone)]
pub struct LoadScheduler {
    sem: Arc<Semaphore>,
    max: usize,
}

impl Default for LoadScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_LOADS)
    }
}

impl LoadScheduler {
    /// Creates a scheduler allowing `max_concurrent` loads at once.
    ///
    /// A limit of 0 is raised to 1.
    pub fn new(max_concurrent: usize) -> Self {
        let max = max_concurrent.max(1);
        Self {
            sem: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Acquires a slot, waiting if all are in use.
    ///
    /// # Errors
    ///
    /// `AppError::Internal` if the scheduler has been shut down.
    pub async fn acquire(&self) -> Result<LoadPermit, AppError> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Load scheduler is shut down".to_string()))?;

        Ok(LoadPermit {
            _permit: permit,
            max: self.max,
            sem: self.sem.clone(),
        })
    }

    /// Stops handing out slots. Pending and future `acquire` calls fail.
    pub fn shutdown(&self) {
        self.sem.close();
    }

    pub fn max_concurrent(&self) -> usize {
        self.max
    }

    /// Number of loads currently holding a slot.
    pub fn active_loads(&self) -> usize {
        self.max - self.sem.available_permits()
    }

    pub fn available_slots(&self) -> usize {
        self.sem.available_permits()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LoadPermit
// ─────────────────────────────────────────────────────────────────────────────

/// A held load slot, released on drop.
pub struct LoadPermit {
    _permit: OwnedSemaphorePermit,
    max: usize,
    sem: Arc<Semaphore>,
}

impl LoadPermit {
    /// Number of loads currently holding a slot, this one included.
    pub fn active_loads(&self) -> usize {
        self.max - self.sem.available_permits()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
