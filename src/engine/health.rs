use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::types::{PenumbraError, Result};

/// Whether transactions may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Running normally.
    Healthy,
    /// Panicked; needs a restart.
    Unhealthy,
}

/// Point-in-time view of [`DatabaseHealth`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Current status.
    pub status: HealthStatus,
    /// Message of the failure that made the database unhealthy.
    pub cause: Option<String>,
}

impl HealthReport {
    /// True for [`HealthStatus::Healthy`].
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Tracks whether the database may still start transactions.
///
/// A panic is permanent for the lifetime of the instance: the in-memory stores
/// may have diverged from the log and only a restart with recovery heals that.
#[derive(Debug)]
pub struct DatabaseHealth {
    healthy: AtomicBool,
    cause: Mutex<Option<String>>,
}

impl Default for DatabaseHealth {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            cause: Mutex::new(None),
        }
    }
}

impl DatabaseHealth {
    /// Marks the database unhealthy. Only the first cause is kept.
    pub fn panic(&self, cause: &PenumbraError) {
        let mut slot = self.cause.lock();
        if slot.is_none() {
            error!(error = %cause, "database.health_panic");
            *slot = Some(cause.to_string());
        }
        self.healthy.store(false, Ordering::Release);
    }

    /// False after the first panic.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Fails with [`PenumbraError::DatabaseUnhealthy`] after a panic.
    pub fn assert_healthy(&self) -> Result<()> {
        if self.is_healthy() {
            return Ok(());
        }
        let cause = self
            .cause
            .lock()
            .clone()
            .unwrap_or_else(|| "unknown cause".to_owned());
        Err(PenumbraError::DatabaseUnhealthy(cause))
    }

    /// Status plus the recorded cause.
    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: if self.is_healthy() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            cause: self.cause.lock().clone(),
        }
    }
}
