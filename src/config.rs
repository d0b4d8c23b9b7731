//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;
use crate::types::{KernelVersion, PenumbraError, Result};

/// Database settings. Every key is optional in TOML and falls back to its
/// default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Page size of every store file, in bytes.
    pub page_size: usize,
    /// Frames cached per store file.
    pub page_cache_pages: usize,
    /// Degree above which a node switches to relationship groups.
    pub dense_node_threshold: u64,
    /// Ids each transaction takes from a generator at a time.
    pub id_batch_size: usize,
    /// Log segment size that triggers rotation at the next transaction.
    pub log_rotation_threshold_bytes: u64,
    /// Open transactions allowed at once; 0 means unlimited.
    pub max_concurrent_transactions: usize,
    /// Entity lock timeout.
    pub lock_acquisition_timeout_ms: u64,
    /// How long the upgrade step waits for the exclusive upgrade lock.
    pub upgrade_lock_timeout_ms: u64,
    /// Payload bytes per long string or array record.
    pub dynamic_record_data_size: usize,
    /// Largest degree for which traversals buffer relationship groups.
    pub record_buffer_group_limit: usize,
    /// Whether [`Database::close`](crate::db::Database::close) checkpoints.
    pub checkpoint_on_close: bool,
    /// Kernel version byte written by a new store.
    pub initial_kernel_version: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: 8192,
            page_cache_pages: 1024,
            dense_node_threshold: 50,
            id_batch_size: 64,
            log_rotation_threshold_bytes: 256 * 1024,
            max_concurrent_transactions: 0,
            lock_acquisition_timeout_ms: 5000,
            upgrade_lock_timeout_ms: 100,
            dynamic_record_data_size: 120,
            record_buffer_group_limit: 1000,
            checkpoint_on_close: true,
            initial_kernel_version: KernelVersion::LATEST.version(),
        }
    }
}

impl Config {
    /// Parses a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| PenumbraError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() || self.page_size < 512 {
            return Err(PenumbraError::Config(format!(
                "page_size must be a power of two of at least 512, got {}",
                self.page_size
            )));
        }
        if self.page_cache_pages == 0 {
            return Err(PenumbraError::Config("page_cache_pages must be positive".into()));
        }
        if self.dense_node_threshold == 0 {
            return Err(PenumbraError::Config("dense_node_threshold must be positive".into()));
        }
        if self.id_batch_size == 0 {
            return Err(PenumbraError::Config("id_batch_size must be positive".into()));
        }
        if self.dynamic_record_data_size == 0 || self.dynamic_record_data_size > self.page_size / 2 {
            return Err(PenumbraError::Config(format!(
                "dynamic_record_data_size must be between 1 and {}",
                self.page_size / 2
            )));
        }
        KernelVersion::from_version(self.initial_kernel_version)?;
        Ok(())
    }

    /// Page size of every store file.
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Number of pages the cache keeps resident.
    pub fn page_cache_pages(mut self, pages: usize) -> Self {
        self.page_cache_pages = pages;
        self
    }

    /// Degree at which a node switches to relationship groups.
    pub fn dense_node_threshold(mut self, degree: u64) -> Self {
        self.dense_node_threshold = degree;
        self
    }

    /// Ids handed to a transaction per allocation batch.
    pub fn id_batch_size(mut self, size: usize) -> Self {
        self.id_batch_size = size;
        self
    }

    /// Log file size that triggers rotation.
    pub fn log_rotation_threshold_bytes(mut self, bytes: u64) -> Self {
        self.log_rotation_threshold_bytes = bytes;
        self
    }

    /// Upper bound on open transactions.
    pub fn max_concurrent_transactions(mut self, limit: usize) -> Self {
        self.max_concurrent_transactions = limit;
        self
    }

    /// How long a transaction waits for an entity lock.
    pub fn lock_acquisition_timeout_ms(mut self, millis: u64) -> Self {
        self.lock_acquisition_timeout_ms = millis;
        self
    }

    /// How long the upgrader waits for the exclusive upgrade lock.
    pub fn upgrade_lock_timeout_ms(mut self, millis: u64) -> Self {
        self.upgrade_lock_timeout_ms = millis;
        self
    }

    /// Payload size of one dynamic record.
    pub fn dynamic_record_data_size(mut self, bytes: usize) -> Self {
        self.dynamic_record_data_size = bytes;
        self
    }

    /// Largest changed sparse chain that reads group by type.
    pub fn record_buffer_group_limit(mut self, degree: usize) -> Self {
        self.record_buffer_group_limit = degree;
        self
    }

    /// Whether `close` checkpoints.
    pub fn checkpoint_on_close(mut self, enabled: bool) -> Self {
        self.checkpoint_on_close = enabled;
        self
    }

    /// Kernel version a freshly created store starts at.
    pub fn initial_kernel_version(mut self, version: KernelVersion) -> Self {
        self.initial_kernel_version = version.version();
        self
    }

    /// [`Config::lock_acquisition_timeout_ms`] as a duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquisition_timeout_ms)
    }

    /// [`Config::upgrade_lock_timeout_ms`] as a duration.
    pub fn upgrade_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.upgrade_lock_timeout_ms)
    }

    /// Engine options derived from this configuration.
    pub fn engine_options(&self) -> Result<EngineOptions> {
        Ok(EngineOptions {
            dense_node_threshold: self.dense_node_threshold,
            id_batch_size: self.id_batch_size,
            dynamic_record_data_size: self.dynamic_record_data_size,
            record_buffer_group_limit: self.record_buffer_group_limit,
            initial_kernel_version: KernelVersion::from_version(self.initial_kernel_version)?,
        })
    }
}
