//! Runtime configuration for Imprint operations

use crate::error::{Error, Result};
use imprint_platform::PlatformPolicy;
use std::time::Duration;

/// Default chunk size for stream reads and coalesced writes (64 KiB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Default number of retries for a transient device error
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Delay unit for retries; attempt `n` waits `n` times this long
pub const RETRY_BASE_TIMEOUT: Duration = Duration::from_millis(100);

/// Interval between two progress events
pub const PROGRESS_EMISSION_INTERVAL: Duration = Duration::from_millis(333);

/// Block size assumed when a device does not report one
pub const DEFAULT_BLOCK_SIZE: u64 = 512;

/// Delay before unmounting a device after a successful close
pub const UNMOUNT_ON_SUCCESS_TIMEOUT: Duration = Duration::from_millis(2000);

/// Main configuration struct
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Requested chunk size for streams, rounded down to the block size
    pub chunk_size: usize,

    /// Retries for a transient error before the device counts as unplugged
    pub max_retries: u32,

    /// Linear backoff unit between retries
    pub retry_base_timeout: Duration,

    /// Interval between progress events
    pub progress_interval: Duration,

    /// Platform capabilities resolved at startup
    pub platform: PlatformPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_timeout: RETRY_BASE_TIMEOUT,
            progress_interval: PROGRESS_EMISSION_INTERVAL,
            platform: PlatformPolicy::current(),
        }
    }
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set max retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set retry backoff unit
    pub fn retry_base_timeout(mut self, timeout: Duration) -> Self {
        self.retry_base_timeout = timeout;
        self
    }

    /// Set progress interval
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set platform policy
    pub fn platform(mut self, platform: PlatformPolicy) -> Self {
        self.platform = platform;
        self
    }

    /// Reject values no stream can work with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be non-zero".to_string()));
        }
        if self.progress_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "progress interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
