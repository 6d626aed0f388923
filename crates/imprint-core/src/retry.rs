//! Retry loop for transient device errors
//!
//! Removable media regularly report short-lived failures (a hub resetting,
//! a card reader re-enumerating). Those errors are retried with a linearly
//! growing delay; when the budget runs out the device is reported as
//! unplugged. Every other error is returned on the first occurrence.

use crate::config::Config;
use crate::error::{Error, Result};
use imprint_platform::PlatformPolicy;
use std::time::Duration;

/// Bounded, sequential retry with linear backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_timeout: Duration,
    platform: PlatformPolicy,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_retries: u32, base_timeout: Duration, platform: PlatformPolicy) -> Self {
        Self {
            max_retries,
            base_timeout,
            platform,
        }
    }

    /// Policy described by a runtime config
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_retries, config.retry_base_timeout, config.platform)
    }

    /// Maximum number of retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_timeout * attempt
    }

    /// Whether an error is worth another attempt
    pub fn is_transient(&self, error: &Error) -> bool {
        match error {
            Error::Io(e) => self.platform.is_transient(e),
            _ => false,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or exhausts
    /// the retry budget
    pub fn run<T, F>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut retries = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(Error::Io(e)) if self.platform.is_transient(&e) => {
                    if retries >= self.max_retries {
                        tracing::warn!("{} failed after {} retries: {}", what, retries, e);
                        return Err(Error::Unplugged { source: e });
                    }
                    retries += 1;
                    let delay = self.delay_for(retries);
                    tracing::warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        what,
                        e,
                        retries,
                        self.max_retries,
                        delay
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
