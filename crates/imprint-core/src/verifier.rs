//! Post-write verification
//!
//! Two algorithms, picked by what the caller knows about the expected data:
//! - a single [`Checksummer`] digest of the first `size` bytes (dense)
//! - a [`BlockMap`] whose ranges carry their own digests (sparse)
//!
//! ## Example
//!
//! ```no_run
//! use imprint_core::{Config, File, OpenMode, SourceDestination};
//! use imprint_core::verifier::{ExpectedContent, Verifier};
//!
//! let config = Config::default();
//! let mut target = File::new("/dev/sdb", OpenMode::Read);
//! target.open()?;
//!
//! let expected = ExpectedContent::Checksum {
//!     checksum: "9f1c0d6b2a3e4f50".to_string(),
//!     size: 4 * 1024 * 1024,
//! };
//! Verifier::new(&mut target, expected, &config)
//!     .on_progress(|p| println!("{} bytes/s", p.speed))
//!     .run()?;
//! # Ok::<(), imprint_core::Error>(())
//! ```

use std::sync::Arc;

use crate::blockmap::{BlockMap, BlockMapFilter, BlockMapReader};
use crate::checksum::Checksummer;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::{Progress, ProgressCallback, WithProgress};
use crate::source_destination::SourceDestination;
use crate::stream::ReadStream;

/// What the verified data should look like
#[derive(Debug, Clone)]
pub enum ExpectedContent {
    /// Digest of the first `size` bytes
    Checksum {
        /// Hex digest produced by [`Checksummer`]
        checksum: String,
        /// Number of bytes covered by the digest
        size: u64,
    },
    /// Per-range digests of the mapped blocks
    BlockMap(BlockMap),
}

/// Checks a source against its expected content
///
/// `run` consumes the verifier so a run has exactly one outcome.
pub struct Verifier<'a> {
    source: &'a mut dyn SourceDestination,
    expected: ExpectedContent,
    config: Config,
    on_progress: Option<ProgressCallback>,
}

impl<'a> Verifier<'a> {
    /// Create a verifier for `source`
    pub fn new(
        source: &'a mut dyn SourceDestination,
        expected: ExpectedContent,
        config: &Config,
    ) -> Self {
        Self {
            source,
            expected,
            config: config.clone(),
            on_progress: None,
        }
    }

    /// Report progress while verifying
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Report progress through an existing callback
    pub fn with_progress_callback(mut self, callback: Option<ProgressCallback>) -> Self {
        self.on_progress = callback;
        self
    }

    /// Whether this run checks blockmap ranges
    pub fn is_sparse(&self) -> bool {
        matches!(self.expected, ExpectedContent::BlockMap(_))
    }

    /// Verify and return the number of bytes checked
    pub fn run(self) -> Result<u64> {
        let Self {
            source,
            expected,
            config,
            on_progress,
        } = self;

        let result = match &expected {
            ExpectedContent::Checksum { checksum, size } => {
                verify_dense(source, checksum, *size, &config, on_progress)
            }
            ExpectedContent::BlockMap(map) => verify_sparse(source, map, &config, on_progress),
        };

        match &result {
            Ok(bytes) => tracing::info!("verification succeeded ({} bytes)", bytes),
            Err(e) => tracing::warn!("verification failed: {}", e),
        }
        result
    }
}

/// Pick the verifier matching `expected`
pub fn create_verifier<'a>(
    source: &'a mut dyn SourceDestination,
    expected: ExpectedContent,
    config: &Config,
) -> Verifier<'a> {
    Verifier::new(source, expected, config)
}

/// Pull every buffer of `stream`, with optional progress
fn drain<S, F>(
    stream: S,
    config: &Config,
    on_progress: Option<ProgressCallback>,
    mut consume: F,
) -> Result<u64>
where
    S: ReadStream,
    F: FnMut(&[u8]),
{
    let mut total = 0u64;
    let mut pull = |buffer: Result<Vec<u8>>| -> Result<()> {
        let buffer = buffer?;
        total += buffer.len() as u64;
        consume(&buffer);
        Ok(())
    };

    match on_progress {
        Some(callback) => {
            for buffer in WithProgress::new(stream, config.progress_interval, callback) {
                pull(buffer)?;
            }
        }
        None => {
            for buffer in stream {
                pull(buffer)?;
            }
        }
    }
    Ok(total)
}

fn verify_dense(
    source: &mut dyn SourceDestination,
    expected: &str,
    size: u64,
    config: &Config,
    on_progress: Option<ProgressCallback>,
) -> Result<u64> {
    let mut checksummer = Checksummer::new();
    let verified = if size == 0 {
        0
    } else {
        let stream = source.create_read_stream(0, Some(size - 1), config)?;
        drain(stream, config, on_progress, |buffer| checksummer.update(buffer))?
    };

    let actual = checksummer.hex_digest();
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(verified)
}

fn verify_sparse(
    source: &mut dyn SourceDestination,
    map: &BlockMap,
    config: &Config,
    on_progress: Option<ProgressCallback>,
) -> Result<u64> {
    if source.can_read()? {
        tracing::debug!("verifying {} blockmap ranges with addressed reads", map.ranges.len());
        let reader = BlockMapReader::new(source, map, config)?;
        return drain(reader, config, on_progress, |_| {});
    }

    if source.can_create_read_stream()? {
        tracing::debug!("verifying {} blockmap ranges over a full stream", map.ranges.len());
        let end = map.image_size.checked_sub(1);
        let stream = source.create_read_stream(0, end, config)?;
        let filter = BlockMapFilter::new(stream, map)?;
        return drain(filter, config, on_progress, |_| {});
    }

    Err(Error::not_capable("verify"))
}
