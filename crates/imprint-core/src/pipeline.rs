//! Streaming an image from a source into a destination
//!
//! [`pipe`] moves buffers from a read stream to a write sink with a reader
//! thread and a bounded channel, so a slow destination throttles a fast
//! source. [`write_image`] builds on it: stream, hash on the fly, then
//! optionally verify the destination against that hash.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::checksum::Checksummer;
use crate::config::Config;
use crate::error::Result;
use crate::progress::{ProgressCallback, WithProgress};
use crate::source_destination::SourceDestination;
use crate::stream::{ChunkSink, ReadStream};
use crate::verifier::{ExpectedContent, Verifier};

/// Buffers allowed in flight between reader and writer
pub const HIGH_WATER_MARK: usize = 2;

/// Copy every buffer of `reader` into `sink`, then finish the sink
///
/// Returns the number of bytes copied. A read error stops the reader and is
/// returned without finishing the sink.
pub fn pipe<R, W>(reader: R, sink: &mut W) -> Result<u64>
where
    R: ReadStream,
    W: ChunkSink + ?Sized,
{
    pipe_inspect(reader, sink, |_| {})
}

fn pipe_inspect<R, W, F>(reader: R, sink: &mut W, mut inspect: F) -> Result<u64>
where
    R: ReadStream,
    W: ChunkSink + ?Sized,
    F: FnMut(&[u8]),
{
    let (tx, rx) = mpsc::sync_channel::<Result<Vec<u8>>>(HIGH_WATER_MARK);

    std::thread::scope(|scope| {
        scope.spawn(move || {
            for item in reader {
                let failed = item.is_err();
                // A closed channel means the writer gave up
                if tx.send(item).is_err() || failed {
                    break;
                }
            }
        });

        // Owned here so an early return unblocks the reader before the join
        let rx = rx;
        let mut total = 0u64;
        for item in rx.iter() {
            let buffer = item?;
            inspect(&buffer);
            total += buffer.len() as u64;
            sink.write(buffer)?;
        }
        sink.finish()?;
        Ok(total)
    })
}

/// Options for [`write_image`]
#[derive(Clone, Default)]
pub struct WriteOptions {
    /// Read the destination back and compare it with the source hash
    pub verify: bool,
    /// Progress of the write
    pub on_progress: Option<ProgressCallback>,
    /// Progress of the verification
    pub on_verify_progress: Option<ProgressCallback>,
}

impl WriteOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable verification
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Report write progress
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Report verification progress
    pub fn on_verify_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_verify_progress = Some(callback);
        self
    }
}

/// Result of [`write_image`]
#[derive(Debug, Clone)]
pub struct WriteResult {
    /// Total bytes written
    pub bytes_written: u64,

    /// Time spent writing
    pub elapsed: Duration,

    /// Average speed in bytes per second
    pub average_speed: u64,

    /// Checksum of the source computed while writing
    pub source_checksum: String,

    /// Whether the destination was read back and matched
    pub verified: bool,

    /// Time spent on verification (if performed)
    pub verification_elapsed: Option<Duration>,
}

impl WriteResult {
    /// Format average speed for display
    pub fn speed_display(&self) -> String {
        format_speed(self.average_speed)
    }
}

/// Write all of `source` into `destination`
///
/// Both must already be open. With `options.verify` the written range is
/// read back and a mismatch is returned as an error.
pub fn write_image(
    source: &mut dyn SourceDestination,
    destination: &mut dyn SourceDestination,
    options: &WriteOptions,
    config: &Config,
) -> Result<WriteResult> {
    let start = Instant::now();
    let mut checksummer = Checksummer::new();

    let reader = source.create_read_stream(0, None, config)?;
    let bytes_written = {
        let sink = destination.create_write_stream(config)?;
        match &options.on_progress {
            Some(callback) => {
                let mut sink =
                    WithProgress::new(sink, config.progress_interval, callback.clone());
                pipe_inspect(reader, &mut sink, |buffer| checksummer.update(buffer))?
            }
            None => {
                let mut sink = sink;
                pipe_inspect(reader, &mut sink, |buffer| checksummer.update(buffer))?
            }
        }
    };

    let elapsed = start.elapsed();
    let source_checksum = checksummer.hex_digest();
    tracing::info!(
        "wrote {} bytes in {:.1}s (checksum {})",
        bytes_written,
        elapsed.as_secs_f64(),
        source_checksum
    );

    let mut result = WriteResult {
        bytes_written,
        elapsed,
        average_speed: average_speed(bytes_written, elapsed),
        source_checksum,
        verified: false,
        verification_elapsed: None,
    };

    if options.verify {
        let verify_start = Instant::now();
        let expected = ExpectedContent::Checksum {
            checksum: result.source_checksum.clone(),
            size: bytes_written,
        };
        Verifier::new(destination, expected, config)
            .with_progress_callback(options.on_verify_progress.clone())
            .run()?;
        result.verified = true;
        result.verification_elapsed = Some(verify_start.elapsed());
    }

    Ok(result)
}

fn average_speed(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}

/// Format speed for display
pub fn format_speed(bytes_per_second: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes_per_second >= GB {
        format!("{:.1} GB/s", bytes_per_second as f64 / GB as f64)
    } else if bytes_per_second >= MB {
        format!("{:.1} MB/s", bytes_per_second as f64 / MB as f64)
    } else if bytes_per_second >= KB {
        format!("{:.1} KB/s", bytes_per_second as f64 / KB as f64)
    } else {
        format!("{} B/s", bytes_per_second)
    }
}

/// Format duration for display
pub fn format_duration(seconds: u64) -> String {
    if seconds >= 3600 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds >= 60 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}
