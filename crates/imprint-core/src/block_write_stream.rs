//! Chunked, retrying, coalescing sequential writer
//!
//! Buffers are coalesced into block-aligned writes of at least the
//! configured chunk size. The first `first_bytes_to_keep` bytes of the
//! image are held back and written last, once everything else is on the
//! device, so an operating system never sees (and mounts) a partition
//! table whose partitions are still being written.

use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::StreamCounters;
use crate::retry::RetryPolicy;
use crate::source_destination::SourceDestination;
use crate::stream::{ChunkSink, Tracked};
use imprint_platform::is_aligned;

/// Write `buffer` at `position`, retrying transient failures
pub(crate) fn write_with_retry(
    destination: &mut dyn SourceDestination,
    retry: &RetryPolicy,
    buffer: &[u8],
    position: u64,
) -> Result<()> {
    retry.run("write", || {
        let written = destination.write(buffer, position)?;
        if written < buffer.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!(
                    "partial write at {}: {} of {} bytes",
                    position,
                    written,
                    buffer.len()
                ),
            )
            .into());
        }
        Ok(())
    })
}

/// Close a destination after a failed flush, keeping the original error
pub(crate) fn force_close(destination: &mut dyn SourceDestination, error: &Error) {
    tracing::warn!("closing destination after failed flush: {}", error);
    if let Err(e) = destination.close() {
        tracing::warn!("close after failed flush also failed: {}", e);
    }
}

/// Validate a header size against a destination block size
pub(crate) fn check_first_bytes_to_keep(first_bytes_to_keep: u64, block_size: u64) -> Result<()> {
    if first_bytes_to_keep != 0 && !is_aligned(first_bytes_to_keep, block_size) {
        return Err(Error::InvalidConfig(format!(
            "first bytes to keep ({}) must be a multiple of the destination block size ({})",
            first_bytes_to_keep, block_size
        )));
    }
    Ok(())
}

/// Sequential writer with coalescing and deferred header
pub struct BlockWriteStream<'a> {
    destination: &'a mut dyn SourceDestination,
    block_size: u64,
    chunk_size: usize,
    first_bytes_to_keep: u64,
    retry: RetryPolicy,
    /// Logical bytes accepted so far; also the next device offset
    bytes_written: u64,
    first_buffers: Vec<Vec<u8>>,
    buffers: Vec<Vec<u8>>,
    buffered: usize,
    counters: Arc<StreamCounters>,
    finished: bool,
}

impl<'a> BlockWriteStream<'a> {
    /// Create a writer; `first_bytes_to_keep` must be 0 or a multiple of
    /// the destination block size
    pub fn new(
        destination: &'a mut dyn SourceDestination,
        first_bytes_to_keep: u64,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        let block_size = destination.block_size();
        check_first_bytes_to_keep(first_bytes_to_keep, block_size)?;
        if !destination.can_write()? {
            return Err(Error::not_capable("write"));
        }

        Ok(Self {
            destination,
            block_size,
            chunk_size: config.chunk_size,
            first_bytes_to_keep,
            retry: RetryPolicy::from_config(config),
            bytes_written: 0,
            first_buffers: Vec::new(),
            buffers: Vec::new(),
            buffered: 0,
            counters: StreamCounters::new(),
            finished: false,
        })
    }

    /// Logical bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn write_at_cursor(&mut self, buffer: &[u8]) -> Result<()> {
        tracing::debug!("write {} bytes at {}", buffer.len(), self.bytes_written);
        write_with_retry(&mut *self.destination, &self.retry, buffer, self.bytes_written)?;
        self.account(buffer.len() as u64);
        Ok(())
    }

    fn account(&mut self, count: u64) {
        self.bytes_written += count;
        self.counters.add_bytes(count);
        self.counters.set_position(self.bytes_written);
    }

    /// Write the largest block-aligned prefix once a chunk has accumulated
    fn write_buffers(&mut self) -> Result<()> {
        if self.buffered < self.chunk_size {
            return Ok(());
        }

        let mut block = self.buffers.concat();
        self.buffers.clear();
        self.buffered = 0;

        let length = (block.len() as u64 / self.block_size * self.block_size) as usize;
        if length != block.len() {
            let remainder = block.split_off(length);
            self.buffered = remainder.len();
            self.buffers.push(remainder);
        }

        if block.is_empty() {
            return Ok(());
        }
        self.write_at_cursor(&block)
    }

    fn push(&mut self, buffer: Vec<u8>) -> Result<()> {
        self.buffered += buffer.len();
        self.buffers.push(buffer);
        self.write_buffers()
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffered > 0 {
            let rest = self.buffers.concat();
            self.buffers.clear();
            self.buffered = 0;
            self.write_at_cursor(&rest)?;
        }

        // Header goes last and was already counted when accepted
        let mut position = 0;
        for buffer in std::mem::take(&mut self.first_buffers) {
            tracing::debug!("flush {} header bytes at {}", buffer.len(), position);
            write_with_retry(&mut *self.destination, &self.retry, &buffer, position)?;
            position += buffer.len() as u64;
        }
        Ok(())
    }
}

impl Tracked for BlockWriteStream<'_> {
    fn counters(&self) -> Arc<StreamCounters> {
        Arc::clone(&self.counters)
    }
}

impl ChunkSink for BlockWriteStream<'_> {
    fn write(&mut self, mut buffer: Vec<u8>) -> Result<()> {
        if self.finished {
            return Err(Error::StreamFinished);
        }
        if buffer.is_empty() {
            return Ok(());
        }

        if self.bytes_written < self.first_bytes_to_keep {
            let room = self.first_bytes_to_keep - self.bytes_written;
            if buffer.len() as u64 <= room {
                self.account(buffer.len() as u64);
                self.first_buffers.push(buffer);
                return Ok(());
            }
            let rest = buffer.split_off(room as usize);
            self.first_buffers.push(buffer);
            self.account(room);
            return self.push(rest);
        }

        if self.buffered == 0
            && buffer.len() >= self.chunk_size
            && is_aligned(buffer.len() as u64, self.block_size)
        {
            return self.write_at_cursor(&buffer);
        }

        self.push(buffer)
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if let Err(e) = self.flush() {
            force_close(&mut *self.destination, &e);
            return Err(e);
        }
        Ok(())
    }
}
