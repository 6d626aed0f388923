//! Position-addressed writer for sparse images

use std::sync::Arc;

use crate::block_write_stream::{check_first_bytes_to_keep, force_close, write_with_retry};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::StreamCounters;
use crate::retry::RetryPolicy;
use crate::source_destination::SourceDestination;
use crate::stream::{Chunk, SparseSink, Tracked};

/// Writes chunks at their own positions, holding back the header region
///
/// Chunks are written one by one without coalescing. Chunks (or chunk
/// prefixes) below `first_bytes_to_keep` are kept in arrival order and
/// written when the stream finishes.
pub struct SparseWriteStream<'a> {
    destination: &'a mut dyn SourceDestination,
    first_bytes_to_keep: u64,
    retry: RetryPolicy,
    first_chunks: Vec<Chunk>,
    bytes_written: u64,
    position: u64,
    counters: Arc<StreamCounters>,
    finished: bool,
}

impl<'a> SparseWriteStream<'a> {
    /// Create a writer; `first_bytes_to_keep` must be 0 or a multiple of
    /// the destination block size
    pub fn new(
        destination: &'a mut dyn SourceDestination,
        first_bytes_to_keep: u64,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        check_first_bytes_to_keep(first_bytes_to_keep, destination.block_size())?;
        if !destination.can_write()? {
            return Err(Error::not_capable("write"));
        }

        Ok(Self {
            destination,
            first_bytes_to_keep,
            retry: RetryPolicy::from_config(config),
            first_chunks: Vec::new(),
            bytes_written: 0,
            position: 0,
            counters: StreamCounters::new(),
            finished: false,
        })
    }

    /// Payload bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// End of the last accepted chunk
    pub fn position(&self) -> u64 {
        self.position
    }

    fn account(&mut self, end: u64, count: u64) {
        self.position = end;
        self.bytes_written += count;
        self.counters.add_bytes(count);
        self.counters.set_position(end);
    }

    fn write_now(&mut self, chunk: &Chunk) -> Result<()> {
        tracing::debug!("sparse write {} bytes at {}", chunk.len(), chunk.position);
        write_with_retry(
            &mut *self.destination,
            &self.retry,
            &chunk.buffer,
            chunk.position,
        )?;
        self.account(chunk.end(), chunk.len() as u64);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        // Counters already include these bytes
        for chunk in std::mem::take(&mut self.first_chunks) {
            tracing::debug!("flush {} header bytes at {}", chunk.len(), chunk.position);
            write_with_retry(
                &mut *self.destination,
                &self.retry,
                &chunk.buffer,
                chunk.position,
            )?;
        }
        Ok(())
    }
}

impl Tracked for SparseWriteStream<'_> {
    fn counters(&self) -> Arc<StreamCounters> {
        Arc::clone(&self.counters)
    }
}

impl SparseSink for SparseWriteStream<'_> {
    fn write_chunk(&mut self, mut chunk: Chunk) -> Result<()> {
        if self.finished {
            return Err(Error::StreamFinished);
        }
        if chunk.is_empty() {
            return Ok(());
        }

        if chunk.position >= self.first_bytes_to_keep {
            return self.write_now(&chunk);
        }

        if chunk.end() <= self.first_bytes_to_keep {
            self.account(chunk.end(), chunk.len() as u64);
            self.first_chunks.push(chunk);
            return Ok(());
        }

        let difference = (self.first_bytes_to_keep - chunk.position) as usize;
        let rest = Chunk::new(self.first_bytes_to_keep, chunk.buffer.split_off(difference));
        self.account(self.first_bytes_to_keep, difference as u64);
        self.first_chunks.push(chunk);
        self.write_now(&rest)
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
