//! Chunked, retrying sequential reader

use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::StreamCounters;
use crate::retry::RetryPolicy;
use crate::source_destination::SourceDestination;
use crate::stream::{ReadStream, Tracked};

/// Effective chunk size: the requested size rounded down to whole blocks,
/// but never less than one block
pub fn effective_chunk_size(requested: usize, block_size: u64) -> usize {
    let block_size = block_size.max(1) as usize;
    ((requested / block_size) * block_size).max(block_size)
}

/// Reads `[start, end]` of a source in block-aligned chunks
///
/// The stream ends without error when the range is exhausted or when the
/// source returns no data (raw devices of unknown size).
pub struct BlockReadStream<'a> {
    source: &'a mut dyn SourceDestination,
    position: u64,
    end: Option<u64>,
    chunk_size: usize,
    retry: RetryPolicy,
    counters: Arc<StreamCounters>,
    done: bool,
}

impl<'a> BlockReadStream<'a> {
    /// Create a stream over `[start, end]`; `end` is inclusive
    pub fn new(
        source: &'a mut dyn SourceDestination,
        start: u64,
        end: Option<u64>,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        if !source.can_read()? {
            return Err(Error::not_capable("read"));
        }

        let chunk_size = effective_chunk_size(config.chunk_size, source.block_size());
        let counters = StreamCounters::new();
        counters.set_position(start);

        Ok(Self {
            source,
            position: start,
            end,
            chunk_size,
            retry: RetryPolicy::from_config(config),
            counters,
            done: false,
        })
    }

    /// Size of each read
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Next offset to read
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left in the range, `None` when reading to end of data
    fn remaining(&self) -> Option<u64> {
        self.end.map(|end| {
            if self.position > end {
                0
            } else {
                (end - self.position).saturating_add(1)
            }
        })
    }

    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let length = match self.remaining() {
            Some(0) => return Ok(None),
            Some(remaining) => remaining.min(self.chunk_size as u64) as usize,
            None => self.chunk_size,
        };

        let mut buffer = vec![0u8; length];
        let position = self.position;
        let source = &mut *self.source;
        let read = self
            .retry
            .run("read", || source.read(&mut buffer, position))?;

        if read == 0 {
            return Ok(None);
        }

        buffer.truncate(read);
        self.position += read as u64;
        self.counters.add_bytes(read as u64);
        self.counters.set_position(self.position);
        tracing::trace!("read {} bytes at {}", read, position);
        Ok(Some(buffer))
    }
}

impl Tracked for BlockReadStream<'_> {
    fn counters(&self) -> Arc<StreamCounters> {
        Arc::clone(&self.counters)
    }
}

impl Iterator for BlockReadStream<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_chunk() {
            Ok(Some(buffer)) => Some(Ok(buffer)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl ReadStream for BlockReadStream<'_> {}
