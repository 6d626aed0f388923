//! Stream interfaces shared by sources, destinations and decorators

use std::sync::Arc;

use crate::error::Result;
use crate::progress::StreamCounters;

/// A position-addressed buffer for sparse writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Absolute byte offset in the destination
    pub position: u64,
    /// Payload
    pub buffer: Vec<u8>,
}

impl Chunk {
    /// Create a chunk
    pub fn new(position: u64, buffer: Vec<u8>) -> Self {
        Self { position, buffer }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Offset one past the last byte
    pub fn end(&self) -> u64 {
        self.position + self.buffer.len() as u64
    }
}

/// Something whose throughput and position can be sampled
pub trait Tracked {
    /// Shared counters the stream keeps up to date
    fn counters(&self) -> Arc<StreamCounters>;
}

/// A finite sequence of buffers read from a source
pub trait ReadStream: Iterator<Item = Result<Vec<u8>>> + Tracked + Send {}

/// Sequential writer accepting an ordered sequence of buffers
pub trait ChunkSink: Tracked + Send {
    /// Accept the next buffer
    fn write(&mut self, buffer: Vec<u8>) -> Result<()>;

    /// Flush everything still held back
    fn finish(&mut self) -> Result<()>;
}

/// Writer accepting position-addressed chunks in any order
pub trait SparseSink: Tracked + Send {
    /// Accept a chunk
    fn write_chunk(&mut self, chunk: Chunk) -> Result<()>;

    /// Flush everything still held back
    fn finish(&mut self) -> Result<()>;
}

impl<T: Tracked + ?Sized> Tracked for Box<T> {
    fn counters(&self) -> Arc<StreamCounters> {
        (**self).counters()
    }
}

impl<T: ReadStream + ?Sized> ReadStream for Box<T> {}

impl<T: ChunkSink + ?Sized> ChunkSink for Box<T> {
    fn write(&mut self, buffer: Vec<u8>) -> Result<()> {
        (**self).write(buffer)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

impl<T: SparseSink + ?Sized> SparseSink for Box<T> {
    fn write_chunk(&mut self, chunk: Chunk) -> Result<()> {
        (**self).write_chunk(chunk)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Collect a read stream into one buffer
pub fn read_to_end<S: ReadStream + ?Sized>(stream: &mut S) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    for buffer in stream {
        data.extend_from_slice(&buffer?);
    }
    Ok(data)
}
