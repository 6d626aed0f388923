//! Sector-aligned access for raw devices
//!
//! Raw device nodes on Windows and macOS reject (or silently corrupt)
//! transfers that do not start and end on a sector boundary. [`AlignedIo`]
//! expands such requests to the enclosing aligned span, performs a single
//! underlying transfer and copies only the requested bytes. Writes are
//! read-modify-write.

use imprint_platform::{align_down, align_up, is_aligned};
use std::io;

/// Reads and writes at absolute offsets
pub trait PositionedIo {
    /// Read into `buffer` at `offset`, returning the number of bytes read
    fn read_at(&mut self, buffer: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write `buffer` at `offset`, returning the number of bytes written
    fn write_at(&mut self, buffer: &[u8], offset: u64) -> io::Result<usize>;
}

impl PositionedIo for std::fs::File {
    fn read_at(&mut self, buffer: &mut [u8], offset: u64) -> io::Result<usize> {
        imprint_platform::read_at(self, buffer, offset)
    }

    fn write_at(&mut self, buffer: &[u8], offset: u64) -> io::Result<usize> {
        imprint_platform::write_at(self, buffer, offset)
    }
}

/// Wrapper turning arbitrary requests into block-aligned ones
#[derive(Debug)]
pub struct AlignedIo<T> {
    inner: T,
    block_size: u64,
}

impl<T: PositionedIo> AlignedIo<T> {
    /// Wrap `inner`, aligning to `block_size`
    pub fn new(inner: T, block_size: u64) -> Self {
        Self { inner, block_size }
    }

    /// Alignment granularity
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Whether a request can go straight through
    pub fn is_aligned_request(&self, offset: u64, length: usize) -> bool {
        is_aligned(offset, self.block_size) && is_aligned(length as u64, self.block_size)
    }

    /// Enclosing aligned span `[start, end)` of a request
    pub fn aligned_span(&self, offset: u64, length: usize) -> (u64, u64) {
        (
            align_down(offset, self.block_size),
            align_up(offset + length as u64, self.block_size),
        )
    }

    /// Underlying handle
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Underlying handle, mutably
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Unwrap the underlying handle
    pub fn into_inner(self) -> T {
        self.inner
    }

    fn read_span(&mut self, start: u64, end: u64) -> io::Result<(Vec<u8>, usize)> {
        let mut span = vec![0u8; (end - start) as usize];
        let read = self.inner.read_at(&mut span, start)?;
        Ok((span, read))
    }
}

impl<T: PositionedIo> PositionedIo for AlignedIo<T> {
    fn read_at(&mut self, buffer: &mut [u8], offset: u64) -> io::Result<usize> {
        if self.is_aligned_request(offset, buffer.len()) {
            return self.inner.read_at(buffer, offset);
        }

        let (start, end) = self.aligned_span(offset, buffer.len());
        let (span, read) = self.read_span(start, end)?;

        let skip = (offset - start) as usize;
        let available = read.saturating_sub(skip).min(buffer.len());
        buffer[..available].copy_from_slice(&span[skip..skip + available]);
        Ok(available)
    }

    fn write_at(&mut self, buffer: &[u8], offset: u64) -> io::Result<usize> {
        if self.is_aligned_request(offset, buffer.len()) {
            return self.inner.write_at(buffer, offset);
        }

        let (start, end) = self.aligned_span(offset, buffer.len());
        // Bytes past the end of the medium stay zero
        let (mut span, _) = self.read_span(start, end)?;

        let skip = (offset - start) as usize;
        span[skip..skip + buffer.len()].copy_from_slice(buffer);

        let written = self.inner.write_at(&span, start)?;
        if written < span.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!(
                    "short aligned write at {}: {} of {} bytes",
                    start,
                    written,
                    span.len()
                ),
            ));
        }
        Ok(buffer.len())
    }
}
