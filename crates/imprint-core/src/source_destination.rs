//! The capability-negotiated resource every flashing operation runs on
//!
//! A [`SourceDestination`] is a byte-addressable resource: an image file,
//! a physical drive, an in-memory buffer or the decoded contents of a
//! container. Callers probe its capabilities (`can_read`, `can_write`, ...)
//! before invoking an operation; every unsupported operation fails with
//! [`Error::NotCapable`] before touching any data.

use serde::Serialize;

use crate::block_read_stream::BlockReadStream;
use crate::config::{Config, DEFAULT_BLOCK_SIZE};
use crate::content::{self, CONTENT_SNIFF_END};
use crate::error::{Error, Result};
use crate::partition::{self, PartitionTable, PARTITION_HEADER_SIZE};
use crate::stream::{read_to_end, ChunkSink, ReadStream, SparseSink};

/// Descriptive metadata of a source or destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Size in bytes, when known
    pub size: Option<u64>,
    /// File or device name, when there is one
    pub name: Option<String>,
    /// The resource is a final flashable image and must not be unwrapped
    pub is_final_image: bool,
}

/// A byte-addressable resource with an open/close lifecycle
///
/// `open` and `close` are idempotent. Capability probes default to `false`
/// and the matching operations default to [`Error::NotCapable`], so an
/// implementation only overrides what it supports.
pub trait SourceDestination: Send {
    /// Supports addressed reads
    fn can_read(&self) -> Result<bool> {
        Ok(false)
    }

    /// Supports addressed writes
    fn can_write(&self) -> Result<bool> {
        Ok(false)
    }

    /// Supports sequential read streams
    fn can_create_read_stream(&self) -> Result<bool> {
        Ok(false)
    }

    /// Supports sequential write streams
    fn can_create_write_stream(&self) -> Result<bool> {
        Ok(false)
    }

    /// Supports sparse write streams
    fn can_create_sparse_write_stream(&self) -> Result<bool> {
        Ok(false)
    }

    /// Alignment granularity in bytes, never zero
    fn block_size(&self) -> u64 {
        DEFAULT_BLOCK_SIZE
    }

    /// Size, name and flags of the resource
    fn metadata(&mut self) -> Result<Metadata> {
        Err(Error::not_capable("metadata"))
    }

    /// Read into `buffer` at `position`; `Ok(0)` means end of data
    fn read(&mut self, _buffer: &mut [u8], _position: u64) -> Result<usize> {
        Err(Error::not_capable("read"))
    }

    /// Write `buffer` at `position`
    fn write(&mut self, _buffer: &[u8], _position: u64) -> Result<usize> {
        Err(Error::not_capable("write"))
    }

    /// Stream `[start, end]` (inclusive, `None` for "until end of data")
    fn create_read_stream(
        &mut self,
        _start: u64,
        _end: Option<u64>,
        _config: &Config,
    ) -> Result<Box<dyn ReadStream + '_>> {
        Err(Error::not_capable("create_read_stream"))
    }

    /// Sequential writer starting at offset 0
    fn create_write_stream(&mut self, _config: &Config) -> Result<Box<dyn ChunkSink + '_>> {
        Err(Error::not_capable("create_write_stream"))
    }

    /// Writer for position-addressed chunks
    fn create_sparse_write_stream(
        &mut self,
        _config: &Config,
    ) -> Result<Box<dyn SparseSink + '_>> {
        Err(Error::not_capable("create_sparse_write_stream"))
    }

    /// Acquire the underlying handle
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the underlying handle
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Content type derived from the resource name
    fn content_type_from_name(&mut self) -> Result<Option<&'static str>> {
        let metadata = self.metadata()?;
        Ok(metadata.name.as_deref().and_then(content::content_type_from_name))
    }

    /// Content type derived from the leading magic bytes
    fn content_type_from_content(&mut self, config: &Config) -> Result<Option<&'static str>> {
        let mut stream = match self.create_read_stream(0, Some(CONTENT_SNIFF_END), config) {
            Ok(stream) => stream,
            Err(Error::NotCapable { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let head = read_to_end(&mut stream)?;
        Ok(content::content_type_from_magic(&head))
    }

    /// Content type by name first, then by content
    fn content_type(&mut self, config: &Config) -> Result<Option<&'static str>> {
        match self.content_type_from_name() {
            Ok(Some(content_type)) => return Ok(Some(content_type)),
            Ok(None) | Err(Error::NotCapable { .. }) => {}
            Err(e) => return Err(e),
        }
        self.content_type_from_content(config)
    }

    /// Partition table found in the first 64 KiB, if any
    fn partition_table(&mut self, config: &Config) -> Result<Option<PartitionTable>> {
        let mut stream = self.create_read_stream(0, Some(PARTITION_HEADER_SIZE - 1), config)?;
        let header = read_to_end(&mut stream)?;
        Ok(partition::detect(&header))
    }
}

impl<T: SourceDestination + ?Sized> SourceDestination for Box<T> {
    fn can_read(&self) -> Result<bool> {
        (**self).can_read()
    }

    fn can_write(&self) -> Result<bool> {
        (**self).can_write()
    }

    fn can_create_read_stream(&self) -> Result<bool> {
        (**self).can_create_read_stream()
    }

    fn can_create_write_stream(&self) -> Result<bool> {
        (**self).can_create_write_stream()
    }

    fn can_create_sparse_write_stream(&self) -> Result<bool> {
        (**self).can_create_sparse_write_stream()
    }

    fn block_size(&self) -> u64 {
        (**self).block_size()
    }

    fn metadata(&mut self) -> Result<Metadata> {
        (**self).metadata()
    }

    fn read(&mut self, buffer: &mut [u8], position: u64) -> Result<usize> {
        (**self).read(buffer, position)
    }

    fn write(&mut self, buffer: &[u8], position: u64) -> Result<usize> {
        (**self).write(buffer, position)
    }

    fn create_read_stream(
        &mut self,
        start: u64,
        end: Option<u64>,
        config: &Config,
    ) -> Result<Box<dyn ReadStream + '_>> {
        (**self).create_read_stream(start, end, config)
    }

    fn create_write_stream(&mut self, config: &Config) -> Result<Box<dyn ChunkSink + '_>> {
        (**self).create_write_stream(config)
    }

    fn create_sparse_write_stream(
        &mut self,
        config: &Config,
    ) -> Result<Box<dyn SparseSink + '_>> {
        (**self).create_sparse_write_stream(config)
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn content_type(&mut self, config: &Config) -> Result<Option<&'static str>> {
        (**self).content_type(config)
    }

    fn partition_table(&mut self, config: &Config) -> Result<Option<PartitionTable>> {
        (**self).partition_table(config)
    }
}

/// Read stream over the addressed `read` of any readable resource
///
/// Implementations with addressed reads use this for `create_read_stream`.
pub fn addressed_read_stream<'a>(
    source: &'a mut dyn SourceDestination,
    start: u64,
    end: Option<u64>,
    config: &Config,
) -> Result<Box<dyn ReadStream + 'a>> {
    Ok(Box::new(BlockReadStream::new(source, start, end, config)?))
}
