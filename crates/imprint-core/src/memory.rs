//! In-memory source and destination

use crate::block_write_stream::BlockWriteStream;
use crate::config::Config;
use crate::error::Result;
use crate::source_destination::{addressed_read_stream, Metadata, SourceDestination};
use crate::sparse_write_stream::SparseWriteStream;
use crate::stream::{ChunkSink, ReadStream, SparseSink};
use std::io;

/// A byte buffer with every capability
///
/// Writes past the end grow the buffer.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    data: Vec<u8>,
    name: Option<String>,
    is_final_image: bool,
}

impl Memory {
    /// Wrap existing bytes
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            name: None,
            is_final_image: false,
        }
    }

    /// Set the name reported in metadata
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark the buffer as a final flashable image
    pub fn final_image(mut self, is_final_image: bool) -> Self {
        self.is_final_image = is_final_image;
        self
    }

    /// Contents
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Unwrap the contents
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl SourceDestination for Memory {
    fn can_read(&self) -> Result<bool> {
        Ok(true)
    }

    fn can_write(&self) -> Result<bool> {
        Ok(true)
    }

    fn can_create_read_stream(&self) -> Result<bool> {
        Ok(true)
    }

    fn can_create_write_stream(&self) -> Result<bool> {
        Ok(true)
    }

    fn can_create_sparse_write_stream(&self) -> Result<bool> {
        Ok(true)
    }

    fn metadata(&mut self) -> Result<Metadata> {
        Ok(Metadata {
            size: Some(self.data.len() as u64),
            name: self.name.clone(),
            is_final_image: self.is_final_image,
        })
    }

    fn read(&mut self, buffer: &mut [u8], position: u64) -> Result<usize> {
        let start = usize::try_from(position)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        let end = start.saturating_add(buffer.len()).min(self.data.len());
        buffer[..end - start].copy_from_slice(&self.data[start..end]);
        Ok(end - start)
    }

    fn write(&mut self, buffer: &[u8], position: u64) -> Result<usize> {
        let span = usize::try_from(position)
            .ok()
            .and_then(|start| Some((start, start.checked_add(buffer.len())?)));
        let Some((start, end)) = span else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write of {} bytes at {} does not fit in memory", buffer.len(), position),
            )
            .into());
        };
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buffer);
        Ok(buffer.len())
    }

    fn create_read_stream(
        &mut self,
        start: u64,
        end: Option<u64>,
        config: &Config,
    ) -> Result<Box<dyn ReadStream + '_>> {
        addressed_read_stream(self, start, end, config)
    }

    fn create_write_stream(&mut self, config: &Config) -> Result<Box<dyn ChunkSink + '_>> {
        Ok(Box::new(BlockWriteStream::new(self, 0, config)?))
    }

    fn create_sparse_write_stream(
        &mut self,
        config: &Config,
    ) -> Result<Box<dyn SparseSink + '_>> {
        Ok(Box::new(SparseWriteStream::new(self, 0, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_to_end;

    #[test]
    fn test_read_within_and_past_end() {
        let mut memory = Memory::new(b"imprint".to_vec());
        let mut buffer = [0u8; 4];

        assert_eq!(memory.read(&mut buffer, 3).unwrap(), 4);
        assert_eq!(&buffer, b"rint");
        assert_eq!(memory.read(&mut buffer, 5).unwrap(), 2);
        assert_eq!(memory.read(&mut buffer, 100).unwrap(), 0);
    }

    #[test]
    fn test_write_grows_buffer() {
        let mut memory = Memory::default();
        memory.write(b"abc", 2).unwrap();
        assert_eq!(memory.as_slice(), b"\0\0abc");
    }

    #[test]
    fn test_write_past_addressable_range_fails() {
        let mut memory = Memory::new(vec![7; 4]);
        let err = memory.write(b"x", u64::MAX).unwrap_err();
        assert!(matches!(err, crate::error::Error::Io(ref e) if e.kind() == io::ErrorKind::InvalidInput));
        assert_eq!(memory.as_slice(), &[7; 4]);
    }

    #[test]
    fn test_metadata() {
        let mut memory = Memory::new(vec![0; 10]).with_name("disk.img").final_image(true);
        let metadata = memory.metadata().unwrap();
        assert_eq!(metadata.size, Some(10));
        assert_eq!(metadata.name.as_deref(), Some("disk.img"));
        assert!(metadata.is_final_image);
    }

    #[test]
    fn test_streams() {
        let config = Config::default();
        let mut memory = Memory::default();
        {
            let mut sink = memory.create_write_stream(&config).unwrap();
            sink.write(vec![1; 1000]).unwrap();
            sink.write(vec![2; 24]).unwrap();
            sink.finish().unwrap();
        }
        let mut stream = memory.create_read_stream(0, None, &config).unwrap();
        let data = read_to_end(&mut stream).unwrap();
        assert_eq!(data.len(), 1024);
        assert_eq!(data[1023], 2);
    }
}
