//! Image files as sources and destinations

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use crate::alignment::PositionedIo;
use crate::block_write_stream::BlockWriteStream;
use crate::config::Config;
use crate::error::Result;
use crate::source_destination::{addressed_read_stream, Metadata, SourceDestination};
use crate::sparse_write_stream::SparseWriteStream;
use crate::stream::{ChunkSink, ReadStream, SparseSink};

/// How a [`File`] is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read only
    Read,
    /// Read and write, creating the file when missing
    ReadWrite,
    /// Read and write an existing device node with synchronous writes
    WriteDevice,
}

impl OpenMode {
    /// Whether files opened this way can be read
    pub fn can_read(self) -> bool {
        true
    }

    /// Whether files opened this way can be written
    pub fn can_write(self) -> bool {
        matches!(self, OpenMode::ReadWrite | OpenMode::WriteDevice)
    }
}

/// A file on disk
#[derive(Debug)]
pub struct File {
    path: PathBuf,
    mode: OpenMode,
    handle: Option<std::fs::File>,
}

impl File {
    /// Describe a file; nothing is opened until [`SourceDestination::open`]
    pub fn new(path: impl Into<PathBuf>, mode: OpenMode) -> Self {
        Self {
            path: path.into(),
            mode,
            handle: None,
        }
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open mode
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Whether the file is currently open
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn handle_mut(&mut self) -> io::Result<&mut std::fs::File> {
        let path = &self.path;
        self.handle.as_mut().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is not open", path.display()),
            )
        })
    }

    fn open_handle(&self) -> Result<std::fs::File> {
        let handle = match self.mode {
            OpenMode::Read => OpenOptions::new().read(true).open(&self.path)?,
            OpenMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?,
            OpenMode::WriteDevice => {
                imprint_platform::open_device(&self.path.to_string_lossy(), true)?
            }
        };
        Ok(handle)
    }
}

impl SourceDestination for File {
    fn can_read(&self) -> Result<bool> {
        Ok(self.mode.can_read())
    }

    fn can_write(&self) -> Result<bool> {
        Ok(self.mode.can_write())
    }

    fn can_create_read_stream(&self) -> Result<bool> {
        Ok(self.mode.can_read())
    }

    fn can_create_write_stream(&self) -> Result<bool> {
        Ok(self.mode.can_write())
    }

    fn can_create_sparse_write_stream(&self) -> Result<bool> {
        Ok(self.mode.can_write())
    }

    fn metadata(&mut self) -> Result<Metadata> {
        let size = match &self.handle {
            Some(handle) => handle.metadata()?.len(),
            None => std::fs::metadata(&self.path)?.len(),
        };
        Ok(Metadata {
            size: Some(size),
            name: self
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            is_final_image: false,
        })
    }

    fn read(&mut self, buffer: &mut [u8], position: u64) -> Result<usize> {
        Ok(self.handle_mut()?.read_at(buffer, position)?)
    }

    fn write(&mut self, buffer: &[u8], position: u64) -> Result<usize> {
        Ok(self.handle_mut()?.write_at(buffer, position)?)
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

    fn open(&mut self) -> Result<()> {
        if self.handle.is_none() {
            tracing::debug!("opening {} ({:?})", self.path.display(), self.mode);
            self.handle = Some(self.open_handle()?);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            tracing::debug!("closing {}", self.path.display());
            if self.mode.can_write() {
                handle.sync_all()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_to_end;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_capabilities_follow_mode() {
        let read = File::new("image.img", OpenMode::Read);
        assert!(read.can_read().unwrap());
        assert!(!read.can_write().unwrap());
        assert!(!read.can_create_sparse_write_stream().unwrap());

        let write = File::new("image.img", OpenMode::ReadWrite);
        assert!(write.can_write().unwrap());
        assert!(write.can_create_write_stream().unwrap());
    }

    #[test]
    fn test_read_requires_open() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = File::new(temp.path(), OpenMode::Read);
        let err = file.read(&mut [0; 4], 0).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[test]
    fn test_open_is_idempotent() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = File::new(temp.path(), OpenMode::Read);
        file.open().unwrap();
        file.open().unwrap();
        assert!(file.is_open());
        file.close().unwrap();
        file.close().unwrap();
        assert!(!file.is_open());
    }

    #[test]
    fn test_metadata_reports_size_and_name() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(&[0u8; 1234]).unwrap();
        temp.flush().unwrap();

        let mut file = File::new(temp.path(), OpenMode::Read);
        let metadata = file.metadata().unwrap();
        assert_eq!(metadata.size, Some(1234));
        assert_eq!(
            metadata.name.as_deref(),
            temp.path().file_name().and_then(|n| n.to_str())
        );
        assert!(!metadata.is_final_image);
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.img");
        let config = Config::default();

        let mut file = File::new(&path, OpenMode::ReadWrite);
        file.open().unwrap();
        {
            let mut sink = file.create_write_stream(&config).unwrap();
            for _ in 0..3 {
                sink.write(vec![0x5A; 50_000]).unwrap();
            }
            sink.finish().unwrap();
        }
        let mut stream = file.create_read_stream(0, None, &config).unwrap();
        let data = read_to_end(&mut stream).unwrap();
        drop(stream);
        file.close().unwrap();

        assert_eq!(data.len(), 150_000);
        assert!(data.iter().all(|b| *b == 0x5A));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = File::new(temp.path(), OpenMode::Read);
        file.open().unwrap();
        assert!(file
            .create_write_stream(&Config::default())
            .err()
            .unwrap()
            .is_not_capable());
    }
}
