//! Physical drives as write targets
//!
//! A [`BlockDevice`] wraps a [`Drive`] descriptor produced by a drive
//! scanner. Opening it for writing unmounts its volumes and wipes its
//! partition table first; raw I/O goes through [`AlignedIo`] on platforms
//! that need sector-aligned transfers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::alignment::{AlignedIo, PositionedIo};
use crate::block_write_stream::BlockWriteStream;
use crate::config::{Config, DEFAULT_BLOCK_SIZE, UNMOUNT_ON_SUCCESS_TIMEOUT};
use crate::error::Result;
use crate::source_destination::{addressed_read_stream, Metadata, SourceDestination};
use crate::sparse_write_stream::SparseWriteStream;
use crate::stream::{ChunkSink, ReadStream, SparseSink};
use imprint_platform::{PlatformKind, PlatformPolicy};

/// A drive as reported by a drive scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drive {
    /// Device path (`/dev/sdb`, `\\.\PhysicalDrive1`)
    pub device_path: String,
    /// Raw device node, when it differs from `device_path`
    pub raw: Option<String>,
    /// Size in bytes
    pub size: Option<u64>,
    /// Logical sector size
    pub block_size: u64,
    /// Holds the running system
    pub is_system: bool,
    /// Write protected
    pub is_read_only: bool,
    /// Mounted volumes
    pub mountpoints: Vec<String>,
    /// Vendor and model
    pub description: String,
}

impl Drive {
    /// Descriptor with default geometry for `device_path`
    pub fn new(device_path: impl Into<String>) -> Self {
        let device_path = device_path.into();
        Self {
            description: device_path.clone(),
            device_path,
            raw: None,
            size: None,
            block_size: DEFAULT_BLOCK_SIZE,
            is_system: false,
            is_read_only: false,
            mountpoints: Vec::new(),
        }
    }

    /// Query size and sector size of `device_path` from the system
    pub fn probe(device_path: impl Into<String>) -> Result<Self> {
        let mut drive = Self::new(device_path);
        let handle = imprint_platform::open_device(&drive.device_path, false)?;
        drive.size = Some(imprint_platform::device_size(&handle, &drive.device_path)?);
        drive.block_size = u64::from(imprint_platform::device_block_size(&drive.device_path)?);
        Ok(drive)
    }

    /// Path used for I/O
    pub fn io_path(&self) -> &str {
        self.raw.as_deref().unwrap_or(&self.device_path)
    }
}

/// System operations a block device needs around its I/O
pub trait DeviceControl: Send {
    /// Open the device node
    fn open(&self, path: &str, write: bool) -> Result<std::fs::File>;

    /// Unmount every volume of the device
    fn unmount(&self, path: &str) -> Result<()>;

    /// Remove the partition table so the OS forgets the old volumes
    fn wipe_partition_table(&self, path: &str) -> Result<()>;
}

/// [`DeviceControl`] backed by the running operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDeviceControl;

impl DeviceControl for SystemDeviceControl {
    fn open(&self, path: &str, write: bool) -> Result<std::fs::File> {
        Ok(imprint_platform::open_device(path, write)?)
    }

    fn unmount(&self, path: &str) -> Result<()> {
        Ok(imprint_platform::unmount_device(path)?)
    }

    fn wipe_partition_table(&self, path: &str) -> Result<()> {
        Ok(imprint_platform::wipe_partition_table(path)?)
    }
}

type DeviceHandle = Box<dyn PositionedIo + Send>;

/// A physical drive opened for raw I/O
pub struct BlockDevice {
    drive: Drive,
    write: bool,
    unmount_on_success: bool,
    unmount_delay: Duration,
    policy: PlatformPolicy,
    control: Box<dyn DeviceControl>,
    handle: Option<DeviceHandle>,
}

impl BlockDevice {
    /// Describe a device; nothing is touched until `open`
    pub fn new(drive: Drive, write: bool, unmount_on_success: bool) -> Self {
        Self {
            drive,
            write,
            unmount_on_success,
            unmount_delay: UNMOUNT_ON_SUCCESS_TIMEOUT,
            policy: PlatformPolicy::current(),
            control: Box::new(SystemDeviceControl),
            handle: None,
        }
    }

    /// Use another set of system operations
    pub fn with_control(mut self, control: impl DeviceControl + 'static) -> Self {
        self.control = Box::new(control);
        self
    }

    /// Use another platform policy
    pub fn with_policy(mut self, policy: PlatformPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wait before the post-close unmount
    pub fn unmount_delay(mut self, delay: Duration) -> Self {
        self.unmount_delay = delay;
        self
    }

    /// The wrapped descriptor
    pub fn drive(&self) -> &Drive {
        &self.drive
    }

    /// Whether the device is currently open
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn writable(&self) -> bool {
        self.write && !self.drive.is_read_only
    }

    fn handle_mut(&mut self) -> std::io::Result<&mut DeviceHandle> {
        let path = &self.drive.device_path;
        self.handle.as_mut().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("{} is not open", path),
            )
        })
    }
}

impl std::fmt::Debug for BlockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockDevice")
            .field("drive", &self.drive)
            .field("write", &self.write)
            .field("unmount_on_success", &self.unmount_on_success)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl SourceDestination for BlockDevice {
    fn can_read(&self) -> Result<bool> {
        Ok(true)
    }

    fn can_write(&self) -> Result<bool> {
        Ok(self.writable())
    }

    fn can_create_read_stream(&self) -> Result<bool> {
        Ok(true)
    }

    fn can_create_write_stream(&self) -> Result<bool> {
        Ok(self.writable())
    }

    fn can_create_sparse_write_stream(&self) -> Result<bool> {
        Ok(self.writable())
    }

    fn block_size(&self) -> u64 {
        self.drive.block_size.max(1)
    }

    fn metadata(&mut self) -> Result<Metadata> {
        Ok(Metadata {
            size: self.drive.size,
            name: Some(self.drive.device_path.clone()),
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
        let end = match (end, self.drive.size) {
            (None, Some(size)) if size > 0 => Some(size - 1),
            (end, _) => end,
        };
        addressed_read_stream(self, start, end, config)
    }

    fn create_write_stream(&mut self, config: &Config) -> Result<Box<dyn ChunkSink + '_>> {
        let keep = self.policy.first_bytes_to_keep;
        Ok(Box::new(BlockWriteStream::new(self, keep, config)?))
    }

    fn create_sparse_write_stream(
        &mut self,
        config: &Config,
    ) -> Result<Box<dyn SparseSink + '_>> {
        let keep = self.policy.first_bytes_to_keep;
        Ok(Box::new(SparseWriteStream::new(self, keep, config)?))
    }

    fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let path = self.drive.device_path.clone();
        if self.writable() {
            if self.policy.kind != PlatformKind::Windows {
                tracing::info!("unmounting {}", path);
                self.control.unmount(&path)?;
            }
            self.control.wipe_partition_table(&path)?;
        }

        tracing::debug!("opening {} (write: {})", self.drive.io_path(), self.writable());
        let file = self.control.open(self.drive.io_path(), self.writable())?;
        let handle: DeviceHandle = if self.policy.aligned_io {
            Box::new(AlignedIo::new(file, self.block_size()))
        } else {
            Box::new(file)
        };
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.handle.take().is_none() {
            return Ok(());
        }
        tracing::debug!("closed {}", self.drive.device_path);

        if self.writable() && self.unmount_on_success {
            // The OS remounts freshly written volumes; let it finish first
            std::thread::sleep(self.unmount_delay);
            tracing::info!("unmounting {}", self.drive.device_path);
            if let Err(e) = self.control.unmount(&self.drive.device_path) {
                tracing::warn!("unmount of {} failed: {}", self.drive.device_path, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_to_end;
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;

    /// Opens regular files and records every system call
    #[derive(Clone, Default)]
    struct FakeControl {
        calls: Arc<Mutex<Vec<String>>>,
        fail_unmount: bool,
    }

    impl FakeControl {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DeviceControl for FakeControl {
        fn open(&self, path: &str, write: bool) -> Result<std::fs::File> {
            self.calls.lock().unwrap().push(format!("open {}", write));
            Ok(std::fs::OpenOptions::new()
                .read(true)
                .write(write)
                .open(path)?)
        }

        fn unmount(&self, _path: &str) -> Result<()> {
            self.calls.lock().unwrap().push("unmount".to_string());
            if self.fail_unmount {
                return Err(imprint_platform::PlatformError::UnmountFailed("busy".into()).into());
            }
            Ok(())
        }

        fn wipe_partition_table(&self, _path: &str) -> Result<()> {
            self.calls.lock().unwrap().push("wipe".to_string());
            Ok(())
        }
    }

    fn device_file(len: usize) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(len as u64).unwrap();
        file
    }

    fn drive_for(file: &NamedTempFile, len: usize) -> Drive {
        let mut drive = Drive::new(file.path().to_str().unwrap());
        drive.size = Some(len as u64);
        drive
    }

    #[test]
    fn test_capabilities_follow_read_only_flag() {
        let mut drive = Drive::new("/dev/sdz");
        let device = BlockDevice::new(drive.clone(), true, false);
        assert!(device.can_write().unwrap());
        assert!(device.can_create_sparse_write_stream().unwrap());

        drive.is_read_only = true;
        let device = BlockDevice::new(drive, true, false);
        assert!(!device.can_write().unwrap());
        assert!(!device.can_create_write_stream().unwrap());
        assert!(device.can_read().unwrap());
    }

    #[test]
    fn test_open_for_write_unmounts_then_wipes() {
        let file = device_file(4096);
        let control = FakeControl::default();
        let mut device = BlockDevice::new(drive_for(&file, 4096), true, false)
            .with_control(control.clone())
            .with_policy(PlatformPolicy::for_kind(PlatformKind::Linux));

        device.open().unwrap();
        device.open().unwrap();
        assert_eq!(control.calls(), vec!["unmount", "wipe", "open true"]);
    }

    #[test]
    fn test_open_on_windows_skips_unmount() {
        let file = device_file(4096);
        let control = FakeControl::default();
        let mut device = BlockDevice::new(drive_for(&file, 4096), true, false)
            .with_control(control.clone())
            .with_policy(PlatformPolicy::for_kind(PlatformKind::Windows));

        device.open().unwrap();
        assert_eq!(control.calls(), vec!["wipe", "open true"]);
    }

    #[test]
    fn test_read_only_open_touches_nothing() {
        let file = device_file(4096);
        let control = FakeControl::default();
        let mut device =
            BlockDevice::new(drive_for(&file, 4096), false, true).with_control(control.clone());

        device.open().unwrap();
        device.close().unwrap();
        assert_eq!(control.calls(), vec!["open false"]);
    }

    #[test]
    fn test_close_unmounts_after_delay_and_ignores_failure() {
        let file = device_file(4096);
        let control = FakeControl {
            fail_unmount: true,
            ..FakeControl::default()
        };
        let mut device = BlockDevice::new(drive_for(&file, 4096), true, true)
            .with_control(control.clone())
            .with_policy(PlatformPolicy::for_kind(PlatformKind::Windows))
            .unmount_delay(Duration::from_millis(1));

        device.open().unwrap();
        assert!(device.close().is_ok());
        assert!(device.close().is_ok());
        assert_eq!(control.calls(), vec!["wipe", "open true", "unmount"]);
    }

    #[test]
    fn test_unaligned_io_through_aligned_wrapper() {
        let file = device_file(4096);
        let mut device = BlockDevice::new(drive_for(&file, 4096), true, false)
            .with_control(FakeControl::default())
            .with_policy(PlatformPolicy::for_kind(PlatformKind::MacOS));
        device.open().unwrap();

        assert_eq!(device.write(b"hello", 1000).unwrap(), 5);
        let mut buffer = [0u8; 7];
        assert_eq!(device.read(&mut buffer, 999).unwrap(), 7);
        assert_eq!(&buffer, b"\0hello\0");
        device.close().unwrap();

        let on_disk = std::fs::read(file.path()).unwrap();
        assert_eq!(&on_disk[1000..1005], b"hello");
        assert_eq!(on_disk.len(), 4096);
    }

    #[test]
    fn test_write_stream_defers_windows_header() {
        let len = 256 * 1024;
        let file = device_file(len);
        let mut device = BlockDevice::new(drive_for(&file, len), true, false)
            .with_control(FakeControl::default())
            .with_policy(PlatformPolicy::for_kind(PlatformKind::Windows));
        device.open().unwrap();

        let image: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        let config = Config::default();
        {
            let mut stream = device.create_write_stream(&config).unwrap();
            for piece in image.chunks(10_000) {
                stream.write(piece.to_vec()).unwrap();
            }
            stream.finish().unwrap();
        }

        let mut stream = device.create_read_stream(0, None, &config).unwrap();
        assert_eq!(read_to_end(&mut stream).unwrap(), image);
    }

    #[test]
    fn test_io_before_open_fails() {
        let mut device = BlockDevice::new(Drive::new("/dev/sdz"), false, false);
        assert!(device.read(&mut [0u8; 512], 0).is_err());
    }

    #[test]
    fn test_drive_serializes_camel_case() {
        let json = serde_json::to_value(Drive::new("/dev/sdb")).unwrap();
        assert_eq!(json["devicePath"], "/dev/sdb");
        assert_eq!(json["blockSize"], 512);
        assert_eq!(json["isReadOnly"], false);
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_regular_file() {
        let file = device_file(8192);
        let drive = Drive::probe(file.path().to_str().unwrap()).unwrap();
        assert_eq!(drive.size, Some(8192));
        assert!(drive.block_size > 0);
    }
}
