//! # Imprint Platform
//!
//! Platform-specific helpers for raw device I/O and the system operations
//! that surround a flash: unmounting, partition table wiping and device
//! geometry queries.
//!
//! The [`PlatformPolicy`] is resolved once at startup and handed to the
//! components that behave differently per platform (transient error
//! classification, aligned I/O, header deferral) instead of being looked up
//! from ambient state.
//!
//! ## Safety
//!
//! This crate performs raw device I/O which can destroy data. Device paths
//! must come from a trusted drive scanner.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fs::File;
use thiserror::Error;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device access denied (need elevated privileges)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Device is busy or locked
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to unmount device
    #[error("Unmount failed: {0}")]
    UnmountFailed(String),

    /// Failed to wipe the partition table of a device
    #[error("Couldn't clean the drive: {0}")]
    CleanFailed(String),

    /// Operation not supported on this platform
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Command execution failed
    #[error("Command failed: {0}")]
    CommandFailed(String),
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

// ============================================================================
// Platform policy
// ============================================================================

/// Bytes kept back from the start of a device on Windows until the rest of
/// the image has been written, so Explorer does not mount a half-written
/// partition table.
pub const WIN32_FIRST_BYTES_TO_KEEP: u64 = 64 * 1024;

/// Operating system family the policy was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    /// Linux
    Linux,
    /// macOS
    MacOS,
    /// Windows
    Windows,
    /// Anything else; nothing is treated as transient
    Other,
}

impl PlatformKind {
    /// The platform this binary was compiled for
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            PlatformKind::Linux
        } else if cfg!(target_os = "macos") {
            PlatformKind::MacOS
        } else if cfg!(target_os = "windows") {
            PlatformKind::Windows
        } else {
            PlatformKind::Other
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformKind::Linux => write!(f, "linux"),
            PlatformKind::MacOS => write!(f, "macos"),
            PlatformKind::Windows => write!(f, "windows"),
            PlatformKind::Other => write!(f, "other"),
        }
    }
}

// errno values are identical on Linux and macOS for these
const EIO: i32 = 5;
const ENXIO: i32 = 6;
const EBUSY: i32 = 16;
// Win32 error codes
const ERROR_FILE_NOT_FOUND: i32 = 2;
const ERROR_GEN_FAILURE: i32 = 31;

/// Platform capabilities that drive error classification and device I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformPolicy {
    /// Platform family
    pub kind: PlatformKind,

    /// Raw device reads and writes must be sector aligned
    pub aligned_io: bool,

    /// Default number of leading bytes a block device write defers
    pub first_bytes_to_keep: u64,
}

impl PlatformPolicy {
    /// Policy for the running platform
    pub fn current() -> Self {
        Self::for_kind(PlatformKind::current())
    }

    /// Policy for a given platform family
    pub fn for_kind(kind: PlatformKind) -> Self {
        match kind {
            PlatformKind::Windows => Self {
                kind,
                aligned_io: true,
                first_bytes_to_keep: WIN32_FIRST_BYTES_TO_KEEP,
            },
            PlatformKind::MacOS => Self {
                kind,
                aligned_io: true,
                first_bytes_to_keep: 0,
            },
            PlatformKind::Linux | PlatformKind::Other => Self {
                kind,
                aligned_io: false,
                first_bytes_to_keep: 0,
            },
        }
    }

    /// OS error codes considered a temporary device hiccup
    pub fn transient_codes(&self) -> &'static [i32] {
        match self.kind {
            PlatformKind::Linux => &[EIO, EBUSY],
            PlatformKind::MacOS => &[ENXIO, EBUSY],
            PlatformKind::Windows => &[ERROR_FILE_NOT_FOUND, ERROR_GEN_FAILURE],
            PlatformKind::Other => &[],
        }
    }

    /// Whether an I/O error is worth retrying on this platform
    pub fn is_transient(&self, error: &std::io::Error) -> bool {
        error
            .raw_os_error()
            .is_some_and(|code| self.transient_codes().contains(&code))
    }
}

impl Default for PlatformPolicy {
    fn default() -> Self {
        Self::current()
    }
}

// ============================================================================
// Alignment helpers
// ============================================================================

/// Align a value up to the next multiple of `alignment`
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Align a value down to the previous multiple of `alignment`
#[inline]
pub fn align_down(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    (value / alignment) * alignment
}

/// Check if a value is a multiple of `alignment`
// Note: Using manual check instead of `is_multiple_of()` for nightly sanitizer compatibility
#[allow(clippy::manual_is_multiple_of)]
#[inline]
pub fn is_aligned(value: u64, alignment: u64) -> bool {
    if alignment == 0 {
        return true;
    }
    value % alignment == 0
}

// ============================================================================
// Positioned I/O
// ============================================================================

/// Read into `buffer` at an absolute `offset` without moving a shared cursor
pub fn read_at(file: &File, buffer: &mut [u8], offset: u64) -> std::io::Result<usize> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_at(buffer, offset)
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        file.seek_read(buffer, offset)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (file, buffer, offset);
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "positioned reads are not supported on this platform",
        ))
    }
}

/// Write `buffer` at an absolute `offset` without moving a shared cursor
pub fn write_at(file: &File, buffer: &[u8], offset: u64) -> std::io::Result<usize> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.write_at(buffer, offset)
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        file.seek_write(buffer, offset)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (file, buffer, offset);
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "positioned writes are not supported on this platform",
        ))
    }
}

#[cfg(unix)]
mod unix;

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        use linux as imp;
    } else if #[cfg(target_os = "macos")] {
        mod macos;
        use macos as imp;
    } else if #[cfg(target_os = "windows")] {
        mod windows;
        use windows as imp;
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))] {
        /// Open a raw device node, for writing when `write` is set
        pub fn open_device(path: &str, write: bool) -> Result<File> {
            imp::open_device(path, write)
        }

        /// Size of an opened device in bytes
        pub fn device_size(file: &File, path: &str) -> Result<u64> {
            imp::device_size(file, path)
        }

        /// Logical sector size reported for a device, 512 when unknown
        pub fn device_block_size(path: &str) -> Result<u32> {
            imp::device_block_size(path)
        }

        /// Unmount all filesystems on a device
        pub fn unmount_device(path: &str) -> Result<()> {
            imp::unmount_device(path)
        }

        /// Remove the partition table of a device before writing to it
        ///
        /// Only Windows needs this; elsewhere it is a no-op.
        pub fn wipe_partition_table(path: &str) -> Result<()> {
            imp::wipe_partition_table(path)
        }
    } else {
        /// Open a device (unsupported platform)
        pub fn open_device(_path: &str, _write: bool) -> Result<File> {
            Err(PlatformError::NotSupported("Platform not supported".to_string()))
        }

        /// Device size (unsupported platform)
        pub fn device_size(_file: &File, _path: &str) -> Result<u64> {
            Err(PlatformError::NotSupported("Platform not supported".to_string()))
        }

        /// Block size (unsupported platform)
        pub fn device_block_size(_path: &str) -> Result<u32> {
            Ok(512)
        }

        /// Unmount a device (unsupported platform)
        pub fn unmount_device(_path: &str) -> Result<()> {
            Err(PlatformError::NotSupported("Platform not supported".to_string()))
        }

        /// Wipe a partition table (unsupported platform)
        pub fn wipe_partition_table(_path: &str) -> Result<()> {
            Ok(())
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
