//! macOS platform implementation
//!
//! Uses raw device nodes (/dev/rdiskN), which require sector-aligned I/O,
//! and `diskutil` for unmounting.

use crate::unix::{file_length, open_node};
use crate::{PlatformError, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::Command;

const DKIOCGETBLOCKCOUNT: libc::c_ulong = 0x40086419;
const DKIOCGETBLOCKSIZE: libc::c_ulong = 0x40046418;

/// Convert a block device path to its raw counterpart
///
/// /dev/disk2 -> /dev/rdisk2
/// /dev/disk2s1 -> /dev/rdisk2s1
pub(crate) fn to_raw_device_path(path: &str) -> String {
    if path.starts_with("/dev/disk") {
        path.replacen("/dev/disk", "/dev/rdisk", 1)
    } else {
        path.to_string()
    }
}

/// Open a device for raw I/O, preferring the raw node
pub(crate) fn open_device(path: &str, write: bool) -> Result<File> {
    let raw_path = to_raw_device_path(path);
    let actual_path = if Path::new(&raw_path).exists() {
        raw_path
    } else if Path::new(path).exists() {
        path.to_string()
    } else {
        return Err(PlatformError::DeviceNotFound(path.to_string()));
    };

    let hint = format!("Try running: diskutil unmountDisk {path}");
    open_node(&actual_path, write, &hint)
}

/// Get device size using ioctl, falling back to the file length
pub(crate) fn device_size(file: &File, path: &str) -> Result<u64> {
    let fd = file.as_raw_fd();

    let mut block_count: u64 = 0;
    let mut block_size: u32 = 0;

    // SAFETY: both ioctls write a plain integer into the provided reference
    // and fd stays valid for the lifetime of `file`.
    #[allow(unsafe_code)]
    let (count_result, size_result) = unsafe {
        (
            libc::ioctl(fd, DKIOCGETBLOCKCOUNT, &mut block_count),
            libc::ioctl(fd, DKIOCGETBLOCKSIZE, &mut block_size),
        )
    };

    if count_result == 0 && size_result == 0 && block_count > 0 && block_size > 0 {
        return Ok(block_count * block_size as u64);
    }

    file_length(file, path)
}

/// Get device block size
pub(crate) fn device_block_size(path: &str) -> Result<u32> {
    let file = OpenOptions::new()
        .read(true)
        .open(to_raw_device_path(path))
        .or_else(|_| OpenOptions::new().read(true).open(path))
        .map_err(PlatformError::Io)?;

    let mut block_size: u32 = 0;
    // SAFETY: DKIOCGETBLOCKSIZE writes a u32 into the provided reference.
    #[allow(unsafe_code)]
    let result = unsafe { libc::ioctl(file.as_raw_fd(), DKIOCGETBLOCKSIZE, &mut block_size) };

    if result == 0 && block_size > 0 {
        return Ok(block_size);
    }

    Ok(512)
}

/// Unmount all volumes on a disk using diskutil
pub(crate) fn unmount_device(device_path: &str) -> Result<()> {
    // "disk2" from "/dev/disk2" or "/dev/rdisk2"
    let disk_id = device_path
        .trim_start_matches("/dev/")
        .trim_start_matches('r');

    tracing::debug!("Unmounting disk: {}", disk_id);

    let output = Command::new("diskutil")
        .args(["unmountDisk", "force", &format!("/dev/{}", disk_id)])
        .output()
        .map_err(|e| PlatformError::CommandFailed(format!("Failed to run diskutil: {}", e)))?;

    if output.status.success() {
        std::thread::sleep(std::time::Duration::from_millis(100));
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);

    if stdout.contains("was already unmounted") || stderr.contains("not currently mounted") {
        return Ok(());
    }

    Err(PlatformError::UnmountFailed(format!(
        "diskutil unmountDisk failed: {} {}",
        stdout, stderr
    )))
}

/// macOS has nothing to wipe before writing
pub(crate) fn wipe_partition_table(_device_path: &str) -> Result<()> {
    Ok(())
}
