//! Linux platform implementation
//!
//! Opens device nodes with `O_SYNC`, queries geometry through block ioctls
//! and unmounts through `umount`.

use crate::unix::{file_length, open_node};
use crate::{PlatformError, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::Command;

/// Open a device node for raw I/O
pub(crate) fn open_device(path: &str, write: bool) -> Result<File> {
    if !Path::new(path).exists() {
        return Err(PlatformError::DeviceNotFound(path.to_string()));
    }
    open_node(path, write, "Try unmounting first.")
}

/// Get device size using ioctl, falling back to the file length
pub(crate) fn device_size(file: &File, path: &str) -> Result<u64> {
    let fd = file.as_raw_fd();

    // libc::Ioctl is c_ulong on glibc and c_int on musl
    const BLKGETSIZE64: libc::Ioctl = 0x80081272u32 as libc::Ioctl;

    let mut size: u64 = 0;
    // SAFETY: BLKGETSIZE64 stores a u64 through the pointer, fd is owned by `file`.
    #[allow(unsafe_code)]
    let result = unsafe { libc::ioctl(fd, BLKGETSIZE64, &mut size) };

    if result == 0 && size > 0 {
        return Ok(size);
    }

    // Regular files report their length
    file_length(file, path)
}

/// Get device logical sector size
pub(crate) fn device_block_size(path: &str) -> Result<u32> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(PlatformError::Io)?;

    let fd = file.as_raw_fd();

    const BLKSSZGET: libc::Ioctl = 0x1268u32 as libc::Ioctl;

    let mut block_size: i32 = 0;
    // SAFETY: BLKSSZGET stores an int through the pointer, fd is owned by `file`.
    #[allow(unsafe_code)]
    let result = unsafe { libc::ioctl(fd, BLKSSZGET, &mut block_size) };

    if result == 0 && block_size > 0 {
        return Ok(block_size as u32);
    }

    Ok(512)
}

/// Mount points in `/proc/mounts` content that belong to `device_path`
pub(crate) fn mounts_for_device<'a>(mounts: &'a str, device_path: &str) -> Vec<&'a str> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let mount_device = parts.next()?;
            let mount_point = parts.next()?;
            mount_device
                .strip_prefix(device_path)
                // /dev/sdb must not match /dev/sdba1 style names of another disk
                .filter(|rest| {
                    rest.is_empty()
                        || rest.starts_with(|c: char| c.is_ascii_digit())
                        || rest.starts_with('p')
                })
                .map(|_| mount_point)
        })
        .collect()
}

/// Unmount all filesystems on a device
pub(crate) fn unmount_device(device_path: &str) -> Result<()> {
    let mounts = std::fs::read_to_string("/proc/mounts")
        .map_err(|e| PlatformError::UnmountFailed(format!("Cannot read /proc/mounts: {}", e)))?;

    let mount_points = mounts_for_device(&mounts, device_path);

    for mount_point in &mount_points {
        tracing::debug!("Unmounting {} from {}", device_path, mount_point);

        let status = Command::new("umount").arg(mount_point).status();

        match status {
            Ok(s) if s.success() => {}
            Ok(s) => {
                return Err(PlatformError::UnmountFailed(format!(
                    "Failed to unmount {}: exit code {:?}",
                    mount_point,
                    s.code()
                )));
            }
            Err(e) => {
                return Err(PlatformError::UnmountFailed(format!(
                    "Failed to run umount: {}",
                    e
                )));
            }
        }
    }

    if !mount_points.is_empty() {
        // Give the kernel time to process
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    Ok(())
}

/// Linux does not auto-mount a half-written table, nothing to wipe
pub(crate) fn wipe_partition_table(_device_path: &str) -> Result<()> {
    Ok(())
}

// ============================================================================
// UNIT TESTS
// ============================================================================
