//! Helpers shared by the Unix device backends

use crate::{PlatformError, Result};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;

/// Open a device node, with `O_SYNC` writes when `write` is set
///
/// `busy_hint` is appended to the error when the kernel reports `EBUSY`.
pub(crate) fn open_node(path: &str, write: bool, busy_hint: &str) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(write);
    if write {
        options.custom_flags(libc::O_SYNC);
    }
    options
        .open(path)
        .map_err(|e| classify_open_error(path, busy_hint, e))
}

fn classify_open_error(path: &str, busy_hint: &str, error: std::io::Error) -> PlatformError {
    if error.raw_os_error() == Some(libc::EBUSY) {
        return PlatformError::DeviceBusy(format!("{path} is busy. {busy_hint}"));
    }
    match error.kind() {
        ErrorKind::PermissionDenied => PlatformError::PermissionDenied(format!(
            "Cannot open {path}: {error}. Try running with sudo."
        )),
        ErrorKind::NotFound => PlatformError::DeviceNotFound(path.to_string()),
        _ => PlatformError::Io(error),
    }
}

/// Length of a regular file standing in for a device
pub(crate) fn file_length(file: &File, path: &str) -> Result<u64> {
    file.metadata().map(|m| m.len()).map_err(|e| {
        PlatformError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to get size of {path}: {e}"),
        ))
    })
}
