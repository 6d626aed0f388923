//! Windows platform implementation
//!
//! Opens `\\.\PhysicalDriveN` paths unbuffered, dismounts volumes through
//! PowerShell and cleans partition tables with `diskpart`.

use crate::{PlatformError, Result};
use std::fs::{File, OpenOptions as StdOpenOptions};
use std::io::Write;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;
use std::process::Command;
use std::time::Duration;

use windows_sys::Win32::Storage::FileSystem::{
    FILE_FLAG_NO_BUFFERING, FILE_FLAG_WRITE_THROUGH, FILE_SHARE_READ, FILE_SHARE_WRITE,
};
use windows_sys::Win32::System::Ioctl::{GET_LENGTH_INFORMATION, IOCTL_DISK_GET_LENGTH_INFO};
use windows_sys::Win32::System::IO::DeviceIoControl;

/// Delay between two `diskpart` attempts
const DISKPART_DELAY: Duration = Duration::from_millis(2000);

/// Number of `diskpart` retries before giving up
const DISKPART_RETRIES: u32 = 5;

/// Normalize a device path for Windows
///
/// - "1" or "PhysicalDrive1" -> "\\.\PhysicalDrive1"
/// - "\\.\PhysicalDrive1" -> unchanged
pub(crate) fn normalize_windows_path(path: &str) -> String {
    if path.starts_with("\\\\.\\") {
        path.to_string()
    } else if path.starts_with("PhysicalDrive") {
        format!("\\\\.\\{}", path)
    } else if let Ok(n) = path.parse::<u32>() {
        format!("\\\\.\\PhysicalDrive{}", n)
    } else {
        path.to_string()
    }
}

/// Disk number of a `\\.\PhysicalDriveN` path
pub(crate) fn physical_drive_number(path: &str) -> Option<u32> {
    let lower = path.to_ascii_lowercase();
    let index = lower.find("physicaldrive")?;
    lower[index + "physicaldrive".len()..].parse().ok()
}

/// Open a physical drive for raw I/O
pub(crate) fn open_device(path: &str, write: bool) -> Result<File> {
    let device_path = normalize_windows_path(path);

    let mut options = StdOpenOptions::new();
    options
        .read(true)
        .write(write)
        .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE)
        .custom_flags(FILE_FLAG_NO_BUFFERING | FILE_FLAG_WRITE_THROUGH);

    options.open(&device_path).map_err(|e| match e.raw_os_error() {
        Some(5) => PlatformError::PermissionDenied(format!(
            "Cannot open {}. Run as Administrator.",
            device_path
        )),
        Some(32) => PlatformError::DeviceBusy(format!(
            "{} is in use. Close any programs using it.",
            device_path
        )),
        Some(2) | Some(3) => PlatformError::DeviceNotFound(device_path.clone()),
        _ => PlatformError::Io(e),
    })
}

/// Get device size on Windows
pub(crate) fn device_size(file: &File, _path: &str) -> Result<u64> {
    let handle = file.as_raw_handle() as isize;

    // SAFETY: GET_LENGTH_INFORMATION is a plain C struct, all-zero is valid.
    #[allow(unsafe_code)]
    let mut length_info: GET_LENGTH_INFORMATION = unsafe { std::mem::zeroed() };
    let mut bytes_returned: u32 = 0;

    // SAFETY: the handle is owned by `file` and the output buffer is sized
    // for GET_LENGTH_INFORMATION.
    #[allow(unsafe_code)]
    let result = unsafe {
        DeviceIoControl(
            handle,
            IOCTL_DISK_GET_LENGTH_INFO,
            std::ptr::null(),
            0,
            &mut length_info as *mut _ as *mut _,
            std::mem::size_of::<GET_LENGTH_INFORMATION>() as u32,
            &mut bytes_returned,
            std::ptr::null_mut(),
        )
    };

    if result != 0 {
        return Ok(length_info.Length as u64);
    }

    Ok(file.metadata()?.len())
}

/// Physical drives report their geometry through the scanner
pub(crate) fn device_block_size(_path: &str) -> Result<u32> {
    Ok(512)
}

/// Dismount the volumes of a physical drive
pub(crate) fn unmount_device(path: &str) -> Result<()> {
    let device_path = normalize_windows_path(path);
    let drive_num = physical_drive_number(&device_path)
        .ok_or_else(|| PlatformError::DeviceNotFound(path.to_string()))?;

    let output = Command::new("powershell")
        .args([
            "-Command",
            &format!(
                "Get-Disk -Number {} | Get-Partition | ForEach-Object {{ \
                    if ($_.DriveLetter) {{ \
                        Dismount-Volume -DriveLetter $_.DriveLetter -Force \
                    }} \
                }}",
                drive_num
            ),
        ])
        .output();

    match output {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if stderr.contains("not found") || stderr.is_empty() {
                Ok(())
            } else {
                Err(PlatformError::UnmountFailed(stderr.to_string()))
            }
        }
        Err(e) => Err(PlatformError::CommandFailed(format!(
            "Failed to run PowerShell: {}",
            e
        ))),
    }
}

/// Run a diskpart script
fn run_diskpart(commands: &[String]) -> Result<()> {
    let mut script = tempfile::NamedTempFile::new()?;
    script.write_all(commands.join("\r\n").as_bytes())?;
    script.flush()?;

    let output = Command::new("diskpart")
        .arg("/s")
        .arg(script.path())
        .output()
        .map_err(|e| PlatformError::CommandFailed(format!("Failed to run diskpart: {}", e)))?;

    tracing::debug!("diskpart stdout: {}", String::from_utf8_lossy(&output.stdout));
    tracing::debug!("diskpart stderr: {}", String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(())
    } else {
        Err(PlatformError::CommandFailed(format!(
            "diskpart exited with code {:?}",
            output.status.code()
        )))
    }
}

/// Clean a physical drive's partition tables, retrying while diskpart is busy
pub(crate) fn wipe_partition_table(path: &str) -> Result<()> {
    let device_id = physical_drive_number(path)
        .ok_or_else(|| PlatformError::DeviceNotFound(format!("Invalid device: \"{}\"", path)))?;

    tracing::debug!("diskpart clean {}", path);

    let commands = vec![
        format!("select disk {}", device_id),
        "clean".to_string(),
        "rescan".to_string(),
    ];

    let mut error_count = 0;
    loop {
        match run_diskpart(&commands) {
            Ok(()) => return Ok(()),
            Err(e) => {
                error_count += 1;
                if error_count > DISKPART_RETRIES {
                    return Err(PlatformError::CleanFailed(e.to_string()));
                }
                tracing::warn!("diskpart clean failed ({}), retrying", e);
                std::thread::sleep(DISKPART_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_windows_path() {
        assert_eq!(normalize_windows_path("1"), "\\\\.\\PhysicalDrive1");
        assert_eq!(
            normalize_windows_path("PhysicalDrive2"),
            "\\\\.\\PhysicalDrive2"
        );
        assert_eq!(
            normalize_windows_path("\\\\.\\PhysicalDrive3"),
            "\\\\.\\PhysicalDrive3"
        );
        assert_eq!(normalize_windows_path("C:"), "C:");
    }

    #[test]
    fn test_physical_drive_number() {
        assert_eq!(physical_drive_number("\\\\.\\PhysicalDrive2"), Some(2));
        assert_eq!(physical_drive_number("\\\\.\\PHYSICALDRIVE10"), Some(10));
        assert_eq!(physical_drive_number("C:"), None);
    }
}
