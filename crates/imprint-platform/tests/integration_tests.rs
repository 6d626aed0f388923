//! Integration tests for imprint-platform
//!
//! These tests verify the public API and cross-platform behavior.
//! Tests that require actual devices are marked with #[ignore].

use imprint_platform::*;
use std::io::Write;
use tempfile::NamedTempFile;

// ============================================================================
// Alignment utility tests
// ============================================================================

#[test]
fn test_align_up_common_sector_sizes() {
    for alignment in [512, 1024, 2048, 4096, 8192] {
        assert_eq!(align_up(0, alignment), 0);
        assert_eq!(align_up(1, alignment), alignment);
        assert_eq!(align_up(alignment - 1, alignment), alignment);
        assert_eq!(align_up(alignment, alignment), alignment);
        assert_eq!(align_up(alignment + 1, alignment), alignment * 2);
    }
}

#[test]
fn test_align_down_common_sector_sizes() {
    for alignment in [512, 1024, 2048, 4096, 8192] {
        assert_eq!(align_down(1, alignment), 0);
        assert_eq!(align_down(alignment - 1, alignment), 0);
        assert_eq!(align_down(alignment + 1, alignment), alignment);
        assert_eq!(align_down(alignment * 2 - 1, alignment), alignment);
    }
}

#[test]
fn test_alignment_large_offsets() {
    let eight_tb = 8u64 * 1024 * 1024 * 1024 * 1024;
    assert_eq!(align_up(eight_tb + 1, 4096), eight_tb + 4096);
    assert_eq!(align_down(eight_tb + 4095, 4096), eight_tb);
    assert!(is_aligned(eight_tb, 512));
}

// ============================================================================
// Policy tests
// ============================================================================

#[test]
fn test_current_policy_matches_build_target() {
    let policy = PlatformPolicy::current();
    assert_eq!(policy.kind, PlatformKind::current());
    assert_eq!(PlatformPolicy::default(), policy);

    if cfg!(target_os = "linux") {
        assert!(!policy.aligned_io);
        assert_eq!(policy.transient_codes(), &[5, 16]);
    }
    if cfg!(target_os = "windows") {
        assert_eq!(policy.first_bytes_to_keep, WIN32_FIRST_BYTES_TO_KEEP);
    }
}

#[test]
fn test_only_windows_defers_header() {
    for kind in [PlatformKind::Linux, PlatformKind::MacOS, PlatformKind::Other] {
        assert_eq!(PlatformPolicy::for_kind(kind).first_bytes_to_keep, 0);
    }
    assert_eq!(
        PlatformPolicy::for_kind(PlatformKind::Windows).first_bytes_to_keep,
        64 * 1024
    );
}

#[test]
fn test_busy_is_transient_on_unix_families() {
    let busy = std::io::Error::from_raw_os_error(16);
    assert!(PlatformPolicy::for_kind(PlatformKind::Linux).is_transient(&busy));
    assert!(PlatformPolicy::for_kind(PlatformKind::MacOS).is_transient(&busy));
    assert!(!PlatformPolicy::for_kind(PlatformKind::Windows).is_transient(&busy));
}

// ============================================================================
// Device access tests (regular files stand in for devices)
// ============================================================================

#[cfg(target_os = "linux")]
#[test]
fn test_open_regular_file_as_device() {
    let mut temp = NamedTempFile::new().unwrap();
    temp.write_all(&vec![0xAB; 4096]).unwrap();
    temp.flush().unwrap();
    let path = temp.path().to_str().unwrap();

    let file = open_device(path, true).unwrap();
    assert_eq!(device_size(&file, path).unwrap(), 4096);

    assert_eq!(write_at(&file, &[1, 2, 3, 4], 1024).unwrap(), 4);
    let mut buffer = [0u8; 6];
    read_at(&file, &mut buffer, 1023).unwrap();
    assert_eq!(buffer, [0xAB, 1, 2, 3, 4, 0xAB]);
}

#[test]
fn test_open_missing_device() {
    let result = open_device("/nonexistent/imprint/device", false);
    assert!(result.is_err());
}

#[test]
fn test_wipe_is_noop_off_windows() {
    if !cfg!(target_os = "windows") {
        let temp = NamedTempFile::new().unwrap();
        assert!(wipe_partition_table(temp.path().to_str().unwrap()).is_ok());
    }
}

#[test]
#[ignore = "requires a real removable device"]
fn test_unmount_real_device() {
    let path = std::env::var("IMPRINT_TEST_DEVICE").unwrap();
    unmount_device(&path).unwrap();
}
