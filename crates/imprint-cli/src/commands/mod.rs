//! CLI command implementations

pub mod checksum;
pub mod partitions;
pub mod verify;
pub mod write;

use std::path::Path;

use anyhow::{bail, Context, Result};
use imprint_core::{
    get_inner_source, BlockDevice, Config, DecoderRegistry, Drive, File, OpenMode, Settings,
    SourceDestination,
};

/// Runtime configuration from the user's settings file
pub fn load_config(settings: &Settings) -> Result<Config> {
    settings
        .to_config()
        .context("Invalid settings in the configuration file")
}

/// Open an image file for reading, unwrapping any container with a registered decoder
pub fn open_image(path: &str, config: &Config) -> Result<Box<dyn SourceDestination>> {
    if !Path::new(path).is_file() {
        bail!("Image '{}' not found or not a regular file", path);
    }

    let file: Box<dyn SourceDestination> = Box::new(File::new(path, OpenMode::Read));
    get_inner_source(file, &DecoderRegistry::new(), config)
        .with_context(|| format!("Failed to open image: {}", path))
}

/// Whether `path` names a device node rather than a regular file
pub fn is_device_path(path: &str) -> bool {
    if path.starts_with(r"\\.\") {
        return true;
    }
    std::fs::metadata(path)
        .map(|m| !m.is_file() && !m.is_dir())
        .unwrap_or(false)
}

/// Describe a write or verify target
///
/// Device nodes become a [`BlockDevice`], anything else a [`File`] that is
/// created when writing.
pub fn target(path: &str, write: bool, unmount_on_success: bool) -> Result<Box<dyn SourceDestination>> {
    if Path::new(path).is_dir() {
        bail!("Target '{}' is a directory", path);
    }

    if is_device_path(path) {
        let drive =
            Drive::probe(path).with_context(|| format!("Failed to open device: {}", path))?;
        tracing::debug!(
            "{}: {} bytes, {} byte sectors",
            drive.device_path,
            drive.size.unwrap_or(0),
            drive.block_size
        );
        return Ok(Box::new(BlockDevice::new(drive, write, unmount_on_success)));
    }

    if !write && !Path::new(path).exists() {
        bail!("Target '{}' not found", path);
    }

    let mode = if write {
        OpenMode::ReadWrite
    } else {
        OpenMode::Read
    };
    Ok(Box::new(File::new(path, mode)))
}

/// Size of an opened source, if it knows it
pub fn source_size(source: &mut dyn SourceDestination) -> Result<Option<u64>> {
    Ok(source.metadata()?.size)
}
