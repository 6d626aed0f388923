//! Verify command - checks a drive or file against an image
//!
//! Without a blockmap the image is hashed first and the target's leading
//! bytes are compared against that digest. With a blockmap only the mapped
//! ranges of the target are read and checked against their own digests.

use anyhow::{Context, Result};
use console::style;

use imprint_core::{
    checksum_source, format_size, BlockMap, Config, ExpectedContent, Settings, Verifier,
};

use super::{load_config, open_image, source_size, target};
use crate::progress::{create_progress_bar, progress_callback};

/// Execute the verify command
pub fn execute(image: &str, target_path: &str, blockmap: Option<&str>, quiet: bool) -> Result<()> {
    let settings = Settings::load();
    let config = load_config(&settings)?;

    let expected = match blockmap {
        Some(path) => expected_from_blockmap(path, quiet)?,
        None => expected_from_image(image, &config, quiet)?,
    };

    println_if!(
        quiet,
        "\n{} {}",
        style("Target:").bold(),
        style(target_path).cyan()
    );
    let mut destination = target(target_path, false, false)?;
    destination
        .open()
        .with_context(|| format!("Failed to open target: {}", target_path))?;

    let total = match &expected {
        ExpectedContent::Checksum { size, .. } => Some(*size),
        ExpectedContent::BlockMap(map) => Some(map.mapped_bytes()),
    };
    let bar = create_progress_bar(total, "Verifying", quiet);
    let result = Verifier::new(&mut *destination, expected, &config)
        .with_progress_callback(Some(progress_callback(&bar)))
        .run();
    bar.finish_and_clear();
    destination.close()?;

    let bytes = result.context("Verification failed")?;
    println_if!(
        quiet,
        "  {} Verification passed ({} checked)",
        style("✓").green(),
        format_size(bytes)
    );

    Ok(())
}

/// Digest of the whole image
fn expected_from_image(image: &str, config: &Config, quiet: bool) -> Result<ExpectedContent> {
    println_if!(quiet, "{} {}", style("Image:").bold(), style(image).cyan());

    let mut source = open_image(image, config)?;
    let size = source_size(&mut *source)?;

    let bar = create_progress_bar(size, "Hashing", quiet);
    let checksum = checksum_source(&mut *source, size, config, Some(progress_callback(&bar)));
    bar.finish_and_clear();
    source.close()?;
    let checksum = checksum.with_context(|| format!("Failed to read image: {}", image))?;

    let size = size.unwrap_or(0);
    println_if!(
        quiet,
        "  {} {} ({})",
        style("✓").green(),
        checksum,
        format_size(size)
    );

    Ok(ExpectedContent::Checksum { checksum, size })
}

/// Ranges and digests listed in a blockmap file
fn expected_from_blockmap(path: &str, quiet: bool) -> Result<ExpectedContent> {
    println_if!(quiet, "{} {}", style("Blockmap:").bold(), style(path).cyan());

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read blockmap: {}", path))?;
    let map = BlockMap::from_json(&json).with_context(|| format!("Invalid blockmap: {}", path))?;

    println_if!(
        quiet,
        "  {} {} ranges, {} mapped ({})",
        style("✓").green(),
        map.ranges.len(),
        format_size(map.mapped_bytes()),
        map.checksum_type
    );

    Ok(ExpectedContent::BlockMap(map))
}
