//! Write command - writes an image to a drive or file
//!
//! Opens the image, describes the target (device or file), streams the
//! image through [`imprint_core::write_image`] with a progress bar and
//! optionally reads the target back.

use anyhow::{Context, Result};
use console::style;

use imprint_core::{format_duration, format_size, write_image, Settings, WriteOptions};

use super::{load_config, open_image, source_size, target};
use crate::progress::{create_progress_bar, phase_callback, progress_callback};

/// Arguments for the write command
pub struct WriteArgs {
    pub image: String,
    pub target: String,
    pub verify: bool,
    pub no_verify: bool,
    pub no_unmount: bool,
    pub quiet: bool,
}

impl WriteArgs {
    /// Verification wins over the settings default unless explicitly skipped
    fn should_verify(&self, settings: &Settings) -> bool {
        !self.no_verify && (self.verify || settings.device.verify)
    }

    fn unmount_on_success(&self, settings: &Settings) -> bool {
        !self.no_unmount && settings.device.unmount_on_success
    }
}

/// Execute the write command
pub fn execute(args: &WriteArgs) -> Result<()> {
    let quiet = args.quiet;
    let settings = Settings::load();
    let config = load_config(&settings)?;

    println_if!(quiet, "{} {}", style("Image:").bold(), style(&args.image).cyan());
    let mut source = open_image(&args.image, &config)?;
    let size = source_size(&mut *source)?;
    match size {
        Some(size) => println_if!(quiet, "  {} ({})", style("✓").green(), format_size(size)),
        None => println_if!(quiet, "  {} (size unknown)", style("✓").green()),
    }
    if let Some(content_type) = source.content_type(&config)? {
        println_if!(
            quiet,
            "  {} Image looks like {}, writing it as is",
            style("⚠").yellow(),
            content_type
        );
    }

    println_if!(quiet, "\n{} {}", style("Target:").bold(), style(&args.target).cyan());
    let mut destination = target(&args.target, true, args.unmount_on_success(&settings))?;
    destination
        .open()
        .with_context(|| format!("Failed to open target: {}", args.target))?;
    println_if!(quiet, "  {} Opened for writing", style("✓").green());

    let verify = args.should_verify(&settings);
    let bar = create_progress_bar(size, "Writing", quiet);
    let mut options = WriteOptions::new()
        .verify(verify)
        .on_progress(progress_callback(&bar));
    if verify {
        options = options.on_verify_progress(phase_callback(&bar, "Verifying"));
    }

    println_if!(quiet, "\n{}", style("Writing image...").bold());
    let result = write_image(&mut *source, &mut *destination, &options, &config);
    bar.finish_and_clear();

    let closed = destination
        .close()
        .with_context(|| format!("Failed to close target: {}", args.target));
    source.close()?;
    let result = result.context("Write failed")?;
    closed?;

    println_if!(
        quiet,
        "  {} Wrote {} in {} ({})",
        style("✓").green(),
        format_size(result.bytes_written),
        format_duration(result.elapsed.as_secs()),
        result.speed_display()
    );
    println_if!(quiet, "  {} Checksum {}", style("ℹ").blue(), result.source_checksum);

    if let Some(elapsed) = result.verification_elapsed {
        println_if!(
            quiet,
            "  {} Verified in {}",
            style("✓").green(),
            format_duration(elapsed.as_secs())
        );
    }

    println_if!(quiet);
    println_if!(
        quiet,
        "{}",
        style("✓ Write complete! You can safely remove the drive.")
            .green()
            .bold()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(verify: bool, no_verify: bool, no_unmount: bool) -> WriteArgs {
        WriteArgs {
            image: "image.img".to_string(),
            target: "/dev/sdz".to_string(),
            verify,
            no_verify,
            no_unmount,
            quiet: true,
        }
    }

    #[test]
    fn test_should_verify_follows_settings() {
        let mut settings = Settings::default();
        assert!(args(false, false, false).should_verify(&settings));

        settings.device.verify = false;
        assert!(!args(false, false, false).should_verify(&settings));
        assert!(args(true, false, false).should_verify(&settings));
    }

    #[test]
    fn test_no_verify_overrides_settings() {
        let settings = Settings::default();
        assert!(!args(false, true, false).should_verify(&settings));
    }

    #[test]
    fn test_unmount_on_success() {
        let mut settings = Settings::default();
        assert!(args(false, false, false).unmount_on_success(&settings));
        assert!(!args(false, false, true).unmount_on_success(&settings));

        settings.device.unmount_on_success = false;
        assert!(!args(false, false, false).unmount_on_success(&settings));
    }
}
