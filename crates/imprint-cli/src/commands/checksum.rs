//! Checksum command - calculates the checksum of an image

use anyhow::{Context, Result};
use console::style;

use imprint_core::{checksum_source, format_size, Settings};

use super::{load_config, open_image, source_size};
use crate::progress::{create_progress_bar, progress_callback};

/// Execute the checksum command
pub fn execute(image: &str, quiet: bool) -> Result<()> {
    let settings = Settings::load();
    let config = load_config(&settings)?;

    println_if!(quiet, "{} {}", style("Image:").bold(), style(image).cyan());

    let mut source = open_image(image, &config)?;
    let size = source_size(&mut *source)?;
    if let Some(size) = size {
        println_if!(quiet, "  Size: {}", format_size(size));
    }

    let bar = create_progress_bar(size, "Hashing", quiet);
    let checksum = checksum_source(&mut *source, size, &config, Some(progress_callback(&bar)));
    bar.finish_and_clear();
    source.close()?;
    let checksum = checksum.context("Failed to calculate checksum")?;

    // The digest is the useful output, printed even when quiet
    if quiet {
        println!("{}", checksum);
    } else {
        println!();
        println!("{} ({}):", style("xxhash").green().bold(), image);
        println!("{}", checksum);

        println!();
        println!("{}:", style("Checksum file format").dim());
        println!("{}  {}", checksum, file_name(image));
    }

    Ok(())
}

/// Last path component, for checksum file lines
fn file_name(path: &str) -> &str {
    std::path::Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/tmp/images/raspios.img"), "raspios.img");
        assert_eq!(file_name("raspios.img"), "raspios.img");
    }
}
