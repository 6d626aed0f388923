//! Partitions command - shows the partition table of an image or drive

use anyhow::{Context, Result};
use console::style;

use imprint_core::{PartitionTable, Settings, SourceDestination};

use super::{is_device_path, load_config, open_image, target};

/// Execute the partitions command
pub fn execute(image: &str, json: bool, quiet: bool) -> Result<()> {
    let settings = Settings::load();
    let config = load_config(&settings)?;

    let mut source: Box<dyn SourceDestination> = if is_device_path(image) {
        let mut device = target(image, false, false)?;
        device
            .open()
            .with_context(|| format!("Failed to open device: {}", image))?;
        device
    } else {
        open_image(image, &config)?
    };

    let table = source.partition_table(&config);
    source.close()?;
    let table = table.with_context(|| format!("Failed to read partition table: {}", image))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
        return Ok(());
    }

    match table {
        Some(table) => print_table(image, &table, quiet),
        None => println_if!(quiet, "{} No partition table found in {}", style("ℹ").blue(), image),
    }

    Ok(())
}

fn print_table(image: &str, table: &PartitionTable, quiet: bool) {
    println_if!(
        quiet,
        "{} {} ({} partitions)",
        style(image).cyan(),
        style(table.table_type.to_string()).bold(),
        table.partitions.len()
    );

    println!("{}", format_header());
    for (index, partition) in table.partitions.iter().enumerate() {
        let mut kind = partition.type_name();
        if partition.extended {
            kind.push_str(" (extended)");
        }
        println!(
            "{:>3}  {:>12}  {:>12}  {:>12}  {:<28}  {}",
            index + 1,
            partition.first_lba,
            partition.last_lba,
            sector_count(partition.first_lba, partition.last_lba),
            kind,
            partition.name.as_deref().unwrap_or("")
        );
    }
}

fn format_header() -> String {
    format!(
        "{:>3}  {:>12}  {:>12}  {:>12}  {:<28}  {}",
        "#", "First LBA", "Last LBA", "Sectors", "Type", "Name"
    )
}

/// Sectors in an inclusive LBA range
fn sector_count(first: u64, last: u64) -> u64 {
    last.saturating_sub(first).saturating_add(1)
}
