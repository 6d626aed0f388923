//! Imprint - flash disk images to drives and verify them
//!
//! # Usage
//!
//! ```bash
//! # Write an image to an SD card and read it back
//! imprint write raspios.img /dev/mmcblk0 --verify
//!
//! # Compare a drive with an image
//! imprint verify raspios.img /dev/mmcblk0
//!
//! # Check only the mapped blocks of a sparse image
//! imprint verify raspios.img /dev/mmcblk0 --blockmap raspios.bmap.json
//!
//! # Print the checksum of an image
//! imprint checksum raspios.img
//!
//! # Show the partition table of an image
//! imprint partitions raspios.img --json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

/// Conditionally println based on quiet mode
macro_rules! println_if {
    ($quiet:expr) => {
        if !$quiet {
            println!();
        }
    };
    ($quiet:expr, $($arg:tt)*) => {
        if !$quiet {
            println!($($arg)*);
        }
    };
}

mod commands;
mod progress;

/// Imprint - flash disk images to drives and verify them
#[derive(Parser)]
#[command(name = "imprint")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors and results
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an image to a drive or file
    Write {
        /// Image to write
        image: String,

        /// Target device (e.g., /dev/sdb, /dev/disk2, \\.\PhysicalDrive1) or file
        target: String,

        /// Verify the write by reading the target back
        #[arg(long, conflicts_with = "no_verify")]
        verify: bool,

        /// Skip verification even when enabled in the settings
        #[arg(long)]
        no_verify: bool,

        /// Do not unmount the target once the write succeeded
        #[arg(long)]
        no_unmount: bool,
    },

    /// Verify a drive or file against an image
    Verify {
        /// Image the target should contain
        image: String,

        /// Target device or file to check
        target: String,

        /// Check only the ranges listed in a blockmap (JSON)
        #[arg(long, value_name = "FILE")]
        blockmap: Option<String>,
    },

    /// Calculate the checksum of an image
    Checksum {
        /// Image to hash
        image: String,
    },

    /// Show the partition table of an image or drive
    Partitions {
        /// Image or device to inspect
        image: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {}", style("Error:").red().bold(), e);

        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  {} {}", style("Caused by:").yellow(), cause);
            source = cause.source();
        }

        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let quiet = cli.quiet;

    match cli.command {
        Commands::Write {
            image,
            target,
            verify,
            no_verify,
            no_unmount,
        } => commands::write::execute(&commands::write::WriteArgs {
            image,
            target,
            verify,
            no_verify,
            no_unmount,
            quiet,
        }),
        Commands::Verify {
            image,
            target,
            blockmap,
        } => commands::verify::execute(&image, &target, blockmap.as_deref(), quiet),
        Commands::Checksum { image } => commands::checksum::execute(&image, quiet),
        Commands::Partitions { image, json } => commands::partitions::execute(&image, json, quiet),
    }
}
