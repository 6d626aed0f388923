//! # Imprint Core
//!
//! Core library for flashing disk images onto drives and files.
//!
//! ## Modules
//!
//! - `source_destination`: the capability-negotiated resource every operation runs on
//! - `file`, `memory`, `block_device`: concrete sources and destinations
//! - `block_read_stream`, `block_write_stream`, `sparse_write_stream`: retrying chunked I/O
//! - `progress`: periodic progress events for any stream
//! - `verifier`, `blockmap`, `checksum`: dense and sparse verification
//! - `content`: content sniffing and container unwrapping
//! - `partition`: MBR/GPT detection
//! - `alignment`: sector-aligned access for raw devices
//! - `pipeline`: streaming an image into a destination
//! - `config`, `settings`: runtime configuration and persistent settings
//!
//! ## Example
//!
//! ```no_run
//! use imprint_core::{write_image, Config, File, OpenMode, SourceDestination, WriteOptions};
//!
//! let config = Config::default();
//! let mut source = File::new("raspios.img", OpenMode::Read);
//! let mut target = File::new("/dev/sdb", OpenMode::WriteDevice);
//! source.open()?;
//! target.open()?;
//!
//! let result = write_image(&mut source, &mut target, &WriteOptions::new().verify(true), &config)?;
//! println!("Wrote {} bytes at {}", result.bytes_written, result.speed_display());
//!
//! target.close()?;
//! source.close()?;
//! # Ok::<(), imprint_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alignment;
pub mod block_device;
pub mod block_read_stream;
pub mod block_write_stream;
pub mod blockmap;
pub mod checksum;
pub mod config;
pub mod content;
pub mod error;
pub mod file;
pub mod memory;
pub mod partition;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod settings;
pub mod source_destination;
pub mod sparse_write_stream;
pub mod stream;
pub mod verifier;

pub use alignment::{AlignedIo, PositionedIo};
pub use block_device::{BlockDevice, DeviceControl, Drive, SystemDeviceControl};
pub use block_read_stream::BlockReadStream;
pub use block_write_stream::BlockWriteStream;
pub use blockmap::{BlockMap, BlockMapFilter, BlockMapReader, BlockRange};
pub use checksum::{checksum_source, ChecksumType, Checksummer, HashWidth, CHECKSUM_SEED};
pub use config::Config;
pub use content::{get_inner_source, DecoderFactory, DecoderRegistry};
pub use error::{Error, Result};
pub use file::{File, OpenMode};
pub use memory::Memory;
pub use partition::{format_size, Partition, PartitionTable, PartitionTableType};
pub use pipeline::{
    format_duration, format_speed, pipe, write_image, WriteOptions, WriteResult, HIGH_WATER_MARK,
};
pub use progress::{Progress, ProgressCallback, WithProgress};
pub use retry::RetryPolicy;
pub use settings::{Settings, SettingsError};
pub use source_destination::{Metadata, SourceDestination};
pub use sparse_write_stream::SparseWriteStream;
pub use stream::{Chunk, ChunkSink, ReadStream, SparseSink, Tracked};
pub use verifier::{create_verifier, ExpectedContent, Verifier};

pub use imprint_platform::{PlatformKind, PlatformPolicy};
