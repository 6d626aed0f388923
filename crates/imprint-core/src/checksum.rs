//! Streaming checksums
//!
//! Whole-image checksums use xxHash with a fixed seed so that the value
//! computed while writing can be compared with the value computed while
//! reading back. Blockmap ranges use the cryptographic digest named in the
//! blockmap.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use xxhash_rust::xxh32::Xxh32;
use xxhash_rust::xxh64::Xxh64;

use crate::config::Config;
use crate::error::Result;
use crate::progress::{ProgressCallback, WithProgress};
use crate::source_destination::SourceDestination;
use crate::stream::ReadStream;

/// Seed shared by producer and verifier ("ETCH")
pub const CHECKSUM_SEED: u32 = 0x4554_4348;

/// xxHash variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashWidth {
    /// XXH32
    Bits32,
    /// XXH64
    Bits64,
}

impl HashWidth {
    /// 64-bit on 64-bit targets, 32-bit elsewhere
    pub fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            HashWidth::Bits64
        } else {
            HashWidth::Bits32
        }
    }
}

enum XxHasher {
    Bits32(Xxh32),
    Bits64(Xxh64),
}

/// Incremental whole-image hasher
pub struct Checksummer {
    hasher: XxHasher,
    bytes: u64,
}

impl Checksummer {
    /// Hasher for the native word size
    pub fn new() -> Self {
        Self::with_width(HashWidth::native())
    }

    /// Hasher of a given width
    pub fn with_width(width: HashWidth) -> Self {
        let hasher = match width {
            HashWidth::Bits32 => XxHasher::Bits32(Xxh32::new(CHECKSUM_SEED)),
            HashWidth::Bits64 => XxHasher::Bits64(Xxh64::new(u64::from(CHECKSUM_SEED))),
        };
        Self { hasher, bytes: 0 }
    }

    /// Feed data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.hasher {
            XxHasher::Bits32(h) => h.update(data),
            XxHasher::Bits64(h) => h.update(data),
        }
        self.bytes += data.len() as u64;
    }

    /// Bytes hashed so far
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Lowercase hex digest of everything fed so far
    pub fn hex_digest(&self) -> String {
        match &self.hasher {
            XxHasher::Bits32(h) => format!("{:08x}", h.digest()),
            XxHasher::Bits64(h) => format!("{:016x}", h.digest()),
        }
    }
}

impl Default for Checksummer {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash every buffer of a stream
pub fn checksum_stream<S: ReadStream + ?Sized>(stream: &mut S) -> Result<String> {
    let mut checksummer = Checksummer::new();
    for buffer in stream {
        checksummer.update(&buffer?);
    }
    Ok(checksummer.hex_digest())
}

/// Checksum of the first `size` bytes of a source (all of it when `None`)
pub fn checksum_source(
    source: &mut dyn SourceDestination,
    size: Option<u64>,
    config: &Config,
    on_progress: Option<ProgressCallback>,
) -> Result<String> {
    if size == Some(0) {
        return Ok(Checksummer::new().hex_digest());
    }
    let stream = source.create_read_stream(0, size.map(|s| s - 1), config)?;
    match on_progress {
        Some(callback) => {
            let mut tracked = WithProgress::new(stream, config.progress_interval, callback);
            checksum_stream(&mut tracked)
        }
        None => {
            let mut stream = stream;
            checksum_stream(&mut stream)
        }
    }
}

// ============================================================================
// Range digests
// ============================================================================

/// Digest used for blockmap ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    /// SHA-256
    Sha256,
    /// MD5
    Md5,
}

impl ChecksumType {
    /// Start a digest of this type
    pub fn hasher(self) -> RangeHasher {
        match self {
            ChecksumType::Sha256 => RangeHasher::Sha256(Sha256::new()),
            ChecksumType::Md5 => RangeHasher::Md5(Md5::new()),
        }
    }

    /// Digest of `data` as lowercase hex
    pub fn digest_hex(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize_hex()
    }
}

impl std::fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumType::Sha256 => write!(f, "sha256"),
            ChecksumType::Md5 => write!(f, "md5"),
        }
    }
}

/// Incremental digest of one blockmap range
pub enum RangeHasher {
    /// SHA-256 state
    Sha256(Sha256),
    /// MD5 state
    Md5(Md5),
}

impl RangeHasher {
    /// Feed data
    pub fn update(&mut self, data: &[u8]) {
        match self {
            RangeHasher::Sha256(h) => h.update(data),
            RangeHasher::Md5(h) => h.update(data),
        }
    }

    /// Finish as lowercase hex
    pub fn finalize_hex(self) -> String {
        let bytes = match self {
            RangeHasher::Sha256(h) => h.finalize().to_vec(),
            RangeHasher::Md5(h) => h.finalize().to_vec(),
        };
        bytes_to_hex(&bytes)
    }
}

/// Convert bytes to lowercase hex string
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
