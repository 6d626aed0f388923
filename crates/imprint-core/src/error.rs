//! Error types for the Imprint core library

use thiserror::Error;

/// Main error type for Imprint operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error during read/write operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The resource does not support the requested operation
    #[error("Operation not supported by this source or destination: {operation}")]
    NotCapable {
        /// Operation that was attempted
        operation: &'static str,
    },

    /// A transient device error persisted after every retry
    #[error("Device unplugged or unresponsive: {source}")]
    Unplugged {
        /// Last error reported by the device
        source: std::io::Error,
    },

    /// Dense verification found different data
    #[error("Source and destination checksums do not match: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum the data should have
        expected: String,
        /// Checksum computed from the data read back
        actual: String,
    },

    /// A blockmap range did not match its checksum
    #[error("Invalid checksum for bytes {start}..={end}: expected {expected}, got {actual}")]
    BlockVerification {
        /// First byte of the range
        start: u64,
        /// Last byte of the range (inclusive)
        end: u64,
        /// Checksum recorded in the blockmap
        expected: String,
        /// Checksum computed from the data read back
        actual: String,
    },

    /// Data ended before a required byte offset
    #[error("Unexpected end of data at offset {offset}")]
    UnexpectedEnd {
        /// Offset that could not be reached
        offset: u64,
    },

    /// Invalid configuration or parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A write stream was used after `finish`
    #[error("Write stream already finished")]
    StreamFinished,

    /// System operation on a device failed
    #[error(transparent)]
    Platform(#[from] imprint_platform::PlatformError),

    /// A decoder could not unwrap a container
    #[error("Unsupported decoder: {0}")]
    UnsupportedDecoder(String),
}

impl Error {
    /// Create a not-capable error for `operation`
    pub fn not_capable(operation: &'static str) -> Self {
        Self::NotCapable { operation }
    }

    /// Whether the data read back did not match what was expected
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::BlockVerification { .. }
        )
    }

    /// Whether a capability was missing
    pub fn is_not_capable(&self) -> bool {
        matches!(self, Self::NotCapable { .. })
    }

    /// Whether a device kept failing after the retry budget was spent
    pub fn is_unplugged(&self) -> bool {
        matches!(self, Self::Unplugged { .. })
    }
}

/// Result type alias using the Imprint error type
pub type Result<T> = std::result::Result<T, Error>;
