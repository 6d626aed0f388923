//! Content-type sniffing and container unwrapping
//!
//! Images often arrive inside containers (compressed files, archives).
//! [`get_inner_source`] peels them off using decoders registered in a
//! [`DecoderRegistry`] until it reaches something directly flashable.
//! No decoders are registered by default.

use std::collections::HashMap;
use std::path::Path;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::source_destination::SourceDestination;

/// Last byte offset (inclusive) read when sniffing magic bytes
///
/// The tar `ustar` marker sits at 257..262, the furthest signature checked.
pub const CONTENT_SNIFF_END: u64 = 263;

/// Apple disk image
pub const APPLE_DISK_IMAGE: &str = "application/x-apple-diskimage";
/// gzip stream
pub const GZIP: &str = "application/gzip";
/// xz stream
pub const XZ: &str = "application/x-xz";
/// Zstandard frame
pub const ZSTD: &str = "application/zstd";
/// bzip2 stream
pub const BZIP2: &str = "application/x-bzip2";
/// Zip archive
pub const ZIP: &str = "application/zip";
/// POSIX tar archive
pub const TAR: &str = "application/x-tar";

/// Content type implied by a file name's extension
pub fn content_type_from_name(name: &str) -> Option<&'static str> {
    let extension = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "dmg" => Some(APPLE_DISK_IMAGE),
        "gz" | "gzip" => Some(GZIP),
        "xz" => Some(XZ),
        "zst" => Some(ZSTD),
        "bz2" => Some(BZIP2),
        "zip" => Some(ZIP),
        _ => None,
    }
}

/// Content type implied by the leading bytes of a resource
pub fn content_type_from_magic(head: &[u8]) -> Option<&'static str> {
    if head.starts_with(&[0x1F, 0x8B]) {
        Some(GZIP)
    } else if head.starts_with(&[0xFD, b'7', b'z', b'X', b'Z', 0x00]) {
        Some(XZ)
    } else if head.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
        Some(ZSTD)
    } else if head.starts_with(b"BZh") {
        Some(BZIP2)
    } else if head.starts_with(b"PK\x03\x04") {
        Some(ZIP)
    } else if head.get(257..262) == Some(b"ustar".as_slice()) {
        Some(TAR)
    } else {
        None
    }
}

/// Turns a container into the resource it wraps
pub type DecoderFactory =
    Box<dyn Fn(Box<dyn SourceDestination>) -> Result<Box<dyn SourceDestination>> + Send + Sync>;

/// Decoders keyed by the content type they unwrap
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: HashMap<&'static str, DecoderFactory>,
}

impl DecoderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `content_type`, replacing any previous one
    pub fn register<F>(&mut self, content_type: &'static str, factory: F) -> &mut Self
    where
        F: Fn(Box<dyn SourceDestination>) -> Result<Box<dyn SourceDestination>>
            + Send
            + Sync
            + 'static,
    {
        self.decoders.insert(content_type, Box::new(factory));
        self
    }

    /// Decoder for `content_type`
    pub fn get(&self, content_type: &str) -> Option<&DecoderFactory> {
        self.decoders.get(content_type)
    }

    /// Registered content types, sorted
    pub fn content_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.decoders.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Number of registered decoders
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// No decoder registered
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("content_types", &self.content_types())
            .finish()
    }
}

/// Unwrap `source` down to the innermost flashable resource
///
/// Each level is opened, sniffed (name first, then magic bytes) and handed
/// to the matching decoder. Unwrapping stops at a resource marked as a
/// final image or one no decoder claims. A chain longer than the registry
/// can only come from a decoder cycle and is rejected.
pub fn get_inner_source(
    source: Box<dyn SourceDestination>,
    registry: &DecoderRegistry,
    config: &Config,
) -> Result<Box<dyn SourceDestination>> {
    let mut current = source;

    for _ in 0..=registry.len() {
        current.open()?;

        let is_final_image = match current.metadata() {
            Ok(metadata) => metadata.is_final_image,
            Err(Error::NotCapable { .. }) => false,
            Err(e) => return Err(e),
        };
        if is_final_image {
            return Ok(current);
        }

        let Some(content_type) = current.content_type(config)? else {
            return Ok(current);
        };
        let Some(decoder) = registry.get(content_type) else {
            tracing::debug!("no decoder for {}, using source as is", content_type);
            return Ok(current);
        };

        tracing::debug!("unwrapping {} container", content_type);
        current = decoder(current)?;
    }

    Err(Error::UnsupportedDecoder(format!(
        "containers nested deeper than the {} registered decoders",
        registry.len()
    )))
}
