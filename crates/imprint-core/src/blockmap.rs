//! Blockmaps: the ranges of an image that carry data
//!
//! A blockmap lists, in order, the disjoint block ranges that hold real
//! data, each with a digest. Sparse writers only write those ranges and
//! sparse verifiers only check them. The JSON layout is the one produced
//! by the usual blockmap tooling (block-indexed, inclusive ranges).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::checksum::{ChecksumType, RangeHasher};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::StreamCounters;
use crate::retry::RetryPolicy;
use crate::source_destination::SourceDestination;
use crate::stream::{ReadStream, Tracked};

/// A run of blocks with its digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    /// First block index
    pub start: u64,
    /// Last block index (inclusive)
    pub end: u64,
    /// Digest of the range contents
    pub checksum: String,
}

impl BlockRange {
    /// Byte span `[first, last]` covered by the range
    pub fn byte_span(&self, block_size: u64) -> (u64, u64) {
        (self.start * block_size, (self.end + 1) * block_size - 1)
    }
}

/// Ordered, disjoint ranges of an image with their digests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMap {
    /// Format version
    #[serde(default = "default_version")]
    pub version: String,
    /// Total image size in bytes
    pub image_size: u64,
    /// Bytes per block
    pub block_size: u64,
    /// Digest used for every range
    pub checksum_type: ChecksumType,
    /// Mapped ranges in ascending order
    pub ranges: Vec<BlockRange>,
}

fn default_version() -> String {
    "2.0".to_string()
}

impl BlockMap {
    /// Parse the JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        let map: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("invalid blockmap: {}", e)))?;
        map.validate()?;
        Ok(map)
    }

    /// JSON form
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("cannot serialize blockmap: {}", e)))
    }

    /// Check ranges are well formed, ascending and disjoint
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("blockmap block size is zero".to_string()));
        }
        let mut next_free = 0u64;
        for (index, range) in self.ranges.iter().enumerate() {
            if range.end < range.start || (index > 0 && range.start < next_free) {
                return Err(Error::InvalidConfig(format!(
                    "blockmap range {} ({}..={}) is out of order or overlapping",
                    index, range.start, range.end
                )));
            }
            if self.image_size > 0 && range.byte_span(self.block_size).0 >= self.image_size {
                return Err(Error::InvalidConfig(format!(
                    "blockmap range {} starts past the image end ({} bytes)",
                    index, self.image_size
                )));
            }
            next_free = range.end + 1;
        }
        Ok(())
    }

    /// Byte span `[first, last]` of a range, cut at the image end
    ///
    /// The last block of an image whose size is not a block multiple is
    /// partial; its digest only covers the bytes up to `image_size`.
    pub fn span(&self, range: &BlockRange) -> (u64, u64) {
        let (first, last) = range.byte_span(self.block_size);
        match self.image_size {
            0 => (first, last),
            size => (first, last.min(size - 1)),
        }
    }

    /// Total bytes covered by all ranges
    pub fn mapped_bytes(&self) -> u64 {
        self.ranges
            .iter()
            .map(|range| {
                let (first, last) = self.span(range);
                last - first + 1
            })
            .sum()
    }

    /// Build a blockmap for `data` covering the given block ranges
    pub fn for_data(
        data: &[u8],
        block_size: u64,
        checksum_type: ChecksumType,
        block_ranges: &[(u64, u64)],
    ) -> Self {
        let ranges = block_ranges
            .iter()
            .map(|&(start, end)| {
                let first = (start * block_size) as usize;
                let last = (((end + 1) * block_size) as usize).min(data.len());
                BlockRange {
                    start,
                    end,
                    checksum: checksum_type.digest_hex(&data[first.min(last)..last]),
                }
            })
            .collect();

        Self {
            version: default_version(),
            image_size: data.len() as u64,
            block_size,
            checksum_type,
            ranges,
        }
    }
}

/// Tracks the range being validated while its bytes stream past
struct RangeCheck {
    index: usize,
    hasher: Option<RangeHasher>,
}

impl RangeCheck {
    fn new() -> Self {
        Self {
            index: 0,
            hasher: None,
        }
    }

    fn feed(&mut self, map: &BlockMap, data: &[u8]) {
        let checksum_type = map.checksum_type;
        self.hasher
            .get_or_insert_with(|| checksum_type.hasher())
            .update(data);
    }

    /// Close the current range and compare its digest
    fn complete(&mut self, map: &BlockMap) -> Result<()> {
        let range = &map.ranges[self.index];
        let actual = self
            .hasher
            .take()
            .unwrap_or_else(|| map.checksum_type.hasher())
            .finalize_hex();
        self.index += 1;

        if !actual.eq_ignore_ascii_case(&range.checksum) {
            let (start, end) = map.span(range);
            return Err(Error::BlockVerification {
                start,
                end,
                expected: range.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Addressed reader
// ============================================================================

/// Reads exactly the mapped ranges of a source, validating each range
///
/// Yields the mapped bytes in range order; a range whose digest does not
/// match ends the stream with [`Error::BlockVerification`].
pub struct BlockMapReader<'a> {
    source: &'a mut dyn SourceDestination,
    map: &'a BlockMap,
    retry: RetryPolicy,
    chunk_size: u64,
    check: RangeCheck,
    /// Next byte to read within the current range
    offset: u64,
    counters: Arc<StreamCounters>,
    done: bool,
}

impl<'a> BlockMapReader<'a> {
    /// Create a reader; the source must support addressed reads
    pub fn new(
        source: &'a mut dyn SourceDestination,
        map: &'a BlockMap,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        map.validate()?;
        if !source.can_read()? {
            return Err(Error::not_capable("read"));
        }
        let offset = map
            .ranges
            .first()
            .map_or(0, |range| map.span(range).0);

        Ok(Self {
            source,
            map,
            retry: RetryPolicy::from_config(config),
            chunk_size: config.chunk_size as u64,
            check: RangeCheck::new(),
            offset,
            counters: StreamCounters::new(),
            done: false,
        })
    }

    fn next_piece(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(range) = self.map.ranges.get(self.check.index) else {
            return Ok(None);
        };
        let (_, last) = self.map.span(range);
        let length = (last - self.offset + 1).min(self.chunk_size) as usize;

        let mut buffer = vec![0u8; length];
        let position = self.offset;
        let source = &mut *self.source;
        let read = self.retry.run("read", || source.read(&mut buffer, position))?;
        if read == 0 {
            return Err(Error::UnexpectedEnd { offset: position });
        }
        buffer.truncate(read);

        self.check.feed(self.map, &buffer);
        self.offset += read as u64;
        self.counters.add_bytes(read as u64);
        self.counters.set_position(self.offset);

        if self.offset > last {
            self.check.complete(self.map)?;
            if let Some(next) = self.map.ranges.get(self.check.index) {
                self.offset = self.map.span(next).0;
            }
        }
        Ok(Some(buffer))
    }
}

impl Tracked for BlockMapReader<'_> {
    fn counters(&self) -> Arc<StreamCounters> {
        Arc::clone(&self.counters)
    }
}

impl Iterator for BlockMapReader<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_piece().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

impl ReadStream for BlockMapReader<'_> {}

// ============================================================================
// Filter over a sequential stream
// ============================================================================

/// Keeps only the mapped bytes of a full sequential stream
///
/// Used when a source can only be streamed from the start. Digests are
/// validated as each range completes.
pub struct BlockMapFilter<'a, S> {
    inner: S,
    map: &'a BlockMap,
    check: RangeCheck,
    /// Offset of the next byte the inner stream will yield
    offset: u64,
    counters: Arc<StreamCounters>,
    done: bool,
}

impl<'a, S: ReadStream> BlockMapFilter<'a, S> {
    /// Filter a stream that starts at offset 0
    pub fn new(inner: S, map: &'a BlockMap) -> Result<Self> {
        map.validate()?;
        Ok(Self {
            inner,
            map,
            check: RangeCheck::new(),
            offset: 0,
            counters: StreamCounters::new(),
            done: false,
        })
    }

    /// Mapped bytes of one inner buffer; completes ranges it closes
    fn filter(&mut self, buffer: &[u8]) -> Result<Vec<u8>> {
        let buffer_start = self.offset;
        let buffer_end = buffer_start + buffer.len() as u64;
        let mut kept = Vec::new();

        while let Some(range) = self.map.ranges.get(self.check.index) {
            let (first, last) = self.map.span(range);
            if first >= buffer_end {
                break;
            }
            let from = first.max(buffer_start);
            let to = (last + 1).min(buffer_end);
            if from < to {
                let piece = &buffer[(from - buffer_start) as usize..(to - buffer_start) as usize];
                self.check.feed(self.map, piece);
                kept.extend_from_slice(piece);
                self.counters.set_position(to);
            }
            if last < buffer_end {
                self.check.complete(self.map)?;
            } else {
                break;
            }
        }

        self.offset = buffer_end;
        self.counters.add_bytes(kept.len() as u64);
        Ok(kept)
    }

    fn next_piece(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if self.check.index >= self.map.ranges.len() {
                return Ok(None);
            }
            let Some(buffer) = self.inner.next() else {
                return Err(Error::UnexpectedEnd {
                    offset: self.offset,
                });
            };
            let kept = self.filter(&buffer?)?;
            if !kept.is_empty() {
                return Ok(Some(kept));
            }
        }
    }
}

impl<S: ReadStream> Tracked for BlockMapFilter<'_, S> {
    fn counters(&self) -> Arc<StreamCounters> {
        Arc::clone(&self.counters)
    }
}

impl<S: ReadStream> Iterator for BlockMapFilter<'_, S> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_piece().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

impl<S: ReadStream> ReadStream for BlockMapFilter<'_, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;
    use crate::stream::read_to_end;

    fn image() -> Vec<u8> {
        (0..4096u32).map(|i| (i % 241) as u8).collect()
    }

    fn map_for(data: &[u8]) -> BlockMap {
        BlockMap::for_data(data, 512, ChecksumType::Sha256, &[(0, 0), (2, 3)])
    }

    fn small_chunks() -> Config {
        Config::new().chunk_size(300)
    }

    #[test]
    fn test_json_round_trip_uses_camel_case() {
        let map = map_for(&image());
        let json = map.to_json().unwrap();
        assert!(json.contains("\"imageSize\": 4096"));
        assert!(json.contains("\"checksumType\": \"sha256\""));
        assert_eq!(BlockMap::from_json(&json).unwrap(), map);
    }

    #[test]
    fn test_rejects_overlapping_ranges() {
        let mut map = map_for(&image());
        map.ranges[1].start = 0;
        assert!(map.validate().is_err());
    }

    #[test]
    fn test_mapped_bytes() {
        assert_eq!(map_for(&image()).mapped_bytes(), 512 * 3);
        assert_eq!(map_for(&image()).ranges[1].byte_span(512), (1024, 2047));
    }

    #[test]
    fn test_reader_yields_only_mapped_bytes() {
        let data = image();
        let map = map_for(&data);
        let mut memory = Memory::new(data.clone());

        let mut reader = BlockMapReader::new(&mut memory, &map, &small_chunks()).unwrap();
        let mapped = read_to_end(&mut reader).unwrap();

        let mut expected = data[0..512].to_vec();
        expected.extend_from_slice(&data[1024..2048]);
        assert_eq!(mapped, expected);
        assert_eq!(reader.counters().bytes(), 1536);
    }

    #[test]
    fn test_reader_detects_corrupted_range() {
        let data = image();
        let map = map_for(&data);
        let mut corrupted = data;
        corrupted[1500] ^= 0xFF;
        let mut memory = Memory::new(corrupted);

        let mut reader = BlockMapReader::new(&mut memory, &map, &small_chunks()).unwrap();
        let err = read_to_end(&mut reader).unwrap_err();
        assert!(matches!(
            err,
            Error::BlockVerification {
                start: 1024,
                end: 2047,
                ..
            }
        ));
    }

    #[test]
    fn test_reader_ignores_unmapped_corruption() {
        let data = image();
        let map = map_for(&data);
        let mut corrupted = data;
        corrupted[600] ^= 0xFF;
        let mut memory = Memory::new(corrupted);

        let mut reader = BlockMapReader::new(&mut memory, &map, &small_chunks()).unwrap();
        assert!(read_to_end(&mut reader).is_ok());
    }

    #[test]
    fn test_reader_reports_truncated_source() {
        let data = image();
        let map = map_for(&data);
        let mut memory = Memory::new(data[..1200].to_vec());

        let mut reader = BlockMapReader::new(&mut memory, &map, &small_chunks()).unwrap();
        let err = read_to_end(&mut reader).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEnd { offset: 1200 }));
    }

    #[test]
    fn test_filter_matches_reader() {
        let data = image();
        let map = map_for(&data);
        let config = small_chunks();

        let mut memory = Memory::new(data.clone());
        let stream = memory.create_read_stream(0, None, &config).unwrap();
        let mut filter = BlockMapFilter::new(stream, &map).unwrap();
        let filtered = read_to_end(&mut filter).unwrap();

        let mut other = Memory::new(data);
        let mut reader = BlockMapReader::new(&mut other, &map, &config).unwrap();
        assert_eq!(filtered, read_to_end(&mut reader).unwrap());
    }

    #[test]
    fn test_rejects_range_past_image_end() {
        let mut map = map_for(&image());
        map.ranges.push(BlockRange {
            start: 8,
            end: 8,
            checksum: String::new(),
        });
        assert!(map.validate().is_err());
    }

    #[test]
    fn test_span_stops_at_image_end() {
        let data = image();
        let map = BlockMap::for_data(&data[..1000], 512, ChecksumType::Sha256, &[(0, 1)]);
        assert_eq!(map.span(&map.ranges[0]), (0, 999));
        assert_eq!(map.mapped_bytes(), 1000);
    }

    #[test]
    fn test_reader_unaligned_image_on_exact_size_source() {
        let data = image()[..1000].to_vec();
        let map = BlockMap::for_data(&data, 512, ChecksumType::Sha256, &[(0, 1)]);
        let mut memory = Memory::new(data.clone());

        let mut reader = BlockMapReader::new(&mut memory, &map, &small_chunks()).unwrap();
        assert_eq!(read_to_end(&mut reader).unwrap(), data);
    }

    #[test]
    fn test_reader_unaligned_image_on_larger_source() {
        let data = image()[..1000].to_vec();
        let map = BlockMap::for_data(&data, 512, ChecksumType::Sha256, &[(0, 1)]);
        let mut padded = data.clone();
        padded.resize(4096, 0xEE);
        let mut memory = Memory::new(padded);

        let mut reader = BlockMapReader::new(&mut memory, &map, &small_chunks()).unwrap();
        assert_eq!(read_to_end(&mut reader).unwrap(), data);
    }

    #[test]
    fn test_filter_unaligned_image_on_larger_source() {
        let data = image()[..1000].to_vec();
        let map = BlockMap::for_data(&data, 512, ChecksumType::Sha256, &[(0, 1)]);
        let mut padded = data.clone();
        padded.resize(4096, 0xEE);
        let mut memory = Memory::new(padded);

        let stream = memory
            .create_read_stream(0, None, &small_chunks())
            .unwrap();
        let mut filter = BlockMapFilter::new(stream, &map).unwrap();
        assert_eq!(read_to_end(&mut filter).unwrap(), data);
    }

    #[test]
    fn test_filter_detects_corruption() {
        let data = image();
        let map = map_for(&data);
        let mut corrupted = data;
        corrupted[100] = corrupted[100].wrapping_add(1);

        let mut memory = Memory::new(corrupted);
        let stream = memory.create_read_stream(0, None, &small_chunks()).unwrap();
        let mut filter = BlockMapFilter::new(stream, &map).unwrap();
        assert!(read_to_end(&mut filter).unwrap_err().is_verification());
    }
}
