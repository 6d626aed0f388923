//! Partition table detection for images and devices
//!
//! Looks at the first [`PARTITION_HEADER_SIZE`] bytes of a resource. GPT is
//! tried first at every candidate sector size, since some media use
//! 1024/2048/4096 byte sectors; an MBR parse of the first sector is the
//! fallback. Finding nothing is a normal outcome.

use bootsector::{list_partitions, Attributes, Options, ReadGPT, SectorSize};
use serde::{Deserialize, Serialize};

/// Bytes read from the start of a resource for partition detection
///
/// GPT with 4096-byte sectors needs the header at 4096 and the entry array
/// at 8192; 64 KiB covers that with room to spare.
pub const PARTITION_HEADER_SIZE: u64 = 64 * 1024;

/// Sector sizes a GPT header is looked for at, in order
pub const GPT_SECTOR_SIZES: [u16; 4] = [512, 1024, 2048, 4096];

/// MBR sectors are always 512 bytes
const MBR_SECTOR_SIZE: u16 = 512;
const MBR_SIGNATURE_OFFSET: usize = 510;

/// Kind of partition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTableType {
    /// Master Boot Record
    Mbr,
    /// GUID Partition Table
    Gpt,
}

impl std::fmt::Display for PartitionTableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionTableType::Mbr => write!(f, "MBR"),
            PartitionTableType::Gpt => write!(f, "GPT"),
        }
    }
}

/// One partition entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Type code (`0x83`) for MBR, type GUID for GPT
    #[serde(rename = "type")]
    pub partition_type: String,
    /// Unique partition GUID (GPT only)
    pub id: Option<String>,
    /// Partition label (GPT only)
    pub name: Option<String>,
    /// First sector
    #[serde(rename = "firstLBA")]
    pub first_lba: u64,
    /// Last sector (inclusive)
    #[serde(rename = "lastLBA")]
    pub last_lba: u64,
    /// MBR extended container partition
    pub extended: bool,
}

impl Partition {
    /// Human-readable name of the partition type
    pub fn type_name(&self) -> String {
        match u8::from_str_radix(self.partition_type.trim_start_matches("0x"), 16) {
            Ok(code) if self.partition_type.starts_with("0x") => mbr_type_name(code),
            _ => gpt_type_name(&self.partition_type).to_string(),
        }
    }

    fn from_entry(entry: &bootsector::Partition, sector_size: u16) -> Option<Self> {
        let sector_size = u64::from(sector_size);
        let sectors = entry.len / sector_size;
        if sectors == 0 {
            return None;
        }
        let first_lba = entry.first_byte / sector_size;
        let last_lba = first_lba + sectors - 1;

        match &entry.attributes {
            Attributes::MBR { type_code, .. } => (*type_code != 0).then(|| Partition {
                partition_type: format!("0x{:02x}", type_code),
                id: None,
                name: None,
                first_lba,
                last_lba,
                extended: is_extended(*type_code),
            }),
            Attributes::GPT {
                type_uuid,
                partition_uuid,
                name,
                ..
            } => Some(Partition {
                partition_type: format_guid(type_uuid),
                id: Some(format_guid(partition_uuid)),
                name: (!name.is_empty()).then(|| name.clone()),
                first_lba,
                last_lba,
                extended: false,
            }),
        }
    }
}

/// A detected partition table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTable {
    /// `mbr` or `gpt`
    #[serde(rename = "type")]
    pub table_type: PartitionTableType,
    /// Partitions in table order, empty slots left out
    pub partitions: Vec<Partition>,
}

/// Detect a partition table in the first bytes of a resource
pub fn detect(header: &[u8]) -> Option<PartitionTable> {
    for sector_size in GPT_SECTOR_SIZES {
        if let Some(table) = read_gpt(header, sector_size) {
            tracing::debug!("found GPT with {}-byte sectors", sector_size);
            return Some(table);
        }
    }
    read_mbr(header)
}

fn read_gpt(header: &[u8], sector_size: u16) -> Option<PartitionTable> {
    let options = Options {
        sector_size: SectorSize::Known(sector_size),
        ..Options::default()
    };
    let entries = list_partitions(header, &options).ok()?;

    // A plain MBR comes back from the same call; only GPT entries count here
    if !entries
        .iter()
        .any(|entry| matches!(entry.attributes, Attributes::GPT { .. }))
    {
        return None;
    }

    Some(PartitionTable {
        table_type: PartitionTableType::Gpt,
        partitions: entries
            .iter()
            .filter_map(|entry| Partition::from_entry(entry, sector_size))
            .collect(),
    })
}

fn read_mbr(header: &[u8]) -> Option<PartitionTable> {
    if header.get(MBR_SIGNATURE_OFFSET..MBR_SIGNATURE_OFFSET + 2)? != [0x55, 0xAA] {
        return None;
    }

    let options = Options {
        gpt: ReadGPT::Never,
        sector_size: SectorSize::Known(MBR_SECTOR_SIZE),
        ..Options::default()
    };
    // The signature alone marks an MBR; entries that do not parse leave it empty
    let partitions = match list_partitions(header, &options) {
        Ok(entries) => entries
            .iter()
            .filter_map(|entry| Partition::from_entry(entry, MBR_SECTOR_SIZE))
            .collect(),
        Err(e) => {
            tracing::debug!("MBR signature present but entries unreadable: {:?}", e);
            Vec::new()
        }
    };

    Some(PartitionTable {
        table_type: PartitionTableType::Mbr,
        partitions,
    })
}

fn is_extended(type_code: u8) -> bool {
    matches!(type_code, 0x05 | 0x0F | 0x85)
}

/// Format a GUID in its mixed-endian on-disk layout
pub fn format_guid(guid: &[u8; 16]) -> String {
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        guid[3], guid[2], guid[1], guid[0],
        guid[5], guid[4],
        guid[7], guid[6],
        guid[8], guid[9],
        guid[10], guid[11], guid[12], guid[13], guid[14], guid[15]
    )
}

/// Human-readable name for a GPT partition type GUID
pub fn gpt_type_name(guid: &str) -> &'static str {
    match guid.to_ascii_uppercase().as_str() {
        "C12A7328-F81F-11D2-BA4B-00A0C93EC93B" => "EFI System",
        "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7" => "Microsoft Basic Data",
        "E3C9E316-0B5C-4DB8-817D-F92DF00215AE" => "Microsoft Reserved",
        "DE94BBA4-06D1-4D40-A16A-BFD50179D6AC" => "Windows Recovery",
        "0FC63DAF-8483-4772-8E79-3D69D8477DE4" => "Linux filesystem",
        "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F" => "Linux swap",
        "E6D6D379-F507-44C2-A23C-238F2A3DF928" => "Linux LVM",
        "A19D880F-05FC-4D3B-A006-743F0F84911E" => "Linux RAID",
        "933AC7E1-2EB4-4F13-B844-0E14E2AEF915" => "Linux /home",
        "4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709" => "Linux root (x86-64)",
        "B921B045-1DF0-41C3-AF44-4C6F280D3FAE" => "Linux root (ARM64)",
        "21686148-6449-6E6F-744E-656564454649" => "BIOS boot",
        "48465300-0000-11AA-AA11-00306543ECAC" => "Apple HFS+",
        "7C3457EF-0000-11AA-AA11-00306543ECAC" => "Apple APFS",
        "516E7CB4-6ECF-11D6-8FF8-00022D09712B" => "FreeBSD data",
        "FE3A2A5D-4F32-41A7-B725-ACCC3285A309" => "ChromeOS kernel",
        "3CB8E202-3B7E-47DD-8A3C-7FF2A13CFCEC" => "ChromeOS root",
        _ => "Unknown",
    }
}

/// Human-readable name for an MBR partition type code
pub fn mbr_type_name(type_code: u8) -> String {
    let name = match type_code {
        0x00 => "Empty",
        0x01 => "FAT12",
        0x04 => "FAT16 (<32M)",
        0x05 => "Extended",
        0x06 => "FAT16",
        0x07 => "NTFS/HPFS/exFAT",
        0x0B => "W95 FAT32",
        0x0C => "W95 FAT32 (LBA)",
        0x0E => "W95 FAT16 (LBA)",
        0x0F => "W95 Extended (LBA)",
        0x11 => "Hidden FAT12",
        0x14 => "Hidden FAT16 (<32M)",
        0x16 => "Hidden FAT16",
        0x17 => "Hidden NTFS",
        0x1B => "Hidden W95 FAT32",
        0x1C => "Hidden W95 FAT32 (LBA)",
        0x1E => "Hidden W95 FAT16 (LBA)",
        0x82 => "Linux swap",
        0x83 => "Linux",
        0x85 => "Linux extended",
        0x8E => "Linux LVM",
        0xA5 => "FreeBSD",
        0xA6 => "OpenBSD",
        0xA9 => "NetBSD",
        0xAF => "Apple HFS+",
        0xEE => "GPT protective",
        0xEF => "EFI System",
        0xFD => "Linux RAID",
        _ => return format!("Type 0x{:02X}", type_code),
    };
    name.to_string()
}

/// Format a size in bytes to human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const EFI_SYSTEM: [u8; 16] = [
        0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9,
        0x3B,
    ];

    const MBR_TABLE_OFFSET: usize = 446;
    const MBR_ENTRY_SIZE: usize = 16;

    fn put_u32(buffer: &mut [u8], offset: usize, value: u32) {
        buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u64(buffer: &mut [u8], offset: usize, value: u64) {
        buffer[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Header buffer with an MBR holding the given (type, first, sectors) entries
    pub(crate) fn mbr_image(entries: &[(u8, u32, u32)]) -> Vec<u8> {
        let mut buffer = vec![0u8; PARTITION_HEADER_SIZE as usize];
        for (index, &(type_code, first, sectors)) in entries.iter().enumerate() {
            let offset = MBR_TABLE_OFFSET + index * MBR_ENTRY_SIZE;
            buffer[offset] = if index == 0 { 0x80 } else { 0x00 };
            buffer[offset + 4] = type_code;
            put_u32(&mut buffer, offset + 8, first);
            put_u32(&mut buffer, offset + 12, sectors);
        }
        buffer[510] = 0x55;
        buffer[511] = 0xAA;
        buffer
    }

    /// Header buffer with a single-partition GPT at `sector_size`
    pub(crate) fn gpt_image(sector_size: usize) -> Vec<u8> {
        let mut buffer = mbr_image(&[(0xEE, 1, 0xFFFF_FFFF)]);
        buffer[MBR_TABLE_OFFSET] = 0x00;

        let entries_offset = 2 * sector_size;
        let entry = &mut buffer[entries_offset..entries_offset + 128];
        entry[0..16].copy_from_slice(&EFI_SYSTEM);
        entry[16..32].copy_from_slice(&[0x11; 16]);
        put_u64(entry, 32, 34);
        put_u64(entry, 40, 2081);
        for (i, unit) in "boot".encode_utf16().enumerate() {
            entry[56 + i * 2..58 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        let entries_crc = crc32fast::hash(&buffer[entries_offset..entries_offset + 128 * 128]);

        let header = &mut buffer[sector_size..sector_size + 92];
        header[0..8].copy_from_slice(b"EFI PART");
        put_u32(header, 8, 0x0001_0000);
        put_u32(header, 12, 92);
        put_u64(header, 24, 1);
        put_u64(header, 32, 1_048_575);
        put_u64(header, 40, 34);
        put_u64(header, 48, 1_048_542);
        header[56..72].copy_from_slice(&[0x22; 16]);
        put_u64(header, 72, 2);
        put_u32(header, 80, 128);
        put_u32(header, 84, 128);
        put_u32(header, 88, entries_crc);
        let header_crc = crc32fast::hash(header);
        put_u32(header, 16, header_crc);

        buffer
    }

    #[test]
    fn test_detect_mbr() {
        let table = detect(&mbr_image(&[(0x0C, 2048, 4096), (0x83, 6144, 8192)])).unwrap();
        assert_eq!(table.table_type, PartitionTableType::Mbr);
        assert_eq!(table.partitions.len(), 2);
        assert_eq!(table.partitions[0].partition_type, "0x0c");
        assert_eq!(table.partitions[0].first_lba, 2048);
        assert_eq!(table.partitions[0].last_lba, 6143);
        assert_eq!(table.partitions[1].type_name(), "Linux");
        assert!(!table.partitions[1].extended);
    }

    #[test]
    fn test_detect_mbr_extended() {
        let table = detect(&mbr_image(&[(0x83, 2048, 100), (0x05, 4096, 100)])).unwrap();
        assert!(table.partitions[1].extended);
    }

    #[test]
    fn test_signature_with_odd_status_byte_is_mbr() {
        let mut buffer = mbr_image(&[]);
        buffer[MBR_TABLE_OFFSET] = 0x4E;

        let table = detect(&buffer).unwrap();
        assert_eq!(table.table_type, PartitionTableType::Mbr);
        assert!(table.partitions.is_empty());
    }

    #[test]
    fn test_empty_mbr_is_still_mbr() {
        let table = detect(&mbr_image(&[])).unwrap();
        assert_eq!(table.table_type, PartitionTableType::Mbr);
        assert!(table.partitions.is_empty());
    }

    #[test]
    fn test_no_signature_no_table() {
        assert_eq!(detect(&vec![0u8; 4096]), None);
        assert_eq!(detect(&[]), None);
        assert_eq!(detect(&[0x55; 100]), None);
    }

    #[test]
    fn test_detect_gpt_512() {
        let table = detect(&gpt_image(512)).unwrap();
        assert_eq!(table.table_type, PartitionTableType::Gpt);
        assert_eq!(table.partitions.len(), 1);

        let partition = &table.partitions[0];
        assert_eq!(partition.partition_type, "C12A7328-F81F-11D2-BA4B-00A0C93EC93B");
        assert_eq!(partition.type_name(), "EFI System");
        assert_eq!(partition.name.as_deref(), Some("boot"));
        assert_eq!(partition.first_lba, 34);
        assert_eq!(partition.last_lba, 2081);
    }

    #[test]
    fn test_detect_gpt_only_at_2048() {
        let mut buffer = gpt_image(2048);
        buffer[512..1024].fill(0xA5);
        buffer[1024..1536].copy_from_slice(&[0x5A; 512]);

        let table = detect(&buffer).unwrap();
        assert_eq!(table.table_type, PartitionTableType::Gpt);
        assert_eq!(table.partitions.len(), 1);
    }

    #[test]
    fn test_corrupted_gpt_header_falls_back_to_mbr() {
        let mut buffer = gpt_image(512);
        buffer[512 + 40] ^= 0xFF;
        let table = detect(&buffer).unwrap();
        assert_eq!(table.table_type, PartitionTableType::Mbr);
        assert_eq!(table.partitions[0].type_name(), "GPT protective");
    }

    #[test]
    fn test_serialization_shape() {
        let table = detect(&mbr_image(&[(0x83, 2048, 100)])).unwrap();
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["type"], "mbr");
        assert_eq!(json["partitions"][0]["type"], "0x83");
        assert_eq!(json["partitions"][0]["firstLBA"], 2048);
        assert_eq!(json["partitions"][0]["lastLBA"], 2147);
        assert_eq!(json["partitions"][0]["extended"], false);
    }

    #[test]
    fn test_mbr_type_names() {
        assert_eq!(mbr_type_name(0x0C), "W95 FAT32 (LBA)");
        assert_eq!(mbr_type_name(0xEF), "EFI System");
        assert_eq!(mbr_type_name(0x42), "Type 0x42");
    }

    #[test]
    fn test_gpt_type_name_case_insensitive() {
        assert_eq!(
            gpt_type_name("0fc63daf-8483-4772-8e79-3d69d8477de4"),
            "Linux filesystem"
        );
        assert_eq!(gpt_type_name("00000000-0000-0000-0000-000000000001"), "Unknown");
    }

    #[test]
    fn test_format_guid() {
        assert_eq!(format_guid(&EFI_SYSTEM), "C12A7328-F81F-11D2-BA4B-00A0C93EC93B");
        assert_eq!(format_guid(&[0u8; 16]), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(16 * 1024 * 1024 * 1024), "16.0 GB");
    }
}
