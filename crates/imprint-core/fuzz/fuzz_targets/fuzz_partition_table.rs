//! Fuzz test for partition table detection
//!
//! Arbitrary disk headers must never panic the GPT or MBR parsers.

#![no_main]

use imprint_core::partition::{detect, PartitionTableType};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some(table) = detect(data) else {
        return;
    };

    for partition in &table.partitions {
        let _ = partition.type_name();
        if table.table_type == PartitionTableType::Mbr {
            assert!(partition.first_lba <= partition.last_lba);
            assert!(partition.id.is_none());
        }
    }
});
