//! Fuzz test for blockmap parsing
//!
//! Any blockmap accepted by the parser must be well ordered.

#![no_main]

use imprint_core::BlockMap;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let Ok(map) = BlockMap::from_json(data) else {
        return;
    };

    assert!(map.block_size > 0);
    for pair in map.ranges.windows(2) {
        assert!(pair[0].end < pair[1].start, "ranges must be disjoint and ordered");
    }
    let _ = map.to_json();
});
