//! Fuzz the alignment helpers used by aligned device I/O

#![no_main]

use arbitrary::Arbitrary;
use imprint_platform::{align_down, align_up, is_aligned};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct AlignmentInput {
    value: u32,
    alignment: u16,
}

fuzz_target!(|input: AlignmentInput| {
    let value = u64::from(input.value);
    let alignment = u64::from(input.alignment);

    if alignment == 0 {
        assert_eq!(align_up(value, 0), value);
        assert_eq!(align_down(value, 0), value);
        assert!(is_aligned(value, 0));
        return;
    }

    let up = align_up(value, alignment);
    let down = align_down(value, alignment);

    assert!(down <= value && value <= up);
    assert!(is_aligned(up, alignment));
    assert!(is_aligned(down, alignment));
    assert!(up - down <= alignment);
    assert_eq!(is_aligned(value, alignment), up == value);
});
