//! Fuzz test for content-type sniffing
//!
//! Magic byte and file name detection must handle any input.

#![no_main]

use imprint_core::content::{content_type_from_magic, content_type_from_name, GZIP};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let result = content_type_from_magic(data);
    if data.starts_with(&[0x1F, 0x8B]) {
        assert_eq!(result, Some(GZIP), "gzip magic should be detected");
    }
    if data.len() < 3 && !data.starts_with(&[0x1F, 0x8B]) {
        assert!(result.is_none(), "short data should not match");
    }

    if let Ok(name) = std::str::from_utf8(data) {
        let _ = content_type_from_name(name);
    }
});
