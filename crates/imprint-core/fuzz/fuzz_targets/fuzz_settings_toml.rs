//! Fuzz test for settings TOML parsing
//!
//! Settings deserialization and conversion to a runtime config must not
//! panic on arbitrary TOML.

#![no_main]

use imprint_core::settings::{parse_size, Settings};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(settings) = toml::from_str::<Settings>(data) {
        let _ = toml::to_string_pretty(&settings);
        if let Ok(config) = settings.to_config() {
            assert!(config.chunk_size > 0);
        }
    }

    let wrapped = format!("[io]\n{}", data);
    let _: Result<Settings, _> = toml::from_str(&wrapped);

    if let Ok(size) = parse_size(data) {
        assert!(size > 0);
    }
});
