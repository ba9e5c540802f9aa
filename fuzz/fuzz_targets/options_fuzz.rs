//! Fuzz test for JSON-sourced cache configuration
//!
//! This fuzz target feeds arbitrary byte sequences through the JSON option
//! parser to find:
//! - Panics or crashes
//! - Broken normalization invariants
//!
//! Run with: cargo +nightly fuzz run options_fuzz -- -max_total_time=60

#![no_main]

use almanac_core::CacheOptions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Only well-formed JSON reaches the option parser in practice; the
    // parser itself must survive any JSON value without panicking
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        match CacheOptions::from_json(&value) {
            Ok(options) => {
                // Invariants that hold for every accepted input:
                // 1. The id attribute is always indexed
                assert!(options.is_hashed("id"), "id must always be hashed");

                // 2. The index list carries no duplicates
                let hashed = options.hashed();
                for (i, attr) in hashed.iter().enumerate() {
                    assert!(
                        !hashed[..i].contains(attr),
                        "hashed attributes should be unique"
                    );
                }
            }
            Err(err) => {
                // Rejections must say what was wrong
                assert!(!err.to_string().is_empty(), "errors should render");
            }
        }
    }
});
