//! Fuzz test for query shape classification
//!
//! This fuzz target deserializes arbitrary JSON into query descriptors and
//! classifies them under every cache status to find:
//! - Panics or crashes
//! - Non-deterministic decisions
//! - Hits for shapes the snapshot cannot answer
//!
//! Run with: cargo +nightly fuzz run descriptor_fuzz -- -max_total_time=60

#![no_main]

use almanac_cache::{classify, Decision, Plan};
use almanac_core::{CacheOptions, CacheStatus, QueryDescriptor};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(descriptor) = serde_json::from_slice::<QueryDescriptor>(data) {
        let options = CacheOptions::new();
        for status in [
            CacheStatus::Uncached,
            CacheStatus::Caching,
            CacheStatus::Cached,
        ] {
            let first = classify(&descriptor, &options, status);
            let second = classify(&descriptor, &options, status);
            assert_eq!(first, second, "classification must be deterministic");

            // A cache that holds nothing can only answer provably empty queries
            if status != CacheStatus::Cached {
                if let Decision::Hit(plan) = &first {
                    assert_eq!(plan, &Plan::Empty, "only empty hits before population");
                }
            }

            // Structural flags disqualify a query outright
            if descriptor.joins || descriptor.projection || descriptor.locking {
                assert!(
                    matches!(first, Decision::Miss(_)),
                    "flagged shapes never hit"
                );
            }
        }
    }
});
