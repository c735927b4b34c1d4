//! Shared proptest strategies for property-based testing.

use common::{BLOCK_SIZE, MAX_CHUNK_SIZE, RangeRequest};
use proptest::prelude::*;

/// Every chunk size the remote store accepts: 4 KiB times a power of two, up to 1 MiB.
pub fn chunk_size_strategy() -> impl Strategy<Value = u64> {
    (0u32..=8).prop_map(|shift| BLOCK_SIZE << shift)
}

/// A non-empty file size, biased towards a few MiB so plans span boundaries.
pub fn file_size_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        1u64..=BLOCK_SIZE * 4,
        1u64..=MAX_CHUNK_SIZE * 4,
    ]
}

/// A file size together with a valid inclusive span inside it.
pub fn sized_range_strategy() -> impl Strategy<Value = (u64, RangeRequest)> {
    file_size_strategy()
        .prop_flat_map(|size| (Just(size), 0..size))
        .prop_flat_map(|(size, from)| (Just(size), Just(from), from..size))
        .prop_map(|(size, from, until)| {
            let range = RangeRequest::new(from, until, size)
                .unwrap_or_else(|e| panic!("generated span must be valid: {e}"));
            (size, range)
        })
}

/// Deterministic file content of `len` bytes.
pub fn file_bytes(len: u64) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
