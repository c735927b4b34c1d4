//! Property-based tests for aligned chunk plans.
//!
//! Tests the following invariants:
//! - Every window is block-aligned, at most 1 MiB, and inside one 1 MiB block
//! - Windows are contiguous and cover the requested span
//! - Trimmed windows concatenate to exactly the requested bytes

use crate::strategies::*;
use bytes::Bytes;
use common::{BLOCK_SIZE, ChunkPlan, MAX_CHUNK_SIZE};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_windows_satisfy_remote_limits(
        (_size, range) in sized_range_strategy(),
        chunk_size in chunk_size_strategy(),
    ) {
        let plan = ChunkPlan::new(range, chunk_size).unwrap();
        for (offset, limit) in plan.windows() {
            prop_assert_eq!(offset % BLOCK_SIZE, 0);
            prop_assert_eq!(limit % BLOCK_SIZE, 0);
            prop_assert!(limit <= MAX_CHUNK_SIZE);
            prop_assert_eq!(
                offset / MAX_CHUNK_SIZE,
                (offset + limit - 1) / MAX_CHUNK_SIZE,
                "window {}+{} crosses a 1 MiB boundary", offset, limit
            );
        }
    }

    #[test]
    fn prop_windows_cover_span(
        (_size, range) in sized_range_strategy(),
        chunk_size in chunk_size_strategy(),
    ) {
        let plan = ChunkPlan::new(range, chunk_size).unwrap();
        let windows: Vec<_> = plan.windows().collect();
        prop_assert_eq!(windows.len() as u64, plan.part_count);

        let (first_offset, _) = windows[0];
        let (last_offset, last_limit) = windows[windows.len() - 1];
        prop_assert!(first_offset <= range.from_byte);
        prop_assert!(range.from_byte < first_offset + chunk_size);
        prop_assert!(last_offset <= range.until_byte);
        prop_assert!(range.until_byte < last_offset + last_limit);

        for pair in windows.windows(2) {
            prop_assert_eq!(pair[0].0 + pair[0].1, pair[1].0);
        }
        prop_assert_eq!(plan.output_len(), range.len());
    }

    #[test]
    fn prop_trimmed_windows_equal_file_slice(
        (size, range) in sized_range_strategy(),
        chunk_size in chunk_size_strategy(),
    ) {
        let data = Bytes::from(file_bytes(size));
        let plan = ChunkPlan::new(range, chunk_size).unwrap();

        let mut out = Vec::with_capacity(range.len() as usize);
        for (index, (offset, limit)) in plan.windows().enumerate() {
            // The remote returns a short final chunk at end of file
            let start = offset.min(size) as usize;
            let end = (offset + limit).min(size) as usize;
            let part = plan.trim(index as u64, data.slice(start..end));
            prop_assert!(part.is_some(), "window {} reported as short read", index);
            out.extend_from_slice(&part.unwrap());
        }
        prop_assert_eq!(
            &out[..],
            &data[range.from_byte as usize..=range.until_byte as usize]
        );
    }

    #[test]
    fn prop_truncated_window_is_detected(
        (size, range) in sized_range_strategy(),
        chunk_size in chunk_size_strategy(),
    ) {
        let data = Bytes::from(file_bytes(size));
        let plan = ChunkPlan::new(range, chunk_size).unwrap();
        let last = plan.part_count - 1;
        let offset = plan.offset_of(last);
        let needed = range.until_byte + 1 - offset;

        let short = data.slice(offset as usize..(offset + needed - 1) as usize);
        prop_assert!(plan.trim(last, short).is_none());
    }

    #[test]
    fn prop_invalid_chunk_sizes_rejected(
        (_size, range) in sized_range_strategy(),
        chunk_size in 1u64..=2 * MAX_CHUNK_SIZE,
    ) {
        let valid = chunk_size % BLOCK_SIZE == 0 && MAX_CHUNK_SIZE % chunk_size == 0;
        prop_assert_eq!(ChunkPlan::new(range, chunk_size).is_ok(), valid);
    }
}
