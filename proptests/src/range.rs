//! Property-based tests for `Range` header parsing.

use crate::strategies::*;
use common::{RangeError, parse_range_header};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// Any accepted header yields a span inside the file.
    #[test]
    fn prop_accepted_ranges_are_in_bounds(
        size in file_size_strategy(),
        start in proptest::option::of(0u64..10_000_000),
        end in proptest::option::of(0u64..10_000_000),
    ) {
        let header = format!(
            "bytes={}-{}",
            start.map(|s| s.to_string()).unwrap_or_default(),
            end.map(|e| e.to_string()).unwrap_or_default(),
        );
        if let Ok(Some(range)) = parse_range_header(Some(&header), size) {
            prop_assert!(range.from_byte <= range.until_byte);
            prop_assert!(range.until_byte < size);
            prop_assert_eq!(range.len(), range.until_byte - range.from_byte + 1);
        }
    }

    #[test]
    fn prop_explicit_range_round_trips(
        (size, range) in sized_range_strategy(),
    ) {
        let header = format!("bytes={}-{}", range.from_byte, range.until_byte);
        prop_assert_eq!(parse_range_header(Some(&header), size), Ok(Some(range)));
    }

    #[test]
    fn prop_start_past_end_of_file_is_unsatisfiable(
        size in file_size_strategy(),
        past in 0u64..1_000_000,
    ) {
        let header = format!("bytes={}-", size + past);
        prop_assert_eq!(
            parse_range_header(Some(&header), size),
            Err(RangeError::Unsatisfiable { size })
        );
    }

    #[test]
    fn prop_suffix_never_exceeds_file(
        size in file_size_strategy(),
        suffix in 1u64..20_000_000,
    ) {
        let header = format!("bytes=-{suffix}");
        let range = parse_range_header(Some(&header), size).unwrap().unwrap();
        prop_assert_eq!(range.until_byte, size - 1);
        prop_assert_eq!(range.len(), suffix.min(size));
    }

    #[test]
    fn prop_garbage_is_malformed(garbage in "[a-z =]{0,12}") {
        prop_assume!(!garbage.trim().starts_with("bytes="));
        let result = parse_range_header(Some(&garbage), 1000);
        prop_assert!(matches!(result, Err(RangeError::Malformed(_))), "{:?}", result);
    }
}
