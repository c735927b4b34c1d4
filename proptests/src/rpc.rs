//! Property-based tests for RPC error classification.

use common::{RemoteError, classify_rpc_error};
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_migration_carries_target_dc(dc in 1i32..=5, code in prop_oneof![Just(303), Just(400)]) {
        let message = format!("FILE_MIGRATE_{dc}");
        prop_assert_eq!(classify_rpc_error(code, &message), RemoteError::Migrated(dc));
    }

    #[test]
    fn prop_flood_wait_carries_delay(secs in 0u64..100_000) {
        let message = format!("FLOOD_WAIT_{secs}");
        match classify_rpc_error(420, &message) {
            RemoteError::Transient { retry_after, .. } => {
                prop_assert_eq!(retry_after, Some(Duration::from_secs(secs)));
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    #[test]
    fn prop_reference_errors_ignore_suffix(suffix in "[A-Z_]{1,16}") {
        let message = format!("FILE_REFERENCE_{suffix}");
        prop_assert_eq!(classify_rpc_error(400, &message), RemoteError::ReferenceExpired);
    }

    #[test]
    fn prop_server_errors_are_transient(code in 500i32..600, message in "[A-Z_]{1,20}") {
        prop_assume!(!message.starts_with("FILE_MIGRATE_"));
        prop_assume!(!message.starts_with("FILE_REFERENCE_"));
        prop_assume!(!message.starts_with("AUTH_KEY_") && !message.starts_with("SESSION_"));
        let classified = classify_rpc_error(code, &message);
        prop_assert!(
            matches!(classified, RemoteError::Transient { .. }),
            "{:?}", classified
        );
    }

    /// Classification is case-insensitive.
    #[test]
    fn prop_case_insensitive(code in -600i32..600, message in "[A-Za-z_0-9]{1,24}") {
        prop_assert_eq!(
            classify_rpc_error(code, &message),
            classify_rpc_error(code, &message.to_ascii_uppercase())
        );
    }
}
