//! Classification of remote file-read failures.
//!
//! Telegram reports RPC failures as `(error_code, error_message)` pairs such as
//! `(303, "FILE_MIGRATE_4")` or `(420, "FLOOD_WAIT_17")`. The gateway does not
//! care about the exact name, only about what to do next, so every failure is
//! folded into one [`RemoteError`] variant per remediation.

use crate::DcId;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Session is no longer authorized on its data center; recreate it.
    #[error("session unauthenticated")]
    Unauthenticated,

    /// The file lives on another data center; retry there.
    #[error("file migrated to dc {0}")]
    Migrated(DcId),

    /// The location's file reference expired; re-resolve before retrying.
    #[error("file reference expired")]
    ReferenceExpired,

    /// Flood wait, remote overload or a transport failure.
    #[error("transient remote failure: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("remote error {code}: {message}")]
    Fatal { code: i32, message: String },
}

impl RemoteError {
    pub fn transient(reason: impl Into<String>) -> Self {
        RemoteError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn fatal(code: i32, message: impl Into<String>) -> Self {
        RemoteError::Fatal {
            code,
            message: message.into(),
        }
    }
}

const UNAUTHENTICATED: &[&str] = &[
    "AUTH_KEY_UNREGISTERED",
    "AUTH_KEY_INVALID",
    "AUTH_KEY_PERM_EMPTY",
    "SESSION_REVOKED",
    "SESSION_EXPIRED",
];

/// Map a raw RPC failure onto its remediation.
pub fn classify_rpc_error(code: i32, message: &str) -> RemoteError {
    let name = message.trim().to_ascii_uppercase();

    if let Some(dc) = name
        .strip_prefix("FILE_MIGRATE_")
        .and_then(|n| n.parse::<DcId>().ok())
    {
        return RemoteError::Migrated(dc);
    }

    if name.starts_with("FILE_REFERENCE_") {
        return RemoteError::ReferenceExpired;
    }

    if UNAUTHENTICATED.contains(&name.as_str()) || code == 401 {
        return RemoteError::Unauthenticated;
    }

    if let Some(secs) = name
        .strip_prefix("FLOOD_WAIT_")
        .or_else(|| name.strip_prefix("FLOOD_PREMIUM_WAIT_"))
        .and_then(|n| n.parse::<u64>().ok())
    {
        return RemoteError::Transient {
            reason: name.clone(),
            retry_after: Some(Duration::from_secs(secs)),
        };
    }

    // -503 is the "Timeout" pseudo-error clients see when the dc is overloaded
    if code >= 500 || code == -503 || code == 420 {
        return RemoteError::transient(name);
    }

    RemoteError::Fatal {
        code,
        message: name,
    }
}
