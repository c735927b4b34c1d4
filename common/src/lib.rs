//! Common types for the storage-bot media gateway.
//!
//! This crate provides shared functionality used by the gateway and its tests:
//! - **Domain types**: content handles, data-center ids, location descriptors
//! - **Range translation**: `Range` header parsing and the aligned chunk plan (`range`)
//! - **Remote errors**: classification of Telegram RPC failures by remediation (`rpc`)
//!
//! # Chunk Alignment
//!
//! Telegram's `upload.getFile` only accepts reads whose offset and limit are
//! multiples of 4 KiB, whose limit is at most 1 MiB, and which never straddle a
//! 1 MiB boundary. Every fetch window produced by [`range::ChunkPlan`] satisfies
//! those rules as long as the chunk size passes [`range::is_valid_chunk_size`].

pub mod range;
pub mod rpc;

pub use range::{ChunkPlan, RangeError, RangeRequest, is_valid_chunk_size, parse_range_header};
pub use rpc::{RemoteError, classify_rpc_error};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Constants
// ============================================================================

/// Offset/limit granularity accepted by the remote file-read primitive.
pub const BLOCK_SIZE: u64 = 4096;

/// Largest single read the remote store serves (1 MiB).
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024;

/// Mime type used when neither the remote nor the file name tells us better.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Telegram data-center identifier.
pub type DcId = i32;

// ============================================================================
// Core Types
// ============================================================================

/// Opaque identifier of a stored file: the message id inside the storage channel.
///
/// Handles are issued by the upload pipeline and never change. A handle can go
/// stale if its message is deleted; that is only discovered at resolve time.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ContentHandle(pub u32);

impl fmt::Display for ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHandle {
    type Err = String;

    /// Parse a handle from a URL path segment. Only plain decimal digits are
    /// accepted and zero is rejected (Telegram message ids start at 1).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid content id: {s:?}"));
        }
        match s.parse::<u32>() {
            Ok(0) | Err(_) => Err(format!("invalid content id: {s:?}")),
            Ok(id) => Ok(ContentHandle(id)),
        }
    }
}

/// Identifier of the channel that holds the canonical stored media.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote addressing for one stored document.
///
/// The `file_reference` token expires independently of the media id. A read
/// rejected because of an expired reference must be retried with a freshly
/// resolved descriptor, never with this one.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LocationDescriptor {
    /// Data center that stores the file
    pub dc_id: DcId,
    /// Document id
    pub media_id: i64,
    /// Access hash paired with `media_id`
    pub access_hash: i64,
    /// Opaque, short-lived file reference (as encoded by the remote)
    pub file_reference: String,
}

/// Media attached to a storage-channel message, as reported by the remote store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MediaMessage {
    pub location: LocationDescriptor,
    /// File size in bytes
    pub size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Everything the delivery path needs to serve a handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    pub handle: ContentHandle,
    pub location: LocationDescriptor,
    pub byte_size: u64,
    pub mime_type: String,
    pub file_name: String,
}
