//! Byte-range handling: `Range` header parsing and the aligned chunk plan.
//!
//! A client asks for an arbitrary inclusive span `[from_byte, until_byte]`.
//! The remote store only hands out aligned windows, so the span is widened
//! to window boundaries, fetched window by window, and trimmed back:
//!
//! ```text
//!  aligned_offset        from_byte                          until_byte
//!  |<-- leading_trim -->|<============ client span ============>|
//!  [ window 0          ][ window 1 ] ... [ window n-1                  ]
//!                                        |<-- trailing_keep -->|
//! ```

use crate::{BLOCK_SIZE, MAX_CHUNK_SIZE};
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RangeError {
    /// Header present but not of the form `bytes=<start>-<end>` / `bytes=-<suffix>`.
    #[error("malformed range header: {0}")]
    Malformed(String),

    /// Syntactically fine, but no byte of the file falls inside it.
    #[error("range not satisfiable for size {size}")]
    Unsatisfiable { size: u64 },

    #[error("chunk size {0} must be a multiple of 4096 that divides 1 MiB")]
    InvalidChunkSize(u64),
}

/// Inclusive byte span `from_byte..=until_byte` within a file.
///
/// Construction guarantees `from_byte <= until_byte < size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub from_byte: u64,
    pub until_byte: u64,
}

impl RangeRequest {
    pub fn new(from_byte: u64, until_byte: u64, size: u64) -> Result<Self, RangeError> {
        if from_byte > until_byte || until_byte >= size {
            return Err(RangeError::Unsatisfiable { size });
        }
        Ok(Self {
            from_byte,
            until_byte,
        })
    }

    /// The whole file. `None` for an empty file, which has no addressable byte.
    pub fn full(size: u64) -> Option<Self> {
        size.checked_sub(1).map(|last| Self {
            from_byte: 0,
            until_byte: last,
        })
    }

    /// Number of bytes in the span.
    pub fn len(&self) -> u64 {
        self.until_byte - self.from_byte + 1
    }

    /// Never true; a range always covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for the `Content-Range` response header.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.from_byte, self.until_byte, size)
    }
}

/// Parse an HTTP `Range` header value against a file of `size` bytes.
///
/// Supports the single-range forms of RFC 7233:
/// - `bytes=0-499`: first 500 bytes
/// - `bytes=500-`: from byte 500 to the end
/// - `bytes=-500`: last 500 bytes (clamped to the file)
///
/// An end past the last byte is clamped. Multi-range requests are rejected as
/// malformed. Returns `Ok(None)` when no header was sent.
pub fn parse_range_header(
    header: Option<&str>,
    size: u64,
) -> Result<Option<RangeRequest>, RangeError> {
    let Some(raw) = header else {
        return Ok(None);
    };
    let malformed = || RangeError::Malformed(raw.to_string());

    let byte_range = raw.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
    if byte_range.contains(',') {
        return Err(malformed());
    }
    let (start, end) = byte_range.split_once('-').ok_or_else(malformed)?;
    let (start, end) = (start.trim(), end.trim());

    // Suffix range: bytes=-N
    if start.is_empty() {
        let suffix = parse_decimal(end).ok_or_else(malformed)?;
        if suffix == 0 || size == 0 {
            return Err(RangeError::Unsatisfiable { size });
        }
        let from = size.saturating_sub(suffix);
        return RangeRequest::new(from, size - 1, size).map(Some);
    }

    let from = parse_decimal(start).ok_or_else(malformed)?;
    if size == 0 {
        return Err(RangeError::Unsatisfiable { size });
    }
    let until = if end.is_empty() {
        size - 1
    } else {
        parse_decimal(end).ok_or_else(malformed)?.min(size - 1)
    };
    RangeRequest::new(from, until, size).map(Some)
}

/// Digits only: `u64::from_str` would also accept a leading `+`.
fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Whether `chunk_size` yields windows the remote store accepts: a multiple of
/// the 4 KiB block that divides 1 MiB, so no window straddles a 1 MiB boundary.
pub fn is_valid_chunk_size(chunk_size: u64) -> bool {
    chunk_size >= BLOCK_SIZE
        && chunk_size % BLOCK_SIZE == 0
        && MAX_CHUNK_SIZE % chunk_size == 0
}

/// Aligned fetch plan for one [`RangeRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: u64,
    /// Offset of the first window (`from_byte` rounded down)
    pub aligned_offset: u64,
    /// Bytes to drop from the front of the first window
    pub leading_trim: u64,
    /// Bytes to keep from the front of the last window
    pub trailing_keep: u64,
    pub part_count: u64,
}

impl ChunkPlan {
    pub fn new(range: RangeRequest, chunk_size: u64) -> Result<Self, RangeError> {
        if !is_valid_chunk_size(chunk_size) {
            return Err(RangeError::InvalidChunkSize(chunk_size));
        }
        let leading_trim = range.from_byte % chunk_size;
        Ok(Self {
            chunk_size,
            aligned_offset: range.from_byte - leading_trim,
            leading_trim,
            trailing_keep: range.until_byte % chunk_size + 1,
            part_count: range.until_byte / chunk_size - range.from_byte / chunk_size + 1,
        })
    }

    /// Remote offset of window `index`.
    pub fn offset_of(&self, index: u64) -> u64 {
        self.aligned_offset + index * self.chunk_size
    }

    /// `(offset, limit)` of every window, in ascending order.
    pub fn windows(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        (0..self.part_count).map(move |i| (self.offset_of(i), self.chunk_size))
    }

    /// Total bytes the plan yields after trimming.
    pub fn output_len(&self) -> u64 {
        (self.part_count - 1) * self.chunk_size + self.trailing_keep - self.leading_trim
    }

    /// Cut window `index` down to the part that belongs to the client span.
    ///
    /// Returns `None` if the remote returned fewer bytes than the plan needs
    /// from that window (a short read).
    pub fn trim(&self, index: u64, chunk: Bytes) -> Option<Bytes> {
        let start = if index == 0 { self.leading_trim } else { 0 };
        let end = if index + 1 == self.part_count {
            self.trailing_keep
        } else {
            self.chunk_size
        };
        if (chunk.len() as u64) < end {
            return None;
        }
        Some(chunk.slice(start as usize..end as usize))
    }
}
