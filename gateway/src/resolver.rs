//! Content handle resolution.
//!
//! Maps a [`ContentHandle`] to the metadata and remote location of the media
//! stored under it. Results are kept in a bounded in-memory LRU; entries are
//! dropped when a read reports the file reference as expired.

use crate::error::StreamError;
use crate::helpers::detect_content_type;
use crate::metrics::Metrics;
use crate::remote::{MessageStore, StorageLocationProvider};
use common::{ContentHandle, FileMetadata, MediaMessage, RemoteError};
use quick_cache::sync::Cache;
use std::sync::Arc;
use tracing::debug;

pub struct ContentResolver {
    store: Arc<dyn MessageStore>,
    location: Arc<dyn StorageLocationProvider>,
    cache: Cache<ContentHandle, FileMetadata>,
    metrics: Metrics,
}

impl ContentResolver {
    pub fn new(
        store: Arc<dyn MessageStore>,
        location: Arc<dyn StorageLocationProvider>,
        cache_entries: usize,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            location,
            cache: Cache::new(cache_entries),
            metrics,
        }
    }

    pub async fn resolve(&self, handle: ContentHandle) -> Result<FileMetadata, StreamError> {
        if let Some(meta) = self.cache.get(&handle) {
            return Ok(meta);
        }

        let channel = self
            .location
            .storage_location()
            .ok_or(StreamError::Unconfigured)?;

        let message = self
            .store
            .get_media(channel, handle)
            .await
            .map_err(|e| match e {
                RemoteError::Transient { reason, .. } => StreamError::Unavailable(reason),
                other => StreamError::Protocol(other.to_string()),
            })?
            .ok_or(StreamError::NotFound(handle))?;

        let meta = into_metadata(handle, message);
        debug!(
            handle = %handle,
            size = meta.byte_size,
            dc = meta.location.dc_id,
            "Resolved content handle"
        );
        // Racing resolvers for the same handle insert equal values
        self.cache.insert(handle, meta.clone());
        Ok(meta)
    }

    pub fn invalidate(&self, handle: ContentHandle) {
        self.cache.remove(&handle);
    }

    /// Drop any cached entry and resolve again, yielding a fresh file reference.
    pub async fn refresh(&self, handle: ContentHandle) -> Result<FileMetadata, StreamError> {
        self.metrics.reference_refreshes.inc();
        self.invalidate(handle);
        self.resolve(handle).await
    }
}

fn into_metadata(handle: ContentHandle, message: MediaMessage) -> FileMetadata {
    let file_name = message
        .file_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("download_{handle}"));
    let mime_type = message
        .mime_type
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| detect_content_type(Some(&file_name)));
    FileMetadata {
        handle,
        location: message.location,
        byte_size: message.size,
        mime_type,
        file_name,
    }
}
