//! Remote byte-range streaming.
//!
//! Turns a resolved file and a client range into an ordered stream of
//! trimmed chunks. Windows are fetched strictly in ascending order, one at a
//! time, so the stream applies natural backpressure: nothing is read from
//! the remote until the consumer asks for the next piece.

use crate::error::StreamError;
use crate::fetcher::{ChunkFetcher, FetchError, FetchTarget};
use crate::resolver::ContentResolver;
use bytes::Bytes;
use common::{ChunkPlan, FileMetadata, RangeRequest, RemoteError};
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::{info, warn};

pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

impl From<FetchError> for StreamError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Unavailable(reason) => StreamError::Unavailable(reason),
            other => StreamError::Protocol(other.to_string()),
        }
    }
}

pub struct MediaStreamer {
    fetcher: Arc<ChunkFetcher>,
    resolver: Arc<ContentResolver>,
    chunk_size: u64,
}

impl MediaStreamer {
    pub fn new(fetcher: Arc<ChunkFetcher>, resolver: Arc<ContentResolver>, chunk_size: u64) -> Self {
        Self {
            fetcher,
            resolver,
            chunk_size,
        }
    }

    pub fn resolver(&self) -> &Arc<ContentResolver> {
        &self.resolver
    }

    pub fn fetcher(&self) -> &Arc<ChunkFetcher> {
        &self.fetcher
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Stream exactly `range.len()` bytes of `meta` from the remote store.
    ///
    /// The stream ends after the first error it yields.
    pub fn stream_range(
        &self,
        meta: FileMetadata,
        range: RangeRequest,
    ) -> Result<ByteStream, StreamError> {
        let plan = ChunkPlan::new(range, self.chunk_size)?;
        let fetcher = self.fetcher.clone();
        let resolver = self.resolver.clone();

        let stream = async_stream::stream! {
            let mut meta = meta;
            let mut target = FetchTarget::new(meta.location.clone());
            for index in 0..plan.part_count {
                match fetch_part(&fetcher, &resolver, &mut meta, &mut target, &plan, index).await {
                    Ok(part) => yield Ok(part),
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Fetch and trim window `index`, re-resolving once if the reference expired.
async fn fetch_part(
    fetcher: &ChunkFetcher,
    resolver: &ContentResolver,
    meta: &mut FileMetadata,
    target: &mut FetchTarget,
    plan: &ChunkPlan,
    index: u64,
) -> Result<Bytes, StreamError> {
    let offset = plan.offset_of(index);
    let mut refreshed = false;

    let chunk = loop {
        match fetcher.fetch(target, offset, plan.chunk_size).await {
            Ok(chunk) => break chunk,
            Err(FetchError::ReferenceExpired) if !refreshed => {
                refreshed = true;
                let fresh = resolver.refresh(meta.handle).await?;
                if fresh.byte_size != meta.byte_size {
                    warn!(
                        handle = %meta.handle,
                        old_size = meta.byte_size,
                        new_size = fresh.byte_size,
                        "File changed size across reference refresh"
                    );
                    return Err(StreamError::Protocol(format!(
                        "size of {} changed from {} to {}",
                        meta.handle, meta.byte_size, fresh.byte_size
                    )));
                }
                info!(handle = %meta.handle, offset = offset, "File reference refreshed");
                target.location = fresh.location.clone();
                *meta = fresh;
            }
            Err(FetchError::Remote(RemoteError::Fatal { code, message })) => {
                // The message may be gone; force the next request to look it up again
                warn!(handle = %meta.handle, code = code, error = %message, "Dropping cached metadata after fatal read");
                resolver.invalidate(meta.handle);
                return Err(FetchError::Remote(RemoteError::Fatal { code, message }).into());
            }
            Err(e) => return Err(e.into()),
        }
    };

    let got = chunk.len();
    plan.trim(index, chunk).ok_or_else(|| {
        StreamError::Protocol(format!(
            "short read for {} at offset {}: got {} bytes",
            meta.handle, offset, got
        ))
    })
}
