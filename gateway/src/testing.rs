//! In-memory remote store with failure injection, for unit tests.

use crate::error::StreamError;
use crate::fetcher::ChunkFetcher;
use crate::metrics::Metrics;
use crate::remote::{ConfiguredStorageLocation, MessageStore, RemoteSession, SessionConnector};
use crate::resolver::ContentResolver;
use crate::session::SessionPool;
use crate::stream::{ByteStream, MediaStreamer};
use async_trait::async_trait;
use bytes::Bytes;
use common::{
    BLOCK_SIZE, ChannelId, ContentHandle, DcId, LocationDescriptor, MAX_CHUNK_SIZE, MediaMessage,
    RemoteError,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Deterministic, non-repeating-per-block test payload.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + i / 4096) as u8).collect()
}

/// Resolver, session pool and fetcher wired to `remote`, storage channel -100.
pub fn streamer_for(remote: &ScriptedRemote, chunk_size: u64) -> Arc<MediaStreamer> {
    let metrics = Metrics::new();
    let resolver = Arc::new(ContentResolver::new(
        remote.store(),
        Arc::new(ConfiguredStorageLocation::new(Some(-100))),
        64,
        metrics.clone(),
    ));
    let sessions = Arc::new(SessionPool::new(remote.connector(), metrics.clone()));
    let fetcher = Arc::new(ChunkFetcher::new(
        sessions,
        metrics,
        Duration::from_millis(1),
    ));
    Arc::new(MediaStreamer::new(fetcher, resolver, chunk_size))
}

/// Drain a body stream, stopping at the first error.
pub async fn collect(mut stream: ByteStream) -> Result<Vec<u8>, StreamError> {
    let mut out = Vec::new();
    while let Some(part) = stream.next().await {
        out.extend_from_slice(&part?);
    }
    Ok(out)
}

struct State {
    data: Bytes,
    file_dc: DcId,
    advertised_dc: DcId,
    reference_generation: u32,
    present: bool,
    file_name: Option<String>,
    mime_type: Option<String>,
    injected: VecDeque<RemoteError>,
    lookup_error: Option<RemoteError>,
    fail_after_reads: Option<usize>,
    read_delay: Option<Duration>,
    connect_delay: Option<Duration>,
    connects: HashMap<DcId, usize>,
}

struct Inner {
    state: Mutex<State>,
    reads: AtomicUsize,
    lookups: AtomicUsize,
    closed: AtomicUsize,
}

/// A single stored file served from memory.
///
/// The file lives on dc 2 unless moved; sessions on any other dc answer with
/// `Migrated`. Reads carrying an outdated file reference answer with
/// `ReferenceExpired`.
#[derive(Clone)]
pub struct ScriptedRemote {
    inner: Arc<Inner>,
}

impl ScriptedRemote {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    data: Bytes::from(data),
                    file_dc: 2,
                    advertised_dc: 2,
                    reference_generation: 1,
                    present: true,
                    file_name: Some("movie.mp4".to_string()),
                    mime_type: Some("video/mp4".to_string()),
                    injected: VecDeque::new(),
                    lookup_error: None,
                    fail_after_reads: None,
                    read_delay: None,
                    connect_delay: None,
                    connects: HashMap::new(),
                }),
                reads: AtomicUsize::new(0),
                lookups: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }),
        }
    }

    pub fn connector(&self) -> Arc<dyn SessionConnector> {
        Arc::new(self.clone())
    }

    pub fn store(&self) -> Arc<dyn MessageStore> {
        Arc::new(self.clone())
    }

    /// Descriptor as the message store currently reports it.
    pub fn location(&self) -> LocationDescriptor {
        let state = self.inner.state.lock();
        LocationDescriptor {
            dc_id: state.advertised_dc,
            media_id: 1,
            access_hash: 7,
            file_reference: format!("ref-{}", state.reference_generation),
        }
    }

    /// Queue an error returned by the next read, ahead of any other check.
    pub fn inject(&self, error: RemoteError) {
        self.inner.state.lock().injected.push_back(error);
    }

    pub fn move_to_dc(&self, dc: DcId) {
        self.inner.state.lock().file_dc = dc;
    }

    pub fn expire_reference(&self) {
        self.inner.state.lock().reference_generation += 1;
    }

    pub fn set_present(&self, present: bool) {
        self.inner.state.lock().present = present;
    }

    pub fn set_media_names(&self, file_name: Option<&str>, mime_type: Option<&str>) {
        let mut state = self.inner.state.lock();
        state.file_name = file_name.map(str::to_string);
        state.mime_type = mime_type.map(str::to_string);
    }

    pub fn fail_lookups_with(&self, error: Option<RemoteError>) {
        self.inner.state.lock().lookup_error = error;
    }

    /// Every read after the first `reads` fails fatally (`None` to heal).
    pub fn fail_after_reads(&self, reads: Option<usize>) {
        self.inner.state.lock().fail_after_reads = reads;
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.inner.state.lock().read_delay = Some(delay);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.inner.state.lock().connect_delay = Some(delay);
    }

    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.inner.lookups.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn connects_to(&self, dc: DcId) -> usize {
        self.inner
            .state
            .lock()
            .connects
            .get(&dc)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.inner.state.lock().connects.values().sum()
    }
}

#[async_trait]
impl MessageStore for ScriptedRemote {
    async fn get_media(
        &self,
        _channel: ChannelId,
        _handle: ContentHandle,
    ) -> Result<Option<MediaMessage>, RemoteError> {
        self.inner.lookups.fetch_add(1, Ordering::SeqCst);
        let (error, present, size, file_name, mime_type) = {
            let state = self.inner.state.lock();
            (
                state.lookup_error.clone(),
                state.present,
                state.data.len() as u64,
                state.file_name.clone(),
                state.mime_type.clone(),
            )
        };
        if let Some(error) = error {
            return Err(error);
        }
        if !present {
            return Ok(None);
        }
        Ok(Some(MediaMessage {
            location: self.location(),
            size,
            mime_type,
            file_name,
        }))
    }
}

#[async_trait]
impl SessionConnector for ScriptedRemote {
    async fn connect(&self, dc: DcId) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        let delay = self.inner.state.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        *self.inner.state.lock().connects.entry(dc).or_insert(0) += 1;
        Ok(Arc::new(ScriptedSession {
            dc,
            inner: self.inner.clone(),
        }))
    }
}

struct ScriptedSession {
    dc: DcId,
    inner: Arc<Inner>,
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn get_file(
        &self,
        location: &LocationDescriptor,
        offset: u64,
        limit: u64,
    ) -> Result<Bytes, RemoteError> {
        let read_no = self.inner.reads.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.inner.state.lock().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.state.lock();
        if let Some(error) = state.injected.pop_front() {
            return Err(error);
        }
        if self.dc != state.file_dc {
            return Err(RemoteError::Migrated(state.file_dc));
        }
        if location.file_reference != format!("ref-{}", state.reference_generation) {
            return Err(RemoteError::ReferenceExpired);
        }
        if offset % BLOCK_SIZE != 0 || limit % BLOCK_SIZE != 0 || limit > MAX_CHUNK_SIZE {
            return Err(RemoteError::fatal(400, "LIMIT_INVALID"));
        }
        if state.fail_after_reads.is_some_and(|n| read_no > n) {
            return Err(RemoteError::fatal(400, "FILE_ID_INVALID"));
        }

        let len = state.data.len() as u64;
        let start = offset.min(len) as usize;
        let end = (offset + limit).min(len) as usize;
        Ok(state.data.slice(start..end))
    }

    async fn close(&self) {
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
    }
}
