//! Local disk cache with download coalescing.
//!
//! One file per handle under the cache directory:
//! - `<dir>/<handle>`: complete copy, served with native range support
//! - `<dir>/<handle>.temp`: download in progress, renamed on completion
//!
//! # Coalescing
//!
//! At most one remote download runs per handle. The first request inserts a
//! [`Download`] into the in-flight map and spawns its writer; later requests
//! attach to it. The writer publishes how many bytes of the temp file are
//! durable on a `watch` channel and every reader (including the one that
//! started the download) reads its own range from disk as that watermark
//! advances. Disk is the only buffer, so a slow reader costs no memory and a
//! disconnecting reader never cancels the writer.
//!
//! A failed download deletes its temp file and is replaced by the next
//! request, so failures are retried rather than cached.

use crate::config::DISK_READ_BUFFER_SIZE;
use crate::error::StreamError;
use crate::metrics::Metrics;
use crate::stream::{ByteStream, MediaStreamer};
use bytes::Bytes;
use common::{ContentHandle, FileMetadata, RangeRequest};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

const TEMP_SUFFIX: &str = ".temp";

#[derive(Debug, Clone)]
pub enum CacheStatus {
    /// `written` leading bytes of the temp file are on disk
    Pending { written: u64 },
    Complete,
    Failed(StreamError),
}

/// In-flight download shared by every request for one handle.
struct Download {
    status: watch::Receiver<CacheStatus>,
    writer: parking_lot::Mutex<Option<AbortHandle>>,
}

/// A request's view of one cached (or caching) file.
pub struct CacheEntry {
    pub handle: ContentHandle,
    pub local_path: PathBuf,
    pub byte_size: u64,
    status: watch::Receiver<CacheStatus>,
}

impl CacheEntry {
    pub fn status(&self) -> CacheStatus {
        self.status.borrow().clone()
    }
}

/// Result of one size-limit sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_removed: usize,
    pub bytes_removed: u64,
    pub bytes_kept: u64,
}

pub struct CacheManager {
    dir: PathBuf,
    max_file_bytes: u64,
    streamer: Arc<MediaStreamer>,
    in_flight: Arc<DashMap<ContentHandle, Arc<Download>>>,
    metrics: Metrics,
}

impl CacheManager {
    /// Create the cache directory and discard leftovers of interrupted downloads.
    pub async fn init(
        dir: impl Into<PathBuf>,
        max_file_bytes: u64,
        streamer: Arc<MediaStreamer>,
        metrics: Metrics,
    ) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut removed = 0usize;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX) {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        info!(dir = %dir.display(), stale_temp_files = removed, "Cache directory ready");

        Ok(Self {
            dir,
            max_file_bytes,
            streamer,
            in_flight: Arc::new(DashMap::new()),
            metrics,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn final_path(&self, handle: ContentHandle) -> PathBuf {
        self.dir.join(handle.to_string())
    }

    pub fn temp_path(&self, handle: ContentHandle) -> PathBuf {
        self.dir.join(format!("{handle}{TEMP_SUFFIX}"))
    }

    /// Whether `meta` goes through the cache at all. Oversized files are
    /// always streamed directly, so a handle never mixes both paths.
    pub fn accepts(&self, meta: &FileMetadata) -> bool {
        self.max_file_bytes == 0 || meta.byte_size <= self.max_file_bytes
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Return the cache entry for `meta`, starting the single download if needed.
    pub async fn get_or_fetch(&self, meta: &FileMetadata) -> Result<CacheEntry, StreamError> {
        let handle = meta.handle;
        let final_path = self.final_path(handle);

        if complete_file_matches(&final_path, meta.byte_size).await {
            self.metrics.cache_hits.inc();
            debug!(handle = %handle, "Cache hit");
            let (_, status) = watch::channel(CacheStatus::Complete);
            return Ok(self.entry(meta, status));
        }
        self.metrics.cache_misses.inc();

        let (download, started) = match self.in_flight.entry(handle) {
            Entry::Occupied(mut occupied) => {
                let failed = matches!(*occupied.get().status.borrow(), CacheStatus::Failed(_));
                if failed {
                    let download = self.start_download(meta);
                    occupied.insert(download.clone());
                    (download, true)
                } else {
                    (occupied.get().clone(), false)
                }
            }
            Entry::Vacant(vacant) => {
                let download = self.start_download(meta);
                vacant.insert(download.clone());
                (download, true)
            }
        };

        if started {
            info!(handle = %handle, size = meta.byte_size, "Cache download started");
        } else {
            debug!(handle = %handle, "Attached to in-flight cache download");
        }
        Ok(self.entry(meta, download.status.clone()))
    }

    fn entry(&self, meta: &FileMetadata, status: watch::Receiver<CacheStatus>) -> CacheEntry {
        CacheEntry {
            handle: meta.handle,
            local_path: self.final_path(meta.handle),
            byte_size: meta.byte_size,
            status,
        }
    }

    /// Spawn the writer for `meta`. Called with the handle's map shard locked,
    /// so it must not await.
    fn start_download(&self, meta: &FileMetadata) -> Arc<Download> {
        let (tx, rx) = watch::channel(CacheStatus::Pending { written: 0 });
        let download = Arc::new(Download {
            status: rx,
            writer: parking_lot::Mutex::new(None),
        });

        let streamer = self.streamer.clone();
        let in_flight = self.in_flight.clone();
        let meta = meta.clone();
        let temp_path = self.temp_path(meta.handle);
        let final_path = self.final_path(meta.handle);
        let this_download = download.clone();

        let task = tokio::spawn(async move {
            let handle = meta.handle;
            let started = std::time::Instant::now();
            let result = write_file(&streamer, &meta, &temp_path, &final_path, &tx).await;
            match result {
                Ok(()) => {
                    info!(
                        handle = %handle,
                        size = meta.byte_size,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Cache download completed"
                    );
                    tx.send_replace(CacheStatus::Complete);
                }
                Err(e) => {
                    error!(handle = %handle, error = %e, "Cache download failed");
                    if let Err(rm) = fs::remove_file(&temp_path).await
                        && rm.kind() != std::io::ErrorKind::NotFound
                    {
                        warn!(path = %temp_path.display(), error = %rm, "Failed to remove partial cache file");
                    }
                    tx.send_replace(CacheStatus::Failed(e));
                }
            }
            in_flight.remove_if(&handle, |_, current| Arc::ptr_eq(current, &this_download));
        });
        *download.writer.lock() = Some(task.abort_handle());
        download
    }

    /// Stream `range` of a cache entry, waiting on the writer where needed.
    pub fn read_range(&self, entry: CacheEntry, range: RangeRequest) -> ByteStream {
        let temp_path = self.temp_path(entry.handle);
        let final_path = entry.local_path.clone();

        if matches!(entry.status(), CacheStatus::Complete) {
            return Box::pin(read_complete(final_path, range));
        }

        let mut status = entry.status;
        let stream = async_stream::stream! {
            let end = range.until_byte + 1;
            let mut pos = range.from_byte;
            let mut file: Option<fs::File> = None;

            while pos < end {
                let current = status.borrow_and_update().clone();
                let readable_until = match current {
                    CacheStatus::Pending { written } => written.min(end),
                    CacheStatus::Complete => end,
                    CacheStatus::Failed(e) => {
                        yield Err(e);
                        return;
                    }
                };

                if pos < readable_until {
                    if file.is_none() {
                        match open_at(&temp_path, &final_path, pos).await {
                            Ok(f) => file = Some(f),
                            Err(e) => {
                                yield Err(StreamError::from(e));
                                return;
                            }
                        }
                    }
                    let Some(f) = file.as_mut() else { return };
                    let want = (readable_until - pos).min(DISK_READ_BUFFER_SIZE as u64) as usize;
                    let mut buf = vec![0u8; want];
                    match f.read(&mut buf).await {
                        Ok(0) => {
                            yield Err(StreamError::Io(format!(
                                "cache file ended at {pos}, expected {end}"
                            )));
                            return;
                        }
                        Ok(n) => {
                            buf.truncate(n);
                            pos += n as u64;
                            yield Ok(Bytes::from(buf));
                        }
                        Err(e) => {
                            yield Err(StreamError::from(e));
                            return;
                        }
                    }
                    continue;
                }

                if status.changed().await.is_err() {
                    // Writer gone. Anything but completion means it was aborted.
                    let completed = matches!(*status.borrow(), CacheStatus::Complete);
                    if !completed {
                        yield Err(StreamError::Unavailable("cache download aborted".into()));
                        return;
                    }
                }
            }
        };
        Box::pin(stream)
    }

    /// Open a complete entry's file up front, so a file evicted since the
    /// hit check surfaces as `NotFound` here instead of mid-response.
    pub async fn open_complete(
        &self,
        entry: &CacheEntry,
        range: RangeRequest,
    ) -> std::io::Result<ByteStream> {
        let file = fs::File::open(&entry.local_path).await?;
        Ok(Box::pin(read_open_file(file, entry.local_path.clone(), range)))
    }

    /// Abort every in-flight writer and delete its temp file.
    pub async fn shutdown(&self) {
        let handles: Vec<ContentHandle> = self.in_flight.iter().map(|e| *e.key()).collect();
        for handle in handles {
            if let Some((_, download)) = self.in_flight.remove(&handle) {
                if let Some(writer) = download.writer.lock().take() {
                    writer.abort();
                }
                match fs::remove_file(self.temp_path(handle)).await {
                    Ok(()) => debug!(handle = %handle, "Removed partial cache file"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(handle = %handle, error = %e, "Failed to remove partial cache file"),
                }
            }
        }
        info!("Cache writers stopped");
    }

    /// Delete the least recently modified complete files until the cache
    /// holds at most `max_total_bytes`.
    pub async fn sweep(&self, max_total_bytes: u64) -> std::io::Result<SweepReport> {
        let mut files: Vec<(SystemTime, u64, PathBuf)> = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().parse::<ContentHandle>().is_err() {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((modified, meta.len(), entry.path()));
            }
        }

        let mut report = SweepReport {
            bytes_kept: files.iter().map(|(_, len, _)| len).sum(),
            ..SweepReport::default()
        };
        files.sort_by_key(|(modified, _, _)| *modified);
        for (_, len, path) in files {
            if report.bytes_kept <= max_total_bytes {
                break;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    report.files_removed += 1;
                    report.bytes_removed += len;
                    report.bytes_kept -= len;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    report.bytes_kept -= len;
                }
                Err(e) => return Err(e),
            }
        }
        self.metrics.cache_bytes.set(report.bytes_kept as i64);
        Ok(report)
    }
}

/// True if a complete file of the expected size exists. A file of the wrong
/// size is stale and gets deleted.
async fn complete_file_matches(path: &Path, expected: u64) -> bool {
    match fs::metadata(path).await {
        Ok(meta) if meta.len() == expected => true,
        Ok(meta) => {
            warn!(
                path = %path.display(),
                on_disk = meta.len(),
                expected = expected,
                "Discarding stale cache file"
            );
            if let Err(e) = fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove stale cache file");
            }
            false
        }
        Err(_) => false,
    }
}

/// Download the whole file into `temp_path`, publishing progress, then rename.
async fn write_file(
    streamer: &MediaStreamer,
    meta: &FileMetadata,
    temp_path: &Path,
    final_path: &Path,
    tx: &watch::Sender<CacheStatus>,
) -> Result<(), StreamError> {
    if complete_file_matches(final_path, meta.byte_size).await {
        return Ok(());
    }

    let mut file = fs::File::create(temp_path).await?;
    let mut written = 0u64;
    if let Some(range) = RangeRequest::full(meta.byte_size) {
        let mut parts = streamer.stream_range(meta.clone(), range)?;
        while let Some(part) = parts.next().await {
            let part = part?;
            file.write_all(&part).await?;
            // Readers open the file separately; make the bytes visible first
            file.flush().await?;
            written += part.len() as u64;
            tx.send_replace(CacheStatus::Pending { written });
        }
    }
    file.sync_all().await?;
    drop(file);

    if written != meta.byte_size {
        return Err(StreamError::Protocol(format!(
            "downloaded {written} of {} bytes",
            meta.byte_size
        )));
    }
    fs::rename(temp_path, final_path).await?;
    Ok(())
}

/// Open the temp file, or the final file if the writer already renamed it.
async fn open_at(temp_path: &Path, final_path: &Path, pos: u64) -> std::io::Result<fs::File> {
    let mut file = match fs::File::open(temp_path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => fs::File::open(final_path).await?,
        Err(e) => return Err(e),
    };
    file.seek(SeekFrom::Start(pos)).await?;
    Ok(file)
}

/// Native range read of a complete cache file.
fn read_complete(
    path: PathBuf,
    range: RangeRequest,
) -> impl futures::Stream<Item = Result<Bytes, StreamError>> + Send + 'static {
    async_stream::stream! {
        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                yield Err(StreamError::from(e));
                return;
            }
        };
        let mut inner = Box::pin(read_open_file(file, path, range));
        while let Some(part) = inner.next().await {
            yield part;
        }
    }
}

fn read_open_file(
    mut file: fs::File,
    path: PathBuf,
    range: RangeRequest,
) -> impl futures::Stream<Item = Result<Bytes, StreamError>> + Send + 'static {
    async_stream::stream! {
        if let Err(e) = file.seek(SeekFrom::Start(range.from_byte)).await {
            yield Err(StreamError::from(e));
            return;
        }
        let mut reader = ReaderStream::with_capacity(file.take(range.len()), DISK_READ_BUFFER_SIZE);
        let mut sent = 0u64;
        while let Some(part) = reader.next().await {
            match part {
                Ok(bytes) => {
                    sent += bytes.len() as u64;
                    yield Ok(bytes);
                }
                Err(e) => {
                    yield Err(StreamError::from(e));
                    return;
                }
            }
        }
        if sent != range.len() {
            yield Err(StreamError::Io(format!(
                "cache file {} shorter than expected",
                path.display()
            )));
        }
    }
}
