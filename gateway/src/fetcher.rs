//! Aligned chunk reads with session, migration and transient-error recovery.
//!
//! Every read goes through a small tagged-error state machine:
//!
//! | Remote error | Remediation | Budget per chunk |
//! |---|---|---|
//! | `Unauthenticated` | discard the dc's session, reconnect, retry | 1 |
//! | `Migrated(dc)` | switch the request's active dc, retry there | 1 |
//! | `Transient` | wait (`retry_after` or backoff), retry | 1 |
//! | `ReferenceExpired` | returned to the caller, which re-resolves | 0 |
//! | anything else | returned as a fatal remote error | 0 |

use crate::config::MAX_RETRY_AFTER_SECS;
use crate::metrics::Metrics;
use crate::session::SessionPool;
use bytes::Bytes;
use common::{BLOCK_SIZE, DcId, LocationDescriptor, MAX_CHUNK_SIZE, RemoteError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The caller asked for a window the remote would reject. Never sent.
    #[error("misaligned read: offset {offset}, limit {limit}")]
    Misaligned { offset: u64, limit: u64 },

    #[error("file reference expired")]
    ReferenceExpired,

    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Remote(RemoteError),
}

/// Where one request reads from.
///
/// `dc` starts at the descriptor's data center and follows migrations for
/// the rest of the request. A refreshed descriptor replaces `location` but
/// keeps the active dc.
#[derive(Debug, Clone)]
pub struct FetchTarget {
    pub location: LocationDescriptor,
    pub dc: DcId,
}

impl FetchTarget {
    pub fn new(location: LocationDescriptor) -> Self {
        let dc = location.dc_id;
        Self { location, dc }
    }
}

/// Checks a read window against the remote's rules: offset and limit are
/// 4 KiB multiples, `0 < limit <= 1 MiB`, and the window stays inside one
/// 1 MiB block.
pub fn check_alignment(offset: u64, limit: u64) -> Result<(), FetchError> {
    let aligned = offset % BLOCK_SIZE == 0
        && limit % BLOCK_SIZE == 0
        && limit > 0
        && limit <= MAX_CHUNK_SIZE
        && offset / MAX_CHUNK_SIZE == (offset + limit - 1) / MAX_CHUNK_SIZE;
    if aligned {
        Ok(())
    } else {
        Err(FetchError::Misaligned { offset, limit })
    }
}

#[derive(Default)]
struct RetryBudget {
    auth: bool,
    migrate: bool,
    transient: bool,
}

pub struct ChunkFetcher {
    sessions: Arc<SessionPool>,
    metrics: Metrics,
    transient_backoff: Duration,
}

impl ChunkFetcher {
    pub fn new(sessions: Arc<SessionPool>, metrics: Metrics, transient_backoff: Duration) -> Self {
        Self {
            sessions,
            metrics,
            transient_backoff,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionPool> {
        &self.sessions
    }

    /// Read one window. May update `target.dc` after a migration.
    pub async fn fetch(
        &self,
        target: &mut FetchTarget,
        offset: u64,
        limit: u64,
    ) -> Result<Bytes, FetchError> {
        check_alignment(offset, limit)?;

        let mut budget = RetryBudget::default();
        loop {
            let error = match self.sessions.get(target.dc).await {
                Ok(session) => {
                    self.metrics.remote_fetches.inc();
                    match session.get_file(&target.location, offset, limit).await {
                        Ok(bytes) => return Ok(bytes),
                        Err(RemoteError::Unauthenticated) => {
                            self.sessions.invalidate(target.dc, &session).await;
                            RemoteError::Unauthenticated
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            match error {
                RemoteError::Unauthenticated if !budget.auth => {
                    budget.auth = true;
                    self.metrics.record_fetch_error("unauthenticated");
                    warn!(dc = target.dc, offset = offset, "Session unauthorized, reconnecting");
                }
                RemoteError::Migrated(new_dc) if !budget.migrate && new_dc != target.dc => {
                    budget.migrate = true;
                    self.metrics.record_fetch_error("migrated");
                    self.metrics.dc_migrations.inc();
                    debug!(from_dc = target.dc, to_dc = new_dc, offset = offset, "File migrated");
                    target.dc = new_dc;
                }
                RemoteError::ReferenceExpired => {
                    self.metrics.record_fetch_error("reference_expired");
                    return Err(FetchError::ReferenceExpired);
                }
                RemoteError::Transient {
                    reason,
                    retry_after,
                } => {
                    self.metrics.record_fetch_error("transient");
                    let wait = retry_after.unwrap_or(self.transient_backoff);
                    if budget.transient || wait > Duration::from_secs(MAX_RETRY_AFTER_SECS) {
                        return Err(FetchError::Unavailable(reason));
                    }
                    budget.transient = true;
                    warn!(
                        dc = target.dc,
                        offset = offset,
                        reason = %reason,
                        wait_ms = wait.as_millis() as u64,
                        "Transient remote failure, retrying once"
                    );
                    tokio::time::sleep(wait).await;
                }
                other => {
                    self.metrics.record_fetch_error("fatal");
                    return Err(FetchError::Remote(other));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedRemote, patterned};

    fn fetcher_for(remote: &ScriptedRemote) -> ChunkFetcher {
        let pool = Arc::new(SessionPool::new(remote.connector(), Metrics::new()));
        ChunkFetcher::new(pool, Metrics::new(), Duration::from_millis(1))
    }

    #[test]
    fn test_alignment_rules() {
        assert!(check_alignment(0, 4096).is_ok());
        assert!(check_alignment(1024 * 1024, 1024 * 1024).is_ok());
        assert!(check_alignment(512 * 1024, 512 * 1024).is_ok());
        assert!(check_alignment(100, 4096).is_err());
        assert!(check_alignment(0, 1000).is_err());
        assert!(check_alignment(0, 0).is_err());
        assert!(check_alignment(0, 2 * 1024 * 1024).is_err());
        // Crosses the 1 MiB boundary
        assert!(check_alignment(1024 * 1024 - 4096, 8192).is_err());
    }

    #[tokio::test]
    async fn test_misaligned_read_never_reaches_remote() {
        let remote = ScriptedRemote::new(patterned(10_000));
        let fetcher = fetcher_for(&remote);
        let mut target = FetchTarget::new(remote.location());
        let err = fetcher.fetch(&mut target, 10, 4096).await.unwrap_err();
        assert_eq!(err, FetchError::Misaligned { offset: 10, limit: 4096 });
        assert_eq!(remote.reads(), 0);
        assert_eq!(remote.total_connects(), 0);
    }

    #[tokio::test]
    async fn test_plain_read() {
        let data = patterned(10_000);
        let remote = ScriptedRemote::new(data.clone());
        let fetcher = fetcher_for(&remote);
        let mut target = FetchTarget::new(remote.location());
        let chunk = fetcher.fetch(&mut target, 8192, 4096).await.unwrap();
        assert_eq!(&chunk[..], &data[8192..10_000]);
    }

    #[tokio::test]
    async fn test_migration_is_followed_once() {
        let data = patterned(8192);
        let remote = ScriptedRemote::new(data.clone());
        remote.move_to_dc(4);
        let fetcher = fetcher_for(&remote);
        let mut target = FetchTarget::new(remote.location());
        assert_eq!(target.dc, 2);

        let chunk = fetcher.fetch(&mut target, 0, 4096).await.unwrap();
        assert_eq!(&chunk[..], &data[..4096]);
        assert_eq!(target.dc, 4);

        // Subsequent chunks go straight to the new dc
        let reads_before = remote.reads();
        fetcher.fetch(&mut target, 4096, 4096).await.unwrap();
        assert_eq!(remote.reads(), reads_before + 1);
    }

    #[tokio::test]
    async fn test_second_migration_aborts() {
        let remote = ScriptedRemote::new(patterned(8192));
        remote.inject(RemoteError::Migrated(3));
        remote.inject(RemoteError::Migrated(5));
        let fetcher = fetcher_for(&remote);
        let mut target = FetchTarget::new(remote.location());
        let err = fetcher.fetch(&mut target, 0, 4096).await.unwrap_err();
        assert_eq!(err, FetchError::Remote(RemoteError::Migrated(5)));
    }

    #[tokio::test]
    async fn test_auth_failure_reconnects_and_retries() {
        let data = patterned(8192);
        let remote = ScriptedRemote::new(data.clone());
        remote.inject(RemoteError::Unauthenticated);
        let fetcher = fetcher_for(&remote);
        let mut target = FetchTarget::new(remote.location());

        let chunk = fetcher.fetch(&mut target, 4096, 4096).await.unwrap();
        assert_eq!(&chunk[..], &data[4096..]);
        assert_eq!(remote.connects_to(2), 2);
        assert_eq!(remote.closed_sessions(), 1);
    }

    #[tokio::test]
    async fn test_repeated_auth_failure_surfaces() {
        let remote = ScriptedRemote::new(patterned(8192));
        remote.inject(RemoteError::Unauthenticated);
        remote.inject(RemoteError::Unauthenticated);
        let fetcher = fetcher_for(&remote);
        let mut target = FetchTarget::new(remote.location());
        let err = fetcher.fetch(&mut target, 0, 4096).await.unwrap_err();
        assert_eq!(err, FetchError::Remote(RemoteError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_reference_expiry_is_not_retried_here() {
        let remote = ScriptedRemote::new(patterned(8192));
        let fetcher = fetcher_for(&remote);
        let mut target = FetchTarget::new(remote.location());
        remote.expire_reference();

        let err = fetcher.fetch(&mut target, 0, 4096).await.unwrap_err();
        assert_eq!(err, FetchError::ReferenceExpired);
        assert_eq!(remote.reads(), 1);
    }

    #[tokio::test]
    async fn test_transient_retried_once() {
        let data = patterned(8192);
        let remote = ScriptedRemote::new(data.clone());
        remote.inject(RemoteError::transient("Timeout"));
        let fetcher = fetcher_for(&remote);
        let mut target = FetchTarget::new(remote.location());
        let chunk = fetcher.fetch(&mut target, 0, 4096).await.unwrap();
        assert_eq!(&chunk[..], &data[..4096]);

        remote.inject(RemoteError::transient("Timeout"));
        remote.inject(RemoteError::transient("Timeout"));
        let err = fetcher.fetch(&mut target, 0, 4096).await.unwrap_err();
        assert_eq!(err, FetchError::Unavailable("Timeout".into()));
    }

    #[tokio::test]
    async fn test_long_flood_wait_is_unavailable() {
        let remote = ScriptedRemote::new(patterned(8192));
        remote.inject(RemoteError::Transient {
            reason: "FLOOD_WAIT_3600".into(),
            retry_after: Some(Duration::from_secs(3600)),
        });
        let fetcher = fetcher_for(&remote);
        let mut target = FetchTarget::new(remote.location());
        let err = fetcher.fetch(&mut target, 0, 4096).await.unwrap_err();
        assert!(matches!(err, FetchError::Unavailable(_)));
        assert_eq!(remote.reads(), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts() {
        let remote = ScriptedRemote::new(patterned(8192));
        remote.inject(RemoteError::fatal(400, "FILE_ID_INVALID"));
        let fetcher = fetcher_for(&remote);
        let mut target = FetchTarget::new(remote.location());
        let err = fetcher.fetch(&mut target, 0, 4096).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Remote(RemoteError::fatal(400, "FILE_ID_INVALID"))
        );
        assert_eq!(remote.reads(), 1);
    }
}
