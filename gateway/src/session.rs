//! Process-wide pool of remote sessions, one per data center.
//!
//! Sessions are created lazily on first use and reused by every request.
//! Creation is serialized per data center: each dc owns an async mutex slot,
//! so concurrent first requests for the same dc wait for a single connect
//! while other dcs proceed independently. There is no global lock.

use crate::metrics::Metrics;
use crate::remote::{RemoteSession, SessionConnector};
use common::{DcId, RemoteError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

type SessionSlot = Arc<Mutex<Option<Arc<dyn RemoteSession>>>>;

pub struct SessionPool {
    connector: Arc<dyn SessionConnector>,
    slots: DashMap<DcId, SessionSlot>,
    metrics: Metrics,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn SessionConnector>, metrics: Metrics) -> Self {
        Self {
            connector,
            slots: DashMap::new(),
            metrics,
        }
    }

    fn slot(&self, dc: DcId) -> SessionSlot {
        self.slots.entry(dc).or_default().clone()
    }

    /// Return the live session for `dc`, connecting if there is none.
    pub async fn get(&self, dc: DcId) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        let slot = self.slot(dc);
        let mut current = slot.lock().await;
        if let Some(session) = current.as_ref() {
            return Ok(session.clone());
        }

        debug!(dc = dc, "Connecting remote session");
        let session = self.connector.connect(dc).await?;
        self.metrics.session_connects.inc();
        info!(dc = dc, "Remote session established");
        *current = Some(session.clone());
        Ok(session)
    }

    /// Drop `stale` if it is still the cached session for `dc`.
    ///
    /// A concurrent request may already have replaced it; in that case the
    /// newer session is kept.
    pub async fn invalidate(&self, dc: DcId, stale: &Arc<dyn RemoteSession>) {
        let slot = self.slot(dc);
        let removed = {
            let mut current = slot.lock().await;
            match current.as_ref() {
                Some(live) if Arc::ptr_eq(live, stale) => current.take(),
                _ => None,
            }
        };
        if let Some(session) = removed {
            info!(dc = dc, "Discarded unauthorized remote session");
            session.close().await;
        }
    }

    /// Close every cached session. Used at shutdown.
    pub async fn close_all(&self) {
        let slots: Vec<SessionSlot> = self.slots.iter().map(|e| e.value().clone()).collect();
        for slot in slots {
            if let Some(session) = slot.lock().await.take() {
                session.close().await;
            }
        }
    }

    /// Number of dcs holding an established session. Slots with a connect
    /// still in flight are not counted.
    pub fn connected_dcs(&self) -> usize {
        self.slots
            .iter()
            .filter(|e| e.value().try_lock().is_ok_and(|s| s.is_some()))
            .count()
    }
}
