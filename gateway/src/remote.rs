//! Seams between the streaming core and the remote store.
//!
//! The core never talks MTProto itself. It needs three things from the
//! outside world, each behind a trait so tests can script failures:
//!
//! - [`MessageStore`]: look up the media attached to a storage-channel message
//! - [`SessionConnector`]: open an authorized session on a data center
//! - [`RemoteSession`]: aligned file reads on that session
//!
//! [`StorageLocationProvider`] tells the resolver which channel to look in.

use async_trait::async_trait;
use bytes::Bytes;
use common::{ChannelId, ContentHandle, DcId, LocationDescriptor, MediaMessage, RemoteError};
use std::sync::Arc;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// `Ok(None)` when the message does not exist or carries no media.
    async fn get_media(
        &self,
        channel: ChannelId,
        handle: ContentHandle,
    ) -> Result<Option<MediaMessage>, RemoteError>;
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, dc: DcId) -> Result<Arc<dyn RemoteSession>, RemoteError>;
}

/// A live, authorized session on one data center.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Read `limit` bytes at `offset`. Both must already satisfy the remote's
    /// alignment rules; the returned buffer is shorter only at end of file.
    async fn get_file(
        &self,
        location: &LocationDescriptor,
        offset: u64,
        limit: u64,
    ) -> Result<Bytes, RemoteError>;

    /// Release remote resources. Called once the session has been discarded.
    async fn close(&self) {}
}

pub trait StorageLocationProvider: Send + Sync {
    fn storage_location(&self) -> Option<ChannelId>;
}

/// Storage location fixed at startup from configuration.
pub struct ConfiguredStorageLocation {
    channel: Option<ChannelId>,
}

impl ConfiguredStorageLocation {
    pub fn new(channel: Option<i64>) -> Self {
        Self {
            channel: channel.map(ChannelId),
        }
    }
}

impl StorageLocationProvider for ConfiguredStorageLocation {
    fn storage_location(&self) -> Option<ChannelId> {
        self.channel
    }
}
