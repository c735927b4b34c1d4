//! HTTP adapter to the MTProto bridge service.
//!
//! The bridge owns the Telegram client library and exposes a small JSON API:
//!
//! | Call | Request | Response |
//! |---|---|---|
//! | message lookup | `GET /channels/{channel}/messages/{id}` | `MediaMessage` JSON, 404 if absent |
//! | open session | `POST /dc/{dc}/sessions` | `{"session_id": "..."}` |
//! | file read | `POST /dc/{dc}/sessions/{sid}/get_file` `{location, offset, limit}` | raw bytes |
//! | close session | `DELETE /dc/{dc}/sessions/{sid}` | empty |
//!
//! RPC failures come back as `{"error_code": 303, "error_message": "FILE_MIGRATE_4"}`
//! with a non-2xx status and are classified by [`classify_rpc_error`].

use crate::remote::{MessageStore, RemoteSession, SessionConnector};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use common::{
    ChannelId, ContentHandle, DcId, LocationDescriptor, MediaMessage, RemoteError,
    classify_rpc_error,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize)]
struct RpcErrorBody {
    error_code: i32,
    error_message: String,
}

#[derive(Deserialize)]
struct SessionCreated {
    session_id: String,
}

#[derive(Serialize)]
struct GetFileRequest<'a> {
    location: &'a LocationDescriptor,
    offset: u64,
    limit: u64,
}

/// Shared client for all bridge calls. Cheap to clone.
#[derive(Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BridgeClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build bridge HTTP client: {}", e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// Transport-level failures (connect refused, timeout) are worth one retry.
fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::transient(format!("bridge request failed: {e}"))
}

async fn error_from_response(response: Response) -> RemoteError {
    let status = response.status();
    match response.json::<RpcErrorBody>().await {
        Ok(body) => classify_rpc_error(body.error_code, &body.error_message),
        Err(_) if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::transient(format!("bridge returned {status}"))
        }
        Err(_) => RemoteError::fatal(i32::from(status.as_u16()), "bridge error"),
    }
}

#[async_trait]
impl MessageStore for BridgeClient {
    async fn get_media(
        &self,
        channel: ChannelId,
        handle: ContentHandle,
    ) -> Result<Option<MediaMessage>, RemoteError> {
        let response = self
            .request(Method::GET, &format!("/channels/{channel}/messages/{handle}"))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        response
            .json::<MediaMessage>()
            .await
            .map(Some)
            .map_err(|e| RemoteError::fatal(0, format!("invalid message body: {e}")))
    }
}

#[async_trait]
impl SessionConnector for BridgeClient {
    async fn connect(&self, dc: DcId) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        let response = self
            .request(Method::POST, &format!("/dc/{dc}/sessions"))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let created: SessionCreated = response
            .json()
            .await
            .map_err(|e| RemoteError::fatal(0, format!("invalid session body: {e}")))?;
        debug!(dc = dc, session_id = %created.session_id, "Bridge session opened");
        Ok(Arc::new(BridgeSession {
            client: self.clone(),
            dc,
            session_id: created.session_id,
        }))
    }
}

struct BridgeSession {
    client: BridgeClient,
    dc: DcId,
    session_id: String,
}

#[async_trait]
impl RemoteSession for BridgeSession {
    async fn get_file(
        &self,
        location: &LocationDescriptor,
        offset: u64,
        limit: u64,
    ) -> Result<Bytes, RemoteError> {
        let response = self
            .client
            .request(
                Method::POST,
                &format!("/dc/{}/sessions/{}/get_file", self.dc, self.session_id),
            )
            .json(&GetFileRequest {
                location,
                offset,
                limit,
            })
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        response.bytes().await.map_err(transport_error)
    }

    async fn close(&self) {
        let result = self
            .client
            .request(
                Method::DELETE,
                &format!("/dc/{}/sessions/{}", self.dc, self.session_id),
            )
            .send()
            .await;
        if let Err(e) = result {
            debug!(dc = self.dc, error = %e, "Failed to close bridge session");
        }
    }
}
