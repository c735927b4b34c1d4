//! HTTP handlers for the gateway.
//!
//! | Route | Methods | Purpose |
//! |---|---|---|
//! | `/` | GET, HEAD | Health JSON |
//! | `/favicon.ico` | GET, HEAD | Empty 204 |
//! | `/stream/{id}` | GET, HEAD | Media, `inline`, byte ranges |
//! | `/download/{id}` | GET, HEAD | Media, `attachment`, byte ranges |
//! | `/watch/{id}` | GET, HEAD | HTML player page |
//! | `/get/{id}` | GET | Redirect into the bot chat |
//! | `/metrics` | GET | Prometheus exposition |
//!
//! Media responses commit their status line only after the first chunk is
//! in hand, so failures before the first byte still map to a proper status.

use crate::cache::{CacheEntry, CacheManager, CacheStatus};
use crate::error::StreamError;
use crate::helpers::{
    bot_username, content_disposition, internal_error, is_valid_start_payload, range_header,
};
use crate::metrics::Metrics;
use crate::state::{AppState, WATCH_PAGE_TEMPLATE};
use crate::stream::ByteStream;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use common::{ContentHandle, FileMetadata, RangeRequest, parse_range_header};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_status))
        .route("/favicon.ico", get(favicon))
        .route("/stream/{id}", get(stream_file))
        .route("/download/{id}", get(download_file))
        .route("/watch/{id}", get(watch_page))
        .route("/get/{id}", get(get_redirect))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub server_status: &'static str,
    pub bot_status: String,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub connected_dcs: usize,
    pub cache_downloads_in_flight: usize,
}

pub async fn root_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let bot_status = match bot_username(
        state.bot_username.as_deref(),
        state.bot_username_file.as_deref(),
    )
    .await
    {
        Some(name) => format!("connected_as @{name}"),
        None => "unknown".to_string(),
    };
    Json(StatusResponse {
        server_status: "running",
        bot_status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        connected_dcs: state.streamer.fetcher().sessions().connected_dcs(),
        cache_downloads_in_flight: state.cache.as_ref().map_or(0, |c| c.in_flight()),
    })
}

pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

// ============================================================================
// Media delivery
// ============================================================================

/// Keeps `active_streams` balanced and reports streams that end early.
///
/// NOTE: must live inside the body stream, not the handler, because the
/// handler returns before the body is consumed.
struct StreamGuard {
    metrics: Metrics,
    handle: ContentHandle,
    expected: u64,
    sent: u64,
    finished: bool,
}

impl StreamGuard {
    fn new(metrics: Metrics, handle: ContentHandle, expected: u64) -> Self {
        metrics.active_streams.inc();
        Self {
            metrics,
            handle,
            expected,
            sent: 0,
            finished: false,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.metrics.active_streams.dec();
        if !self.finished {
            warn!(
                handle = %self.handle,
                bytes_sent = self.sent,
                expected = self.expected,
                "Client disconnected, stream stopped"
            );
        }
    }
}

pub async fn stream_file(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    serve_media(state, method, &id, &headers, "inline", "stream").await
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    serve_media(state, method, &id, &headers, "attachment", "download").await
}

async fn serve_media(
    state: Arc<AppState>,
    method: Method,
    id: &str,
    headers: &HeaderMap,
    disposition: &str,
    route: &'static str,
) -> Response {
    let request_start = Instant::now();
    let response = match media_response(&state, &method, id, headers, disposition).await {
        Ok(response) => response,
        Err(e) => error_response(id, route, e),
    };
    state.metrics.record_request(route, response.status().as_u16());
    state
        .metrics
        .first_byte_duration
        .get_or_create(&[("route".to_string(), route.to_string())])
        .observe(request_start.elapsed().as_secs_f64());
    response
}

async fn media_response(
    state: &Arc<AppState>,
    method: &Method,
    id: &str,
    headers: &HeaderMap,
    disposition: &str,
) -> Result<Response, StreamError> {
    let handle: ContentHandle = id.parse().map_err(|_| StreamError::NotFound(ContentHandle(0)))?;
    let meta = state.streamer.resolver().resolve(handle).await?;
    let requested = parse_range_header(range_header(headers), meta.byte_size)?;
    let span = requested.or_else(|| RangeRequest::full(meta.byte_size));

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, meta.mime_type.as_str())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(disposition, &meta.file_name),
        )
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_LENGTH,
            span.map_or(0, |r| r.len()).to_string(),
        );
    builder = match requested {
        Some(range) => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, range.content_range(meta.byte_size)),
        None => builder.status(StatusCode::OK),
    };

    // HEAD and empty files never touch the remote
    let span = match span {
        Some(span) if *method != Method::HEAD => span,
        _ => {
            return builder
                .body(Body::empty())
                .map_err(|e| StreamError::Protocol(e.to_string()));
        }
    };

    info!(
        handle = %handle,
        from = span.from_byte,
        until = span.until_byte,
        size = meta.byte_size,
        "Media request"
    );
    let mut parts = open_body(state, meta, span).await?;
    let first = match parts.next().await {
        Some(Ok(first)) => first,
        Some(Err(e)) => return Err(e),
        None => return Err(StreamError::Protocol("empty body stream".into())),
    };

    let metrics = state.metrics.clone();
    let expected = span.len();
    let body = async_stream::stream! {
        // Guard ensures metric is decremented when the stream ends (success, error or disconnect)
        let mut guard = StreamGuard::new(metrics.clone(), handle, expected);
        guard.sent += first.len() as u64;
        metrics.download_bytes.inc_by(first.len() as u64);
        yield Ok::<_, StreamError>(first);

        while let Some(part) = parts.next().await {
            match part {
                Ok(bytes) => {
                    guard.sent += bytes.len() as u64;
                    metrics.download_bytes.inc_by(bytes.len() as u64);
                    yield Ok(bytes);
                }
                Err(e) => {
                    error!(handle = %handle, bytes_sent = guard.sent, error = %e, "Stream failed mid-body");
                    guard.finished = true;
                    yield Err(e);
                    break;
                }
            }
        }
        if guard.sent == expected {
            debug!(handle = %handle, bytes = expected, "Stream completed");
        }
        guard.finished = true;
    };

    builder
        .body(Body::from_stream(body))
        .map_err(|e| StreamError::Protocol(e.to_string()))
}

/// Pick the byte source: cache (hit or attach), or the remote directly.
async fn open_body(
    state: &AppState,
    meta: FileMetadata,
    span: RangeRequest,
) -> Result<ByteStream, StreamError> {
    match &state.cache {
        Some(cache) if cache.accepts(&meta) => {
            let entry = cache.get_or_fetch(&meta).await?;
            body_from_entry(state, cache, meta, entry, span).await
        }
        Some(_) => {
            state.metrics.cache_bypasses.inc();
            state.streamer.stream_range(meta, span)
        }
        None => state.streamer.stream_range(meta, span),
    }
}

/// Serve `span` for a cache entry.
///
/// A span the writer is not about to reach is fetched with its own plan
/// while the whole-file download keeps running in the background.
async fn body_from_entry(
    state: &AppState,
    cache: &CacheManager,
    meta: FileMetadata,
    mut entry: CacheEntry,
    span: RangeRequest,
) -> Result<ByteStream, StreamError> {
    if matches!(entry.status(), CacheStatus::Complete) {
        let opened = cache.open_complete(&entry, span).await;
        match opened {
            Ok(body) => return Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(handle = %meta.handle, "Cached file evicted before read, fetching again");
                entry = cache.get_or_fetch(&meta).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if let CacheStatus::Pending { written } = entry.status()
        && span.from_byte >= written.saturating_add(state.streamer.chunk_size())
    {
        debug!(
            handle = %meta.handle,
            from = span.from_byte,
            written = written,
            "Range ahead of cache writer, streaming from remote"
        );
        return state.streamer.stream_range(meta, span);
    }
    Ok(cache.read_range(entry, span))
}

fn error_response(id: &str, route: &str, e: StreamError) -> Response {
    let status = e.status();
    match &e {
        StreamError::Range(common::RangeError::Unsatisfiable { size }) => {
            debug!(id = %id, route = route, "Range not satisfiable");
            return (
                status,
                [(header::CONTENT_RANGE, format!("bytes */{size}"))],
            )
                .into_response();
        }
        StreamError::NotFound(_) | StreamError::Range(_) => {
            debug!(id = %id, route = route, error = %e, "Rejected media request");
        }
        _ => error!(id = %id, route = route, error = %e, "Media request failed"),
    }
    (status, e.public_message()).into_response()
}

// ============================================================================
// Watch page and bot redirect
// ============================================================================

pub async fn watch_page(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let Ok(handle) = id.parse::<ContentHandle>() else {
        state.metrics.record_request("watch", 404);
        return (StatusCode::NOT_FOUND, "File not found or link has expired.").into_response();
    };

    let file_name = match state.streamer.resolver().resolve(handle).await {
        Ok(meta) => meta.file_name,
        Err(e) => {
            warn!(handle = %handle, error = %e, "Watch page without file metadata");
            "File".to_string()
        }
    };

    let base = state
        .public_url
        .as_deref()
        .unwrap_or("")
        .trim_end_matches('/');
    let rendered = state
        .templates
        .get_template(WATCH_PAGE_TEMPLATE)
        .and_then(|template| {
            template.render(minijinja::context! {
                heading => format!("Watch {file_name}"),
                file_name => &file_name,
                stream_url => format!("{base}/stream/{handle}"),
                download_url => format!("{base}/download/{handle}"),
            })
        });

    match rendered {
        Ok(page) => {
            state.metrics.record_request("watch", 200);
            Html(page).into_response()
        }
        Err(e) => {
            state.metrics.record_request("watch", 500);
            internal_error("render watch page", e).into_response()
        }
    }
}

pub async fn get_redirect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if !is_valid_start_payload(&id) {
        return (StatusCode::BAD_REQUEST, "File ID missing.").into_response();
    }
    let Some(bot) = bot_username(
        state.bot_username.as_deref(),
        state.bot_username_file.as_deref(),
    )
    .await
    else {
        error!("Bot username is not configured and the username file is unreadable");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Bot configuration error.").into_response();
    };
    (
        StatusCode::FOUND,
        [(
            header::LOCATION,
            format!("https://t.me/{bot}?start=get_{id}"),
        )],
    )
        .into_response()
}

/// Handler for Prometheus metrics endpoint
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let output = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        output,
    )
}
