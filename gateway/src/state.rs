//! Application state for the gateway.
//!
//! `AppState` is built once in `main.rs` and shared by all HTTP handlers and
//! background tasks behind an `Arc`.
//!
//! # Concurrency Model
//!
//! - `SessionPool`: `DashMap` of per-dc async mutex slots (no global lock)
//! - `ContentResolver`: `quick_cache` LRU, lock-free reads, idempotent inserts
//! - `CacheManager`: `DashMap` of in-flight downloads keyed by handle

use crate::cache::CacheManager;
use crate::metrics::Metrics;
use crate::stream::MediaStreamer;
use minijinja::Environment;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub const WATCH_PAGE_TEMPLATE: &str = "watch_page.html";

/// Shared application state for all HTTP handlers and background tasks.
pub struct AppState {
    pub streamer: Arc<MediaStreamer>,
    /// `None` when the disk cache is disabled
    pub cache: Option<Arc<CacheManager>>,
    pub metrics: Metrics,
    pub templates: Environment<'static>,
    pub bot_username: Option<String>,
    pub bot_username_file: Option<PathBuf>,
    /// Base URL for links on the watch page (relative links when unset)
    pub public_url: Option<String>,
    pub started_at: Instant,
}

/// Template environment with the bundled watch page.
pub fn load_templates() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template(
        WATCH_PAGE_TEMPLATE,
        include_str!("../templates/watch_page.html"),
    )?;
    Ok(env)
}
