//! Utility functions for the gateway.
//!
//! # Categories
//!
//! - **HTTP Parsing**: Range header extraction, content type detection
//! - **Headers**: Content-Disposition with sanitized file names
//! - **Errors**: Generic client responses with detailed logging
//! - **Bot identity**: Username lookup for `/get` redirects and health

use axum::http::{HeaderMap, StatusCode, header};
use common::DEFAULT_MIME_TYPE;
use std::path::Path;
use tracing::error;

/// The raw `Range` header value, if present and valid UTF-8.
///
/// A header with non-UTF-8 bytes is passed on as an empty string so range
/// parsing rejects it as malformed instead of silently serving the full file.
pub fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::RANGE)
        .map(|value| value.to_str().unwrap_or(""))
}

/// Detect content type from filename extension
pub fn detect_content_type(filename: Option<&str>) -> String {
    const MIME_TYPES: &[(&str, &str)] = &[
        ("mp4", "video/mp4"),
        ("m4v", "video/x-m4v"),
        ("mkv", "video/x-matroska"),
        ("webm", "video/webm"),
        ("avi", "video/x-msvideo"),
        ("mov", "video/quicktime"),
        ("ts", "video/mp2t"),
        ("mp3", "audio/mpeg"),
        ("m4a", "audio/mp4"),
        ("flac", "audio/flac"),
        ("ogg", "audio/ogg"),
        ("wav", "audio/wav"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("png", "image/png"),
        ("gif", "image/gif"),
        ("webp", "image/webp"),
        ("srt", "application/x-subrip"),
        ("pdf", "application/pdf"),
        ("txt", "text/plain"),
        ("zip", "application/zip"),
        ("rar", "application/vnd.rar"),
        ("7z", "application/x-7z-compressed"),
        ("apk", "application/vnd.android.package-archive"),
    ];

    filename
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext))
        .and_then(|ext| {
            let ext_lower = ext.to_lowercase();
            MIME_TYPES
                .iter()
                .find(|(e, _)| *e == ext_lower)
                .map(|(_, mime)| *mime)
        })
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

/// Sanitize a filename for use in Content-Disposition header.
///
/// Removes or replaces characters that could cause header injection or parsing issues:
/// - Quotes, backslashes, control characters, newlines
/// - Non-ASCII characters replaced with underscore
/// - Limits length to prevent header overflow
pub fn sanitize_filename(filename: &str) -> String {
    const MAX_FILENAME_LEN: usize = 255;

    let sanitized: String = filename
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' | ' ' | '(' | ')' | '[' | ']' => {
                Some(c)
            }
            c if c.is_control() => None,
            _ => Some('_'),
        })
        .collect();

    if sanitized.len() > MAX_FILENAME_LEN {
        sanitized[..MAX_FILENAME_LEN].to_string()
    } else if sanitized.trim().is_empty() {
        "download".to_string()
    } else {
        sanitized
    }
}

/// `Content-Disposition` value, e.g. `inline; filename="movie.mp4"`.
pub fn content_disposition(disposition: &str, filename: &str) -> String {
    format!("{}; filename=\"{}\"", disposition, sanitize_filename(filename))
}

/// Create an internal server error response while logging the detailed error.
///
/// Returns a generic message to the client to prevent information leakage,
/// while logging the full error details for debugging.
pub fn internal_error(context: &str, error: impl std::fmt::Display) -> (StatusCode, String) {
    error!(context = context, error = %error, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "An internal error occurred. Please try again later.".to_string(),
    )
}

/// Bot username from config, else from the file the bot writes at login.
/// Leading `@` and surrounding whitespace are stripped.
pub async fn bot_username(configured: Option<&str>, file: Option<&Path>) -> Option<String> {
    let raw = match (configured, file) {
        (Some(name), _) => name.to_string(),
        (None, Some(path)) => tokio::fs::read_to_string(path).await.ok()?,
        (None, None) => return None,
    };
    let name = raw.trim().trim_start_matches('@');
    (!name.is_empty()).then(|| name.to_string())
}

/// Telegram deep-link payloads allow `[A-Za-z0-9_-]`, up to 64 characters
/// including the `get_` prefix.
pub fn is_valid_start_payload(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 60
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
