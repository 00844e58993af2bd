//! Resource locator classification and validation.
//!
//! A locator is an opaque string addressing a file-like resource: either a
//! path on the requesting device (`file://...` or an absolute path) or an
//! HTTP(S) URL served by the catalog's file endpoint. Classification decides
//! which resolution path the cache tries first.

use crate::error::CoreError;

/// How a locator can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    /// Readable through the device's filesystem.
    LocalFile,
    /// Fetched over HTTP(S).
    Http,
}

/// Classify a locator by its shape.
///
/// Returns `None` for locators that are neither a recognizable local path
/// nor an HTTP(S) URL; callers surface those as validation errors.
pub fn classify(locator: &str) -> Option<LocatorKind> {
    let trimmed = locator.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Some(LocatorKind::Http)
    } else if trimmed.starts_with("file://") || trimmed.starts_with('/') {
        Some(LocatorKind::LocalFile)
    } else {
        None
    }
}

/// Validate that a locator is non-empty and classifiable.
pub fn validate(locator: &str) -> Result<LocatorKind, CoreError> {
    let trimmed = locator.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(
            "Resource locator must not be empty".to_string(),
        ));
    }
    classify(trimmed).ok_or_else(|| {
        CoreError::Validation(format!(
            "Unrecognized resource locator (expected file://, absolute path, or http(s)://): '{trimmed}'"
        ))
    })
}

/// The filesystem path of a local locator, with any `file://` prefix stripped.
///
/// Returns `None` for non-local locators.
pub fn local_path(locator: &str) -> Option<&str> {
    let trimmed = locator.trim();
    if let Some(path) = trimmed.strip_prefix("file://") {
        Some(path)
    } else if trimmed.starts_with('/') {
        Some(trimmed)
    } else {
        None
    }
}

/// Extract a display filename from a locator by taking the last path segment.
///
/// Strips query parameters and fragments. Falls back to `"resource"` if no
/// meaningful segment is found.
pub fn display_name(locator: &str) -> String {
    let clean = locator.split('?').next().unwrap_or(locator);
    let clean = clean.split('#').next().unwrap_or(clean);

    let path = if let Some(rest) = clean
        .strip_prefix("https://")
        .or_else(|| clean.strip_prefix("http://"))
    {
        rest.find('/').map(|i| &rest[i..]).unwrap_or("")
    } else {
        clean.strip_prefix("file://").unwrap_or(clean)
    };

    path.rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("resource")
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
