//! Capture query API
//!
//! Query boundary for a management surface. Errors are plain strings the
//! caller can relay as-is.

use crate::models::{CaptureStats, FlowRecord};
use crate::storage::CaptureStore;

/// Newest-first page of captures; `limit: None` returns everything after
/// `offset`.
pub async fn list_captures(
    store: &CaptureStore,
    offset: usize,
    limit: Option<usize>,
) -> Result<Vec<FlowRecord>, String> {
    Ok(store.list(offset, limit.unwrap_or(usize::MAX)).await)
}

/// Case-insensitive substring search over URL, request body and response body.
pub async fn search_captures(
    store: &CaptureStore,
    query: &str,
    limit: Option<usize>,
) -> Result<Vec<FlowRecord>, String> {
    if query.trim().is_empty() {
        return Err("Search query must not be empty".to_string());
    }
    Ok(store.search(query, limit).await)
}

pub async fn get_capture(store: &CaptureStore, id: &str) -> Result<FlowRecord, String> {
    store
        .get(id)
        .await
        .ok_or_else(|| format!("Capture {} not found", id))
}

/// Drop all captures from memory and truncate the log. Returns the number of
/// records that were held in memory.
pub async fn clear_captures(store: &CaptureStore) -> Result<usize, String> {
    store.clear().await.map_err(|e| e.to_string())
}

pub async fn capture_statistics(store: &CaptureStore) -> Result<CaptureStats, String> {
    Ok(store.stats().await)
}
