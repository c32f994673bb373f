//! Capture storage
//!
//! The durable JSONL log and the bounded in-memory index, kept in step.

mod capture_index;
mod capture_log;

pub use capture_index::CaptureIndex;
pub use capture_log::CaptureLog;
pub(crate) use capture_log::trim_line;

use crate::models::{CaptureStats, FlowRecord};
use std::path::Path;
use std::sync::Arc;

/// Default number of records held in memory
pub const DEFAULT_CAPACITY: usize = 1000;

pub struct CaptureStore {
    log: Arc<CaptureLog>,
    index: CaptureIndex,
}

impl CaptureStore {
    /// Open the log at `path` and rebuild the index from it.
    pub async fn open(path: impl AsRef<Path>, capacity: usize) -> anyhow::Result<Self> {
        let log = Arc::new(CaptureLog::new(path.as_ref())?);
        let index = CaptureIndex::new(capacity);

        let loader = Arc::clone(&log);
        let records = tokio::task::spawn_blocking(move || loader.load_all()).await??;
        tracing::info!(
            "Loaded {} captures from {:?} (keeping up to {})",
            records.len(),
            log.path(),
            index.capacity()
        );
        index.rebuild(records).await;

        Ok(Self { log, index })
    }

    /// Add a finalized record to the index and the durable log.
    pub async fn append(&self, record: FlowRecord) -> anyhow::Result<()> {
        self.index.push(record.clone()).await;

        let log = Arc::clone(&self.log);
        tokio::task::spawn_blocking(move || log.append(&record)).await??;
        Ok(())
    }

    pub async fn list(&self, offset: usize, limit: usize) -> Vec<FlowRecord> {
        self.index.list(offset, limit).await
    }

    pub async fn search(&self, query: &str, limit: Option<usize>) -> Vec<FlowRecord> {
        self.index.search(query, limit).await
    }

    pub async fn get(&self, id: &str) -> Option<FlowRecord> {
        self.index.get(id).await
    }

    pub async fn stats(&self) -> CaptureStats {
        self.index.stats().await
    }

    pub async fn len(&self) -> usize {
        self.index.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.index.is_empty().await
    }

    /// Empty the index and truncate the log, returning the number of
    /// records dropped from memory.
    pub async fn clear(&self) -> anyhow::Result<usize> {
        let cleared = self.index.clear().await;
        let log = Arc::clone(&self.log);
        tokio::task::spawn_blocking(move || log.truncate()).await??;
        tracing::info!("Cleared {} captures", cleared);
        Ok(cleared)
    }
}
