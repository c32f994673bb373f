use crate::models::{CaptureStats, FlowRecord};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Recent flow records, oldest evicted first once `max_len` is reached.
pub struct CaptureIndex {
    ring: RwLock<VecDeque<FlowRecord>>,
    max_len: usize,
}

impl CaptureIndex {
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            ring: RwLock::new(VecDeque::with_capacity(max_len)),
            max_len,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_len
    }

    pub async fn len(&self) -> usize {
        self.ring.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ring.read().await.is_empty()
    }

    pub async fn push(&self, record: FlowRecord) {
        let mut ring = self.ring.write().await;
        ring.push_back(record);
        while ring.len() > self.max_len {
            ring.pop_front();
        }
    }

    /// Replace the contents, keeping the newest `max_len` of `records`.
    pub async fn rebuild(&self, records: Vec<FlowRecord>) {
        let skip = records.len().saturating_sub(self.max_len);
        let mut ring = self.ring.write().await;
        ring.clear();
        ring.extend(records.into_iter().skip(skip));
    }

    /// Newest-first page.
    pub async fn list(&self, offset: usize, limit: usize) -> Vec<FlowRecord> {
        let ring = self.ring.read().await;
        newest_first(ring.iter())
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Case-insensitive substring search over URL and bodies, newest first.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Vec<FlowRecord> {
        let needle = query.to_lowercase();
        let ring = self.ring.read().await;
        let matches = newest_first(ring.iter().filter(|r| r.matches_lowercase(&needle)));
        matches
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<FlowRecord> {
        let ring = self.ring.read().await;
        ring.iter().rev().find(|r| r.id == id).cloned()
    }

    /// Drop everything, returning how many records were held.
    pub async fn clear(&self) -> usize {
        let mut ring = self.ring.write().await;
        let count = ring.len();
        ring.clear();
        count
    }

    pub async fn stats(&self) -> CaptureStats {
        let ring = self.ring.read().await;
        let mut stats = CaptureStats {
            total: ring.len() as u64,
            ..CaptureStats::default()
        };
        for record in ring.iter() {
            *stats
                .methods
                .entry(record.request.method.to_ascii_uppercase())
                .or_insert(0) += 1;
            if let Some(response) = &record.response {
                *stats.status_codes.entry(response.status).or_insert(0) += 1;
            }
        }
        stats
    }
}

/// Order by timestamp descending; records sharing a timestamp keep
/// most-recently-inserted first.
fn newest_first<'a>(records: impl DoubleEndedIterator<Item = &'a FlowRecord>) -> Vec<&'a FlowRecord> {
    let mut sorted: Vec<&FlowRecord> = records.rev().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sorted
}
