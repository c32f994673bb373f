//! Capture recorder
//!
//! Request metadata is captured when a flow opens and held in an in-flight
//! table keyed by [`FlowId`]. Completion removes the entry, adds the response
//! half and timing, and appends the finished record to the capture store.
//! Entries whose response never arrives are evicted by size and by age.

use crate::models::{
    body_to_text, headers_to_map, CapturedRequest, CapturedResponse, CompletedResponse,
    FlowRecord, InterceptedRequest,
};
use crate::storage::CaptureStore;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const DEFAULT_MAX_INFLIGHT: usize = 10_000;
pub const DEFAULT_INFLIGHT_TTL: Duration = Duration::from_secs(300);

/// Correlation id threaded from request start to response completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(Uuid);

impl FlowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

struct PendingFlow {
    started: Instant,
    timestamp: i64,
    request: CapturedRequest,
}

pub struct Recorder {
    store: Arc<CaptureStore>,
    inflight: DashMap<FlowId, PendingFlow>,
    max_inflight: usize,
    ttl: Duration,
}

impl Recorder {
    pub fn new(store: Arc<CaptureStore>, max_inflight: usize, ttl: Duration) -> Self {
        Self {
            store,
            inflight: DashMap::new(),
            max_inflight: max_inflight.max(1),
            ttl,
        }
    }

    pub fn store(&self) -> &Arc<CaptureStore> {
        &self.store
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Open a flow for `req`, capturing its request half now.
    pub fn begin(&self, req: &InterceptedRequest) -> FlowId {
        if self.inflight.len() >= self.max_inflight {
            self.evict_oldest();
        }
        let id = FlowId::new();
        self.inflight.insert(
            id,
            PendingFlow {
                started: Instant::now(),
                timestamp: chrono::Utc::now().timestamp_millis(),
                request: capture_request(req),
            },
        );
        id
    }

    /// Finalize a flow and persist it. Returns `None` when the flow is
    /// unknown (already completed or evicted). Storage failures are logged.
    pub async fn complete(&self, id: FlowId, response: &CompletedResponse) -> Option<FlowRecord> {
        let Some((_, pending)) = self.inflight.remove(&id) else {
            tracing::debug!("Completion for unknown flow {}", id);
            return None;
        };

        let record = FlowRecord {
            id: id.to_string(),
            timestamp: pending.timestamp,
            request: pending.request,
            response: Some(CapturedResponse {
                status: response.status,
                headers: headers_to_map(&response.headers),
                body: body_to_text(&response.body),
                size: response.body.len() as u64,
                duration_ms: pending.started.elapsed().as_millis() as u64,
            }),
        };

        if let Err(err) = self.store.append(record.clone()).await {
            tracing::error!("Failed to record flow {}: {:#}", id, err);
        }
        Some(record)
    }

    /// Drop a flow that will never complete.
    pub fn abandon(&self, id: FlowId) -> bool {
        self.inflight.remove(&id).is_some()
    }

    /// Remove in-flight entries older than the TTL.
    pub fn reap_expired(&self) -> usize {
        let before = self.inflight.len();
        let ttl = self.ttl;
        self.inflight.retain(|_, pending| pending.started.elapsed() < ttl);
        let reaped = before.saturating_sub(self.inflight.len());
        if reaped > 0 {
            tracing::debug!("Reaped {} stale in-flight flows", reaped);
        }
        reaped
    }

    /// Periodically reap until `shutdown` flips.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        recorder.reap_expired();
                    }
                }
            }
        })
    }

    fn evict_oldest(&self) {
        let oldest = self
            .inflight
            .iter()
            .min_by_key(|entry| entry.value().started)
            .map(|entry| *entry.key());
        if let Some(id) = oldest {
            self.inflight.remove(&id);
            tracing::warn!("In-flight table full, dropped flow {}", id);
        }
    }
}

fn capture_request(req: &InterceptedRequest) -> CapturedRequest {
    let parts = req.url_parts();
    CapturedRequest {
        method: req.method.to_ascii_uppercase(),
        url: req.url.clone(),
        host: parts.host,
        path: parts.path,
        headers: headers_to_map(&req.headers),
        query: parts.query.unwrap_or_default(),
        body: body_to_text(&req.body),
        size: req.body.len() as u64,
    }
}
