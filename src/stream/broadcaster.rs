//! Live event fan-out
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a full queue
//! drops that event for that subscriber only, and a closed queue removes the
//! subscriber.

use crate::models::LiveEvent;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

pub struct Broadcaster {
    next_id: AtomicU64,
    subscribers: DashMap<u64, mpsc::Sender<LiveEvent>>,
    buffer: usize,
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            subscribers: DashMap::new(),
            buffer: buffer.max(1),
        })
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.insert(id, tx);
        tracing::debug!("Live subscriber {} connected ({} total)", id, self.subscribers.len());
        Subscription {
            id,
            rx,
            owner: Arc::downgrade(self),
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            tracing::debug!("Live subscriber {} disconnected", id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver `event` to every subscriber, returning how many accepted it.
    pub fn publish(&self, event: &LiveEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Live subscriber {} is lagging, dropping event", entry.key());
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        for id in closed {
            self.unsubscribe(id);
        }
        delivered
    }
}

/// Receiving end of a live subscription; unsubscribes on drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<LiveEvent>,
    owner: Weak<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<LiveEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LiveEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.unsubscribe(self.id);
        }
    }
}
