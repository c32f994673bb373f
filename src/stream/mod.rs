//! Live capture streaming

pub mod broadcaster;
pub mod tail;

pub use broadcaster::{Broadcaster, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
pub use tail::{LogTail, DEFAULT_TAIL_INTERVAL};
