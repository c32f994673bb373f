//! # Mock Proxy Core
//!
//! Request-dispatch, forwarding and capture-recording engine for an HTTP
//! interception proxy.
//!
//! ## Features
//!
//! - Host/port request mapping with 502/504 failure translation
//! - Local file responses with byte-range support
//! - Exact-match mock responses
//! - Append-only capture log with a bounded in-memory index
//! - Live tail of the capture log fanned out to subscribers
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │          Interception engine / plain HTTP host (server)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  FlowHooks ── on_request ──> Dispatcher                       │
//! │                 │              ├─ Forwarder    (mappings)     │
//! │                 │              ├─ FileResponder (files)       │
//! │                 │              └─ MockResponder (mocks)       │
//! │                 └─ on_response ──> Recorder ──> CaptureStore  │
//! │                                         (index + JSONL log)   │
//! │  LogTail ── polls log ──> Broadcaster ──> subscribers         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod models;
pub mod proxy;
pub mod storage;
pub mod stream;
