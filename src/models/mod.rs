//! Data models for the mock proxy core
//!
//! Rule configuration, exchange descriptors and captured flow records.

pub mod exchange;
pub mod flow;
pub mod rules;

pub use exchange::*;
pub use flow::*;
pub use rules::*;
