//! Request dispatch and recording
//!
//! Rule matching, the three response producers (forwarder, file responder,
//! mock responder), the dispatcher that orders them, the capture recorder,
//! and a plain HTTP host that drives them.

pub mod dispatcher;
pub mod file_responder;
pub mod forwarder;
pub mod hooks;
pub mod matcher;
pub mod mock_responder;
pub mod recorder;
pub mod rules;
pub mod server;

pub use dispatcher::{Dispatch, Dispatcher};
pub use hooks::FlowHooks;
pub use recorder::{FlowId, Recorder};
pub use rules::{JsonFileRuleSource, RuleSnapshot, RuleSource, RuleStore, StaticRuleSource};
