//! Interception engine adapter
//!
//! The two per-flow callbacks an interception engine drives: one when a
//! request arrives, one once a response exists for it.

use crate::models::{CompletedResponse, FlowRecord, InterceptedRequest};
use crate::proxy::dispatcher::{Dispatch, Dispatcher};
use crate::proxy::recorder::{FlowId, Recorder};
use std::sync::Arc;

#[derive(Clone)]
pub struct FlowHooks {
    dispatcher: Arc<Dispatcher>,
    recorder: Arc<Recorder>,
}

impl FlowHooks {
    pub fn new(dispatcher: Arc<Dispatcher>, recorder: Arc<Recorder>) -> Self {
        Self {
            dispatcher,
            recorder,
        }
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    /// Open the flow and decide how it is answered. A `Passthrough` outcome
    /// leaves the upstream request to the engine.
    pub async fn on_request(&self, req: &InterceptedRequest) -> (FlowId, Dispatch) {
        let id = self.recorder.begin(req);
        let outcome = self.dispatcher.dispatch(req).await;
        tracing::debug!("Flow {} {} {} -> {}", id, req.method, req.url, outcome.kind());
        (id, outcome)
    }

    /// Record the finished exchange.
    pub async fn on_response(&self, id: FlowId, response: &CompletedResponse) -> Option<FlowRecord> {
        self.recorder.complete(id, response).await
    }

    /// The engine gave up on the flow without a response.
    pub fn on_abort(&self, id: FlowId) {
        if self.recorder.abandon(id) {
            tracing::debug!("Flow {} aborted", id);
        }
    }
}
