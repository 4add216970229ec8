use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::RuntimeError;
use crate::ids::SessionId;

/// Raw upstream events in arrival order. An `Err` item ends the stream.
pub type UpstreamStream = Pin<Box<dyn Stream<Item = Result<serde_json::Value, RuntimeError>> + Send>>;

/// One request handed to the agent runtime.
#[derive(Clone, Debug)]
pub struct RuntimeRequest {
    pub session_id: SessionId,
    pub prompt: String,
    /// Runtime-side conversation token captured from a previous `init` event.
    pub resume: Option<String>,
}

/// The external agent runtime. Treated as a black box that yields a lazy
/// sequence of typed event blocks.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    fn name(&self) -> &str;

    async fn query(&self, request: &RuntimeRequest) -> Result<UpstreamStream, RuntimeError>;
}
