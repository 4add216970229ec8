use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};

use scribe_core::{AgentRuntime, RuntimeError, RuntimeRequest, UpstreamStream};

/// Pre-programmed runtime behaviour for deterministic tests.
pub enum Script {
    /// Yield these items, then close the stream.
    Events(Vec<Result<Value, RuntimeError>>),
    /// Yield these events, then stay open without ever finishing.
    Hang(Vec<Value>),
    /// Fail the `query` call itself.
    Fail(RuntimeError),
    /// Wait, then behave like the inner script.
    Delay(Duration, Box<Script>),
}

impl Script {
    pub fn events(events: Vec<Value>) -> Self {
        Self::Events(events.into_iter().map(Ok).collect())
    }

    /// Yield `events`, then fail mid-stream with `error`.
    pub fn interrupted(events: Vec<Value>, error: RuntimeError) -> Self {
        let mut items: Vec<Result<Value, RuntimeError>> = events.into_iter().map(Ok).collect();
        items.push(Err(error));
        Self::Events(items)
    }

    pub fn delayed(delay: Duration, inner: Script) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Runtime that plays back one [`Script`] per query, in order.
pub struct ScriptedRuntime {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<RuntimeRequest>>,
}

impl ScriptedRuntime {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RuntimeRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn query(&self, request: &RuntimeRequest) -> Result<UpstreamStream, RuntimeError> {
        self.requests.lock().push(request.clone());
        let Some(mut script) = self.scripts.lock().pop_front() else {
            return Err(RuntimeError::Spawn(format!(
                "ScriptedRuntime: no script configured for call {}",
                self.call_count()
            )));
        };

        // Unrolled iteratively to avoid recursive async.
        loop {
            match script {
                Script::Events(items) => return Ok(Box::pin(stream::iter(items))),
                Script::Hang(events) => {
                    return Ok(Box::pin(
                        stream::iter(events.into_iter().map(Ok::<Value, RuntimeError>))
                            .chain(stream::pending()),
                    ))
                }
                Script::Fail(e) => return Err(e),
                Script::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    script = *inner;
                }
            }
        }
    }
}

/// Builders for the runtime's wire events.
pub mod events {
    use super::*;

    pub fn init(runtime_session_id: &str) -> Value {
        json!({"type": "system", "subtype": "init", "session_id": runtime_session_id, "model": "test-model"})
    }

    pub fn text(text: &str) -> Value {
        json!({"type": "assistant", "message": {"role": "assistant", "content": [{"type": "text", "text": text}]}})
    }

    pub fn tool_use(id: &str, name: &str, input: Value) -> Value {
        json!({"type": "assistant", "message": {"role": "assistant", "content": [
            {"type": "tool_use", "id": id, "name": name, "input": input}
        ]}})
    }

    /// A tool result; `None` omits the `tool_use_id` field.
    pub fn tool_result(id: Option<&str>, content: &str, is_error: bool) -> Value {
        let mut block = json!({"type": "tool_result", "content": content, "is_error": is_error});
        if let Some(id) = id {
            block["tool_use_id"] = json!(id);
        }
        json!({"type": "user", "message": {"role": "user", "content": [block]}})
    }

    pub fn result(subtype: &str) -> Value {
        json!({
            "type": "result",
            "subtype": subtype,
            "is_error": subtype != "success",
            "num_turns": 2,
            "total_cost_usd": 0.01,
            "duration_ms": 1500
        })
    }

    pub fn error(message: &str) -> Value {
        json!({"type": "error", "error": {"message": message}})
    }
}
