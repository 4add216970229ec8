//! Upstream runtime wire format and the block decoder.
//!
//! The runtime emits newline-delimited JSON objects discriminated by `type`:
//!
//! ```text
//! system    { subtype: "init", session_id, model }
//! assistant { message: { content: [text | tool_use | thinking ...] } }
//! user      { message: { content: [tool_result ...] | "prompt echo" } }
//! result    { subtype: "success" | "error_max_turns" | ..., result, num_turns, ... }
//! error     { error: { message } | message }
//! ```
//!
//! [`decode`] classifies one raw event without side effects. Anything it does
//! not recognise is reported as [`DecodedEvent::Unclassified`] so the relay can
//! still forward it.

use serde::Deserialize;
use serde_json::Value;

/// One raw upstream event, classified.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedEvent {
    Init {
        runtime_session_id: Option<String>,
        model: Option<String>,
    },
    AssistantContent(Vec<AssistantBlock>),
    ToolResults(Vec<ToolResultBlock>),
    Terminal(TerminalInfo),
    Error {
        message: String,
    },
    /// A known event kind whose payload did not have the expected shape.
    Malformed {
        kind: String,
        detail: String,
    },
    Unclassified {
        kind: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum AssistantBlock {
    Text {
        text: String,
    },
    ToolCall {
        call_id: Option<String>,
        name: String,
        input: Value,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolResultBlock {
    /// Absent on some runtime versions; see the correlation fallback.
    pub call_id: Option<String>,
    pub is_error: bool,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TerminalInfo {
    pub outcome: TerminalOutcome,
    pub is_error: bool,
    pub result: Option<String>,
    pub num_turns: Option<u32>,
    pub total_cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
}

/// How the runtime says the turn ended, parsed from the `result` subtype.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminalOutcome {
    Success,
    MaxTurns,
    ExecutionError,
    Other(String),
}

impl TerminalOutcome {
    pub fn from_subtype(subtype: &str) -> Self {
        match subtype {
            "success" => Self::Success,
            "error_max_turns" => Self::MaxTurns,
            "error_during_execution" => Self::ExecutionError,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn subtype(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::MaxTurns => "error_max_turns",
            Self::ExecutionError => "error_during_execution",
            Self::Other(s) => s,
        }
    }

    pub fn is_early_termination(&self) -> bool {
        !matches!(self, Self::Success)
    }

    /// Fixed text recorded in the transcript when the turn stopped early.
    pub fn notice(&self) -> Option<String> {
        match self {
            Self::Success => None,
            Self::MaxTurns => Some(
                "\n\n_Stopped: the agent reached its maximum number of turns before finishing._"
                    .to_string(),
            ),
            Self::ExecutionError => Some(
                "\n\n_Stopped: the agent hit an error during execution._".to_string(),
            ),
            Self::Other(subtype) => Some(format!("\n\n_Stopped early ({subtype})._")),
        }
    }
}

// --- Wire types ---

#[derive(Deserialize)]
struct SystemEvent {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    message: EnvelopeBody,
}

#[derive(Deserialize)]
struct EnvelopeBody {
    #[serde(default)]
    content: ContentField,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContentField {
    Text(String),
    Blocks(Vec<WireBlock>),
}

impl Default for ContentField {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Option<ToolResultBody>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ToolResultBody {
    Text(String),
    Blocks(Vec<ResultBlock>),
}

#[derive(Deserialize)]
struct ResultBlock {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl ToolResultBody {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Blocks(blocks) => blocks
                .into_iter()
                .filter(|b| b.kind.as_deref().map_or(true, |k| k == "text"))
                .filter_map(|b| b.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Deserialize)]
struct ResultEvent {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    is_error: Option<bool>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    num_turns: Option<u32>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    duration_ms: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

/// The `type` discriminator of a raw event, if present.
pub fn event_kind(raw: &Value) -> Option<&str> {
    raw.get("type").and_then(Value::as_str)
}

/// Classify one raw upstream event.
pub fn decode(raw: &Value) -> DecodedEvent {
    let Some(kind) = event_kind(raw) else {
        return DecodedEvent::Unclassified { kind: None };
    };

    let decoded = match kind {
        "system" => decode_system(raw),
        "assistant" => decode_assistant(raw),
        "user" => decode_user(raw),
        "result" => decode_result(raw),
        "error" => decode_error(raw),
        other => Ok(DecodedEvent::Unclassified {
            kind: Some(other.to_string()),
        }),
    };

    decoded.unwrap_or_else(|e| DecodedEvent::Malformed {
        kind: kind.to_string(),
        detail: e.to_string(),
    })
}

fn decode_system(raw: &Value) -> Result<DecodedEvent, serde_json::Error> {
    let event = SystemEvent::deserialize(raw)?;
    match event.subtype.as_deref() {
        Some("init") => Ok(DecodedEvent::Init {
            runtime_session_id: event.session_id,
            model: event.model,
        }),
        _ => Ok(DecodedEvent::Unclassified {
            kind: Some("system".to_string()),
        }),
    }
}

fn decode_assistant(raw: &Value) -> Result<DecodedEvent, serde_json::Error> {
    let envelope = Envelope::deserialize(raw)?;
    let blocks = match envelope.message.content {
        ContentField::Text(text) => vec![AssistantBlock::Text { text }],
        ContentField::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|b| match b {
                WireBlock::Text { text } => Some(AssistantBlock::Text { text }),
                WireBlock::ToolUse { id, name, input } => Some(AssistantBlock::ToolCall {
                    call_id: id,
                    name,
                    input: normalize_input(input),
                }),
                WireBlock::ToolResult { .. } | WireBlock::Other => None,
            })
            .collect(),
    };
    Ok(DecodedEvent::AssistantContent(blocks))
}

fn decode_user(raw: &Value) -> Result<DecodedEvent, serde_json::Error> {
    let envelope = Envelope::deserialize(raw)?;
    let results: Vec<ToolResultBlock> = match envelope.message.content {
        ContentField::Text(_) => Vec::new(),
        ContentField::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|b| match b {
                WireBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(ToolResultBlock {
                    call_id: tool_use_id.filter(|id| !id.is_empty()),
                    is_error: is_error.unwrap_or(false),
                    content: content.map(ToolResultBody::into_text).unwrap_or_default(),
                }),
                _ => None,
            })
            .collect(),
    };

    if results.is_empty() {
        Ok(DecodedEvent::Unclassified {
            kind: Some("user".to_string()),
        })
    } else {
        Ok(DecodedEvent::ToolResults(results))
    }
}

fn decode_result(raw: &Value) -> Result<DecodedEvent, serde_json::Error> {
    let event = ResultEvent::deserialize(raw)?;
    let outcome = TerminalOutcome::from_subtype(event.subtype.as_deref().unwrap_or("success"));
    Ok(DecodedEvent::Terminal(TerminalInfo {
        is_error: event.is_error.unwrap_or(outcome.is_early_termination()),
        outcome,
        result: event.result,
        num_turns: event.num_turns,
        total_cost_usd: event.total_cost_usd,
        duration_ms: event.duration_ms,
    }))
}

fn decode_error(raw: &Value) -> Result<DecodedEvent, serde_json::Error> {
    let event = ErrorEvent::deserialize(raw)?;
    let message = event
        .error
        .as_ref()
        .and_then(|e| match e {
            Value::String(s) => Some(s.clone()),
            other => other.get("message").and_then(Value::as_str).map(String::from),
        })
        .or(event.message)
        .unwrap_or_else(|| "upstream runtime reported an error".to_string());
    Ok(DecodedEvent::Error { message })
}

/// Tool input is an opaque key-value payload; anything else is wrapped.
fn normalize_input(input: Value) -> Value {
    match input {
        Value::Object(_) => input,
        Value::Null => Value::Object(serde_json::Map::new()),
        other => serde_json::json!({ "value": other }),
    }
}
