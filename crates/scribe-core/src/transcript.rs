use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, PartId, SessionId};

/// Title given to sessions created without one. Background title generation
/// only replaces this value.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Result assigned to a tool call that never received one before finalization.
pub const NO_OUTPUT_RESULT: &str = "completed, no output";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    /// Conversation token of the upstream runtime, used to resume it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_session_id: Option<String>,
}

impl Session {
    pub fn new(title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            title: title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string()),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            runtime_session_id: None,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_SESSION_TITLE
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Case-insensitive substring match over the title, message text,
    /// tool names and serialized tool input.
    pub fn matches(&self, term: &str) -> bool {
        let needle = term.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self.messages.iter().any(|m| m.matches_lowercase(&needle))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    /// Concatenation of every text part, kept for search and previews.
    pub content: String,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn empty(role: Role) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: String::new(),
            parts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Empty assistant shell, filled in as the stream is consumed.
    pub fn assistant() -> Self {
        Self::empty(Role::Assistant)
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        let mut msg = Self::empty(Role::User);
        msg.push_text(text);
        msg
    }

    fn next_order(&self) -> u32 {
        self.parts.len() as u32
    }

    /// Append a text part and extend the flat content with it.
    pub fn push_text(&mut self, text: impl Into<String>) -> usize {
        let text = text.into();
        self.content.push_str(&text);
        let order = self.next_order();
        self.parts.push(MessagePart {
            id: PartId::new(),
            order,
            body: PartBody::Text { text },
        });
        self.parts.len() - 1
    }

    /// Append a tool call that is still executing. Returns its part index.
    pub fn push_tool_call(
        &mut self,
        call_id: Option<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> usize {
        let order = self.next_order();
        self.parts.push(MessagePart {
            id: PartId::new(),
            order,
            body: PartBody::Tool(ToolPart {
                name: name.into(),
                input,
                result: None,
                in_progress: true,
                is_error: false,
                call_id,
            }),
        });
        self.parts.len() - 1
    }

    pub fn tool_part(&self, index: usize) -> Option<&ToolPart> {
        self.parts.get(index).and_then(MessagePart::as_tool)
    }

    pub fn tool_part_mut(&mut self, index: usize) -> Option<&mut ToolPart> {
        match self.parts.get_mut(index).map(|p| &mut p.body) {
            Some(PartBody::Tool(tool)) => Some(tool),
            _ => None,
        }
    }

    pub fn tool_parts(&self) -> impl Iterator<Item = &ToolPart> {
        self.parts.iter().filter_map(MessagePart::as_tool)
    }

    /// Force every executing tool call to completion. Calls without a result
    /// get [`NO_OUTPUT_RESULT`]. Returns how many parts were changed.
    pub fn complete_pending_tools(&mut self) -> usize {
        let mut completed = 0;
        for part in &mut self.parts {
            if let PartBody::Tool(tool) = &mut part.body {
                if tool.in_progress {
                    tool.in_progress = false;
                    if tool.result.is_none() {
                        tool.result = Some(NO_OUTPUT_RESULT.to_string());
                    }
                    completed += 1;
                }
            }
        }
        completed
    }

    pub fn has_pending_tools(&self) -> bool {
        self.tool_parts().any(|t| t.in_progress)
    }

    /// A message with no parts and no text is not a transcript entry.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && self.content.is_empty()
    }

    /// Ordered concatenation of the text parts.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match &p.body {
                PartBody::Text { text } => Some(text.as_str()),
                PartBody::Tool(_) => None,
            })
            .collect()
    }

    fn matches_lowercase(&self, needle: &str) -> bool {
        self.content.to_lowercase().contains(needle)
            || self.tool_parts().any(|t| {
                t.name.to_lowercase().contains(needle)
                    || t.input.to_string().to_lowercase().contains(needle)
            })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    pub id: PartId,
    /// Position within the owning message, starting at zero.
    pub order: u32,
    #[serde(flatten)]
    pub body: PartBody,
}

impl MessagePart {
    pub fn as_tool(&self) -> Option<&ToolPart> {
        match &self.body {
            PartBody::Tool(tool) => Some(tool),
            PartBody::Text { .. } => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            PartBody::Text { text } => Some(text),
            PartBody::Tool(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartBody {
    Text { text: String },
    Tool(ToolPart),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolPart {
    pub name: String,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub in_progress: bool,
    pub is_error: bool,
    /// Upstream identifier matched against later result events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl ToolPart {
    pub fn resolve(&mut self, content: impl Into<String>, is_error: bool) {
        self.result = Some(content.into());
        self.is_error = is_error;
        self.in_progress = false;
    }
}
