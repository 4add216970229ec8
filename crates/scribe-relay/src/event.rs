use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use scribe_core::{MessageId, SessionId, TerminalInfo};

/// One outbound record on the live channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayEvent {
    pub session_id: SessionId,
    /// Strictly increasing per relay.
    pub sequence: u64,
    /// Never earlier than the previous event's timestamp.
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: RelayBody,
}

impl RelayEvent {
    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.body, RelayBody::Done(_) | RelayBody::Error { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayBody {
    Connected {
        title: String,
    },
    /// A raw upstream event, forwarded untouched.
    Upstream {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        event: Value,
    },
    Done(DoneSummary),
    Error {
        message: String,
    },
}

impl RelayBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Upstream { .. } => "upstream",
            Self::Done(_) => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Payload of the terminal `done` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DoneSummary {
    /// The persisted assistant message, if anything was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl DoneSummary {
    pub fn new(message_id: Option<MessageId>, terminal: Option<&TerminalInfo>) -> Self {
        let Some(t) = terminal else {
            return Self {
                message_id,
                ..Self::default()
            };
        };
        Self {
            message_id,
            subtype: Some(t.outcome.subtype().to_string()),
            is_error: t.is_error,
            result: t.result.clone(),
            num_turns: t.num_turns,
            total_cost_usd: t.total_cost_usd,
            duration_ms: t.duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::TerminalOutcome;
    use serde_json::json;

    fn event(body: RelayBody) -> RelayEvent {
        RelayEvent {
            session_id: SessionId::from_raw("sess_1"),
            sequence: 3,
            timestamp: Utc::now(),
            body,
        }
    }

    #[test]
    fn connected_wire_shape() {
        let json = serde_json::to_value(event(RelayBody::Connected {
            title: "New Chat".into(),
        }))
        .unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["session_id"], "sess_1");
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["title"], "New Chat");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn upstream_keeps_raw_payload() {
        let raw = json!({"type": "assistant", "message": {"content": "hi"}});
        let json = serde_json::to_value(event(RelayBody::Upstream {
            kind: Some("assistant".into()),
            event: raw.clone(),
        }))
        .unwrap();
        assert_eq!(json["type"], "upstream");
        assert_eq!(json["kind"], "assistant");
        assert_eq!(json["event"], raw);
    }

    #[test]
    fn done_carries_terminal_metadata() {
        let info = TerminalInfo {
            outcome: TerminalOutcome::MaxTurns,
            is_error: true,
            result: None,
            num_turns: Some(8),
            total_cost_usd: Some(0.12),
            duration_ms: Some(4200),
        };
        let summary = DoneSummary::new(Some(MessageId::from_raw("msg_9")), Some(&info));
        let ev = event(RelayBody::Done(summary));
        assert!(ev.is_terminal());

        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["message_id"], "msg_9");
        assert_eq!(json["subtype"], "error_max_turns");
        assert_eq!(json["num_turns"], 8);
        assert!(json.get("result").is_none());

        let parsed: RelayEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ev);
    }

    #[test]
    fn done_without_terminal_info() {
        let summary = DoneSummary::new(None, None);
        assert_eq!(summary, DoneSummary::default());
    }

    #[test]
    fn kinds() {
        assert_eq!(event(RelayBody::Error { message: "x".into() }).kind(), "error");
        assert!(!event(RelayBody::Connected { title: String::new() }).is_terminal());
    }
}
