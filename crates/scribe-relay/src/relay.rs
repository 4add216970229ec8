use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use scribe_core::upstream::event_kind;
use scribe_core::SessionId;

use crate::event::{DoneSummary, RelayBody, RelayEvent};

/// Stamps outbound events and publishes them on a broadcast channel.
///
/// Emitting never blocks and never fails: with no live receiver the event is
/// dropped and the caller carries on.
pub struct StreamRelay {
    tx: broadcast::Sender<RelayEvent>,
    sequence: AtomicU64,
    last_timestamp: Mutex<DateTime<Utc>>,
}

impl StreamRelay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sequence: AtomicU64::new(0),
            last_timestamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, session_id: &SessionId, body: RelayBody) -> RelayEvent {
        let event = {
            // Sequence and timestamp are taken under one lock so both orders agree.
            let mut last = self.last_timestamp.lock();
            let timestamp = Utc::now().max(*last);
            *last = timestamp;
            RelayEvent {
                session_id: session_id.clone(),
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
                timestamp,
                body,
            }
        };

        if self.tx.send(event.clone()).is_err() {
            tracing::debug!(
                session_id = %session_id,
                kind = event.kind(),
                "no relay subscribers, event dropped"
            );
        }
        event
    }

    pub fn connected(&self, session_id: &SessionId, title: &str) -> RelayEvent {
        self.emit(
            session_id,
            RelayBody::Connected {
                title: title.to_string(),
            },
        )
    }

    pub fn upstream(&self, session_id: &SessionId, raw: &Value) -> RelayEvent {
        self.emit(
            session_id,
            RelayBody::Upstream {
                kind: event_kind(raw).map(String::from),
                event: raw.clone(),
            },
        )
    }

    pub fn done(&self, session_id: &SessionId, summary: DoneSummary) -> RelayEvent {
        self.emit(session_id, RelayBody::Done(summary))
    }

    pub fn error(&self, session_id: &SessionId, message: impl Into<String>) -> RelayEvent {
        self.emit(
            session_id,
            RelayBody::Error {
                message: message.into(),
            },
        )
    }
}

impl Default for StreamRelay {
    fn default() -> Self {
        Self::new(1024)
    }
}
