use std::sync::Arc;

use tokio::sync::broadcast;

use crate::event::RelayEvent;
use crate::hub::RelayHub;

/// Reads the relay broadcast and hands each event, as one JSON line, to the
/// hub subscribers of its session.
///
/// While a subscriber's queue is full, later events wait in the broadcast
/// buffer; the relay itself never blocks.
pub struct RelayBridge {
    hub: Arc<RelayHub>,
}

impl RelayBridge {
    pub fn new(hub: Arc<RelayHub>) -> Self {
        Self { hub }
    }

    /// Spawn the forwarding task. It ends when every relay sender is gone.
    pub fn start(&self, mut rx: broadcast::Receiver<RelayEvent>) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(&self.hub);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serialize_event(&event) {
                        Some(line) => {
                            hub.deliver(&event.session_id, &line).await;
                        }
                        None => {
                            tracing::warn!(session_id = %event.session_id, "failed to serialize relay event");
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "relay bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("relay bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

pub fn create_bridge(
    hub: Arc<RelayHub>,
    rx: broadcast::Receiver<RelayEvent>,
) -> tokio::task::JoinHandle<()> {
    RelayBridge::new(hub).start(rx)
}

pub fn serialize_event(event: &RelayEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}
