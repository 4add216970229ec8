use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use scribe_core::SessionId;

/// Unique subscriber identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub String);

impl Default for SubscriberId {
    fn default() -> Self {
        Self(format!("sub_{}", Uuid::now_v7()))
    }
}

impl SubscriberId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Subscriber {
    session_id: SessionId,
    tx: mpsc::Sender<String>,
}

/// Live subscribers, each watching one session through a bounded queue.
///
/// A full queue holds up delivery until its reader catches up, so a slow
/// reader sees every event, including the terminal one. Only a subscriber
/// whose receiver is gone loses events; it is removed on the next delivery.
pub struct RelayHub {
    subscribers: DashMap<SubscriberId, Subscriber>,
    max_queue: usize,
}

impl RelayHub {
    pub fn new(max_queue: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            max_queue: max_queue.max(1),
        }
    }

    /// Register a subscriber for `session_id` and return its receiving end.
    pub fn subscribe(&self, session_id: SessionId) -> (SubscriberId, mpsc::Receiver<String>) {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.max_queue);
        self.subscribers
            .insert(id.clone(), Subscriber { session_id, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        self.subscribers.remove(id).is_some()
    }

    /// Queue `line` for every subscriber of the session, waiting for room in
    /// full queues. Returns how many subscribers accepted it.
    pub async fn deliver(&self, session_id: &SessionId, line: &str) -> usize {
        // Senders are cloned out so no map shard stays locked across an await.
        let targets: Vec<(SubscriberId, mpsc::Sender<String>)> = self
            .subscribers
            .iter()
            .filter(|e| &e.value().session_id == session_id)
            .map(|e| (e.key().clone(), e.value().tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in targets {
            if tx.capacity() == 0 {
                tracing::debug!(
                    subscriber = %id,
                    session_id = %session_id,
                    "subscriber queue full, waiting for reader"
                );
            }
            match tx.send(line.to_string()).await {
                Ok(()) => delivered += 1,
                Err(_) => {
                    self.subscribers.remove(&id);
                    tracing::debug!(subscriber = %id, "removed closed subscriber");
                }
            }
        }
        delivered
    }

    pub fn count(&self) -> usize {
        self.subscribers.len()
    }
}
