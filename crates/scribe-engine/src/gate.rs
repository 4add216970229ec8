use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use scribe_core::SessionId;
use scribe_store::RunLeases;

use crate::error::EngineError;

/// Single-flight gate: at most one active run per session, across every
/// process sharing the store.
///
/// The reconciler does not lock sessions itself; whoever drives it holds a
/// [`SessionPermit`] for the duration of the run.
#[derive(Clone)]
pub struct SessionGate {
    leases: Arc<dyn RunLeases>,
    ttl: Duration,
}

impl SessionGate {
    pub fn new(leases: Arc<dyn RunLeases>, ttl: Duration) -> Self {
        Self {
            leases,
            ttl: ttl.max(Duration::from_millis(30)),
        }
    }

    /// Claim the session or fail with [`EngineError::SessionBusy`]. Inside a
    /// tokio runtime the permit keeps its lease fresh until dropped.
    pub fn try_acquire(&self, session_id: &SessionId) -> Result<SessionPermit, EngineError> {
        let holder = format!("{}-{}", std::process::id(), Uuid::now_v7());
        if !self.leases.acquire_lease(session_id, &holder, self.ttl)? {
            return Err(EngineError::SessionBusy(session_id.to_string()));
        }
        debug!(session_id = %session_id, holder = %holder, "run lease acquired");

        let renewal = tokio::runtime::Handle::try_current().ok().map(|handle| {
            handle.spawn(renew(
                Arc::clone(&self.leases),
                session_id.clone(),
                holder.clone(),
                self.ttl,
            ))
        });

        Ok(SessionPermit {
            leases: Arc::clone(&self.leases),
            session_id: session_id.clone(),
            holder,
            renewal,
        })
    }
}

async fn renew(leases: Arc<dyn RunLeases>, session_id: SessionId, holder: String, ttl: Duration) {
    let mut ticks = tokio::time::interval(ttl / 3);
    ticks.tick().await;
    loop {
        ticks.tick().await;
        match leases.renew_lease(&session_id, &holder, ttl) {
            Ok(true) => {}
            Ok(false) => {
                warn!(session_id = %session_id, "run lease lost to another holder");
                return;
            }
            Err(e) => warn!(session_id = %session_id, error = %e, "failed to renew run lease"),
        }
    }
}

/// Releases the session when dropped.
pub struct SessionPermit {
    leases: Arc<dyn RunLeases>,
    session_id: SessionId,
    holder: String,
    renewal: Option<JoinHandle<()>>,
}

impl fmt::Debug for SessionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPermit")
            .field("session_id", &self.session_id)
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
        if let Err(e) = self.leases.release_lease(&self.session_id, &self.holder) {
            warn!(session_id = %self.session_id, error = %e, "failed to release run lease");
        }
    }
}
