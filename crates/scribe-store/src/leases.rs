use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use tracing::instrument;

use scribe_core::SessionId;

use crate::error::StoreError;
use crate::row_helpers;
use crate::sessions::SqliteSessionStore;

/// Expiring claims on a session's single active run.
///
/// Leases live in the database, so they hold across every process that opens
/// it. A holder that disappears without releasing keeps the session claimed
/// until its lease expires.
pub trait RunLeases: Send + Sync {
    /// Claim the session for `holder` until `ttl` from now. Returns `false`
    /// while another holder's lease is unexpired. Fails with `NotFound` if
    /// the session does not exist.
    fn acquire_lease(&self, id: &SessionId, holder: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Extend `holder`'s lease. Returns `false` if it no longer holds one.
    fn renew_lease(&self, id: &SessionId, holder: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Drop `holder`'s lease. Releasing a lease someone else took over is a no-op.
    fn release_lease(&self, id: &SessionId, holder: &str) -> Result<(), StoreError>;
}

fn expiry(ttl: Duration) -> Result<String, StoreError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| StoreError::Database(format!("invalid lease ttl: {e}")))?;
    Ok(row_helpers::format_timestamp(&(Utc::now() + ttl)))
}

impl RunLeases for SqliteSessionStore {
    #[instrument(skip(self, ttl), fields(session_id = %id))]
    fn acquire_lease(&self, id: &SessionId, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = row_helpers::format_timestamp(&Utc::now());
        let expires_at = expiry(ttl)?;

        self.database().with_conn(|conn| {
            // IMMEDIATE takes the write lock up front so two processes cannot
            // both see the lease as free.
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

            let exists = tx
                .query_row("SELECT 1 FROM sessions WHERE id = ?1", [id.as_str()], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Err(StoreError::NotFound(format!("session {id}")));
            }

            let claimed = tx.execute(
                "INSERT INTO run_leases (session_id, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET
                    holder = excluded.holder,
                    expires_at = excluded.expires_at
                 WHERE run_leases.holder = excluded.holder OR run_leases.expires_at <= ?4",
                params![id.as_str(), holder, expires_at, now],
            )?;
            tx.commit()?;
            Ok(claimed > 0)
        })
    }

    #[instrument(skip(self, ttl), fields(session_id = %id))]
    fn renew_lease(&self, id: &SessionId, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let expires_at = expiry(ttl)?;
        self.database().with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE run_leases SET expires_at = ?1 WHERE session_id = ?2 AND holder = ?3",
                params![expires_at, id.as_str(), holder],
            )?;
            Ok(updated > 0)
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn release_lease(&self, id: &SessionId, holder: &str) -> Result<(), StoreError> {
        self.database().with_conn(|conn| {
            conn.execute(
                "DELETE FROM run_leases WHERE session_id = ?1 AND holder = ?2",
                params![id.as_str(), holder],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::store::SessionStore;
    use assert_matches::assert_matches;

    const MINUTE: Duration = Duration::from_secs(60);

    fn store() -> SqliteSessionStore {
        SqliteSessionStore::new(Database::in_memory().unwrap())
    }

    #[test]
    fn second_holder_is_refused_until_release() {
        let store = store();
        let session = store.create(None).unwrap();

        assert!(store.acquire_lease(&session.id, "a", MINUTE).unwrap());
        assert!(!store.acquire_lease(&session.id, "b", MINUTE).unwrap());

        store.release_lease(&session.id, "a").unwrap();
        assert!(store.acquire_lease(&session.id, "b", MINUTE).unwrap());
    }

    #[test]
    fn same_holder_reacquires() {
        let store = store();
        let session = store.create(None).unwrap();
        assert!(store.acquire_lease(&session.id, "a", MINUTE).unwrap());
        assert!(store.acquire_lease(&session.id, "a", MINUTE).unwrap());
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let store = store();
        let session = store.create(None).unwrap();
        assert!(store.acquire_lease(&session.id, "crashed", Duration::ZERO).unwrap());

        assert!(store.acquire_lease(&session.id, "next", MINUTE).unwrap());
        assert!(!store.renew_lease(&session.id, "crashed", MINUTE).unwrap());
        assert!(store.renew_lease(&session.id, "next", MINUTE).unwrap());
    }

    #[test]
    fn stale_release_leaves_new_holder_alone() {
        let store = store();
        let session = store.create(None).unwrap();
        store.acquire_lease(&session.id, "old", Duration::ZERO).unwrap();
        store.acquire_lease(&session.id, "new", MINUTE).unwrap();

        store.release_lease(&session.id, "old").unwrap();
        assert!(!store.acquire_lease(&session.id, "third", MINUTE).unwrap());
    }

    #[test]
    fn unknown_session_is_not_found() {
        let store = store();
        assert_matches!(
            store.acquire_lease(&SessionId::from_raw("sess_none"), "a", MINUTE),
            Err(StoreError::NotFound(_))
        );
    }

    #[test]
    fn leases_are_shared_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scribe.db");
        let first = SqliteSessionStore::new(Database::open(&path).unwrap());
        let second = SqliteSessionStore::new(Database::open(&path).unwrap());
        let session = first.create(None).unwrap();

        assert!(first.acquire_lease(&session.id, "proc-1", MINUTE).unwrap());
        assert!(!second.acquire_lease(&session.id, "proc-2", MINUTE).unwrap());
    }

    #[test]
    fn deleting_session_drops_its_lease() {
        let store = store();
        let session = store.create(None).unwrap();
        store.acquire_lease(&session.id, "a", MINUTE).unwrap();
        store.delete(&session.id).unwrap();

        let remaining: i64 = store
            .database()
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM run_leases", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
