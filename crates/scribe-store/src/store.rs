use scribe_core::{Message, Session, SessionId};

use crate::error::StoreError;

/// Durable, keyed persistence of session transcripts.
///
/// Writes are last-writer-wins per session record. The store does not
/// serialize concurrent writers; callers hold at most one active writer per
/// session.
pub trait SessionStore: Send + Sync {
    /// Load a session with all of its messages.
    fn get(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// Create and persist an empty session.
    fn create(&self, title: Option<&str>) -> Result<Session, StoreError>;

    /// Append a message after the session's existing ones and bump its
    /// `updated_at`. Fails with `NotFound` if the session does not exist.
    fn append_message(&self, id: &SessionId, message: &Message) -> Result<Message, StoreError>;

    /// Overwrite the whole session record. Idempotent.
    fn save(&self, session: &Session) -> Result<(), StoreError>;

    /// Returns whether a session was removed.
    fn delete(&self, id: &SessionId) -> Result<bool, StoreError>;

    /// All sessions, most recently updated first.
    fn list(&self) -> Result<Vec<Session>, StoreError>;

    /// Case-insensitive substring search over titles, message text, tool
    /// names and serialized tool input. Ordered like [`SessionStore::list`].
    fn search(&self, term: &str) -> Result<Vec<Session>, StoreError>;

    /// Write only the title column.
    fn rename(&self, id: &SessionId, title: &str) -> Result<(), StoreError>;

    /// Write the title only while the stored one still equals `expected`.
    /// Returns whether the title was written; a missing session is `false`.
    fn rename_if_title(&self, id: &SessionId, expected: &str, title: &str) -> Result<bool, StoreError>;

    /// Write only the upstream runtime token and bump `updated_at`.
    fn set_runtime_session(&self, id: &SessionId, token: &str) -> Result<(), StoreError>;
}
