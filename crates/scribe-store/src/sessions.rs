use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use scribe_core::{Message, MessageId, Role, Session, SessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;
use crate::store::SessionStore;

const SESSION_COLUMNS: &str = "id, title, runtime_session_id, created_at, updated_at";

/// [`SessionStore`] backed by SQLite. Messages live in their own table and
/// keep their parts as a JSON column.
pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn load_sessions(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(params)?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            for session in &mut sessions {
                session.messages = load_messages(conn, &session.id)?;
            }
            Ok(sessions)
        })
    }
}

impl SessionStore for SqliteSessionStore {
    #[instrument(skip(self), fields(session_id = %id))]
    fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.db.with_conn(|conn| {
            let mut session = conn
                .query_row(
                    &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                    [id.as_str()],
                    |row| Ok(row_to_session(row)),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("session {id}")))??;
            session.messages = load_messages(conn, id)?;
            Ok(session)
        })
    }

    #[instrument(skip(self))]
    fn create(&self, title: Option<&str>) -> Result<Session, StoreError> {
        let session = Session::new(title.map(String::from));
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, title, runtime_session_id, created_at, updated_at)
                 VALUES (?1, ?2, NULL, ?3, ?4)",
                params![
                    session.id.as_str(),
                    session.title,
                    row_helpers::format_timestamp(&session.created_at),
                    row_helpers::format_timestamp(&session.updated_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(session)
    }

    #[instrument(skip(self, message), fields(session_id = %id, message_id = %message.id, role = %message.role))]
    fn append_message(&self, id: &SessionId, message: &Message) -> Result<Message, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let next_position: Option<i64> = tx
                .query_row(
                    "SELECT COALESCE((SELECT MAX(position) + 1 FROM messages WHERE session_id = ?1), 0)
                     FROM sessions WHERE id = ?1",
                    [id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(position) = next_position else {
                return Err(StoreError::NotFound(format!("session {id}")));
            };

            insert_message(&tx, id, position, message)?;
            tx.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                params![row_helpers::format_timestamp(&Utc::now()), id.as_str()],
            )?;
            tx.commit()?;
            Ok(message.clone())
        })
    }

    #[instrument(skip(self, session), fields(session_id = %session.id, messages = session.messages.len()))]
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO sessions (id, title, runtime_session_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    runtime_session_id = excluded.runtime_session_id,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at",
                params![
                    session.id.as_str(),
                    session.title,
                    session.runtime_session_id,
                    row_helpers::format_timestamp(&session.created_at),
                    row_helpers::format_timestamp(&session.updated_at),
                ],
            )?;
            tx.execute("DELETE FROM messages WHERE session_id = ?1", [session.id.as_str()])?;
            for (position, message) in session.messages.iter().enumerate() {
                insert_message(&tx, &session.id, position as i64, message)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn delete(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM messages WHERE session_id = ?1", [id.as_str()])?;
            let removed = tx.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    #[instrument(skip(self))]
    fn list(&self) -> Result<Vec<Session>, StoreError> {
        self.load_sessions(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY updated_at DESC, id DESC"),
            &[],
        )
    }

    #[instrument(skip(self))]
    fn search(&self, term: &str) -> Result<Vec<Session>, StoreError> {
        // scribe_lower folds exactly like str::to_lowercase, so the SQL
        // pre-filter never rejects a session that Session::matches accepts.
        let pattern = format!("%{}%", row_helpers::escape_like(&term.to_lowercase()));
        let candidates = self.load_sessions(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions s WHERE
                    scribe_lower(s.title) LIKE ?1 ESCAPE '\\'
                    OR EXISTS (
                        SELECT 1 FROM messages m WHERE m.session_id = s.id AND (
                            scribe_lower(m.content) LIKE ?1 ESCAPE '\\'
                            OR scribe_lower(m.parts) LIKE ?1 ESCAPE '\\'
                        )
                    )
                 ORDER BY updated_at DESC, id DESC"
            ),
            &[&pattern],
        )?;

        Ok(candidates.into_iter().filter(|s| s.matches(term)).collect())
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn rename(&self, id: &SessionId, title: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, row_helpers::format_timestamp(&Utc::now()), id.as_str()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn rename_if_title(&self, id: &SessionId, expected: &str, title: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3 AND title = ?4",
                params![
                    title,
                    row_helpers::format_timestamp(&Utc::now()),
                    id.as_str(),
                    expected
                ],
            )?;
            Ok(updated > 0)
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn set_runtime_session(&self, id: &SessionId, token: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE sessions SET runtime_session_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![token, row_helpers::format_timestamp(&Utc::now()), id.as_str()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }
}

fn insert_message(
    conn: &Connection,
    session_id: &SessionId,
    position: i64,
    message: &Message,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO messages (id, session_id, position, role, content, parts, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            message.id.as_str(),
            session_id.as_str(),
            position,
            message.role.to_string(),
            message.content,
            serde_json::to_string(&message.parts)?,
            row_helpers::format_timestamp(&message.created_at),
        ],
    )?;
    Ok(())
}

fn load_messages(conn: &Connection, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, role, content, parts, created_at
         FROM messages WHERE session_id = ?1
         ORDER BY position ASC",
    )?;
    let mut rows = stmt.query([session_id.as_str()])?;
    let mut messages = Vec::new();
    while let Some(row) = rows.next()? {
        messages.push(row_to_message(row)?);
    }
    Ok(messages)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, StoreError> {
    let created: String = row_helpers::get(row, 3, "sessions", "created_at")?;
    let updated: String = row_helpers::get(row, 4, "sessions", "updated_at")?;

    Ok(Session {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        title: row_helpers::get(row, 1, "sessions", "title")?,
        runtime_session_id: row_helpers::get_opt(row, 2, "sessions", "runtime_session_id")?,
        created_at: row_helpers::parse_timestamp(&created, "sessions", "created_at")?,
        updated_at: row_helpers::parse_timestamp(&updated, "sessions", "updated_at")?,
        messages: Vec::new(),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let role: String = row_helpers::get(row, 1, "messages", "role")?;
    let parts: String = row_helpers::get(row, 3, "messages", "parts")?;
    let created: String = row_helpers::get(row, 4, "messages", "created_at")?;

    Ok(Message {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        role: row_helpers::parse_enum::<Role>(&role, "messages", "role")?,
        content: row_helpers::get(row, 2, "messages", "content")?,
        parts: row_helpers::parse_json(&parts, "messages", "parts")?,
        created_at: row_helpers::parse_timestamp(&created, "messages", "created_at")?,
    })
}
