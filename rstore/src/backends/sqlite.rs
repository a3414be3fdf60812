use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rcommon::{BoxFuture, MetadataMap, SessionId};
use rprovider::Role;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::StoreError;
use crate::repository::ChatRepository;
use crate::types::{
    ChatMessage, Session, SessionTranscript, next_timestamp, now_micros, role_from_str,
    role_to_str,
};

#[derive(Debug)]
pub struct SqliteChatRepository {
    connection: Mutex<Connection>,
}

impl SqliteChatRepository {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|error| {
                StoreError::storage(format!(
                    "failed to create sqlite parent directory: {error}"
                ))
            })?;
        }

        let connection = Connection::open(path).map_err(|error| {
            StoreError::storage(format!("failed to open sqlite database: {error}"))
        })?;
        Self::from_connection(connection)
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory().map_err(|error| {
            StoreError::storage(format!("failed to open in-memory sqlite database: {error}"))
        })?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> Result<Self, StoreError> {
        connection
            .busy_timeout(Duration::from_secs(5))
            .map_err(|error| {
                StoreError::storage(format!("failed to configure sqlite busy timeout: {error}"))
            })?;
        let repository = Self {
            connection: Mutex::new(connection),
        };
        repository.initialize_schema()?;
        Ok(repository)
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::storage("sqlite repository lock poisoned"))
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                created_at_micros INTEGER NOT NULL,
                metadata_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at_micros INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chat_messages_session_created
            ON chat_messages(session_id, created_at_micros, seq);
            ",
        )
        .map_err(|error| {
            StoreError::storage(format!("failed to initialize sqlite schema: {error}"))
        })?;

        Ok(())
    }

    fn load_session(conn: &Connection, session_id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row = conn
            .query_row(
                "SELECT created_at_micros, metadata_json FROM chat_sessions WHERE id = ?1",
                params![session_id.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(|error| StoreError::storage(format!("failed to query session: {error}")))?;

        let Some((created_at, metadata_json)) = row else {
            return Ok(None);
        };

        let metadata = serde_json::from_str::<MetadataMap>(&metadata_json).map_err(|error| {
            StoreError::storage(format!("failed to decode session metadata: {error}"))
        })?;

        Ok(Some(Session {
            id: session_id.clone(),
            created_at: decode_micros(created_at)?,
            metadata,
        }))
    }

    fn load_messages(
        conn: &Connection,
        session_id: &SessionId,
        newest_first: bool,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let order = if newest_first { "DESC" } else { "ASC" };
        let limit = limit.map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let sql = format!(
            "
            SELECT id, role, content, created_at_micros
            FROM chat_messages
            WHERE session_id = ?1
            ORDER BY created_at_micros {order}, seq {order}
            LIMIT ?2
            "
        );

        let mut stmt = conn.prepare(&sql).map_err(|error| {
            StoreError::storage(format!("failed to prepare message query: {error}"))
        })?;
        let rows = stmt
            .query_map(params![session_id.as_str(), limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|error| {
                StoreError::storage(format!("failed to query message rows: {error}"))
            })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, role, content, created_at) = row.map_err(|error| {
                StoreError::storage(format!("failed to read message row: {error}"))
            })?;
            messages.push(ChatMessage {
                id: Uuid::parse_str(&id).map_err(|error| {
                    StoreError::storage(format!("invalid message id '{id}': {error}"))
                })?,
                session_id: session_id.clone(),
                role: role_from_str(&role).ok_or_else(|| {
                    StoreError::storage(format!("unknown message role value '{role}'"))
                })?,
                content,
                created_at: decode_micros(created_at)?,
            });
        }

        Ok(messages)
    }
}

impl ChatRepository for SqliteChatRepository {
    fn create_session<'a>(
        &'a self,
        metadata: MetadataMap,
    ) -> BoxFuture<'a, Result<Session, StoreError>> {
        Box::pin(async move {
            let session = Session::new(metadata);
            let metadata_json = serde_json::to_string(&session.metadata).map_err(|error| {
                StoreError::storage(format!("failed to encode session metadata: {error}"))
            })?;

            let conn = self.connection()?;
            conn.execute(
                "INSERT INTO chat_sessions (id, created_at_micros, metadata_json) VALUES (?1, ?2, ?3)",
                params![
                    session.id.as_str(),
                    session.created_at.timestamp_micros(),
                    metadata_json
                ],
            )
            .map_err(|error| StoreError::storage(format!("failed to insert session: {error}")))?;

            Ok(session)
        })
    }

    fn find_session<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Session>, StoreError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            Self::load_session(&conn, session_id)
        })
    }

    fn create_message<'a>(
        &'a self,
        session_id: &'a SessionId,
        role: Role,
        content: String,
    ) -> BoxFuture<'a, Result<ChatMessage, StoreError>> {
        Box::pin(async move {
            let mut conn = self.connection()?;
            let tx = conn
                .transaction()
                .map_err(|error| StoreError::storage(format!("failed to begin tx: {error}")))?;

            let exists = tx
                .query_row(
                    "SELECT 1 FROM chat_sessions WHERE id = ?1",
                    params![session_id.as_str()],
                    |_| Ok(()),
                )
                .optional()
                .map_err(|error| StoreError::storage(format!("failed to query session: {error}")))?
                .is_some();
            if !exists {
                return Err(StoreError::not_found(format!(
                    "session '{session_id}' not found"
                )));
            }

            let previous = tx
                .query_row(
                    "SELECT MAX(created_at_micros) FROM chat_messages WHERE session_id = ?1",
                    params![session_id.as_str()],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .map_err(|error| {
                    StoreError::storage(format!("failed to query latest message time: {error}"))
                })?
                .map(decode_micros)
                .transpose()?;

            let message = ChatMessage {
                id: Uuid::new_v4(),
                session_id: session_id.clone(),
                role,
                content,
                created_at: next_timestamp(previous, now_micros()),
            };

            tx.execute(
                "
                INSERT INTO chat_messages (id, session_id, role, content, created_at_micros)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
                params![
                    message.id.to_string(),
                    session_id.as_str(),
                    role_to_str(message.role),
                    &message.content,
                    message.created_at.timestamp_micros(),
                ],
            )
            .map_err(|error| StoreError::storage(format!("failed to insert message: {error}")))?;

            tx.commit()
                .map_err(|error| StoreError::storage(format!("failed to commit message: {error}")))?;

            Ok(message)
        })
    }

    fn recent_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, StoreError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            Self::load_messages(&conn, session_id, true, Some(limit))
        })
    }

    fn session_with_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<SessionTranscript>, StoreError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            let Some(session) = Self::load_session(&conn, session_id)? else {
                return Ok(None);
            };
            let messages = Self::load_messages(&conn, session_id, false, None)?;
            Ok(Some(SessionTranscript { session, messages }))
        })
    }
}

fn decode_micros(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
        StoreError::storage(format!("timestamp out of range: {micros} microseconds"))
    })
}

pub(crate) fn default_sqlite_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os("RELAY_SQLITE_PATH") {
        return PathBuf::from(explicit);
    }

    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        return PathBuf::from(home).join(".relay").join("relay.sqlite3");
    }

    PathBuf::from("relay.sqlite3")
}
