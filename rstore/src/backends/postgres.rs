use chrono::{DateTime, Utc};
use rcommon::{BoxFuture, MetadataMap, SessionId};
use rprovider::Role;
use tokio_postgres::{Client, NoTls, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::repository::ChatRepository;
use crate::types::{ChatMessage, Session, SessionTranscript, now_micros, role_from_str, role_to_str};

pub struct PostgresChatRepository {
    client: Client,
}

impl std::fmt::Debug for PostgresChatRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresChatRepository")
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

impl PostgresChatRepository {
    /// Connects once and keeps the client for the life of the repository.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        if url.trim().is_empty() {
            return Err(StoreError::invalid_request("postgres url cannot be empty"));
        }

        let (client, connection) = tokio_postgres::connect(url, NoTls).await.map_err(|error| {
            StoreError::storage(format!("failed to connect to postgres: {error}"))
        })?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!(error = %error, "postgres connection error");
            }
        });

        client
            .batch_execute(
                "
                CREATE TABLE IF NOT EXISTS chat_sessions (
                    id TEXT PRIMARY KEY,
                    created_at TIMESTAMPTZ NOT NULL,
                    metadata JSONB NOT NULL DEFAULT '{}'::jsonb
                );

                CREATE TABLE IF NOT EXISTS chat_messages (
                    seq BIGSERIAL PRIMARY KEY,
                    id UUID NOT NULL UNIQUE,
                    session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_chat_messages_session_created
                ON chat_messages(session_id, created_at, seq);
                ",
            )
            .await
            .map_err(|error| {
                StoreError::storage(format!("failed to initialize postgres schema: {error}"))
            })?;

        tracing::debug!("postgres chat repository ready");
        Ok(Self { client })
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT created_at, metadata FROM chat_sessions WHERE id = $1",
                &[&session_id.as_str()],
            )
            .await
            .map_err(|error| StoreError::storage(format!("failed to query session: {error}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let metadata = serde_json::from_value::<MetadataMap>(row.get::<usize, serde_json::Value>(1))
            .map_err(|error| {
                StoreError::storage(format!("failed to decode session metadata: {error}"))
            })?;

        Ok(Some(Session {
            id: session_id.clone(),
            created_at: row.get::<usize, DateTime<Utc>>(0),
            metadata,
        }))
    }

    fn decode_message(session_id: &SessionId, row: &Row) -> Result<ChatMessage, StoreError> {
        let role = row.get::<usize, String>(1);
        Ok(ChatMessage {
            id: row.get::<usize, Uuid>(0),
            session_id: session_id.clone(),
            role: role_from_str(&role).ok_or_else(|| {
                StoreError::storage(format!("unknown message role value '{role}'"))
            })?,
            content: row.get::<usize, String>(2),
            created_at: row.get::<usize, DateTime<Utc>>(3),
        })
    }
}

impl ChatRepository for PostgresChatRepository {
    fn create_session<'a>(
        &'a self,
        metadata: MetadataMap,
    ) -> BoxFuture<'a, Result<Session, StoreError>> {
        Box::pin(async move {
            let session = Session::new(metadata);
            let metadata_json = serde_json::to_value(&session.metadata).map_err(|error| {
                StoreError::storage(format!("failed to encode session metadata: {error}"))
            })?;

            self.client
                .execute(
                    "INSERT INTO chat_sessions (id, created_at, metadata) VALUES ($1, $2, $3)",
                    &[&session.id.as_str(), &session.created_at, &metadata_json],
                )
                .await
                .map_err(|error| {
                    StoreError::storage(format!("failed to insert session: {error}"))
                })?;

            Ok(session)
        })
    }

    fn find_session<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Session>, StoreError>> {
        Box::pin(async move { self.load_session(session_id).await })
    }

    fn create_message<'a>(
        &'a self,
        session_id: &'a SessionId,
        role: Role,
        content: String,
    ) -> BoxFuture<'a, Result<ChatMessage, StoreError>> {
        Box::pin(async move {
            if self.load_session(session_id).await?.is_none() {
                return Err(StoreError::not_found(format!(
                    "session '{session_id}' not found"
                )));
            }

            let id = Uuid::new_v4();
            let candidate = now_micros();
            // Ties with the latest row move forward by one microsecond.
            let row = self
                .client
                .query_one(
                    "
                    INSERT INTO chat_messages (id, session_id, role, content, created_at)
                    SELECT $1, $2, $3, $4, GREATEST(
                        $5::timestamptz,
                        COALESCE(
                            (SELECT MAX(created_at) FROM chat_messages WHERE session_id = $2)
                                + INTERVAL '1 microsecond',
                            $5::timestamptz
                        )
                    )
                    RETURNING created_at
                    ",
                    &[
                        &id,
                        &session_id.as_str(),
                        &role_to_str(role),
                        &content,
                        &candidate,
                    ],
                )
                .await
                .map_err(|error| {
                    StoreError::storage(format!("failed to insert message: {error}"))
                })?;

            Ok(ChatMessage {
                id,
                session_id: session_id.clone(),
                role,
                content,
                created_at: row.get::<usize, DateTime<Utc>>(0),
            })
        })
    }

    fn recent_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, StoreError>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = self
                .client
                .query(
                    "
                    SELECT id, role, content, created_at
                    FROM chat_messages
                    WHERE session_id = $1
                    ORDER BY created_at DESC, seq DESC
                    LIMIT $2
                    ",
                    &[&session_id.as_str(), &limit],
                )
                .await
                .map_err(|error| {
                    StoreError::storage(format!("failed to query recent messages: {error}"))
                })?;

            rows.iter()
                .map(|row| Self::decode_message(session_id, row))
                .collect()
        })
    }

    fn session_with_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<SessionTranscript>, StoreError>> {
        Box::pin(async move {
            let Some(session) = self.load_session(session_id).await? else {
                return Ok(None);
            };

            let rows = self
                .client
                .query(
                    "
                    SELECT id, role, content, created_at
                    FROM chat_messages
                    WHERE session_id = $1
                    ORDER BY created_at ASC, seq ASC
                    ",
                    &[&session_id.as_str()],
                )
                .await
                .map_err(|error| {
                    StoreError::storage(format!("failed to query session messages: {error}"))
                })?;

            let messages = rows
                .iter()
                .map(|row| Self::decode_message(session_id, row))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Some(SessionTranscript { session, messages }))
        })
    }
}
