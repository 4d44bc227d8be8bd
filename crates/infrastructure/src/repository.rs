//! PostgreSQL 仓储实现
//!
//! 使用 sqlx 运行时查询，表结构见工作区根目录 `migrations/`。

use async_trait::async_trait;
use domain::{
    BannedWord, ConversationId, ConversationRepository, Message, MessageId, MessageRepository,
    ModerationAction, ModerationKind, ModerationLog, ModerationRepository, Principal,
    RepositoryError, RepositoryResult, Timestamp, UserId, UserRepository,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::RowNotFound = err {
        return RepositoryError::NotFound;
    }
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());
    match code.as_deref() {
        Some(UNIQUE_VIOLATION) => RepositoryError::Conflict,
        Some(FOREIGN_KEY_VIOLATION) => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct PrincipalRecord {
    id: Uuid,
    email: String,
    display_name: String,
}

impl From<PrincipalRecord> for Principal {
    fn from(value: PrincipalRecord) -> Self {
        Principal::new(UserId::from(value.id), value.email, value.display_name)
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    body: String,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl From<MessageRecord> for Message {
    fn from(value: MessageRecord) -> Self {
        Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            body: value.body,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct BannedWordRecord {
    id: Uuid,
    conversation_id: Uuid,
    word: String,
    created_at: Timestamp,
}

impl From<BannedWordRecord> for BannedWord {
    fn from(value: BannedWordRecord) -> Self {
        BannedWord {
            id: value.id,
            conversation_id: ConversationId::from(value.conversation_id),
            word: value.word,
            created_at: value.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(
                   SELECT 1 FROM conversation_members WHERE conversation_id = $1 AND user_id = $2
               )"#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(exists)
    }

    async fn get_members(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<Principal>> {
        let records = sqlx::query_as::<_, PrincipalRecord>(
            r#"
            SELECT u.id, u.email, u.display_name
            FROM conversation_members cm
            JOIN users u ON u.id = cm.user_id
            WHERE cm.conversation_id = $1
            ORDER BY cm.joined_at
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Principal::from).collect())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: &Message) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(&message.body)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"SELECT id, conversation_id, sender_id, body, created_at, updated_at FROM messages WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Message::from))
    }

    async fn delete(&self, id: MessageId) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
        read_at: Timestamp,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, user_id) DO UPDATE SET read_at = EXCLUDED.read_at
            "#,
        )
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .bind(read_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgModerationRepository {
    pool: PgPool,
}

impl PgModerationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ModerationRepository for PgModerationRepository {
    async fn banned_words(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<BannedWord>> {
        let records = sqlx::query_as::<_, BannedWordRecord>(
            r#"SELECT id, conversation_id, word, created_at FROM channel_banned_words WHERE conversation_id = $1"#,
        )
        .bind(Uuid::from(conversation_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(BannedWord::from).collect())
    }

    async fn add_moderation(&self, action: &ModerationAction) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_moderation
                (conversation_id, user_id, kind, reason, moderator_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::from(action.conversation_id))
        .bind(Uuid::from(action.user_id))
        .bind(action.kind.as_str())
        .bind(&action.reason)
        .bind(action.moderator_id.map(Uuid::from))
        .bind(action.expires_at)
        .bind(action.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn active_restriction(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        now: Timestamp,
    ) -> RepositoryResult<Option<ModerationKind>> {
        let kind: Option<String> = sqlx::query_scalar(
            r#"
            SELECT kind FROM conversation_moderation
            WHERE conversation_id = $1 AND user_id = $2
              AND (expires_at IS NULL OR expires_at > $3)
            ORDER BY CASE kind WHEN 'ban' THEN 0 ELSE 1 END
            LIMIT 1
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        kind.map(|raw| {
            ModerationKind::parse(&raw)
                .ok_or_else(|| invalid_data(format!("unknown moderation kind: {raw}")))
        })
        .transpose()
    }

    async fn add_log(&self, entry: &ModerationLog) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO moderation_logs
                (id, conversation_id, message_id, action, moderator_id, target_user_id, reason, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(entry.conversation_id.map(Uuid::from))
        .bind(entry.message_id.map(Uuid::from))
        .bind(entry.action.as_str())
        .bind(entry.moderator_id.map(Uuid::from))
        .bind(entry.target_user_id.map(Uuid::from))
        .bind(entry.reason.as_deref())
        .bind(entry.metadata.clone())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<Principal>> {
        let record = sqlx::query_as::<_, PrincipalRecord>(
            r#"SELECT id, email, display_name FROM users WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Principal::from))
    }

    async fn ensure_system_user(
        &self,
        email: &str,
        display_name: &str,
    ) -> RepositoryResult<Principal> {
        // 冲突时做一次空更新，保证 RETURNING 总能拿到已有行
        let record = sqlx::query_as::<_, PrincipalRecord>(
            r#"
            INSERT INTO users (id, email, display_name, is_system)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING id, email, display_name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(Principal::from(record))
    }
}

/// PostgreSQL 仓储集合
#[derive(Clone)]
pub struct PgStorage {
    pub conversations: PgConversationRepository,
    pub messages: PgMessageRepository,
    pub moderation: PgModerationRepository,
    pub users: PgUserRepository,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            conversations: PgConversationRepository::new(pool.clone()),
            messages: PgMessageRepository::new(pool.clone()),
            moderation: PgModerationRepository::new(pool.clone()),
            users: PgUserRepository::new(pool),
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
