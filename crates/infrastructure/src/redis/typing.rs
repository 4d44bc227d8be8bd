//! Redis 输入状态存储
//!
//! 每个会话一个有序集合 `typing:{conversation_id}`，成员为用户 ID，分数为毫秒时间戳。
//! 读写时清理超过 TTL 的成员，整个键也带过期时间。

use std::time::Duration;

use application::{ApplicationError, TypingStore};
use async_trait::async_trait;
use chrono::Utc;
use domain::{ConversationId, UserId};
use redis::aio::ConnectionManager;

use super::error::{RedisError, RedisResult};

#[derive(Clone)]
pub struct RedisTypingStore {
    connection: ConnectionManager,
    ttl: Duration,
}

impl RedisTypingStore {
    pub fn new(connection: ConnectionManager, ttl: Duration) -> Self {
        Self { connection, ttl }
    }

    pub fn key(conversation_id: ConversationId) -> String {
        format!("typing:{conversation_id}")
    }

    fn cutoff_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.ttl.as_millis() as i64
    }

    fn key_ttl_secs(&self) -> i64 {
        self.ttl.as_secs().max(1) as i64
    }

    async fn add(&self, conversation_id: ConversationId, user_id: UserId) -> RedisResult<()> {
        let key = Self::key(conversation_id);
        let now_ms = Utc::now().timestamp_millis();
        let mut connection = self.connection.clone();
        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&key)
            .arg(now_ms)
            .arg(user_id.to_string())
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(self.cutoff_ms(now_ms))
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.key_ttl_secs())
            .ignore()
            .query_async::<()>(&mut connection)
            .await?;
        Ok(())
    }

    async fn remove(&self, conversation_id: ConversationId, user_id: UserId) -> RedisResult<()> {
        let mut connection = self.connection.clone();
        redis::cmd("ZREM")
            .arg(Self::key(conversation_id))
            .arg(user_id.to_string())
            .query_async::<()>(&mut connection)
            .await?;
        Ok(())
    }

    async fn members(&self, conversation_id: ConversationId) -> RedisResult<Vec<UserId>> {
        let key = Self::key(conversation_id);
        let now_ms = Utc::now().timestamp_millis();
        let mut connection = self.connection.clone();
        let (raw,): (Vec<String>,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(self.cutoff_ms(now_ms))
            .ignore()
            .cmd("ZRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .query_async(&mut connection)
            .await?;

        raw.iter()
            .map(|id| {
                id.parse::<UserId>().map_err(|e| RedisError::SerializationError {
                    message: format!("无效的用户 ID {id}: {e}"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl TypingStore for RedisTypingStore {
    async fn start_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        Ok(self.add(conversation_id, user_id).await?)
    }

    async fn stop_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        Ok(self.remove(conversation_id, user_id).await?)
    }

    async fn typing_users(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, ApplicationError> {
        Ok(self.members(conversation_id).await?)
    }
}
