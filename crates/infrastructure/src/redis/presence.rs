//! Redis 在线状态存储
//!
//! 每个用户一个键 `presence:user:{id}`，值为 `UserPresence` 的 JSON。
//! 在线记录 5 分钟过期，离线记录保留 24 小时作为最后在线时间。

use std::time::Duration;

use application::{ApplicationError, PresenceStore};
use async_trait::async_trait;
use domain::{Timestamp, UserId, UserPresence};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::error::{RedisError, RedisResult};

const KEY_PREFIX: &str = "presence:user:";

#[derive(Clone)]
pub struct RedisPresenceStore {
    connection: ConnectionManager,
    online_ttl: Duration,
    offline_ttl: Duration,
}

impl RedisPresenceStore {
    pub fn new(connection: ConnectionManager, online_ttl: Duration, offline_ttl: Duration) -> Self {
        Self {
            connection,
            online_ttl,
            offline_ttl,
        }
    }

    pub fn key(user_id: UserId) -> String {
        format!("{KEY_PREFIX}{user_id}")
    }

    async fn put(&self, presence: UserPresence, ttl: Duration) -> RedisResult<UserPresence> {
        let payload = serde_json::to_string(&presence)?;
        let mut connection = self.connection.clone();
        let _: () = connection
            .set_ex(Self::key(presence.user_id), payload, ttl.as_secs().max(1))
            .await?;
        Ok(presence)
    }

    async fn fetch(&self, user_id: UserId) -> RedisResult<Option<UserPresence>> {
        let mut connection = self.connection.clone();
        let payload: Option<String> = connection.get(Self::key(user_id)).await?;
        payload
            .map(|raw| serde_json::from_str(&raw).map_err(RedisError::from))
            .transpose()
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn set_online(
        &self,
        user_id: UserId,
        at: Timestamp,
    ) -> Result<UserPresence, ApplicationError> {
        Ok(self.put(UserPresence::online(user_id, at), self.online_ttl).await?)
    }

    async fn set_offline(
        &self,
        user_id: UserId,
        at: Timestamp,
    ) -> Result<UserPresence, ApplicationError> {
        Ok(self.put(UserPresence::offline(user_id, at), self.offline_ttl).await?)
    }

    async fn get_presence(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserPresence>, ApplicationError> {
        Ok(self.fetch(user_id).await?)
    }
}
