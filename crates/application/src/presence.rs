//! 在线状态存储
//!
//! 在线记录短 TTL（默认 5 分钟），未正常注销的死连接会自动降级为离线；
//! 离线记录保留更久（默认 24 小时）作为最后在线时间。

use async_trait::async_trait;
use domain::{Timestamp, UserId, UserPresence};

use crate::error::ApplicationError;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set_online(&self, user_id: UserId, at: Timestamp) -> Result<UserPresence, ApplicationError>;

    async fn set_offline(&self, user_id: UserId, at: Timestamp)
        -> Result<UserPresence, ApplicationError>;

    /// 无记录（或已过期）时返回 None
    async fn get_presence(&self, user_id: UserId) -> Result<Option<UserPresence>, ApplicationError>;
}

/// 内存实现的在线状态存储（单实例与测试）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};
    use tokio::sync::RwLock;

    pub struct MemoryPresenceStore {
        entries: RwLock<HashMap<UserId, (UserPresence, Instant)>>,
        online_ttl: Duration,
        offline_ttl: Duration,
    }

    impl Default for MemoryPresenceStore {
        fn default() -> Self {
            Self::new(Duration::from_secs(300), Duration::from_secs(86_400))
        }
    }

    impl MemoryPresenceStore {
        pub fn new(online_ttl: Duration, offline_ttl: Duration) -> Self {
            Self {
                entries: RwLock::new(HashMap::new()),
                online_ttl,
                offline_ttl,
            }
        }

        /// 写入时顺带清理已过期的记录
        async fn put(&self, presence: UserPresence, ttl: Duration) -> UserPresence {
            let now = Instant::now();
            let mut entries = self.entries.write().await;
            entries.retain(|_, (_, expires_at)| *expires_at > now);
            entries.insert(presence.user_id, (presence.clone(), now + ttl));
            presence
        }
    }

    #[async_trait]
    impl PresenceStore for MemoryPresenceStore {
        async fn set_online(
            &self,
            user_id: UserId,
            at: Timestamp,
        ) -> Result<UserPresence, ApplicationError> {
            Ok(self.put(UserPresence::online(user_id, at), self.online_ttl).await)
        }

        async fn set_offline(
            &self,
            user_id: UserId,
            at: Timestamp,
        ) -> Result<UserPresence, ApplicationError> {
            Ok(self.put(UserPresence::offline(user_id, at), self.offline_ttl).await)
        }

        async fn get_presence(
            &self,
            user_id: UserId,
        ) -> Result<Option<UserPresence>, ApplicationError> {
            let entries = self.entries.read().await;
            Ok(entries
                .get(&user_id)
                .filter(|(_, expires_at)| *expires_at > Instant::now())
                .map(|(presence, _)| presence.clone()))
        }
    }

}
