//! 会话内的输入状态集合
//!
//! 条目带过期时间：客户端未发送 typing.stop 就断开时，输入状态不会一直挂着。

use async_trait::async_trait;
use domain::{ConversationId, UserId};

use crate::error::ApplicationError;

#[async_trait]
pub trait TypingStore: Send + Sync {
    async fn start_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ApplicationError>;

    async fn stop_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ApplicationError>;

    async fn typing_users(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, ApplicationError>;
}

pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};
    use tokio::sync::RwLock;

    pub struct MemoryTypingStore {
        entries: RwLock<HashMap<ConversationId, HashMap<UserId, Instant>>>,
        ttl: Duration,
    }

    impl Default for MemoryTypingStore {
        fn default() -> Self {
            Self::new(Duration::from_secs(10))
        }
    }

    impl MemoryTypingStore {
        pub fn new(ttl: Duration) -> Self {
            Self {
                entries: RwLock::new(HashMap::new()),
                ttl,
            }
        }
    }

    #[async_trait]
    impl TypingStore for MemoryTypingStore {
        async fn start_typing(
            &self,
            conversation_id: ConversationId,
            user_id: UserId,
        ) -> Result<(), ApplicationError> {
            let mut entries = self.entries.write().await;
            entries
                .entry(conversation_id)
                .or_default()
                .insert(user_id, Instant::now() + self.ttl);
            Ok(())
        }

        async fn stop_typing(
            &self,
            conversation_id: ConversationId,
            user_id: UserId,
        ) -> Result<(), ApplicationError> {
            let mut entries = self.entries.write().await;
            if let Some(users) = entries.get_mut(&conversation_id) {
                users.remove(&user_id);
                if users.is_empty() {
                    entries.remove(&conversation_id);
                }
            }
            Ok(())
        }

        async fn typing_users(
            &self,
            conversation_id: ConversationId,
        ) -> Result<Vec<UserId>, ApplicationError> {
            let mut entries = self.entries.write().await;
            let now = Instant::now();
            let Some(users) = entries.get_mut(&conversation_id) else {
                return Ok(Vec::new());
            };
            users.retain(|_, expires_at| *expires_at > now);
            let result = users.keys().copied().collect();
            if users.is_empty() {
                entries.remove(&conversation_id);
            }
            Ok(result)
        }
    }

}
