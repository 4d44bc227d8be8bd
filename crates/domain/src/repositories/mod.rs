//! 外部协作者接口
//!
//! 实时分发核心只通过这些窄接口访问持久化存储，具体实现位于 infrastructure
//! （PostgreSQL）与 application::memory（内存实现，测试和本地开发用）。

use async_trait::async_trait;

use crate::entities::{
    BannedWord, Message, ModerationAction, ModerationKind, ModerationLog, Principal,
};
use crate::errors::RepositoryResult;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 会话成员关系
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<bool>;

    async fn get_members(&self, conversation_id: ConversationId)
        -> RepositoryResult<Vec<Principal>>;
}

/// 消息存储
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: &Message) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>>;

    async fn delete(&self, id: MessageId) -> RepositoryResult<()>;

    /// 幂等：重复标记只更新 read_at
    async fn mark_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
        read_at: Timestamp,
    ) -> RepositoryResult<()>;
}

/// 审核存储，REST 审核接口与审核机器人共用同一写路径
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ModerationRepository: Send + Sync {
    async fn banned_words(&self, conversation_id: ConversationId)
        -> RepositoryResult<Vec<BannedWord>>;

    async fn add_moderation(&self, action: &ModerationAction) -> RepositoryResult<()>;

    /// 返回当前生效的限制，封禁优先于禁言
    async fn active_restriction(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        now: Timestamp,
    ) -> RepositoryResult<Option<ModerationKind>>;

    async fn add_log(&self, entry: &ModerationLog) -> RepositoryResult<()>;
}

/// 用户查询
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<Principal>>;

    /// 按邮箱查找系统用户，不存在则创建
    async fn ensure_system_user(
        &self,
        email: &str,
        display_name: &str,
    ) -> RepositoryResult<Principal>;
}
