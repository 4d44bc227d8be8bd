use std::sync::Arc;

use domain::{
    ConversationId, ConversationRepository, Message, MessageId, MessageRepository,
    ModerationKind, ModerationRepository, ReadReceipt, ServerEvent, TypingIndicator, UserId,
    UserPresence,
};

use crate::{
    clock::Clock,
    error::ApplicationError,
    event_bus::{BroadcastError, EventBus, Topic},
    rate_limiter::{DualTierRateLimiter, CHAT_POST_ACTION},
    typing::TypingStore,
};

pub struct ChatServiceDependencies {
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub moderation: Arc<dyn ModerationRepository>,
    pub typing: Arc<dyn TypingStore>,
    pub bus: Arc<dyn EventBus>,
    pub rate_limiter: Arc<DualTierRateLimiter>,
    pub clock: Arc<dyn Clock>,
    pub max_body_chars: usize,
}

/// 写路径与发布入口，WebSocket 与 REST 共用
///
/// 所有事件都只发布到事件总线，不直接投递给本地连接，
/// 由 Bridge 统一扇出，本地与跨实例接收者行为一致。
pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    /// 发送消息：校验 -> 成员检查 -> 禁言/封禁检查 -> 限流 -> 持久化 -> 发布
    ///
    /// 持久化失败时不发布；发布失败只记录日志，消息已经落库。
    pub async fn send_message(
        &self,
        sender_id: UserId,
        conversation_id: ConversationId,
        body: String,
    ) -> Result<Message, ApplicationError> {
        Message::validate_body(&body, self.deps.max_body_chars)?;
        self.ensure_member(conversation_id, sender_id).await?;

        let now = self.deps.clock.now();
        match self
            .deps
            .moderation
            .active_restriction(conversation_id, sender_id, now)
            .await?
        {
            Some(ModerationKind::Ban) => return Err(ApplicationError::Banned),
            Some(ModerationKind::Mute) => return Err(ApplicationError::Muted),
            None => {}
        }

        if !self
            .deps
            .rate_limiter
            .allow(sender_id, CHAT_POST_ACTION)
            .await
        {
            return Err(ApplicationError::RateLimited);
        }

        let message = Message::new(conversation_id, sender_id, body, now);
        if let Err(err) = self.deps.messages.create(&message).await {
            tracing::error!(
                conversation_id = %conversation_id,
                sender_id = %sender_id,
                error = %err,
                "消息持久化失败"
            );
            return Err(err.into());
        }

        if let Err(err) = self.publish_message_created(&message).await {
            tracing::warn!(
                conversation_id = %conversation_id,
                message_id = %message.id,
                error = %err,
                "消息已保存到数据库，但广播失败"
            );
        }

        tracing::debug!(message_id = %message.id, conversation_id = %conversation_id, "消息已发送");
        Ok(message)
    }

    /// 标记已读（WebSocket 入口）：消息必须属于客户端声明的会话
    pub async fn mark_read(
        &self,
        user_id: UserId,
        message_id: MessageId,
        conversation_id: ConversationId,
    ) -> Result<ReadReceipt, ApplicationError> {
        let message = self.find_message(message_id).await?;
        if message.conversation_id != conversation_id {
            return Err(ApplicationError::validation(
                "message does not belong to this conversation",
            ));
        }
        self.record_read(user_id, &message).await
    }

    /// REST 入口只带消息 ID，会话从消息记录中取
    pub async fn mark_message_read(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<ReadReceipt, ApplicationError> {
        let message = self.find_message(message_id).await?;
        self.record_read(user_id, &message).await
    }

    async fn find_message(&self, message_id: MessageId) -> Result<Message, ApplicationError> {
        self.deps
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound("message".into()))
    }

    /// 成员检查（以消息所在会话为准） -> 持久化 -> 发布已读回执
    async fn record_read(
        &self,
        user_id: UserId,
        message: &Message,
    ) -> Result<ReadReceipt, ApplicationError> {
        self.ensure_member(message.conversation_id, user_id).await?;

        let receipt = ReadReceipt {
            message_id: message.id,
            conversation_id: message.conversation_id,
            user_id,
            read_at: self.deps.clock.now(),
        };
        self.deps
            .messages
            .mark_read(message.id, user_id, receipt.read_at)
            .await?;

        if let Err(err) = self.publish_read_receipt(&receipt).await {
            tracing::warn!(message_id = %message.id, error = %err, "已读回执广播失败");
        }
        Ok(receipt)
    }

    pub async fn start_typing(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), ApplicationError> {
        self.ensure_member(conversation_id, user_id).await?;
        self.deps
            .typing
            .start_typing(conversation_id, user_id)
            .await?;
        self.publish_typing_logged(conversation_id, user_id, true)
            .await;
        Ok(())
    }

    pub async fn stop_typing(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), ApplicationError> {
        self.ensure_member(conversation_id, user_id).await?;
        self.deps
            .typing
            .stop_typing(conversation_id, user_id)
            .await?;
        self.publish_typing_logged(conversation_id, user_id, false)
            .await;
        Ok(())
    }

    pub async fn publish_message_created(&self, message: &Message) -> Result<(), BroadcastError> {
        self.deps
            .bus
            .publish(Topic::Messages, &ServerEvent::MessageNew(message.clone()))
            .await
    }

    pub async fn publish_read_receipt(&self, receipt: &ReadReceipt) -> Result<(), BroadcastError> {
        self.deps
            .bus
            .publish(Topic::Messages, &ServerEvent::MessageRead(receipt.clone()))
            .await
    }

    pub async fn publish_typing(&self, indicator: TypingIndicator) -> Result<(), BroadcastError> {
        self.deps
            .bus
            .publish(Topic::Typing, &ServerEvent::typing(indicator))
            .await
    }

    pub async fn publish_presence(&self, presence: UserPresence) -> Result<(), BroadcastError> {
        self.deps
            .bus
            .publish(Topic::Presence, &ServerEvent::PresenceUpdate(presence))
            .await
    }

    async fn publish_typing_logged(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    ) {
        let indicator = TypingIndicator {
            conversation_id,
            user_id,
            is_typing,
        };
        if let Err(err) = self.publish_typing(indicator).await {
            tracing::warn!(conversation_id = %conversation_id, error = %err, "输入状态广播失败");
        }
    }

    async fn ensure_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        if self
            .deps
            .conversations
            .is_member(conversation_id, user_id)
            .await?
        {
            Ok(())
        } else {
            Err(ApplicationError::NotMember)
        }
    }
}
