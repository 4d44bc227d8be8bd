//! 会话消息实体

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 会话中的一条消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Message {
    /// 创建一条新消息，ID 由服务端生成
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        body: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            sender_id,
            body: body.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 校验消息正文：去掉首尾空白后不能为空，且字符数不超过上限
    pub fn validate_body(body: &str, max_chars: usize) -> Result<(), DomainError> {
        if body.trim().is_empty() {
            return Err(DomainError::invalid_argument("body", "cannot be empty"));
        }
        if body.chars().count() > max_chars {
            return Err(DomainError::invalid_argument(
                "body",
                format!("exceeds {max_chars} characters"),
            ));
        }
        Ok(())
    }
}

/// 已读回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub read_at: Timestamp,
}
