//! 审核相关实体：屏蔽词、禁言/封禁、审核日志

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 会话级屏蔽词，(conversation_id, word) 唯一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedWord {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub word: String,
    pub created_at: Timestamp,
}

impl BannedWord {
    /// 大小写不敏感的子串匹配，单词内部出现同样命中
    pub fn matches(&self, body: &str) -> bool {
        let word = self.word.trim();
        if word.is_empty() {
            return false;
        }
        body.to_lowercase().contains(&word.to_lowercase())
    }
}

/// 限制类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationKind {
    Mute,
    Ban,
}

impl ModerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationKind::Mute => "mute",
            ModerationKind::Ban => "ban",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mute" => Some(ModerationKind::Mute),
            "ban" => Some(ModerationKind::Ban),
            _ => None,
        }
    }
}

/// 对某个用户在某个会话内施加的禁言/封禁
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationAction {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub kind: ModerationKind,
    /// None 表示永久
    pub expires_at: Option<Timestamp>,
    pub reason: String,
    pub moderator_id: Option<UserId>,
    pub created_at: Timestamp,
}

impl ModerationAction {
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.expires_at.map(|expiry| expiry > now).unwrap_or(true)
    }
}

/// 审核日志动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationLogAction {
    /// 机器人：命中屏蔽词删除
    DeleteWord,
    /// 机器人：刷屏禁言
    TimeoutSpam,
    Delete,
    Warn,
    Timeout,
    Mute,
    Ban,
}

impl ModerationLogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationLogAction::DeleteWord => "delete_word",
            ModerationLogAction::TimeoutSpam => "timeout_spam",
            ModerationLogAction::Delete => "delete",
            ModerationLogAction::Warn => "warn",
            ModerationLogAction::Timeout => "timeout",
            ModerationLogAction::Mute => "mute",
            ModerationLogAction::Ban => "ban",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "delete_word" => Some(ModerationLogAction::DeleteWord),
            "timeout_spam" => Some(ModerationLogAction::TimeoutSpam),
            "delete" => Some(ModerationLogAction::Delete),
            "warn" => Some(ModerationLogAction::Warn),
            "timeout" => Some(ModerationLogAction::Timeout),
            "mute" => Some(ModerationLogAction::Mute),
            "ban" => Some(ModerationLogAction::Ban),
            _ => None,
        }
    }
}

/// 审核日志条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationLog {
    pub id: Uuid,
    pub conversation_id: Option<ConversationId>,
    pub message_id: Option<MessageId>,
    pub action: ModerationLogAction,
    pub moderator_id: Option<UserId>,
    pub target_user_id: Option<UserId>,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Timestamp,
}
