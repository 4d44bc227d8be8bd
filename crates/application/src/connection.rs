//! 单个连接的会话逻辑
//!
//! 与传输层无关：web-api 的读写泵把收到的文本帧交给 [`ConnectionSession::handle_text`]，
//! 校验失败、限流、持久化失败都以 `error` 事件推回本连接的出站队列，连接保持打开。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use domain::{ClientEvent, ConversationId, ServerEvent, UserId};

use crate::error::ApplicationError;
use crate::hub::{ConnectionHandle, Delivery};
use crate::rate_limiter::{RateLimitPolicy, TokenBucket};
use crate::services::ChatService;

/// 连接状态机：Connecting -> Active -> Closing -> Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

pub struct ConnectionSession {
    handle: Arc<ConnectionHandle>,
    chat: Arc<ChatService>,
    bucket: TokenBucket,
    typing_in: HashSet<ConversationId>,
    state: ConnectionState,
}

impl ConnectionSession {
    pub fn new(handle: Arc<ConnectionHandle>, chat: Arc<ChatService>, policy: RateLimitPolicy) -> Self {
        Self {
            handle,
            chat,
            bucket: TokenBucket::new(policy, Instant::now()),
            typing_in: HashSet::new(),
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn user_id(&self) -> UserId {
        self.handle.user_id()
    }

    /// Hub 注册完成后调用
    pub fn activate(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Active;
        }
    }

    /// 处理一帧入站文本
    pub async fn handle_text(&mut self, text: &str) {
        self.handle_text_at(text, Instant::now()).await
    }

    pub async fn handle_text_at(&mut self, text: &str, now: Instant) {
        if self.state != ConnectionState::Active {
            return;
        }

        if !self.bucket.try_acquire(now) {
            tracing::debug!(user_id = %self.user_id(), "连接级限流，丢弃入站帧");
            self.push(ServerEvent::error("Rate limit exceeded", Some("rate_limited")));
            return;
        }

        let event = match ClientEvent::decode(text) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(user_id = %self.user_id(), error = %err, "无法解析的客户端事件");
                self.push(ServerEvent::error(err.to_string(), Some(err.code())));
                return;
            }
        };

        let name = event.name();
        if let Err(err) = self.dispatch(event).await {
            tracing::debug!(user_id = %self.user_id(), event = name, error = %err, "客户端事件处理失败");
            self.push(ServerEvent::error(err.client_message(), Some(err.code())));
        }
    }

    async fn dispatch(&mut self, event: ClientEvent) -> Result<(), ApplicationError> {
        let user_id = self.user_id();
        match event {
            ClientEvent::SendMessage {
                conversation_id,
                body,
            } => {
                self.chat
                    .send_message(user_id, conversation_id, body)
                    .await?;
            }
            ClientEvent::MarkRead {
                message_id,
                conversation_id,
            } => {
                self.chat
                    .mark_read(user_id, message_id, conversation_id)
                    .await?;
            }
            ClientEvent::TypingStart { conversation_id } => {
                self.chat.start_typing(user_id, conversation_id).await?;
                self.typing_in.insert(conversation_id);
            }
            ClientEvent::TypingStop { conversation_id } => {
                self.chat.stop_typing(user_id, conversation_id).await?;
                self.typing_in.remove(&conversation_id);
            }
        }
        Ok(())
    }

    /// 连接关闭时清理仍处于输入状态的会话
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closing;

        let user_id = self.user_id();
        for conversation_id in std::mem::take(&mut self.typing_in) {
            if let Err(err) = self.chat.stop_typing(user_id, conversation_id).await {
                tracing::debug!(
                    user_id = %user_id,
                    conversation_id = %conversation_id,
                    error = %err,
                    "关闭连接时清理输入状态失败"
                );
            }
        }

        self.handle.close();
        self.state = ConnectionState::Closed;
    }

    fn push(&self, event: ServerEvent) {
        if let Delivery::Dropped { .. } = self.handle.push_event(&event) {
            tracing::debug!(user_id = %self.user_id(), "出站队列已满，错误事件被丢弃");
        }
    }
}
