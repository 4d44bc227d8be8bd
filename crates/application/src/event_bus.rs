//! 事件总线
//!
//! 所有服务实例共享的发布/订阅通道，承载三个逻辑主题：消息、在线状态、输入状态。
//! 单实例部署使用 [`LocalEventBus`]，多实例部署使用 infrastructure 中的 Redis 实现。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::ServerEvent;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// 逻辑主题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Messages,
    Presence,
    Typing,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Messages, Topic::Presence, Topic::Typing];

    /// 发布/订阅通道名
    pub fn channel(&self) -> &'static str {
        match self {
            Topic::Messages => "messages",
            Topic::Presence => "presence",
            Topic::Typing => "typing",
        }
    }

    /// 事件默认归属的主题
    pub fn for_event(event: &ServerEvent) -> Option<Topic> {
        match event {
            ServerEvent::MessageNew(_) | ServerEvent::MessageRead(_) => Some(Topic::Messages),
            ServerEvent::PresenceUpdate(_) => Some(Topic::Presence),
            ServerEvent::TypingStart(_) | ServerEvent::TypingStop(_) => Some(Topic::Typing),
            ServerEvent::Error(_) => None,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.channel())
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
    #[error("subscribe to {topic} failed: {message}")]
    Subscribe { topic: Topic, message: String },
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn subscribe(topic: Topic, message: impl Into<String>) -> Self {
        Self::Subscribe {
            topic,
            message: message.into(),
        }
    }
}

/// 单个主题上的有序订阅流
pub struct EventSubscription {
    topic: Topic,
    receiver: mpsc::Receiver<ServerEvent>,
}

impl EventSubscription {
    pub fn new(topic: Topic, receiver: mpsc::Receiver<ServerEvent>) -> Self {
        Self { topic, receiver }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// 总线关闭后返回 None
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.receiver.recv().await
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: Topic, event: &ServerEvent) -> Result<(), BroadcastError>;

    async fn subscribe(&self, topic: Topic) -> Result<EventSubscription, BroadcastError>;
}

/// 进程内事件总线，基于 tokio broadcast
#[derive(Clone)]
pub struct LocalEventBus {
    senders: HashMap<Topic, broadcast::Sender<ServerEvent>>,
    capacity: usize,
}

impl LocalEventBus {
    pub fn new(capacity: usize) -> Self {
        let senders = Topic::ALL
            .into_iter()
            .map(|topic| (topic, broadcast::channel(capacity).0))
            .collect();
        Self { senders, capacity }
    }

    fn sender(&self, topic: Topic) -> Result<&broadcast::Sender<ServerEvent>, BroadcastError> {
        self.senders
            .get(&topic)
            .ok_or_else(|| BroadcastError::failed(format!("unknown topic {topic}")))
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, topic: Topic, event: &ServerEvent) -> Result<(), BroadcastError> {
        // 没有订阅者时 send 返回错误，此时事件无人接收，不视为失败
        if self.sender(topic)?.send(event.clone()).is_err() {
            tracing::debug!(topic = %topic, "本地事件总线无订阅者");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<EventSubscription, BroadcastError> {
        let mut source = self.sender(topic)?.subscribe();
        let (tx, rx) = mpsc::channel(self.capacity);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(topic = %topic, skipped, "订阅者消费过慢，丢弃部分事件");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(EventSubscription::new(topic, rx))
    }
}
