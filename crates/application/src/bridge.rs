//! 事件总线到本地 Hub 的转发
//!
//! 每个主题一个独立的消费循环，互不阻塞。消息类事件按会话成员定向投递，
//! 成员解析失败时退化为向本实例全部连接广播；在线状态和输入状态直接广播。
//! 同一用户同时连接多个实例时，某个实例宣告的离线会被仍持有连接的实例纠正。
//! 至多一次，不缓存也不重放。

use std::sync::Arc;

use domain::{ConversationId, ConversationRepository, ServerEvent};
use tokio::task::JoinHandle;

use crate::event_bus::{BroadcastError, EventBus, EventSubscription, Topic};
use crate::hub::Hub;

#[derive(Clone)]
pub struct Bridge {
    hub: Hub,
    conversations: Arc<dyn ConversationRepository>,
}

impl Bridge {
    pub fn new(hub: Hub, conversations: Arc<dyn ConversationRepository>) -> Self {
        Self { hub, conversations }
    }

    /// 订阅三个主题并各自启动消费循环
    pub async fn start(&self, bus: &dyn EventBus) -> Result<Vec<JoinHandle<()>>, BroadcastError> {
        let mut tasks = Vec::with_capacity(Topic::ALL.len());
        for topic in Topic::ALL {
            let subscription = bus.subscribe(topic).await?;
            let bridge = self.clone();
            tasks.push(tokio::spawn(bridge.consume(subscription)));
            tracing::info!(topic = %topic, "Bridge 已订阅主题");
        }
        Ok(tasks)
    }

    async fn consume(self, mut subscription: EventSubscription) {
        let topic = subscription.topic();
        while let Some(event) = subscription.recv().await {
            self.route(topic, event).await;
        }
        tracing::info!(topic = %topic, "Bridge 订阅已结束");
    }

    pub async fn route(&self, topic: Topic, event: ServerEvent) {
        match (topic, &event) {
            (Topic::Messages, ServerEvent::MessageNew(message)) => {
                self.deliver_to_conversation(message.conversation_id, &event)
                    .await
            }
            (Topic::Messages, ServerEvent::MessageRead(receipt)) => {
                self.deliver_to_conversation(receipt.conversation_id, &event)
                    .await
            }
            (Topic::Presence, ServerEvent::PresenceUpdate(presence)) => {
                self.hub.broadcast(&event).await;
                if !presence.is_online() {
                    self.hub.reassert_online(presence.user_id).await;
                }
            }
            (Topic::Typing, ServerEvent::TypingStart(_) | ServerEvent::TypingStop(_)) => {
                self.hub.broadcast(&event).await
            }
            _ => {
                tracing::debug!(topic = %topic, event = event.name(), "忽略不属于该主题的事件");
            }
        }
    }

    async fn deliver_to_conversation(&self, conversation_id: ConversationId, event: &ServerEvent) {
        match self.conversations.get_members(conversation_id).await {
            Ok(members) => {
                let user_ids = members.into_iter().map(|member| member.id).collect();
                self.hub.send_to_users(user_ids, event).await;
            }
            Err(err) => {
                // TODO: 待产品确认是否改为丢弃并记录，目前沿用向全部本地连接广播
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %err,
                    "解析会话成员失败，退化为广播"
                );
                self.hub.broadcast(event).await;
            }
        }
    }
}
