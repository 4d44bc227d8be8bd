//! 基于 Redis Pub/Sub 的事件总线
//!
//! 每个主题对应一个 Redis 频道，负载为 `ServerEvent` 的 JSON 信封。
//! 每个订阅独占一条 Pub/Sub 连接，断线后按指数退避重连；
//! 断线期间发布的事件会丢失（至多一次）。

use std::time::Duration;

use application::{BroadcastError, EventBus, EventSubscription, Topic};
use async_trait::async_trait;
use domain::ServerEvent;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::error::{RedisError, RedisResult};

const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(500);
const MAX_BACKOFF_EXPONENT: u32 = 6;

#[derive(Clone)]
pub struct RedisEventBus {
    client: Client,
    connection: ConnectionManager,
    channel_capacity: usize,
    reconnect_interval: Duration,
}

/// 监听循环的结束原因
enum ListenEnd {
    /// 订阅方已丢弃 EventSubscription
    ReceiverClosed,
    /// Redis 消息流中断，需要重连
    StreamEnded,
}

impl RedisEventBus {
    pub fn new(client: Client, connection: ConnectionManager, channel_capacity: usize) -> Self {
        Self {
            client,
            connection,
            channel_capacity: channel_capacity.max(1),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    async fn open_pubsub(client: &Client, topic: Topic) -> RedisResult<PubSub> {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| RedisError::ConnectionError {
                message: format!("获取 PubSub 连接失败: {}", e),
            })?;
        pubsub.subscribe(topic.channel()).await?;
        Ok(pubsub)
    }

    /// 重连循环：第 n 次失败后等待 interval * 2^(n-1)，指数有上限，不会放弃
    async fn listen_loop(
        client: Client,
        topic: Topic,
        initial: PubSub,
        sender: mpsc::Sender<ServerEvent>,
        reconnect_interval: Duration,
    ) {
        let mut pubsub = Some(initial);
        let mut retry_count: u32 = 0;

        loop {
            let mut connection = match pubsub.take() {
                Some(connection) => connection,
                None => {
                    if sender.is_closed() {
                        break;
                    }
                    match Self::open_pubsub(&client, topic).await {
                        Ok(connection) => {
                            info!(topic = %topic, retries = retry_count, "Redis 订阅已恢复");
                            retry_count = 0;
                            connection
                        }
                        Err(e) => {
                            retry_count = retry_count.saturating_add(1);
                            let delay = backoff_delay(reconnect_interval, retry_count);
                            error!(
                                topic = %topic,
                                retry = retry_count,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "Redis 订阅重连失败"
                            );
                            sleep(delay).await;
                            continue;
                        }
                    }
                }
            };

            match Self::forward(&mut connection, topic, &sender).await {
                ListenEnd::ReceiverClosed => break,
                ListenEnd::StreamEnded => {
                    warn!(topic = %topic, "Redis 消息流中断，准备重连");
                }
            }
        }

        info!(topic = %topic, "Redis 订阅监听已停止");
    }

    async fn forward(
        connection: &mut PubSub,
        topic: Topic,
        sender: &mpsc::Sender<ServerEvent>,
    ) -> ListenEnd {
        let messages = connection.on_message();
        tokio::pin!(messages);
        loop {
            let message = tokio::select! {
                _ = sender.closed() => return ListenEnd::ReceiverClosed,
                message = messages.next() => message,
            };
            let Some(message) = message else {
                return ListenEnd::StreamEnded;
            };

            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "获取消息负载失败");
                    continue;
                }
            };
            let event = match ServerEvent::from_frame(&payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "无法解析总线事件，已丢弃");
                    continue;
                }
            };

            debug!(topic = %topic, event = event.name(), "收到总线事件");
            if sender.send(event).await.is_err() {
                return ListenEnd::ReceiverClosed;
            }
        }
    }
}

fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base.saturating_mul(1u32 << exponent)
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, topic: Topic, event: &ServerEvent) -> Result<(), BroadcastError> {
        let payload = event.to_frame().map_err(RedisError::from)?;
        let mut connection = self.connection.clone();
        let receivers: i64 = connection
            .publish(topic.channel(), payload)
            .await
            .map_err(RedisError::from)?;
        debug!(topic = %topic, event = event.name(), receivers, "事件已发布");
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<EventSubscription, BroadcastError> {
        let pubsub = Self::open_pubsub(&self.client, topic)
            .await
            .map_err(|e| BroadcastError::subscribe(topic, e.to_string()))?;
        let (sender, receiver) = mpsc::channel(self.channel_capacity);

        tokio::spawn(Self::listen_loop(
            self.client.clone(),
            topic,
            pubsub,
            sender,
            self.reconnect_interval,
        ));

        info!(topic = %topic, channel = topic.channel(), "已订阅 Redis 频道");
        Ok(EventSubscription::new(topic, receiver))
    }
}
