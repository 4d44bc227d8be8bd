//! 连接注册中心（Hub）
//!
//! 注册表只由一个协调任务修改，外部通过命令通道与之通信：
//! 每个用户至多一个在线连接，新连接覆盖旧连接（后注册者胜出）。
//! 向出站队列投递一律使用非阻塞 `try_send`，队列满即丢弃，连续丢弃达到阈值的连接被摘除。
//! 在线状态变更交给独立的有序 worker 写入存储并发布，协调任务本身从不等待外部 IO。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use config::RealtimeConfig;
use domain::{Principal, ServerEvent, Timestamp, UserId, UserPresence};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::event_bus::{EventBus, Topic};
use crate::presence::PresenceStore;

/// 已序列化的出站帧，一次扇出只编码一次
pub type OutboundFrame = Arc<str>;

const PRESENCE_QUEUE_CAPACITY: usize = 1024;

/// 单次投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// 队列已满被丢弃，附带连续丢弃次数
    Dropped { consecutive: u32 },
    Closed,
}

/// Hub 持有的连接句柄
///
/// 出站队列是多生产者单消费者：Hub、Bridge 以及连接自己的读循环都会写入，
/// 只有该连接的写循环读取。`closed` 被取消后写循环发送关闭帧并退出。
#[derive(Debug)]
pub struct ConnectionHandle {
    connection_id: Uuid,
    principal: Principal,
    sender: mpsc::Sender<OutboundFrame>,
    closed: CancellationToken,
    consecutive_drops: AtomicU32,
    connected_at: Timestamp,
}

impl ConnectionHandle {
    pub fn new(
        principal: Principal,
        capacity: usize,
        connected_at: Timestamp,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            connection_id: Uuid::new_v4(),
            principal,
            sender,
            closed: CancellationToken::new(),
            consecutive_drops: AtomicU32::new(0),
            connected_at,
        });
        (handle, receiver)
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn user_id(&self) -> UserId {
        self.principal.id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    /// 非阻塞投递
    pub fn try_deliver(&self, frame: OutboundFrame) -> Delivery {
        if self.closed.is_cancelled() {
            return Delivery::Closed;
        }
        match self.sender.try_send(frame) {
            Ok(()) => {
                self.consecutive_drops.store(0, Ordering::Relaxed);
                Delivery::Delivered
            }
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped {
                consecutive: self.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1,
            },
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// 编码后投递单个事件，用于连接向自己推送错误
    pub fn push_event(&self, event: &ServerEvent) -> Delivery {
        match encode(event) {
            Some(frame) => self.try_deliver(frame),
            None => Delivery::Dropped { consecutive: 0 },
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// 写循环监听的关闭信号
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

fn encode(event: &ServerEvent) -> Option<OutboundFrame> {
    match event.to_frame() {
        Ok(frame) => Some(Arc::from(frame)),
        Err(err) => {
            tracing::error!(error = %err, event = event.name(), "事件序列化失败");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// 连续丢弃次数达到该值时摘除连接
    pub drop_threshold: u32,
    /// 周期性刷新本实例在线用户的 TTL
    pub presence_refresh: Duration,
    pub command_capacity: usize,
}

impl HubConfig {
    pub fn from_realtime(config: &RealtimeConfig) -> Self {
        Self {
            drop_threshold: config.drop_threshold,
            presence_refresh: config.presence_refresh(),
            command_capacity: config.bus_channel_capacity,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            drop_threshold: 16,
            presence_refresh: Duration::from_secs(120),
            command_capacity: 1024,
        }
    }
}

pub struct HubDependencies {
    pub presence: Arc<dyn PresenceStore>,
    pub bus: Arc<dyn EventBus>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub is shut down")]
    Closed,
}

enum HubCommand {
    Register {
        handle: Arc<ConnectionHandle>,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        user_id: UserId,
        connection_id: Uuid,
    },
    SendToUser {
        user_id: UserId,
        frame: OutboundFrame,
    },
    SendToUsers {
        user_ids: Vec<UserId>,
        frame: OutboundFrame,
    },
    Broadcast {
        frame: OutboundFrame,
    },
    ListOnline {
        reply: oneshot::Sender<Vec<Principal>>,
    },
    IsOnline {
        user_id: UserId,
        reply: oneshot::Sender<bool>,
    },
    ReassertOnline {
        user_id: UserId,
    },
}

/// Hub 的对外句柄，可随意克隆
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// 启动协调任务与在线状态 worker
    pub fn spawn(config: HubConfig, deps: HubDependencies) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(config.command_capacity.max(1));
        let (presence_tx, presence_rx) = mpsc::channel(PRESENCE_QUEUE_CAPACITY);

        let worker = PresenceWorker {
            presence: deps.presence,
            bus: deps.bus,
            clock: deps.clock,
        };
        tokio::spawn(worker.run(presence_rx));

        let coordinator = HubCoordinator {
            registry: HashMap::new(),
            config,
            presence: presence_tx,
        };
        let handle = tokio::spawn(coordinator.run(receiver));

        (Self { commands }, handle)
    }

    /// 注册连接，返回时注册表已更新
    pub async fn register(&self, handle: Arc<ConnectionHandle>) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(HubCommand::Register { handle, ack })
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// 注销连接；连接已被新连接取代时为空操作，可重复调用
    pub async fn unregister(&self, user_id: UserId, connection_id: Uuid) {
        let command = HubCommand::Unregister {
            user_id,
            connection_id,
        };
        if self.commands.send(command).await.is_err() {
            tracing::debug!(user_id = %user_id, "Hub 已停止，忽略注销");
        }
    }

    /// 本实例未持有该用户时为空操作
    pub async fn send_to_user(&self, user_id: UserId, event: &ServerEvent) {
        if let Some(frame) = encode(event) {
            self.submit(HubCommand::SendToUser { user_id, frame }).await;
        }
    }

    pub async fn send_to_users(&self, user_ids: Vec<UserId>, event: &ServerEvent) {
        if let Some(frame) = encode(event) {
            self.submit(HubCommand::SendToUsers { user_ids, frame }).await;
        }
    }

    pub async fn broadcast(&self, event: &ServerEvent) {
        if let Some(frame) = encode(event) {
            self.submit(HubCommand::Broadcast { frame }).await;
        }
    }

    pub async fn list_online(&self) -> Vec<Principal> {
        let (reply, response) = oneshot::channel();
        self.submit(HubCommand::ListOnline { reply }).await;
        response.await.unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        let (reply, response) = oneshot::channel();
        self.submit(HubCommand::IsOnline { user_id, reply }).await;
        response.await.unwrap_or(false)
    }

    /// 其他实例宣告该用户离线、而本实例仍持有其连接时，重新写入在线状态
    pub async fn reassert_online(&self, user_id: UserId) {
        self.submit(HubCommand::ReassertOnline { user_id }).await;
    }

    async fn submit(&self, command: HubCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::warn!("Hub 已停止，丢弃命令");
        }
    }
}

struct HubCoordinator {
    registry: HashMap<UserId, Arc<ConnectionHandle>>,
    config: HubConfig,
    presence: mpsc::Sender<PresenceChange>,
}

impl HubCoordinator {
    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        let period = self.config.presence_refresh;
        let mut refresh = tokio::time::interval_at(Instant::now() + period, period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = refresh.tick() => self.refresh_presence(),
            }
        }

        for (_, handle) in self.registry.drain() {
            handle.close();
        }
        tracing::info!("Hub 已停止");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { handle, ack } => {
                self.register(handle);
                let _ = ack.send(());
            }
            HubCommand::Unregister {
                user_id,
                connection_id,
            } => self.unregister(user_id, connection_id),
            HubCommand::SendToUser { user_id, frame } => self.deliver(user_id, &frame),
            HubCommand::SendToUsers { user_ids, frame } => {
                let mut seen = HashSet::with_capacity(user_ids.len());
                for user_id in user_ids {
                    if seen.insert(user_id) {
                        self.deliver(user_id, &frame);
                    }
                }
            }
            HubCommand::Broadcast { frame } => {
                let targets: Vec<UserId> = self.registry.keys().copied().collect();
                for user_id in targets {
                    self.deliver(user_id, &frame);
                }
            }
            HubCommand::ListOnline { reply } => {
                let online = self
                    .registry
                    .values()
                    .map(|handle| handle.principal().clone())
                    .collect();
                let _ = reply.send(online);
            }
            HubCommand::IsOnline { user_id, reply } => {
                let _ = reply.send(self.registry.contains_key(&user_id));
            }
            HubCommand::ReassertOnline { user_id } => {
                if self.registry.contains_key(&user_id) {
                    tracing::debug!(user_id = %user_id, "用户仍连接在本实例，重新标记在线");
                    self.notify(PresenceChange::Online(user_id));
                }
            }
        }
    }

    fn register(&mut self, handle: Arc<ConnectionHandle>) {
        let user_id = handle.user_id();
        let connection_id = handle.connection_id();

        if let Some(previous) = self.registry.insert(user_id, handle) {
            if previous.connection_id() != connection_id {
                tracing::info!(
                    user_id = %user_id,
                    superseded = %previous.connection_id(),
                    "同一用户建立了新连接，关闭旧连接"
                );
                previous.close();
            }
        }

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            online = self.registry.len(),
            "连接已注册"
        );
        self.notify(PresenceChange::Online(user_id));
    }

    fn unregister(&mut self, user_id: UserId, connection_id: Uuid) {
        let is_current = self
            .registry
            .get(&user_id)
            .is_some_and(|current| current.connection_id() == connection_id);

        if !is_current {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                "忽略过期连接的注销请求"
            );
            return;
        }

        if let Some(handle) = self.registry.remove(&user_id) {
            handle.close();
        }
        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            online = self.registry.len(),
            "连接已注销"
        );
        self.notify(PresenceChange::Offline(user_id));
    }

    fn deliver(&mut self, user_id: UserId, frame: &OutboundFrame) {
        let outcome = match self.registry.get(&user_id) {
            Some(handle) => handle.try_deliver(frame.clone()),
            None => return,
        };

        match outcome {
            Delivery::Delivered => {}
            Delivery::Dropped { consecutive } if consecutive >= self.config.drop_threshold => {
                self.evict(user_id, "出站队列持续溢出");
            }
            Delivery::Dropped { consecutive } => {
                tracing::debug!(user_id = %user_id, consecutive, "出站队列已满，丢弃消息");
            }
            Delivery::Closed => self.evict(user_id, "出站队列已关闭"),
        }
    }

    fn evict(&mut self, user_id: UserId, reason: &'static str) {
        if let Some(handle) = self.registry.remove(&user_id) {
            handle.close();
            tracing::warn!(
                user_id = %user_id,
                connection_id = %handle.connection_id(),
                reason,
                "摘除连接"
            );
            self.notify(PresenceChange::Offline(user_id));
        }
    }

    fn refresh_presence(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        let users = self.registry.keys().copied().collect();
        self.notify(PresenceChange::Refresh(users));
    }

    fn notify(&self, change: PresenceChange) {
        if let Err(err) = self.presence.try_send(change) {
            tracing::warn!(error = %err, "在线状态队列已满，丢弃状态变更");
        }
    }
}

#[derive(Debug)]
enum PresenceChange {
    Online(UserId),
    Offline(UserId),
    Refresh(Vec<UserId>),
}

/// 按顺序写入在线状态存储并发布 presence.update
struct PresenceWorker {
    presence: Arc<dyn PresenceStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl PresenceWorker {
    async fn run(self, mut changes: mpsc::Receiver<PresenceChange>) {
        while let Some(change) = changes.recv().await {
            self.apply(change).await;
        }
    }

    async fn apply(&self, change: PresenceChange) {
        let now = self.clock.now();
        match change {
            PresenceChange::Online(user_id) => {
                let presence = self
                    .presence
                    .set_online(user_id, now)
                    .await
                    .unwrap_or_else(|err| {
                        tracing::warn!(user_id = %user_id, error = %err, "写入在线状态失败");
                        UserPresence::online(user_id, now)
                    });
                self.publish(presence).await;
            }
            PresenceChange::Offline(user_id) => {
                let presence = self
                    .presence
                    .set_offline(user_id, now)
                    .await
                    .unwrap_or_else(|err| {
                        tracing::warn!(user_id = %user_id, error = %err, "写入离线状态失败");
                        UserPresence::offline(user_id, now)
                    });
                self.publish(presence).await;
            }
            PresenceChange::Refresh(users) => {
                for user_id in users {
                    if let Err(err) = self.presence.set_online(user_id, now).await {
                        tracing::warn!(user_id = %user_id, error = %err, "刷新在线状态失败");
                    }
                }
            }
        }
    }

    async fn publish(&self, presence: UserPresence) {
        let event = ServerEvent::PresenceUpdate(presence);
        if let Err(err) = self.bus.publish(Topic::Presence, &event).await {
            tracing::warn!(error = %err, "在线状态广播失败，仅本地生效");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::event_bus::{EventSubscription, LocalEventBus};
    use crate::presence::memory::MemoryPresenceStore;
    use chrono::Utc;
    use domain::{PresenceStatus, UserPresence};

    struct Fixture {
        hub: Hub,
        bus: Arc<LocalEventBus>,
        presence_store: Arc<MemoryPresenceStore>,
    }

    fn fixture(drop_threshold: u32) -> Fixture {
        let bus = Arc::new(LocalEventBus::new(64));
        let presence_store = Arc::new(MemoryPresenceStore::default());
        let (hub, _task) = Hub::spawn(
            HubConfig {
                drop_threshold,
                presence_refresh: Duration::from_secs(3600),
                command_capacity: 64,
            },
            HubDependencies {
                presence: presence_store.clone(),
                bus: bus.clone(),
                clock: Arc::new(SystemClock),
            },
        );
        Fixture {
            hub,
            bus,
            presence_store,
        }
    }

    fn principal(name: &str) -> Principal {
        Principal::new(UserId::generate(), format!("{name}@example.com"), name)
    }

    fn connection(
        principal: &Principal,
        capacity: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundFrame>) {
        ConnectionHandle::new(principal.clone(), capacity, Utc::now())
    }

    fn test_event() -> ServerEvent {
        ServerEvent::PresenceUpdate(UserPresence::online(UserId::generate(), Utc::now()))
    }

    async fn next_presence(subscription: &mut EventSubscription) -> UserPresence {
        let event = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("presence event should arrive")
            .expect("bus open");
        match event {
            ServerEvent::PresenceUpdate(presence) => presence,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_publishes_online() {
        let f = fixture(16);
        let mut presence = f.bus.subscribe(Topic::Presence).await.unwrap();
        let alice = principal("alice");
        let (handle, _rx) = connection(&alice, 8);

        f.hub.register(handle).await.unwrap();

        assert!(f.hub.is_online(alice.id).await);
        assert_eq!(f.hub.list_online().await, vec![alice.clone()]);

        let update = next_presence(&mut presence).await;
        assert_eq!(update.user_id, alice.id);
        assert_eq!(update.status, PresenceStatus::Online);

        let stored = f.presence_store.get_presence(alice.id).await.unwrap().unwrap();
        assert!(stored.is_online());
    }

    #[tokio::test]
    async fn test_unregister_publishes_offline_and_closes() {
        let f = fixture(16);
        let mut presence = f.bus.subscribe(Topic::Presence).await.unwrap();
        let alice = principal("alice");
        let (handle, _rx) = connection(&alice, 8);

        f.hub.register(handle.clone()).await.unwrap();
        f.hub.unregister(alice.id, handle.connection_id()).await;

        assert!(!f.hub.is_online(alice.id).await);
        assert!(handle.is_closed());
        assert_eq!(next_presence(&mut presence).await.status, PresenceStatus::Online);
        assert_eq!(next_presence(&mut presence).await.status, PresenceStatus::Offline);

        // 重复注销是空操作
        f.hub.unregister(alice.id, handle.connection_id()).await;
        assert!(!f.hub.is_online(alice.id).await);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let f = fixture(16);
        let mut presence = f.bus.subscribe(Topic::Presence).await.unwrap();
        let alice = principal("alice");

        let mut handles = Vec::new();
        for _ in 0..5 {
            let (handle, rx) = connection(&alice, 8);
            f.hub.register(handle.clone()).await.unwrap();
            handles.push((handle, rx));
        }

        // 被取代的旧连接都已收到关闭信号，其迟到的注销不会影响当前连接
        for (handle, _) in &handles[..4] {
            assert!(handle.is_closed());
            f.hub.unregister(alice.id, handle.connection_id()).await;
        }
        assert!(f.hub.is_online(alice.id).await);
        assert_eq!(f.hub.list_online().await.len(), 1);

        f.hub.send_to_user(alice.id, &test_event()).await;
        assert!(f.hub.is_online(alice.id).await);

        let (current, current_rx) = handles.last_mut().unwrap();
        assert!(!current.is_closed());
        assert!(current_rx.try_recv().is_ok());
        for (_, rx) in handles[..4].iter_mut() {
            assert!(rx.try_recv().is_err());
        }

        // 五次上线，没有离线
        for _ in 0..5 {
            assert_eq!(next_presence(&mut presence).await.status, PresenceStatus::Online);
        }
        let extra = tokio::time::timeout(Duration::from_millis(50), presence.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn test_send_to_users_only_reaches_targets() {
        let f = fixture(16);
        let alice = principal("alice");
        let bob = principal("bob");
        let carol = principal("carol");
        let (a, mut a_rx) = connection(&alice, 8);
        let (b, mut b_rx) = connection(&bob, 8);
        let (c, mut c_rx) = connection(&carol, 8);
        for handle in [a, b, c] {
            f.hub.register(handle).await.unwrap();
        }

        let stranger = UserId::generate();
        f.hub
            .send_to_users(vec![alice.id, bob.id, alice.id, stranger], &test_event())
            .await;
        // 用一次查询保证命令已处理完
        assert!(f.hub.is_online(alice.id).await);

        assert!(a_rx.try_recv().is_ok());
        assert!(a_rx.try_recv().is_err(), "duplicate ids deliver once");
        assert!(b_rx.try_recv().is_ok());
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let f = fixture(16);
        let mut receivers = Vec::new();
        for name in ["a", "b", "c"] {
            let (handle, rx) = connection(&principal(name), 8);
            f.hub.register(handle).await.unwrap();
            receivers.push(rx);
        }

        let event = test_event();
        f.hub.broadcast(&event).await;
        assert_eq!(f.hub.list_online().await.len(), 3);

        let expected = event.to_frame().unwrap();
        for rx in receivers.iter_mut() {
            assert_eq!(rx.try_recv().unwrap().as_ref(), expected.as_str());
        }
    }

    #[tokio::test]
    async fn test_overflowing_connection_is_evicted() {
        let f = fixture(3);
        let mut presence = f.bus.subscribe(Topic::Presence).await.unwrap();
        let slow = principal("slow");
        let (handle, mut rx) = connection(&slow, 4);
        f.hub.register(handle.clone()).await.unwrap();

        // 4 条填满队列，后续 3 次丢弃触发摘除，其余为空操作，发送方从不阻塞
        for _ in 0..20 {
            f.hub.send_to_user(slow.id, &test_event()).await;
        }

        assert!(!f.hub.is_online(slow.id).await);
        assert!(handle.is_closed());

        let mut buffered = 0;
        while rx.try_recv().is_ok() {
            buffered += 1;
        }
        assert_eq!(buffered, 4);

        assert_eq!(next_presence(&mut presence).await.status, PresenceStatus::Online);
        assert_eq!(next_presence(&mut presence).await.status, PresenceStatus::Offline);
    }

    #[tokio::test]
    async fn test_drop_counter_resets_after_successful_delivery() {
        let (handle, mut rx) = connection(&principal("bursty"), 1);
        assert_eq!(handle.try_deliver(Arc::from("1")), Delivery::Delivered);
        assert_eq!(
            handle.try_deliver(Arc::from("2")),
            Delivery::Dropped { consecutive: 1 }
        );
        assert_eq!(
            handle.try_deliver(Arc::from("3")),
            Delivery::Dropped { consecutive: 2 }
        );

        rx.try_recv().unwrap();
        assert_eq!(handle.try_deliver(Arc::from("4")), Delivery::Delivered);
        rx.try_recv().unwrap();
        assert_eq!(handle.try_deliver(Arc::from("5")), Delivery::Delivered);
        assert_eq!(
            handle.try_deliver(Arc::from("6")),
            Delivery::Dropped { consecutive: 1 }
        );

        handle.close();
        assert_eq!(handle.try_deliver(Arc::from("7")), Delivery::Closed);
    }

    #[tokio::test]
    async fn test_reassert_online_only_for_registered_users() {
        let f = fixture(16);
        let mut presence = f.bus.subscribe(Topic::Presence).await.unwrap();
        let alice = principal("alice");
        let (handle, _rx) = connection(&alice, 8);
        f.hub.register(handle).await.unwrap();
        assert_eq!(next_presence(&mut presence).await.status, PresenceStatus::Online);

        f.presence_store.set_offline(alice.id, Utc::now()).await.unwrap();
        f.hub.reassert_online(alice.id).await;
        let update = next_presence(&mut presence).await;
        assert_eq!(update.user_id, alice.id);
        assert_eq!(update.status, PresenceStatus::Online);
        let stored = f.presence_store.get_presence(alice.id).await.unwrap().unwrap();
        assert!(stored.is_online());

        f.hub.reassert_online(UserId::generate()).await;
        let extra = tokio::time::timeout(Duration::from_millis(50), presence.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn test_send_to_unknown_user_is_noop() {
        let f = fixture(16);
        f.hub.send_to_user(UserId::generate(), &test_event()).await;
        assert!(f.hub.list_online().await.is_empty());
    }
}
