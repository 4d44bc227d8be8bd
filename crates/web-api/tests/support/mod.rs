//! 测试支撑：内存存储 + 进程内事件总线，按需启动多个服务实例

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::memory::{
    InMemoryConversationRepository, InMemoryMessageRepository, InMemoryModerationRepository,
};
use application::{
    Bridge, ChatService, ChatServiceDependencies, DualTierRateLimiter, Hub, HubConfig,
    HubDependencies, LocalEventBus, LocalRateLimiter, MemoryPresenceStore, MemoryTypingStore,
    RateLimitPolicy, SystemClock, CHAT_POST_ACTION,
};
use config::{AppConfig, RealtimeConfig};
use domain::{ConversationId, Principal, UserId};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use web_api::{router, AppState, JwtConfig, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 所有实例共享的外部协作者
pub struct Backend {
    pub bus: Arc<LocalEventBus>,
    pub conversations: Arc<InMemoryConversationRepository>,
    pub messages: Arc<InMemoryMessageRepository>,
    pub moderation: Arc<InMemoryModerationRepository>,
    pub presence: Arc<MemoryPresenceStore>,
    pub typing: Arc<MemoryTypingStore>,
    pub jwt: Arc<JwtService>,
}

impl Backend {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(LocalEventBus::new(256)),
            conversations: Arc::new(InMemoryConversationRepository::new()),
            messages: Arc::new(InMemoryMessageRepository::new()),
            moderation: Arc::new(InMemoryModerationRepository::new()),
            presence: Arc::new(MemoryPresenceStore::default()),
            typing: Arc::new(MemoryTypingStore::default()),
            jwt: Arc::new(JwtService::new(JwtConfig {
                secret: "integration-test-secret-key-32-chars-long".to_string(),
                expiration_hours: 1,
            })),
        }
    }

    pub fn principal(&self, name: &str) -> Principal {
        Principal::new(UserId::generate(), format!("{name}@example.com"), name)
    }

    pub fn token(&self, principal: &Principal) -> String {
        self.jwt.generate_token(principal).expect("token")
    }

    pub async fn conversation_with(&self, members: &[&Principal]) -> ConversationId {
        let conversation = ConversationId::generate();
        for member in members {
            self.conversations
                .add_member(conversation, (*member).clone())
                .await;
        }
        conversation
    }
}

/// 一个运行中的服务实例
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start(backend: &Backend) -> Self {
        Self::start_with(backend, AppConfig::default().realtime, RateLimitPolicy::new(100, 100.0)).await
    }

    pub async fn start_with(
        backend: &Backend,
        realtime: RealtimeConfig,
        chat_post: RateLimitPolicy,
    ) -> Self {
        let clock = Arc::new(SystemClock);
        let (hub, _) = Hub::spawn(
            HubConfig::from_realtime(&realtime),
            HubDependencies {
                presence: backend.presence.clone(),
                bus: backend.bus.clone(),
                clock: clock.clone(),
            },
        );
        Bridge::new(hub.clone(), backend.conversations.clone())
            .start(backend.bus.as_ref())
            .await
            .expect("bridge subscribe");

        let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
            conversations: backend.conversations.clone(),
            messages: backend.messages.clone(),
            moderation: backend.moderation.clone(),
            typing: backend.typing.clone(),
            bus: backend.bus.clone(),
            rate_limiter: Arc::new(
                DualTierRateLimiter::local_only(Arc::new(LocalRateLimiter::new()))
                    .with_policy(CHAT_POST_ACTION, chat_post),
            ),
            clock: clock.clone(),
            max_body_chars: 1000,
        }));

        let state = AppState::new(
            hub,
            chat_service,
            backend.presence.clone(),
            backend.jwt.clone(),
            realtime,
            clock,
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 建立 WebSocket 连接并等待 Hub 完成注册
    pub async fn connect(&self, backend: &Backend, principal: &Principal) -> WsClient {
        let url = format!("ws://{}/ws?token={}", self.addr, backend.token(principal));
        let (client, _) = connect_async(url).await.expect("websocket connect");
        for _ in 0..100 {
            if self.state.hub.is_online(principal.id).await {
                return client;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection for {} was never registered", principal.display_name);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 读取下一条指定事件，跳过其他事件；超时返回 None
pub async fn next_event_named(client: &mut WsClient, name: &str, wait: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let frame = tokio::time::timeout(remaining, client.next()).await.ok()??;
        let WsMessage::Text(text) = frame.ok()? else {
            continue;
        };
        let value: Value = serde_json::from_str(text.as_str()).ok()?;
        if value["event"] == name {
            return Some(value);
        }
    }
}
