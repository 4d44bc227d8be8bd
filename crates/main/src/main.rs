//! 主应用程序入口
//!
//! 加载配置，连接 PostgreSQL 与（可选的）Redis，组装 Hub、Bridge、审核机器人，
//! 启动 Axum Web API 服务。未配置 Redis 时以单实例模式运行。

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use application::{
    Bridge, ChatService, ChatServiceDependencies, Clock, DistributedRateLimitStore,
    DualTierRateLimiter, EventBus, Hub, HubConfig, HubDependencies, LocalEventBus,
    LocalRateLimiter, MemoryPresenceStore, MemoryTypingStore, ModerationBot, ModerationPolicy,
    PresenceStore, RateLimitPolicy, SystemClock, TypingStore, CHAT_POST_ACTION,
};
use config::AppConfig;
use domain::{ConversationRepository, MessageRepository, ModerationRepository, UserRepository};
use infrastructure::{
    create_pg_pool, PgStorage, RedisEventBus, RedisPresenceStore, RedisRateLimitStore,
    RedisTypingStore, MIGRATOR,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

/// 多实例共享的状态后端
struct SharedBackends {
    bus: Arc<dyn EventBus>,
    presence: Arc<dyn PresenceStore>,
    typing: Arc<dyn TypingStore>,
    distributed_limiter: Option<Arc<dyn DistributedRateLimitStore>>,
}

async fn shared_backends(config: &AppConfig) -> anyhow::Result<SharedBackends> {
    let realtime = &config.realtime;
    match config.redis.url.as_deref() {
        Some(url) => {
            let (client, manager) = infrastructure::redis::connect(url)
                .await
                .context("连接 Redis 失败")?;
            tracing::info!("使用 Redis 事件总线，支持多实例部署");
            Ok(SharedBackends {
                bus: Arc::new(RedisEventBus::new(
                    client,
                    manager.clone(),
                    realtime.bus_channel_capacity,
                )),
                presence: Arc::new(RedisPresenceStore::new(
                    manager.clone(),
                    realtime.presence_online_ttl(),
                    realtime.presence_offline_ttl(),
                )),
                typing: Arc::new(RedisTypingStore::new(manager.clone(), realtime.typing_ttl())),
                distributed_limiter: Some(Arc::new(RedisRateLimitStore::new(manager))),
            })
        }
        None => {
            tracing::warn!("未配置 Redis，以单实例模式运行");
            Ok(SharedBackends {
                bus: Arc::new(LocalEventBus::new(realtime.bus_channel_capacity)),
                presence: Arc::new(MemoryPresenceStore::new(
                    realtime.presence_online_ttl(),
                    realtime.presence_offline_ttl(),
                )),
                typing: Arc::new(MemoryTypingStore::new(realtime.typing_ttl())),
                distributed_limiter: None,
            })
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听退出信号失败");
        return;
    }
    tracing::info!("收到退出信号，开始关闭");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections)
        .await
        .context("连接数据库失败")?;
    MIGRATOR.run(&pg_pool).await.context("数据库迁移失败")?;
    let storage = PgStorage::new(pg_pool);

    let backends = shared_backends(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // 限流：本地层定期清理空闲桶
    let local_limiter = Arc::new(LocalRateLimiter::new());
    local_limiter.spawn_sweeper(
        Duration::from_secs(config.rate_limit.sweep_interval_secs),
        Duration::from_secs(config.rate_limit.idle_bucket_secs),
    );
    let rate_limiter = Arc::new(
        DualTierRateLimiter::new(backends.distributed_limiter.clone(), local_limiter).with_policy(
            CHAT_POST_ACTION,
            RateLimitPolicy::new(
                config.rate_limit.chat_post_capacity,
                config.rate_limit.chat_post_refill_per_sec,
            ),
        ),
    );

    let (hub, _hub_task) = Hub::spawn(
        HubConfig::from_realtime(&config.realtime),
        HubDependencies {
            presence: backends.presence.clone(),
            bus: backends.bus.clone(),
            clock: clock.clone(),
        },
    );

    let conversations: Arc<dyn ConversationRepository> = Arc::new(storage.conversations.clone());
    Bridge::new(hub.clone(), conversations.clone())
        .start(backends.bus.as_ref())
        .await
        .context("Bridge 订阅事件总线失败")?;

    let messages: Arc<dyn MessageRepository> = Arc::new(storage.messages.clone());
    let moderation: Arc<dyn ModerationRepository> = Arc::new(storage.moderation.clone());

    if config.moderation.enabled {
        let bot_principal = storage
            .users
            .ensure_system_user(&config.moderation.bot_email, &config.moderation.bot_display_name)
            .await
            .context("创建审核机器人账号失败")?;
        let bot = Arc::new(ModerationBot::new(
            bot_principal,
            messages.clone(),
            moderation.clone(),
            clock.clone(),
            ModerationPolicy::from_config(&config.moderation),
        ));
        bot.start(backends.bus.as_ref())
            .await
            .context("审核机器人订阅失败")?;
    } else {
        tracing::info!("审核机器人已禁用");
    }

    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        conversations,
        messages,
        moderation,
        typing: backends.typing.clone(),
        bus: backends.bus.clone(),
        rate_limiter,
        clock: clock.clone(),
        max_body_chars: config.moderation.max_body_chars,
    }));

    let state = AppState::new(
        hub,
        chat_service,
        backends.presence.clone(),
        Arc::new(JwtService::new(config.jwt.clone())),
        config.realtime.clone(),
        clock,
    );

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址 {addr} 失败"))?;

    tracing::info!("聊天室服务器启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已关闭");
    Ok(())
}
