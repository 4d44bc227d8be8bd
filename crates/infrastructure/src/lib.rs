//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储与 Redis 适配器（事件总线、在线状态、输入状态、分布式限流），
//! 实现应用/领域层定义的接口。

pub mod migrations;
pub mod redis;
pub mod repository;

pub use migrations::MIGRATOR;
pub use self::redis::{
    RedisError, RedisEventBus, RedisPresenceStore, RedisRateLimitStore, RedisResult,
    RedisTypingStore,
};
pub use repository::{
    create_pg_pool, PgConversationRepository, PgMessageRepository, PgModerationRepository,
    PgStorage, PgUserRepository,
};
