//! Redis 适配器
//!
//! 多实例部署时的共享状态：事件总线（Pub/Sub）、在线状态、输入状态与分布式限流。

pub mod error;
pub mod event_bus;
pub mod presence;
pub mod rate_limit;
pub mod typing;

pub use error::*;
pub use event_bus::RedisEventBus;
pub use presence::RedisPresenceStore;
pub use rate_limit::RedisRateLimitStore;
pub use typing::RedisTypingStore;

use redis::aio::ConnectionManager;
use redis::Client;
use tracing::info;

/// 打开客户端并建立自动重连的多路复用连接
pub async fn connect(url: &str) -> RedisResult<(Client, ConnectionManager)> {
    let client = Client::open(url).map_err(|e| RedisError::ConfigError {
        message: format!("创建 Redis 客户端失败: {}", e),
    })?;
    let manager = client
        .get_connection_manager()
        .await
        .map_err(|e| RedisError::ConnectionError {
            message: format!("连接 Redis 失败: {}", e),
        })?;

    info!("已连接到 Redis");
    Ok((client, manager))
}
