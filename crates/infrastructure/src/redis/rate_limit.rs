//! 分布式限流层
//!
//! 令牌桶状态保存在 Redis 哈希 `{tokens, ts}` 中，检查与扣减在一个 Lua 脚本里原子完成，
//! 时间取自 Redis 服务器，避免各实例时钟偏差。

use application::{DistributedRateLimitStore, RateLimitError, RateLimitPolicy};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::debug;

use super::error::RedisError;

const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_per_ms = tonumber(ARGV[2]) / 1000

local time = redis.call('TIME')
local now = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)

local state = redis.call('HMGET', key, 'tokens', 'ts')
local tokens = tonumber(state[1])
local ts = tonumber(state[2])
if tokens == nil or ts == nil then
    tokens = capacity
    ts = now
end

local elapsed = math.max(0, now - ts)
tokens = math.min(capacity, tokens + elapsed * refill_per_ms)

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'ts', tostring(now))

local ttl = 86400000
if refill_per_ms > 0 then
    ttl = math.ceil(capacity / refill_per_ms) + 1000
end
redis.call('PEXPIRE', key, ttl)

return allowed
"#;

#[derive(Clone)]
pub struct RedisRateLimitStore {
    connection: ConnectionManager,
    script: Script,
}

impl RedisRateLimitStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
        }
    }
}

#[async_trait]
impl DistributedRateLimitStore for RedisRateLimitStore {
    async fn try_acquire(&self, key: &str, policy: RateLimitPolicy) -> Result<bool, RateLimitError> {
        let mut connection = self.connection.clone();
        let allowed: i64 = self
            .script
            .key(key)
            .arg(policy.capacity)
            .arg(policy.refill_per_sec)
            .invoke_async(&mut connection)
            .await
            .map_err(RedisError::from)?;

        debug!(key, allowed = allowed == 1, "分布式限流检查");
        Ok(allowed == 1)
    }
}
