//! Redis 错误类型定义

use application::{ApplicationError, BroadcastError, RateLimitError};
use thiserror::Error;

/// Redis 操作错误
#[derive(Error, Debug)]
pub enum RedisError {
    /// 连接错误（网络、超时、连接断开）
    #[error("Redis 连接错误: {message}")]
    ConnectionError { message: String },

    /// 命令或脚本执行错误
    #[error("Redis 命令错误: {message}")]
    CommandError { message: String },

    /// 序列化错误
    #[error("序列化错误: {message}")]
    SerializationError { message: String },

    /// 配置错误
    #[error("配置错误: {message}")]
    ConfigError { message: String },
}

/// Redis 结果类型
pub type RedisResult<T> = Result<T, RedisError>;

impl RedisError {
    /// 是否为短暂的连接类故障
    pub fn is_transient(&self) -> bool {
        matches!(self, RedisError::ConnectionError { .. })
    }
}

impl From<redis::RedisError> for RedisError {
    fn from(err: redis::RedisError) -> Self {
        let message = err.to_string();
        if err.kind() == redis::ErrorKind::InvalidClientConfig {
            return RedisError::ConfigError { message };
        }
        if err.kind() == redis::ErrorKind::IoError
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            return RedisError::ConnectionError { message };
        }
        RedisError::CommandError { message }
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        RedisError::SerializationError {
            message: err.to_string(),
        }
    }
}

impl From<RedisError> for ApplicationError {
    fn from(err: RedisError) -> Self {
        ApplicationError::infrastructure(err.to_string())
    }
}

impl From<RedisError> for BroadcastError {
    fn from(err: RedisError) -> Self {
        BroadcastError::failed(err.to_string())
    }
}

impl From<RedisError> for RateLimitError {
    fn from(err: RedisError) -> Self {
        if err.is_transient() {
            RateLimitError::Unavailable(err.to_string())
        } else {
            RateLimitError::Script(err.to_string())
        }
    }
}
