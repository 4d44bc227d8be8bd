use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::event_bus::BroadcastError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not a member of this conversation")]
    NotMember,
    #[error("you are muted in this conversation")]
    Muted,
    #[error("you are banned from this conversation")]
    Banned,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("{0} not found")]
    NotFound(String),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
    #[error("authentication failed")]
    Authentication,
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApplicationError::Validation(message.into())
    }

    /// 线上 `error` 事件与 REST 响应使用的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Validation(_) => "invalid_payload",
            ApplicationError::NotMember => "access_denied",
            ApplicationError::Muted => "muted",
            ApplicationError::Banned => "banned",
            ApplicationError::RateLimited => "rate_limited",
            ApplicationError::NotFound(_) | ApplicationError::Repository(RepositoryError::NotFound) => {
                "not_found"
            }
            ApplicationError::Repository(_) => "persistence_failed",
            ApplicationError::Broadcast(_) | ApplicationError::Infrastructure(_) => {
                "internal_error"
            }
            ApplicationError::Authentication => "unauthorized",
        }
    }

    /// 回给客户端的文本，不暴露存储层细节
    pub fn client_message(&self) -> String {
        match self {
            ApplicationError::Repository(RepositoryError::NotFound) => "not found".to_string(),
            ApplicationError::Repository(_) => "failed to persist the request".to_string(),
            ApplicationError::Broadcast(_) | ApplicationError::Infrastructure(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        ApplicationError::Validation(value.to_string())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}
