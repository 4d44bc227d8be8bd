//! 应用层实现。
//!
//! 实时分发核心：连接注册中心（Hub）、连接会话、事件总线与 Bridge、
//! 双层限流器、在线/输入状态存储、审核机器人，以及 WebSocket 与 REST 共用的写路径。

pub mod bridge;
pub mod clock;
pub mod connection;
pub mod error;
pub mod event_bus;
pub mod hub;
pub mod memory;
pub mod moderation;
pub mod presence;
pub mod rate_limiter;
pub mod services;
pub mod typing;

pub use bridge::Bridge;
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{ConnectionSession, ConnectionState};
pub use error::ApplicationError;
pub use event_bus::{BroadcastError, EventBus, EventSubscription, LocalEventBus, Topic};
pub use hub::{ConnectionHandle, Delivery, Hub, HubConfig, HubDependencies, HubError, OutboundFrame};
pub use moderation::{ModerationBot, ModerationOutcome, ModerationPolicy, SpamDetector};
pub use presence::{memory::MemoryPresenceStore, PresenceStore};
pub use rate_limiter::{
    DistributedRateLimitStore, DualTierRateLimiter, LocalRateLimiter, RateLimitError,
    RateLimitPolicy, TokenBucket, CHAT_POST_ACTION,
};
pub use services::{ChatService, ChatServiceDependencies};
pub use typing::{memory::MemoryTypingStore, TypingStore};
