//! 领域实体

pub mod message;
pub mod moderation;
pub mod presence;
pub mod user;

pub use message::*;
pub use moderation::*;
pub use presence::*;
pub use user::*;
