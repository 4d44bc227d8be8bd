//! 实时聊天系统核心领域模型
//!
//! 包含会话消息、用户身份、在线状态、审核记录等实体，
//! 线协议事件（客户端 / 服务端），以及核心依赖的外部仓储接口。

pub mod entities;
pub mod errors;
pub mod events;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use repositories::*;
pub use value_objects::*;
