//! Web API 层。
//!
//! 提供 Axum 路由：`/ws` 实时连接与 REST 边界接口，请求委托给应用层的 Hub 与 ChatService。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
