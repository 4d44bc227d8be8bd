use std::sync::Arc;

use application::{ChatService, Clock, Hub, PresenceStore};
use config::RealtimeConfig;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub chat_service: Arc<ChatService>,
    pub presence: Arc<dyn PresenceStore>,
    pub jwt_service: Arc<JwtService>,
    pub realtime: Arc<RealtimeConfig>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        hub: Hub,
        chat_service: Arc<ChatService>,
        presence: Arc<dyn PresenceStore>,
        jwt_service: Arc<JwtService>,
        realtime: RealtimeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            hub,
            chat_service,
            presence,
            jwt_service,
            realtime: Arc::new(realtime),
            clock,
        }
    }
}
