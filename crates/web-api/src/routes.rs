use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use domain::{ConversationId, Message, MessageId, PresenceStatus, Principal, ReadReceipt, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, state::AppState, ws_connection};

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    conversation_id: ConversationId,
    body: String,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct PresenceResponse {
    user_id: UserId,
    online: bool,
    /// 是否连接在本实例
    connected_here: bool,
    status: PresenceStatus,
    last_seen: Option<Timestamp>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/messages", post(send_message))
        .route("/messages/{message_id}/read", put(mark_read))
        .route("/online-users", get(online_users))
        .route("/users/{user_id}/presence", get(user_presence))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    let principal = state.jwt_service.principal_from_token(&token)?;

    let max_frame_bytes = state.realtime.max_frame_bytes;
    Ok(ws
        .max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_upgrade(move |socket| ws_connection::serve(socket, state, principal)))
}

/// REST 发送消息，与 WebSocket 共用同一写路径和限流动作
async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let principal = state.jwt_service.extract_principal_from_headers(&headers)?;
    let message = state
        .chat_service
        .send_message(principal.id, payload.conversation_id, payload.body)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<MessageId>,
) -> Result<Json<ReadReceipt>, ApiError> {
    let principal = state.jwt_service.extract_principal_from_headers(&headers)?;
    let receipt = state
        .chat_service
        .mark_message_read(principal.id, message_id)
        .await?;

    Ok(Json(receipt))
}

/// 本实例当前注册的在线用户
async fn online_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Principal>>, ApiError> {
    state.jwt_service.extract_principal_from_headers(&headers)?;
    Ok(Json(state.hub.list_online().await))
}

async fn user_presence(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
) -> Result<Json<PresenceResponse>, ApiError> {
    state.jwt_service.extract_principal_from_headers(&headers)?;

    let connected_here = state.hub.is_online(user_id).await;
    let record = state.presence.get_presence(user_id).await?;
    let online = connected_here || record.as_ref().is_some_and(|p| p.is_online());

    Ok(Json(PresenceResponse {
        user_id,
        online,
        connected_here,
        status: if online {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        },
        last_seen: record.map(|p| p.last_seen),
    }))
}
