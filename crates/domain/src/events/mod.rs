//! WebSocket 线上事件
//!
//! 双向信封格式为 `{ "event": string, "payload": ... }`。服务端事件通过
//! serde 的相邻标签（adjacently tagged）枚举直接编解码；客户端事件先解析信封，
//! 再按事件名解析载荷，以便区分「格式错误」「未知事件」「载荷无效」三类错误。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::entities::{Message, ReadReceipt, TypingIndicator, UserPresence};
use crate::value_objects::{ConversationId, MessageId};

/// 服务端推送给客户端（以及在事件总线上传输）的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "message.new")]
    MessageNew(Message),
    #[serde(rename = "message.read")]
    MessageRead(ReadReceipt),
    #[serde(rename = "typing.start")]
    TypingStart(TypingIndicator),
    #[serde(rename = "typing.stop")]
    TypingStop(TypingIndicator),
    #[serde(rename = "presence.update")]
    PresenceUpdate(UserPresence),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

/// `error` 事件载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
            code: code.map(str::to_string),
        })
    }

    pub fn typing(indicator: TypingIndicator) -> Self {
        if indicator.is_typing {
            ServerEvent::TypingStart(indicator)
        } else {
            ServerEvent::TypingStop(indicator)
        }
    }

    /// 事件名，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::MessageNew(_) => "message.new",
            ServerEvent::MessageRead(_) => "message.read",
            ServerEvent::TypingStart(_) => "typing.start",
            ServerEvent::TypingStop(_) => "typing.stop",
            ServerEvent::PresenceUpdate(_) => "presence.update",
            ServerEvent::Error(_) => "error",
        }
    }

    /// 编码为一帧 JSON 文本
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// 客户端发往服务端的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    SendMessage {
        conversation_id: ConversationId,
        body: String,
    },
    MarkRead {
        message_id: MessageId,
        conversation_id: ConversationId,
    },
    TypingStart {
        conversation_id: ConversationId,
    },
    TypingStop {
        conversation_id: ConversationId,
    },
}

/// 客户端事件解码错误，作为 `error` 事件回给发送方，连接保持打开
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventDecodeError {
    #[error("Invalid message format")]
    Malformed,
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),
    #[error("Invalid message payload for {event}")]
    InvalidPayload { event: String },
}

impl EventDecodeError {
    pub fn code(&self) -> &'static str {
        match self {
            EventDecodeError::Malformed => "invalid_format",
            EventDecodeError::UnknownEvent(_) => "unknown_event",
            EventDecodeError::InvalidPayload { .. } => "invalid_payload",
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct SendMessagePayload {
    conversation_id: ConversationId,
    body: String,
}

#[derive(Deserialize)]
struct MarkReadPayload {
    message_id: MessageId,
    conversation_id: ConversationId,
}

#[derive(Deserialize)]
struct ConversationPayload {
    conversation_id: ConversationId,
}

fn payload<T: for<'de> Deserialize<'de>>(event: &str, value: Value) -> Result<T, EventDecodeError> {
    serde_json::from_value(value).map_err(|_| EventDecodeError::InvalidPayload {
        event: event.to_string(),
    })
}

impl ClientEvent {
    pub fn decode(text: &str) -> Result<Self, EventDecodeError> {
        let envelope: RawEnvelope =
            serde_json::from_str(text).map_err(|_| EventDecodeError::Malformed)?;
        let event = envelope.event.as_str();

        match event {
            "message.send" => {
                let p: SendMessagePayload = payload(event, envelope.payload)?;
                Ok(ClientEvent::SendMessage {
                    conversation_id: p.conversation_id,
                    body: p.body,
                })
            }
            "message.read" => {
                let p: MarkReadPayload = payload(event, envelope.payload)?;
                Ok(ClientEvent::MarkRead {
                    message_id: p.message_id,
                    conversation_id: p.conversation_id,
                })
            }
            "typing.start" => {
                let p: ConversationPayload = payload(event, envelope.payload)?;
                Ok(ClientEvent::TypingStart {
                    conversation_id: p.conversation_id,
                })
            }
            "typing.stop" => {
                let p: ConversationPayload = payload(event, envelope.payload)?;
                Ok(ClientEvent::TypingStop {
                    conversation_id: p.conversation_id,
                })
            }
            other => Err(EventDecodeError::UnknownEvent(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage { .. } => "message.send",
            ClientEvent::MarkRead { .. } => "message.read",
            ClientEvent::TypingStart { .. } => "typing.start",
            ClientEvent::TypingStop { .. } => "typing.stop",
        }
    }
}
