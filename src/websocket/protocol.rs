use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::db::models::ChatHistory;
use crate::error::{AppError, BusinessError, ProtocolError};

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Frames a client may send. The wire form is `{"event": <name>, "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "auth:login")]
    Login(Credentials),
    #[serde(rename = "auth:signup")]
    Signup(Credentials),
    #[serde(rename = "chat:create_room")]
    CreateRoom { name: String },
    #[serde(rename = "chat:join_room")]
    JoinRoom { name: String },
    /// The name is accepted for compatibility; the active room is what gets left.
    #[serde(rename = "chat:leave_room")]
    LeaveRoom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    #[serde(rename = "msg:room:send")]
    SendRoomMessage { content: String },
    #[serde(rename = "msg:dm:send")]
    SendDirectMessage { recipient_username: String, content: String },
    #[serde(rename = "msg:room:log")]
    RoomLog {},
    #[serde(rename = "msg:dm:log")]
    DirectLog { username: String },
}

impl ClientEvent {
    pub const NAMES: &'static [&'static str] = &[
        "auth:login",
        "auth:signup",
        "chat:create_room",
        "chat:join_room",
        "chat:leave_room",
        "msg:room:send",
        "msg:dm:send",
        "msg:room:log",
        "msg:dm:log",
    ];

    pub const AUTH_NAMES: &'static [&'static str] = &["auth:login", "auth:signup"];

    /// Decodes one text frame.
    ///
    /// Unparseable JSON or a payload that does not fit the named event is a
    /// [`ProtocolError`]; a well-formed frame with an unknown event name is a
    /// non-fatal [`BusinessError::UnsupportedEvent`].
    pub fn decode(text: &str) -> Result<Self, AppError> {
        let (name, frame) = Self::split(text)?;
        if !Self::NAMES.contains(&name.as_str()) {
            return Err(BusinessError::UnsupportedEvent(name).into());
        }
        Self::from_frame(name, frame)
    }

    /// Decodes a frame sent before login. Anything but an auth event is
    /// rejected with [`BusinessError::NotAuthenticated`] without looking at
    /// its payload.
    pub fn decode_handshake(text: &str) -> Result<Self, AppError> {
        let (name, frame) = Self::split(text)?;
        if !Self::AUTH_NAMES.contains(&name.as_str()) {
            return Err(BusinessError::NotAuthenticated.into());
        }
        Self::from_frame(name, frame)
    }

    fn split(text: &str) -> Result<(String, Value), AppError> {
        let frame: Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

        let name = frame
            .get("event")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingEvent)?
            .to_owned();

        Ok((name, frame))
    }

    fn from_frame(name: String, frame: Value) -> Result<Self, AppError> {
        serde_json::from_value(frame)
            .map_err(|source| ProtocolError::InvalidPayload { event: name, source }.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncomingMessage {
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub is_dm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub room_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub recipient_id: i64,
    pub recipient_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<ChatHistory> for HistoryEntry {
    fn from(row: ChatHistory) -> Self {
        Self {
            room_id: row.room_id,
            sender_id: row.sender_id,
            sender_name: row.sender_name,
            recipient_id: row.recipient_id,
            recipient_name: row.recipient_name,
            message: row.message,
            created_at: row.created_at,
        }
    }
}

/// Frames the server sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "auth:ack")]
    AuthAck {},
    #[serde(rename = "ok")]
    Success { message: String },
    #[serde(rename = "chat:created")]
    RoomCreated {},
    #[serde(rename = "chat:joined")]
    RoomJoined {},
    #[serde(rename = "chat:left")]
    RoomLeft {},
    #[serde(rename = "msg:incoming")]
    Incoming(IncomingMessage),
    #[serde(rename = "msg:log")]
    History { entries: Vec<HistoryEntry> },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error { message: message.into() }
    }

    pub fn ok() -> Self {
        ServerEvent::Success { message: "ok".to_string() }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
