use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// bcrypt hash, never the plain password.
    #[serde(skip_serializing)]
    pub password: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatRoom {
    pub id: i64,
    pub room_name: String,
    pub is_dm: bool,
    pub created_at: DateTime<Utc>,
}

/// How a room is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomLookup {
    Id(i64),
    Name(String),
}

/// One stored chat message. `room_id == 0` marks a direct message and
/// `recipient_id == 0` a room message.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ChatHistory {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub recipient_id: i64,
    pub recipient_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChatHistory {
    pub room_id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub message: String,
}

impl NewChatHistory {
    pub fn room(room_id: i64, sender_id: i64, message: impl Into<String>) -> Self {
        Self {
            room_id,
            sender_id,
            recipient_id: 0,
            message: message.into(),
        }
    }

    pub fn direct(sender_id: i64, recipient_id: i64, message: impl Into<String>) -> Self {
        Self {
            room_id: 0,
            sender_id,
            recipient_id,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryFilter {
    /// Messages posted to a room.
    Room { room_id: i64, limit: i64 },
    /// Direct messages exchanged between two users, both directions.
    Direct { user_a: i64, user_b: i64, limit: i64 },
}
