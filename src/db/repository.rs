use async_trait::async_trait;

use crate::db::models::{ChatHistory, ChatRoom, HistoryFilter, NewChatHistory, NewUser, RoomLookup, User};
use crate::error::DatabaseError;

/// Storage the chat core relies on. Calls are awaited inline on the calling
/// session's task, so a slow store only stalls that one connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_user(&self, username: &str) -> Result<Option<User>, DatabaseError>;

    async fn insert_user(&self, user: NewUser) -> Result<User, DatabaseError>;

    async fn find_room(&self, lookup: RoomLookup) -> Result<Option<ChatRoom>, DatabaseError>;

    async fn create_room(&self, room_name: &str) -> Result<ChatRoom, DatabaseError>;

    async fn find_chat_history(&self, filter: HistoryFilter) -> Result<Vec<ChatHistory>, DatabaseError>;

    async fn insert_chat_history(&self, entry: NewChatHistory) -> Result<(), DatabaseError>;
}
