//! Database module for the chat server
//!
//! Storage contract consumed by the chat core, plus the SQLite
//! implementation backing it.

pub mod models;
pub mod operations;
pub mod repository;

pub use models::{ChatHistory, ChatRoom, HistoryFilter, NewChatHistory, NewUser, RoomLookup, User};
pub use operations::DbOperations;
pub use repository::Repository;
