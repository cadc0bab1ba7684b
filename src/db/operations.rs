use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::db::models::{ChatHistory, ChatRoom, HistoryFilter, NewChatHistory, NewUser, RoomLookup, User};
use crate::db::repository::Repository;
use crate::error::DatabaseError;

pub struct DbOperations {
    pool: Arc<SqlitePool>,
}

impl DbOperations {
    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, DatabaseError> {
        let in_memory = url.contains(":memory:");
        if !in_memory {
            ensure_parent_dir(url)?;
        }

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout);
        if in_memory {
            // each in-memory connection is its own database, keep the one alive
            pool_options = pool_options.max_connections(1).idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        info!("Connected to database {}", url);

        Ok(Self { pool: Arc::new(pool) })
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn get_pool_status(&self) -> DbPoolStatus {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        DbPoolStatus {
            total_connections: size,
            active_connections: size.saturating_sub(idle),
            idle_connections: idle,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// SQLite creates the database file but not the directories leading to it.
fn ensure_parent_dir(url: &str) -> Result<(), DatabaseError> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| DatabaseError::ConnectionError(format!("cannot create {}: {}", parent.display(), e)))?;
    }
    Ok(())
}

#[async_trait]
impl Repository for DbOperations {
    async fn find_user(&self, username: &str) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password, created_at)
            VALUES (?, ?, ?)
            RETURNING id, username, password, created_at
            "#,
        )
        .bind(user.username)
        .bind(user.password)
        .bind(Utc::now())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn find_room(&self, lookup: RoomLookup) -> Result<Option<ChatRoom>, DatabaseError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT id, room_name, is_dm, created_at FROM rooms WHERE ");
        match lookup {
            RoomLookup::Id(id) => query.push("id = ").push_bind(id),
            RoomLookup::Name(name) => query.push("room_name = ").push_bind(name),
        };

        let room = query
            .build_query_as::<ChatRoom>()
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(room)
    }

    async fn create_room(&self, room_name: &str) -> Result<ChatRoom, DatabaseError> {
        let room = sqlx::query_as::<_, ChatRoom>(
            r#"
            INSERT INTO rooms (room_name, is_dm, created_at)
            VALUES (?, 0, ?)
            RETURNING id, room_name, is_dm, created_at
            "#,
        )
        .bind(room_name)
        .bind(Utc::now())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(room)
    }

    async fn find_chat_history(&self, filter: HistoryFilter) -> Result<Vec<ChatHistory>, DatabaseError> {
        let mut query = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT * FROM (
                SELECT ch.id, ch.room_id, ch.sender_id,
                       COALESCE(su.username, '') AS sender_name,
                       ch.recipient_id,
                       COALESCE(ru.username, '') AS recipient_name,
                       ch.message, ch.created_at
                FROM chat_histories ch
                LEFT JOIN users su ON su.id = ch.sender_id
                LEFT JOIN users ru ON ru.id = ch.recipient_id AND ch.recipient_id <> 0
                WHERE "#,
        );

        let limit = match filter {
            HistoryFilter::Room { room_id, limit } => {
                query.push("ch.room_id = ").push_bind(room_id);
                limit
            }
            HistoryFilter::Direct { user_a, user_b, limit } => {
                query
                    .push("ch.room_id = 0 AND ((ch.sender_id = ")
                    .push_bind(user_a)
                    .push(" AND ch.recipient_id = ")
                    .push_bind(user_b)
                    .push(") OR (ch.sender_id = ")
                    .push_bind(user_b)
                    .push(" AND ch.recipient_id = ")
                    .push_bind(user_a)
                    .push("))");
                limit
            }
        };

        // newest N, returned oldest first
        query
            .push(" ORDER BY ch.id DESC LIMIT ")
            .push_bind(limit)
            .push(") ORDER BY id ASC");

        let rows = query
            .build_query_as::<ChatHistory>()
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(rows)
    }

    async fn insert_chat_history(&self, entry: NewChatHistory) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO chat_histories (room_id, sender_id, recipient_id, message, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.room_id)
        .bind(entry.sender_id)
        .bind(entry.recipient_id)
        .bind(entry.message)
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DbPoolStatus {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
}
