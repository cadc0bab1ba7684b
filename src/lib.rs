pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::{AuthGate, BcryptHasher, PasswordHasher};
pub use db::{DbOperations, Repository};
pub use websocket::WebSocketServer;

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub db: Arc<DbOperations>,
}

impl AppState {
    /// Opens the database and brings the schema up to date.
    pub async fn new(config: Settings) -> Result<Self> {
        let db = DbOperations::new_with_options(
            &config.database.url,
            config.database.max_connections,
            Duration::from_secs(5),
        )
        .await?;
        db.migrate().await?;

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
        })
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        self.db.clone()
    }

    /// Builds the chat server on top of this state. Spawns the hub, so it
    /// has to run inside a runtime.
    pub fn websocket_server(&self) -> Arc<WebSocketServer> {
        Arc::new(WebSocketServer::new(self.config.clone(), self.repository()))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.db.close().await;
        Ok(())
    }
}
