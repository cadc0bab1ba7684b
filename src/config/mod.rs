use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub workers: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub mailbox_capacity: usize,
    pub max_frame_size: usize,
    pub read_idle_secs: u64,
    pub write_wait_secs: u64,
}

impl SessionConfig {
    pub fn read_idle(&self) -> Duration {
        Duration::from_secs(self.read_idle_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    /// Pings go out a bit before the peer's read deadline would expire.
    /// Never zero, so the ticker can always be built.
    pub fn ping_period(&self) -> Duration {
        (self.read_idle() * 9 / 10).max(Duration::from_millis(100))
    }
}

/// What the hub does with the session already registered under a user id
/// when the same user logs in again.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateLogin {
    /// Overwrite the table entry and leave the old mailbox open.
    #[default]
    Replace,
    /// Overwrite the table entry and close the old mailbox.
    Evict,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HubConfig {
    pub command_buffer: usize,
    pub duplicate_login: DuplicateLogin,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub bcrypt_cost: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub history_limit: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub hub: HubConfig,
    pub auth: AuthConfig,
    pub chat: ChatConfig,
}

fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("environment", environment)?
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.path", "/api/v1/chat")?
        .set_default("server.workers", num_cpus::get() as i64)?
        .set_default("database.url", "sqlite://appdata/db/app.db")?
        .set_default("database.max_connections", 5)?
        .set_default("session.mailbox_capacity", 256)?
        .set_default("session.max_frame_size", 1024)?
        .set_default("session.read_idle_secs", 60)?
        .set_default("session.write_wait_secs", 10)?
        .set_default("hub.command_buffer", 64)?
        .set_default("hub.duplicate_login", "replace")?
        .set_default("auth.bcrypt_cost", i64::from(bcrypt::DEFAULT_COST))?
        .set_default("chat.history_limit", 50)
}

/// `APP_` prefix, `__` between nested keys.
fn environment() -> Environment {
    Environment::with_prefix("app")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = defaults("development")?
            // Add in settings from the config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // E.g., `APP_SERVER__PORT=5001` would set `Settings.server.port`
            .add_source(environment())
            .build()?;

        s.try_deserialize::<Self>()?.validate()
    }

    /// Rejects values the runtime cannot work with, such as zero-sized
    /// queues or zero timers.
    pub fn validate(self) -> Result<Self, ConfigError> {
        let checks = [
            ("session.mailbox_capacity", self.session.mailbox_capacity as u64),
            ("session.max_frame_size", self.session.max_frame_size as u64),
            ("session.read_idle_secs", self.session.read_idle_secs),
            ("session.write_wait_secs", self.session.write_wait_secs),
            ("hub.command_buffer", self.hub.command_buffer as u64),
        ];
        if let Some((key, _)) = checks.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Message(format!("{} must be greater than zero", key)));
        }
        if self.chat.history_limit < 1 {
            return Err(ConfigError::Message("chat.history_limit must be at least 1".into()));
        }
        Ok(self)
    }

    /// Defaults suited to tests: in-memory database, cheap hashing, an
    /// ephemeral port and no environment overrides.
    pub fn new_for_test() -> Result<Self, ConfigError> {
        defaults("test")?
            .set_override("server.port", 0)?
            .set_override("server.workers", 2)?
            .set_override("database.url", "sqlite::memory:")?
            .set_override("database.max_connections", 1)?
            .set_override("auth.bcrypt_cost", 4)?
            .build()?
            .try_deserialize::<Self>()?
            .validate()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
