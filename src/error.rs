use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),

    #[error("Request error: {0}")]
    BusinessError(#[from] BusinessError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Protocol and transport failures end the session; everything else is
    /// reported to the client and the session keeps running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::ProtocolError(_) | AppError::TransportError(_))
    }

    /// Text sent back to the client inside an `error` event.
    pub fn client_message(&self) -> String {
        match self {
            AppError::AuthError(e) => e.to_string(),
            AppError::BusinessError(e) => e.to_string(),
            AppError::ProtocolError(_) => "failed to parse msg".to_string(),
            _ => "internal server error".to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid user credentials")]
    InvalidCredentials,

    #[error("user already existed")]
    UserExists,

    #[error("internal server error")]
    Internal,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("frame has no event name")]
    MissingEvent,

    #[error("invalid payload for {event}: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("binary frames are not supported")]
    Binary,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("read deadline exceeded")]
    ReadTimeout,

    #[error("write deadline exceeded")]
    WriteTimeout,

    #[error("connection closed by peer")]
    Closed,

    #[error("websocket failure: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("hub is no longer running")]
    HubGone,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusinessError {
    #[error("room already exists")]
    RoomExists,

    #[error("room doesnt exists")]
    RoomNotFound,

    #[error("recipient doesnt exists")]
    RecipientNotFound,

    #[error("not in a room")]
    NoActiveRoom,

    #[error("already authenticated")]
    AlreadyAuthenticated,

    #[error("not yet authenticated")]
    NotAuthenticated,

    #[error("unsupported event: {0}")]
    UnsupportedEvent(String),

    #[error("{0}")]
    Storage(&'static str),
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => DatabaseError::Duplicate,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionError(err.to_string())
            }
            _ => DatabaseError::QueryError(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationError(err.to_string())
    }
}
