//! WebSocket chat core
//!
//! Sessions own their socket and their mailbox. The hub is the only
//! component that routes between sessions; rooms are membership sets the
//! sessions mutate directly.

pub mod hub;
pub mod mailbox;
pub mod protocol;
pub mod rooms;
pub mod session;
pub mod server;
pub mod writer;

pub use hub::{Hub, HubCommand, HubHandle};
pub use mailbox::{mailbox, EnqueueError, Mailbox, MailboxReceiver};
pub use protocol::{ClientEvent, Credentials, HistoryEntry, IncomingMessage, ServerEvent};
pub use rooms::RoomRegistry;
pub use server::WebSocketServer;
pub use session::{Session, SessionContext, SessionHandle, SessionState};
