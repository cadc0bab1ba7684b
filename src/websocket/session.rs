use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::hub::HubHandle;
use super::mailbox::{EnqueueError, Mailbox};
use super::protocol::{ClientEvent, Credentials, HistoryEntry, IncomingMessage, ServerEvent};
use super::rooms::RoomRegistry;
use crate::auth::AuthGate;
use crate::config::SessionConfig;
use crate::db::models::{HistoryFilter, NewChatHistory, RoomLookup};
use crate::db::Repository;
use crate::error::{AppError, BusinessError, DatabaseError, ProtocolError, TransportError};

/// Non-owning reference to a live session, held by the hub and the room
/// registry. Only the session's own pipelines decide when it ends.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    user_id: i64,
    username: String,
    mailbox: Mailbox,
}

impl SessionHandle {
    pub fn new(user_id: i64, username: impl Into<String>, mailbox: Mailbox) -> Self {
        Self::with_id(Uuid::new_v4(), user_id, username, mailbox)
    }

    pub fn with_id(id: Uuid, user_id: i64, username: impl Into<String>, mailbox: Mailbox) -> Self {
        Self {
            id,
            user_id,
            username: username.into(),
            mailbox,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }
}

/// Everything a session needs from the server, shared by all sessions.
#[derive(Clone)]
pub struct SessionContext {
    pub repo: Arc<dyn Repository>,
    pub auth: Arc<AuthGate>,
    pub hub: HubHandle,
    pub rooms: Arc<RoomRegistry>,
    pub config: SessionConfig,
    pub history_limit: i64,
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(SessionHandle),
    Registered(SessionHandle),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveRoom {
    id: i64,
    name: String,
}

fn storage_error(context: &'static str) -> impl FnOnce(DatabaseError) -> AppError {
    move |e| {
        error!("{}: {}", context, e);
        BusinessError::Storage(context).into()
    }
}

/// Read side of one connection: handshake, dispatch and teardown.
pub struct Session {
    id: Uuid,
    peer: String,
    state: SessionState,
    active_room: Option<ActiveRoom>,
    mailbox: Mailbox,
    ctx: SessionContext,
}

impl Session {
    pub fn new(ctx: SessionContext, mailbox: Mailbox, peer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            state: SessionState::Unauthenticated,
            active_room: None,
            mailbox,
            ctx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn registered(&self) -> Option<&SessionHandle> {
        match &self.state {
            SessionState::Registered(handle) => Some(handle),
            _ => None,
        }
    }

    /// Reads frames until the peer goes away, a fatal error occurs or the
    /// mailbox is closed from outside, then unregisters.
    pub async fn run<S>(mut self, mut stream: S)
    where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let read_idle = self.ctx.config.read_idle();
        let mut deadline = Instant::now() + read_idle;
        let mailbox = self.mailbox.clone();

        let outcome: Result<(), AppError> = loop {
            let next = tokio::select! {
                next = timeout_at(deadline, stream.next()) => next,
                _ = mailbox.closed() => break Err(TransportError::Closed.into()),
            };

            let message = match next {
                Err(_) => break Err(TransportError::ReadTimeout.into()),
                Ok(None) => break Ok(()),
                Ok(Some(Err(e))) => break Err(TransportError::Socket(e).into()),
                Ok(Some(Ok(message))) => message,
            };

            let result = match message {
                Message::Text(text) => self.handle_text(&text).await,
                Message::Binary(_) => Err(ProtocolError::Binary.into()),
                Message::Pong(_) => {
                    deadline = Instant::now() + read_idle;
                    Ok(())
                }
                Message::Close(frame) => {
                    debug!("Session {} received close frame: {:?}", self.id, frame);
                    break Ok(());
                }
                // pings are answered by tungstenite itself
                Message::Ping(_) | Message::Frame(_) => Ok(()),
            };

            if let Err(e) = result {
                if e.is_fatal() {
                    if matches!(e, AppError::ProtocolError(_)) {
                        let _ = self.mailbox.try_enqueue(ServerEvent::error(e.client_message()));
                    }
                    break Err(e);
                }
                if let Err(e) = self.reply_error(&e).await {
                    break Err(e);
                }
            }
        };

        self.finish(outcome).await;
    }

    async fn handle_text(&mut self, text: &str) -> Result<(), AppError> {
        if self.registered().is_some() {
            let event = ClientEvent::decode(text)?;
            self.dispatch(event).await
        } else {
            let event = ClientEvent::decode_handshake(text)?;
            self.handshake(event).await
        }
    }

    async fn reply(&self, event: ServerEvent) -> Result<(), AppError> {
        self.mailbox.enqueue(event).await.map_err(|e| match e {
            EnqueueError::Closed | EnqueueError::Full => TransportError::Closed.into(),
        })
    }

    async fn reply_error(&self, err: &AppError) -> Result<(), AppError> {
        match err {
            AppError::AuthError(e) => warn!("Session {} ({}): {}", self.id, self.peer, e),
            e => debug!("Session {} request failed: {}", self.id, e),
        }
        self.reply(ServerEvent::error(err.client_message())).await
    }

    async fn handshake(&mut self, event: ClientEvent) -> Result<(), AppError> {
        match event {
            ClientEvent::Login(credentials) => self.login(credentials).await,
            ClientEvent::Signup(credentials) => {
                self.ctx.auth.signup(&credentials).await?;
                self.reply(ServerEvent::ok()).await
            }
            _ => Err(BusinessError::NotAuthenticated.into()),
        }
    }

    async fn login(&mut self, credentials: Credentials) -> Result<(), AppError> {
        let user = self.ctx.auth.login(&credentials).await?;
        let handle = SessionHandle::with_id(self.id, user.id, user.username, self.mailbox.clone());
        self.state = SessionState::Authenticated(handle.clone());

        self.ctx.hub.register(handle.clone()).await?;
        info!("Session {} ({}) registered as {}", self.id, self.peer, handle.username());
        self.state = SessionState::Registered(handle);

        self.reply(ServerEvent::AuthAck {}).await
    }

    async fn dispatch(&mut self, event: ClientEvent) -> Result<(), AppError> {
        let Some(me) = self.registered().cloned() else {
            return Err(BusinessError::NotAuthenticated.into());
        };

        match event {
            ClientEvent::Login(_) | ClientEvent::Signup(_) => {
                Err(BusinessError::AlreadyAuthenticated.into())
            }
            ClientEvent::CreateRoom { name } => self.create_room(&name).await,
            ClientEvent::JoinRoom { name } => self.join_room(&me, name).await,
            ClientEvent::LeaveRoom { .. } => self.leave_room(&me).await,
            ClientEvent::SendRoomMessage { content } => self.send_room_message(&me, content).await,
            ClientEvent::SendDirectMessage {
                recipient_username,
                content,
            } => self.send_direct_message(&me, &recipient_username, content).await,
            ClientEvent::RoomLog {} => self.room_log().await,
            ClientEvent::DirectLog { username } => self.direct_log(&me, &username).await,
        }
    }

    async fn create_room(&self, name: &str) -> Result<(), AppError> {
        let existing = self
            .ctx
            .repo
            .find_room(RoomLookup::Name(name.to_string()))
            .await
            .map_err(storage_error("failed to fetch room data"))?;
        if existing.is_some() {
            return Err(BusinessError::RoomExists.into());
        }

        match self.ctx.repo.create_room(name).await {
            Ok(room) => info!("Room {} ({}) created", room.room_name, room.id),
            Err(DatabaseError::Duplicate) => return Err(BusinessError::RoomExists.into()),
            Err(e) => return Err(storage_error("failed to create room data")(e)),
        }

        self.reply(ServerEvent::RoomCreated {}).await
    }

    async fn join_room(&mut self, me: &SessionHandle, name: String) -> Result<(), AppError> {
        let room = self
            .ctx
            .repo
            .find_room(RoomLookup::Name(name))
            .await
            .map_err(storage_error("failed to fetch room data"))?
            .ok_or(BusinessError::RoomNotFound)?;

        if let Some(previous) = self.active_room.take() {
            if previous.id != room.id {
                self.ctx.rooms.leave(previous.id, me);
            }
        }

        self.ctx.rooms.join(room.id, me);
        self.active_room = Some(ActiveRoom {
            id: room.id,
            name: room.room_name,
        });

        self.reply(ServerEvent::RoomJoined {}).await
    }

    async fn leave_room(&mut self, me: &SessionHandle) -> Result<(), AppError> {
        let room = self.active_room.take().ok_or(BusinessError::NoActiveRoom)?;
        self.ctx.rooms.leave(room.id, me);
        debug!("User {} left room {}", me.user_id(), room.name);

        self.reply(ServerEvent::RoomLeft {}).await
    }

    async fn send_room_message(&self, me: &SessionHandle, content: String) -> Result<(), AppError> {
        let Some(room) = &self.active_room else {
            debug!("Session {} sent a room message outside any room", self.id);
            return Ok(());
        };

        if let Err(e) = self
            .ctx
            .repo
            .insert_chat_history(NewChatHistory::room(room.id, me.user_id(), content.clone()))
            .await
        {
            warn!("Failed to store message for room {}: {}", room.id, e);
        }

        let event = ServerEvent::Incoming(IncomingMessage {
            sender_id: me.user_id(),
            sender_name: me.username().to_string(),
            content,
            is_dm: false,
        });
        self.ctx.hub.broadcast(room.id, event).await?;
        Ok(())
    }

    async fn send_direct_message(
        &self,
        me: &SessionHandle,
        recipient_username: &str,
        content: String,
    ) -> Result<(), AppError> {
        let recipient = self
            .ctx
            .repo
            .find_user(recipient_username)
            .await
            .map_err(storage_error("failed to fetch recipient meta"))?
            .ok_or(BusinessError::RecipientNotFound)?;

        if let Err(e) = self
            .ctx
            .repo
            .insert_chat_history(NewChatHistory::direct(me.user_id(), recipient.id, content.clone()))
            .await
        {
            warn!("Failed to store direct message to {}: {}", recipient.id, e);
        }

        let event = ServerEvent::Incoming(IncomingMessage {
            sender_id: me.user_id(),
            sender_name: me.username().to_string(),
            content,
            is_dm: true,
        });
        self.ctx.hub.direct_message(me.user_id(), recipient.id, event).await?;
        Ok(())
    }

    async fn room_log(&self) -> Result<(), AppError> {
        let room = self.active_room.as_ref().ok_or(BusinessError::NoActiveRoom)?;
        let rows = self
            .ctx
            .repo
            .find_chat_history(HistoryFilter::Room {
                room_id: room.id,
                limit: self.ctx.history_limit,
            })
            .await
            .map_err(storage_error("failed to fetch chat history"))?;

        let entries = rows.into_iter().map(HistoryEntry::from).collect();
        self.reply(ServerEvent::History { entries }).await
    }

    async fn direct_log(&self, me: &SessionHandle, username: &str) -> Result<(), AppError> {
        let other = self
            .ctx
            .repo
            .find_user(username)
            .await
            .map_err(storage_error("failed to fetch recipient meta"))?
            .ok_or(BusinessError::RecipientNotFound)?;

        let rows = self
            .ctx
            .repo
            .find_chat_history(HistoryFilter::Direct {
                user_a: me.user_id(),
                user_b: other.id,
                limit: self.ctx.history_limit,
            })
            .await
            .map_err(storage_error("failed to fetch chat history"))?;

        let entries = rows.into_iter().map(HistoryEntry::from).collect();
        self.reply(ServerEvent::History { entries }).await
    }

    /// Runs on every exit path: leave the active room, unregister, then let
    /// the closed mailbox take the write side down.
    async fn finish(mut self, outcome: Result<(), AppError>) {
        match &outcome {
            Ok(()) => info!("Session {} ({}) closed by peer", self.id, self.peer),
            Err(AppError::TransportError(TransportError::Closed)) => {
                info!("Session {} ({}) mailbox closed", self.id, self.peer)
            }
            Err(e) => warn!("Session {} ({}) terminated: {}", self.id, self.peer, e),
        }

        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        match state {
            SessionState::Registered(handle) | SessionState::Authenticated(handle) => {
                if let Some(room) = self.active_room.take() {
                    self.ctx.rooms.leave(room.id, &handle);
                }
                if let Err(e) = self.ctx.hub.unregister(handle).await {
                    error!("Failed to unregister session {}: {}", self.id, e);
                    self.mailbox.close();
                }
            }
            SessionState::Unauthenticated | SessionState::Closed => {
                self.mailbox.close();
            }
        }
    }
}
