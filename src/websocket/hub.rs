use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::protocol::ServerEvent;
use super::rooms::RoomRegistry;
use super::session::SessionHandle;
use crate::config::{DuplicateLogin, HubConfig};
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub room_id: i64,
    pub event: ServerEvent,
}

#[derive(Debug, Clone)]
pub struct DirectMessageRequest {
    pub sender_id: i64,
    pub recipient_id: i64,
    pub event: ServerEvent,
}

#[derive(Debug)]
pub enum HubCommand {
    Register(SessionHandle),
    Unregister(SessionHandle),
    Broadcast(BroadcastRequest),
    DirectMessage(DirectMessageRequest),
    OnlineUsers(oneshot::Sender<Vec<i64>>),
}

/// Cloneable sender side of the hub's command queue.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn send(&self, command: HubCommand) -> Result<(), TransportError> {
        self.tx.send(command).await.map_err(|_| TransportError::HubGone)
    }

    pub async fn register(&self, session: SessionHandle) -> Result<(), TransportError> {
        self.send(HubCommand::Register(session)).await
    }

    pub async fn unregister(&self, session: SessionHandle) -> Result<(), TransportError> {
        self.send(HubCommand::Unregister(session)).await
    }

    pub async fn broadcast(&self, room_id: i64, event: ServerEvent) -> Result<(), TransportError> {
        self.send(HubCommand::Broadcast(BroadcastRequest { room_id, event })).await
    }

    pub async fn direct_message(
        &self,
        sender_id: i64,
        recipient_id: i64,
        event: ServerEvent,
    ) -> Result<(), TransportError> {
        self.send(HubCommand::DirectMessage(DirectMessageRequest {
            sender_id,
            recipient_id,
            event,
        }))
        .await
    }

    /// User ids currently registered, sorted. Goes through the command
    /// queue, so it also observes every command sent before it.
    pub async fn online_users(&self) -> Result<Vec<i64>, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::OnlineUsers(reply)).await?;
        rx.await.map_err(|_| TransportError::HubGone)
    }
}

/// The router. All connection-table mutations happen on the task running
/// [`Hub::run`], one command at a time.
pub struct Hub {
    connections: HashMap<i64, SessionHandle>,
    rooms: Arc<RoomRegistry>,
    commands: mpsc::Receiver<HubCommand>,
    duplicate_login: DuplicateLogin,
}

impl Hub {
    pub fn new(rooms: Arc<RoomRegistry>, config: &HubConfig) -> (Self, HubHandle) {
        let (tx, commands) = mpsc::channel(config.command_buffer.max(1));
        let hub = Self {
            connections: HashMap::new(),
            rooms,
            commands,
            duplicate_login: config.duplicate_login,
        };
        (hub, HubHandle { tx })
    }

    /// Starts the control loop on its own task.
    pub fn spawn(rooms: Arc<RoomRegistry>, config: &HubConfig) -> HubHandle {
        let (hub, handle) = Self::new(rooms, config);
        tokio::spawn(hub.run());
        handle
    }

    /// Runs until every [`HubHandle`] is dropped.
    pub async fn run(mut self) {
        info!("Hub started");
        while let Some(command) = self.commands.recv().await {
            self.process(command).await;
        }
        info!("Hub stopped with {} registered sessions", self.connections.len());
    }

    async fn process(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(session) => self.register(session),
            HubCommand::Unregister(session) => self.unregister(session),
            HubCommand::Broadcast(request) => self.broadcast(request),
            HubCommand::DirectMessage(request) => self.direct_message(request).await,
            HubCommand::OnlineUsers(reply) => {
                let mut users: Vec<i64> = self.connections.keys().copied().collect();
                users.sort_unstable();
                let _ = reply.send(users);
            }
        }
    }

    fn register(&mut self, session: SessionHandle) {
        let user_id = session.user_id();
        let session_id = session.id();
        info!("Registering session {} for user {} ({})", session_id, user_id, session.username());

        if let Some(previous) = self.connections.insert(user_id, session) {
            if previous.id() == session_id {
                return;
            }
            match self.duplicate_login {
                DuplicateLogin::Replace => {
                    warn!("User {} registered again, session {} superseded", user_id, previous.id());
                }
                DuplicateLogin::Evict => {
                    warn!("User {} registered again, closing session {}", user_id, previous.id());
                    previous.mailbox().close();
                }
            }
        }
    }

    fn unregister(&mut self, session: SessionHandle) {
        let user_id = session.user_id();
        let is_current = self
            .connections
            .get(&user_id)
            .is_some_and(|current| current.id() == session.id());

        if is_current {
            self.connections.remove(&user_id);
            info!("Unregistered session {} for user {}", session.id(), user_id);
        }
        session.mailbox().close();
    }

    /// Non-blocking fan-out. A member whose mailbox cannot take the event is
    /// dropped rather than allowed to hold up everyone else.
    fn broadcast(&mut self, request: BroadcastRequest) {
        let members = self.rooms.snapshot(request.room_id);
        let mut delivered = 0usize;

        for member in members {
            match member.mailbox().try_enqueue(request.event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "Evicting session {} of user {} from room {}: {}",
                        member.id(),
                        member.user_id(),
                        request.room_id,
                        e
                    );
                    self.evict(request.room_id, &member);
                }
            }
        }

        debug!(room_id = request.room_id, delivered, "broadcast done");
    }

    fn evict(&mut self, room_id: i64, member: &SessionHandle) {
        member.mailbox().close();
        if self
            .connections
            .get(&member.user_id())
            .is_some_and(|current| current.id() == member.id())
        {
            self.connections.remove(&member.user_id());
        }
        self.rooms.leave(room_id, member);
    }

    async fn direct_message(&mut self, request: DirectMessageRequest) {
        let Some(recipient) = self.connections.get(&request.recipient_id).cloned() else {
            warn!(
                "Direct message from {} to offline user {} dropped",
                request.sender_id, request.recipient_id
            );
            return;
        };

        if let Err(e) = recipient.mailbox().enqueue(request.event.clone()).await {
            warn!("Direct message to user {} not delivered: {}", request.recipient_id, e);
        }

        if request.sender_id == request.recipient_id {
            return;
        }

        if let Some(sender) = self.connections.get(&request.sender_id).cloned() {
            if let Err(e) = sender.mailbox().enqueue(request.event).await {
                warn!("Direct message echo to user {} not delivered: {}", request.sender_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::mailbox::{mailbox, MailboxReceiver};
    use crate::websocket::protocol::IncomingMessage;
    use std::time::Duration;

    fn hub_config(duplicate_login: DuplicateLogin) -> HubConfig {
        HubConfig {
            command_buffer: 16,
            duplicate_login,
        }
    }

    fn session(user_id: i64, capacity: usize) -> (SessionHandle, MailboxReceiver) {
        let (mailbox, receiver) = mailbox(capacity);
        (SessionHandle::new(user_id, format!("user{}", user_id), mailbox), receiver)
    }

    fn message(sender_id: i64, content: &str, is_dm: bool) -> ServerEvent {
        ServerEvent::Incoming(IncomingMessage {
            sender_id,
            sender_name: format!("user{}", sender_id),
            content: content.to_string(),
            is_dm,
        })
    }

    async fn assert_silent(receiver: &mut MailboxReceiver) {
        let next = tokio::time::timeout(Duration::from_millis(50), receiver.recv()).await;
        assert!(next.is_err(), "expected no event, got {:?}", next);
    }

    fn start(duplicate_login: DuplicateLogin) -> (HubHandle, Arc<RoomRegistry>) {
        let rooms = Arc::new(RoomRegistry::new());
        let handle = Hub::spawn(rooms.clone(), &hub_config(duplicate_login));
        (handle, rooms)
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_and_single_member_rooms() {
        let (hub, rooms) = start(DuplicateLogin::Replace);

        hub.broadcast(1, message(1, "nobody home", false)).await.unwrap();
        // round trip so the empty broadcast is handled before alice joins
        hub.online_users().await.unwrap();

        let (alice, mut alice_rx) = session(1, 8);
        hub.register(alice.clone()).await.unwrap();
        rooms.join(1, &alice);
        hub.broadcast(1, message(1, "hi", false)).await.unwrap();

        assert_eq!(alice_rx.recv().await, Some(message(1, "hi", false)));
        assert_silent(&mut alice_rx).await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_room_members() {
        let (hub, rooms) = start(DuplicateLogin::Replace);
        let (alice, mut alice_rx) = session(1, 8);
        let (bob, mut bob_rx) = session(2, 8);
        let (carol, mut carol_rx) = session(3, 8);

        for s in [&alice, &bob, &carol] {
            hub.register(s.clone()).await.unwrap();
        }
        rooms.join(1, &alice);
        rooms.join(1, &bob);
        rooms.join(2, &carol);

        hub.broadcast(1, message(2, "general only", false)).await.unwrap();

        assert_eq!(alice_rx.recv().await, Some(message(2, "general only", false)));
        assert_eq!(bob_rx.recv().await, Some(message(2, "general only", false)));
        assert_silent(&mut carol_rx).await;
    }

    #[tokio::test]
    async fn test_direct_message_to_offline_user_is_dropped_silently() {
        let (hub, _rooms) = start(DuplicateLogin::Replace);
        let (alice, mut alice_rx) = session(1, 8);
        hub.register(alice).await.unwrap();

        hub.direct_message(1, 42, message(1, "anyone?", true)).await.unwrap();
        hub.online_users().await.unwrap();

        assert_silent(&mut alice_rx).await;
    }

    #[tokio::test]
    async fn test_direct_message_reaches_both_parties_once() {
        let (hub, _rooms) = start(DuplicateLogin::Replace);
        let (alice, mut alice_rx) = session(1, 8);
        let (bob, mut bob_rx) = session(2, 8);
        hub.register(alice).await.unwrap();
        hub.register(bob).await.unwrap();

        hub.direct_message(1, 2, message(1, "psst", true)).await.unwrap();

        assert_eq!(bob_rx.recv().await, Some(message(1, "psst", true)));
        assert_eq!(alice_rx.recv().await, Some(message(1, "psst", true)));
        assert_silent(&mut bob_rx).await;
        assert_silent(&mut alice_rx).await;
    }

    #[tokio::test]
    async fn test_direct_message_to_self_is_delivered_once() {
        let (hub, _rooms) = start(DuplicateLogin::Replace);
        let (alice, mut alice_rx) = session(1, 8);
        hub.register(alice).await.unwrap();

        hub.direct_message(1, 1, message(1, "note to self", true)).await.unwrap();

        assert_eq!(alice_rx.recv().await, Some(message(1, "note to self", true)));
        assert_silent(&mut alice_rx).await;
    }

    #[tokio::test]
    async fn test_duplicate_register_replaces_without_closing() {
        let (hub, _rooms) = start(DuplicateLogin::Replace);
        let (first, _first_rx) = session(1, 8);
        let (second, _second_rx) = session(1, 8);

        hub.register(first.clone()).await.unwrap();
        hub.register(second.clone()).await.unwrap();

        assert_eq!(hub.online_users().await.unwrap(), vec![1]);
        assert!(!first.mailbox().is_closed());

        // the superseded session going away must not unregister the new one
        hub.unregister(first.clone()).await.unwrap();
        assert_eq!(hub.online_users().await.unwrap(), vec![1]);
        assert!(first.mailbox().is_closed());
        assert!(!second.mailbox().is_closed());
    }

    #[tokio::test]
    async fn test_duplicate_register_with_evict_policy_closes_old_session() {
        let (hub, _rooms) = start(DuplicateLogin::Evict);
        let (first, mut first_rx) = session(1, 8);
        let (second, _second_rx) = session(1, 8);

        hub.register(first.clone()).await.unwrap();
        hub.register(second.clone()).await.unwrap();

        assert_eq!(hub.online_users().await.unwrap(), vec![1]);
        assert!(first.mailbox().is_closed());
        assert_eq!(first_rx.recv().await, None);
        assert!(!second.mailbox().is_closed());
    }

    #[tokio::test]
    async fn test_registering_same_session_twice_keeps_it_open() {
        let (hub, _rooms) = start(DuplicateLogin::Evict);
        let (alice, _alice_rx) = session(1, 8);

        hub.register(alice.clone()).await.unwrap();
        hub.register(alice.clone()).await.unwrap();

        assert_eq!(hub.online_users().await.unwrap(), vec![1]);
        assert!(!alice.mailbox().is_closed());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent_and_closes_mailbox() {
        let (hub, _rooms) = start(DuplicateLogin::Replace);
        let (alice, mut alice_rx) = session(1, 8);

        hub.register(alice.clone()).await.unwrap();
        hub.unregister(alice.clone()).await.unwrap();
        hub.unregister(alice.clone()).await.unwrap();

        assert!(hub.online_users().await.unwrap().is_empty());
        assert_eq!(alice_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_full_mailbox_is_evicted_without_blocking_others() {
        let (hub, rooms) = start(DuplicateLogin::Replace);
        let (slow, _slow_rx) = session(1, 1);
        let (fast, mut fast_rx) = session(2, 8);

        hub.register(slow.clone()).await.unwrap();
        hub.register(fast.clone()).await.unwrap();
        rooms.join(1, &slow);
        rooms.join(1, &fast);

        slow.mailbox().try_enqueue(message(9, "backlog", false)).unwrap();
        hub.broadcast(1, message(2, "hello", false)).await.unwrap();

        assert_eq!(fast_rx.recv().await, Some(message(2, "hello", false)));
        assert_eq!(hub.online_users().await.unwrap(), vec![2]);
        assert!(slow.mailbox().is_closed());
        assert_eq!(rooms.members(1), vec![2]);
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_dropped() {
        let rooms = Arc::new(RoomRegistry::new());
        let (hub, handle) = Hub::new(rooms, &hub_config(DuplicateLogin::Replace));
        let task = tokio::spawn(hub.run());

        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("hub should stop")
            .unwrap();
    }
}
