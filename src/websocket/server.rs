use futures::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, error, info};

use super::hub::{Hub, HubHandle};
use super::mailbox::mailbox;
use super::rooms::RoomRegistry;
use super::session::{Session, SessionContext};
use super::writer::run_writer;
use crate::auth::{AuthGate, BcryptHasher};
use crate::config::Settings;
use crate::db::Repository;

/// Accepts sockets on the chat path and wires each one to a session.
pub struct WebSocketServer {
    settings: Arc<Settings>,
    context: SessionContext,
}

impl WebSocketServer {
    /// Must be called inside a runtime: the hub task is spawned here.
    pub fn new(settings: Arc<Settings>, repo: Arc<dyn Repository>) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        let hub = Hub::spawn(rooms.clone(), &settings.hub);
        let hasher = Arc::new(BcryptHasher::new(settings.auth.bcrypt_cost));
        let auth = Arc::new(AuthGate::new(repo.clone(), hasher));

        let context = SessionContext {
            repo,
            auth,
            hub,
            rooms,
            config: settings.session.clone(),
            history_limit: settings.chat.history_limit,
        };

        Self { settings, context }
    }

    pub fn hub(&self) -> &HubHandle {
        &self.context.hub
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.context.rooms
    }

    fn ws_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.settings.session.max_frame_size);
        config.max_frame_size = Some(self.settings.session.max_frame_size);
        config
    }

    /// Accept loop. Returns once `shutdown` resolves; live sessions keep
    /// running on their own tasks.
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, addr).await;
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        }
    }

    pub async fn handle_connection(self: Arc<Self>, raw_stream: TcpStream, addr: SocketAddr) {
        debug!("New TCP connection from: {}", addr);

        let path = self.settings.server.path.clone();
        let check_path = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            if request.uri().path() == path {
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(Some("not found".to_string()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };

        let ws_stream =
            match tokio_tungstenite::accept_hdr_async_with_config(raw_stream, check_path, Some(self.ws_config())).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("Error during WebSocket handshake with {}: {}", addr, e);
                    return;
                }
            };

        let (ws_sink, ws_stream) = ws_stream.split();
        let (outbox, receiver) = mailbox(self.settings.session.mailbox_capacity);

        let session = Session::new(self.context.clone(), outbox, addr.to_string());
        let session_id = session.id();
        info!("WebSocket session {} opened for {}", session_id, addr);

        let send_task = tokio::spawn(run_writer(
            session_id,
            ws_sink,
            receiver,
            self.settings.session.clone(),
        ));
        let receive_task = tokio::spawn(session.run(ws_stream));

        // each side notices the other stopping through the mailbox
        let (sent, received) = tokio::join!(send_task, receive_task);
        if let Err(e) = sent {
            error!("Send task for session {} failed: {}", session_id, e);
        }
        if let Err(e) = received {
            error!("Receive task for session {} failed: {}", session_id, e);
        }

        info!("WebSocket session {} closed", session_id);
    }
}
