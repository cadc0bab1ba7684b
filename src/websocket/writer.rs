use futures::{Sink, SinkExt};
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::mailbox::MailboxReceiver;
use crate::config::SessionConfig;
use crate::error::TransportError;

async fn write<K>(sink: &mut K, message: Message, wait: Duration) -> Result<(), TransportError>
where
    K: Sink<Message, Error = WsError> + Unpin,
{
    match timeout(wait, sink.send(message)).await {
        Err(_) => Err(TransportError::WriteTimeout),
        Ok(Err(e)) => Err(TransportError::Socket(e)),
        Ok(Ok(())) => Ok(()),
    }
}

/// Sole writer of the socket. Drains the mailbox in order and keeps the
/// peer alive with pings; a closed and drained mailbox ends the connection
/// with a close frame.
pub async fn run_writer<K>(
    session_id: Uuid,
    mut sink: K,
    mut mailbox: MailboxReceiver,
    config: SessionConfig,
) -> Result<(), TransportError>
where
    K: Sink<Message, Error = WsError> + Unpin,
{
    let write_wait = config.write_wait();
    let ping_period = config.ping_period();
    let mut ticker = interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            event = mailbox.recv() => {
                let Some(event) = event else {
                    debug!("Session {} mailbox drained, closing socket", session_id);
                    break write(&mut sink, Message::Close(None), write_wait).await;
                };

                let text = match event.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode event for session {}: {}", session_id, e);
                        continue;
                    }
                };
                if let Err(e) = write(&mut sink, Message::Text(text), write_wait).await {
                    break Err(e);
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = write(&mut sink, Message::Ping(Vec::new()), write_wait).await {
                    break Err(e);
                }
            }
        }
    };

    if let Err(e) = &result {
        warn!("Write pipeline for session {} stopped: {}", session_id, e);
    }
    let _ = timeout(write_wait, sink.close()).await;
    result
}
