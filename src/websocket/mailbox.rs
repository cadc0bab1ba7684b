use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, watch};

use super::protocol::ServerEvent;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("mailbox is full")]
    Full,
    #[error("mailbox is closed")]
    Closed,
}

/// Producer side of a session's outbound queue. Clones share one queue.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::Sender<ServerEvent>,
    closed: Arc<watch::Sender<bool>>,
}

/// Consumer side, owned by the session's write pipeline.
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::Receiver<ServerEvent>,
    closed: watch::Receiver<bool>,
}

/// Creates a mailbox holding up to `capacity` events, never fewer than one.
pub fn mailbox(capacity: usize) -> (Mailbox, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (closed_tx, closed_rx) = watch::channel(false);
    (
        Mailbox {
            tx,
            closed: Arc::new(closed_tx),
        },
        MailboxReceiver { rx, closed: closed_rx },
    )
}

impl Mailbox {
    /// Enqueues without waiting. A full queue is reported, never waited on.
    pub fn try_enqueue(&self, event: ServerEvent) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Enqueues, waiting for capacity. Gives up if the mailbox is closed
    /// while waiting.
    pub async fn enqueue(&self, event: ServerEvent) -> Result<(), EnqueueError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(EnqueueError::Closed);
        }

        tokio::select! {
            sent = self.tx.send(event) => sent.map_err(|_| EnqueueError::Closed),
            _ = closed.wait_for(|c| *c) => Err(EnqueueError::Closed),
        }
    }

    /// Marks the mailbox closed. Returns `true` only for the call that
    /// actually closed it.
    pub fn close(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }

    /// Resolves once the mailbox is closed or its receiver is gone.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        tokio::select! {
            _ = closed.wait_for(|c| *c) => {}
            _ = self.tx.closed() => {}
        }
    }
}

impl MailboxReceiver {
    /// Next queued event. Events queued before the mailbox was closed are
    /// still handed out; `None` means closed and drained.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }

            if *self.closed.borrow_and_update() {
                return None;
            }

            tokio::select! {
                event = self.rx.recv() => return event,
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return self.rx.recv().await;
                    }
                }
            }
        }
    }
}
