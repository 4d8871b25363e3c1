//! Fan-out of opaque frames between connected peers.
//!
//! The hub never touches sockets. Each registered session owns a bounded
//! outbound queue; the transport drains it into the connection. Dropping a
//! session's sender (on unregister) ends that drain and closes the peer.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Bytes),
    Text(String),
}

/// Handle returned by [`RelayHub::register`].
#[derive(Debug)]
pub struct RelaySession {
    pub id: SessionId,
    pub outbound: mpsc::Receiver<Frame>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct RelayHub {
    sessions: RwLock<HashMap<SessionId, mpsc::Sender<Frame>>>,
    queue: usize,
    send_timeout: Duration,
}

impl RelayHub {
    pub fn new(queue: usize, send_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            queue: queue.max(1),
            send_timeout,
        }
    }

    pub fn register(&self) -> RelaySession {
        let (tx, rx) = mpsc::channel(self.queue);
        let id = Uuid::new_v4();
        let total = {
            let mut sessions = self.sessions.write();
            sessions.insert(id, tx);
            sessions.len()
        };
        info!("relay session {} connected ({} total)", id, total);
        RelaySession { id, outbound: rx }
    }

    /// Remove a session. Returns false if it was already gone.
    pub fn unregister(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            info!("relay session {} disconnected", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `frame` to every session except `from`.
    ///
    /// Recipients are sent to concurrently. One that is closed or does not
    /// accept the frame within the send timeout is unregistered; the rest
    /// are unaffected.
    pub async fn broadcast(&self, from: SessionId, frame: Frame) -> BroadcastReport {
        let recipients: Vec<(SessionId, mpsc::Sender<Frame>)> = self
            .sessions
            .read()
            .iter()
            .filter(|(id, _)| **id != from)
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let timeout = self.send_timeout;
        let sends = recipients.into_iter().map(|(id, tx)| {
            let frame = frame.clone();
            async move {
                let outcome = match tokio::time::timeout(timeout, tx.send(frame)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err("session closed"),
                    Err(_) => Err("send timed out"),
                };
                (id, outcome)
            }
        });

        let mut report = BroadcastReport::default();
        for (id, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    warn!("relay to {} failed: {}, dropping session", id, reason);
                    self.unregister(id);
                    report.dropped += 1;
                }
            }
        }
        debug!(
            "relayed frame from {}: {} delivered, {} dropped",
            from, report.delivered, report.dropped
        );
        report
    }
}
