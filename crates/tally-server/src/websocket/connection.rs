//! Server-side state for one accepted WebSocket.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tally_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Close code sent to every client when the server shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Frame queued for a connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(Arc<String>),
    /// Heartbeat probe (WebSocket Ping frame).
    Ping,
    /// Close handshake; the writer stops after sending it.
    Close { code: u16, reason: String },
}

/// Why an enqueue failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendFailure {
    /// Writer is not keeping up; the queue is at capacity.
    Full,
    /// Writer task has exited.
    Closed,
}

/// A registered client connection.
///
/// Only the registry creates these, and a removed connection is never
/// re-registered.
pub struct Connection {
    pub id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    is_alive: AtomicBool,
    terminated: CancellationToken,
    sent: AtomicU64,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            is_alive: AtomicBool::new(true),
            terminated: CancellationToken::new(),
            sent: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame without waiting.
    pub fn send(&self, frame: Outbound) -> Result<(), SendFailure> {
        if self.is_terminated() {
            return Err(SendFailure::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => {
                let _ = self.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(SendFailure::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendFailure::Closed),
        }
    }

    pub fn send_text(&self, text: Arc<String>) -> Result<(), SendFailure> {
        self.send(Outbound::Text(text))
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag for the heartbeat sweep.
    ///
    /// Returns `true` if a pong arrived since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    /// Drop the socket without a close handshake.
    pub fn terminate(&self) {
        self.terminated.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }

    /// Frames successfully enqueued so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Connection::new(ConnectionId::new(), tx), rx)
    }

    #[test]
    fn new_connection_is_alive() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.is_alive());
        assert!(!conn.is_terminated());
        assert_eq!(conn.sent_count(), 0);
    }

    #[test]
    fn check_alive_clears_flag() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[tokio::test]
    async fn send_text_reaches_receiver() {
        let (conn, mut rx) = make_connection(4);
        conn.send_text(Arc::new("hello".into())).unwrap();
        assert_eq!(rx.recv().await, Some(Outbound::Text(Arc::new("hello".into()))));
        assert_eq!(conn.sent_count(), 1);
    }

    #[test]
    fn full_queue_reports_full() {
        let (conn, _rx) = make_connection(1);
        conn.send(Outbound::Ping).unwrap();
        assert_eq!(conn.send(Outbound::Ping), Err(SendFailure::Full));
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert_eq!(conn.send(Outbound::Ping), Err(SendFailure::Closed));
    }

    #[test]
    fn terminated_connection_refuses_sends() {
        let (conn, _rx) = make_connection(4);
        conn.terminate();
        assert!(conn.is_terminated());
        assert_eq!(conn.send(Outbound::Ping), Err(SendFailure::Closed));
    }

    #[tokio::test]
    async fn terminated_token_resolves() {
        let (conn, _rx) = make_connection(4);
        let token = conn.terminated();
        conn.terminate();
        token.cancelled().await;
    }
}
