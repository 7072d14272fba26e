//! Result fan-out, inbound message handling, and liveness sweeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tally_core::envelope::INVALID_FORMAT_TEXT;
use tally_core::{ConnectionId, Envelope, MessageType, ResultSnapshot};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{Connection, Outbound, SendFailure, CLOSE_GOING_AWAY};
use super::registry::ConnectionRegistry;

/// Delivery counts for one broadcast. Partial failure is not an error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub success_count: usize,
    pub failure_count: usize,
}

/// Outcome of one heartbeat sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub terminated: usize,
}

/// What [`BroadcastServer::handle_inbound`] did with a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// `ping` answered with `pong`.
    Pong,
    /// Valid envelope of a type the server does not act on.
    Ignored { kind: String },
    /// Not an envelope; an `error` frame went back to the sender.
    Malformed,
}

#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("broadcast server is shutting down")]
    ShuttingDown,
}

/// Owns the connection registry and everything that touches it.
///
/// Built once per process and shared by `Arc` with the vote handler and
/// the socket tasks.
pub struct BroadcastServer {
    registry: ConnectionRegistry,
    accepting: AtomicBool,
    // serializes fan-out so each connection sees broadcasts in call order
    fanout: Mutex<()>,
}

impl BroadcastServer {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: ConnectionRegistry::new(queue_capacity),
            accepting: AtomicBool::new(true),
            fanout: Mutex::new(()),
        }
    }

    /// Register a new connection and queue its `connection-ack`.
    pub fn accept(&self) -> Result<(Arc<Connection>, mpsc::Receiver<Outbound>), AcceptError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(AcceptError::ShuttingDown);
        }
        let (conn, rx) = self.registry.register();
        info!(conn_id = %conn.id, total = self.registry.len(), "client connected");
        self.send_envelope(&conn, &Envelope::connection_ack());
        Ok((conn, rx))
    }

    /// Push a `vote-update` carrying `snapshot` to every registered connection.
    pub fn broadcast(&self, snapshot: &ResultSnapshot) -> BroadcastReport {
        let _order = self.fanout.lock();
        self.fan_out(snapshot)
    }

    /// Compute a snapshot and broadcast it while holding the fan-out lock.
    ///
    /// Concurrent publishers therefore deliver snapshots in the order they
    /// were computed, so the last frame every client sees is the newest.
    pub fn publish<E>(
        &self,
        compute: impl FnOnce() -> Result<ResultSnapshot, E>,
    ) -> Result<(ResultSnapshot, BroadcastReport), E> {
        let _order = self.fanout.lock();
        let snapshot = compute()?;
        let report = self.fan_out(&snapshot);
        Ok((snapshot, report))
    }

    fn fan_out(&self, snapshot: &ResultSnapshot) -> BroadcastReport {
        let json = match Envelope::vote_update(snapshot).and_then(|e| e.to_json()) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize vote update");
                return BroadcastReport::default();
            }
        };

        let recipients = self.registry.snapshot();
        let mut report = BroadcastReport::default();
        for conn in &recipients {
            match conn.send_text(json.clone()) {
                Ok(()) => report.success_count += 1,
                Err(reason) => {
                    report.failure_count += 1;
                    self.drop_failed(conn, reason);
                }
            }
        }

        if report.failure_count > 0 {
            warn!(
                recipients = recipients.len(),
                success = report.success_count,
                failed = report.failure_count,
                "vote update partially delivered"
            );
        } else {
            debug!(recipients = recipients.len(), "vote update broadcast");
        }
        report
    }

    /// Handle one text frame from `conn`.
    pub fn handle_inbound(&self, conn: &Arc<Connection>, raw: &str) -> InboundOutcome {
        let envelope = match Envelope::parse(raw) {
            Ok(env) => env,
            Err(e) => {
                debug!(conn_id = %conn.id, error = %e, "malformed client message");
                self.send_envelope(conn, &Envelope::error(INVALID_FORMAT_TEXT));
                return InboundOutcome::Malformed;
            }
        };

        match envelope.message_type() {
            Some(MessageType::Ping) => {
                self.send_envelope(conn, &Envelope::pong());
                InboundOutcome::Pong
            }
            _ => {
                info!(conn_id = %conn.id, kind = %envelope.kind, "ignoring unknown message type");
                InboundOutcome::Ignored {
                    kind: envelope.kind,
                }
            }
        }
    }

    /// One liveness pass.
    ///
    /// A connection that has not answered since the previous sweep is
    /// terminated; every other one has its flag cleared and gets a probe.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for conn in self.registry.snapshot() {
            if !conn.check_alive() {
                info!(conn_id = %conn.id, "no heartbeat reply, terminating");
                self.terminate(&conn.id);
                report.terminated += 1;
                continue;
            }
            match conn.send(Outbound::Ping) {
                Ok(()) => report.probed += 1,
                Err(reason) => {
                    self.drop_failed(&conn, reason);
                    report.terminated += 1;
                }
            }
        }
        if report.terminated > 0 {
            info!(
                probed = report.probed,
                terminated = report.terminated,
                remaining = self.registry.len(),
                "heartbeat sweep"
            );
        }
        report
    }

    /// Called by the socket task once its peer is gone.
    pub fn disconnect(&self, id: &ConnectionId) {
        if let Some(conn) = self.registry.remove(id) {
            conn.terminate();
            info!(conn_id = %id, total = self.registry.len(), "client disconnected");
        }
    }

    /// Remove a connection and drop its socket without a close handshake.
    pub fn terminate(&self, id: &ConnectionId) {
        if let Some(conn) = self.registry.remove(id) {
            conn.terminate();
        }
    }

    /// Stop accepting, close every connection with 1001, clear the registry.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        let drained = self.registry.drain();
        for conn in &drained {
            let close = Outbound::Close {
                code: CLOSE_GOING_AWAY,
                reason: "Server shutting down".to_string(),
            };
            if conn.send(close).is_err() {
                conn.terminate();
            }
        }
        info!(closed = drained.len(), "broadcast server shut down");
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_registered(&self, id: &ConnectionId) -> bool {
        self.registry.contains(id)
    }

    fn send_envelope(&self, conn: &Arc<Connection>, envelope: &Envelope) {
        let json = match envelope.to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(conn_id = %conn.id, error = %e, "failed to serialize envelope");
                return;
            }
        };
        if let Err(reason) = conn.send_text(json) {
            self.drop_failed(conn, reason);
        }
    }

    fn drop_failed(&self, conn: &Arc<Connection>, reason: SendFailure) {
        warn!(conn_id = %conn.id, ?reason, "send failed, removing client");
        self.terminate(&conn.id);
    }
}
