//! WebSocket session lifecycle: one accepted socket from upgrade to close.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::broadcast::BroadcastServer;
use super::connection::{Connection, Outbound, CLOSE_GOING_AWAY};

/// Drive one socket.
///
/// 1. Registers with the broadcast server (which queues the ack)
/// 2. Forwards queued frames to the socket from a writer task
/// 3. Feeds inbound text to [`BroadcastServer::handle_inbound`]
/// 4. Unregisters on close, read error, or termination
#[instrument(skip_all, fields(conn_id = tracing::field::Empty))]
pub async fn run_ws_session(socket: WebSocket, server: Arc<BroadcastServer>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (conn, outbound_rx) = match server.accept() {
        Ok(accepted) => accepted,
        Err(e) => {
            debug!(error = %e, "rejecting socket");
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: String::from("Server shutting down").into(),
                })))
                .await;
            return;
        }
    };
    let conn_id = conn.id.clone();
    tracing::Span::current().record("conn_id", tracing::field::display(&conn_id));

    let writer = tokio::spawn(write_loop(ws_tx, outbound_rx, conn.clone()));
    let terminated = conn.terminated();

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = terminated.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };

        match msg {
            Message::Text(text) => {
                let _ = server.handle_inbound(&conn, text.as_str());
            }
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    let _ = server.handle_inbound(&conn, text);
                }
                Err(_) => {
                    debug!(conn_id = %conn_id, len = data.len(), "non-UTF8 binary frame");
                    let _ = server.handle_inbound(&conn, "");
                }
            },
            Message::Pong(_) | Message::Ping(_) => conn.mark_alive(),
            Message::Close(frame) => {
                info!(conn_id = %conn_id, code = ?frame.as_ref().map(|f| f.code), "client sent close frame");
                break;
            }
        }
    }

    server.disconnect(&conn_id);
    if writer.await.is_err() {
        debug!(conn_id = %conn_id, "writer task aborted");
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    conn: Arc<Connection>,
) {
    let terminated = conn.terminated();
    loop {
        let frame = tokio::select! {
            biased;
            () = terminated.cancelled() => break,
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else { break };

        let (msg, last) = match frame {
            Outbound::Text(text) => (Message::Text(String::clone(&text).into()), false),
            Outbound::Ping => (Message::Ping(Vec::new().into()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };
        // a peer that stopped reading must not pin this task
        let sent = tokio::select! {
            res = ws_tx.send(msg) => res.is_ok(),
            () = terminated.cancelled() => false,
        };
        if !sent || last {
            break;
        }
    }
    // Wake the reader so the socket is dropped on both halves.
    conn.terminate();
}
