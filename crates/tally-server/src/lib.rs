//! # tally-server
//!
//! Axum HTTP API and WebSocket broadcast server for a single live poll.
//!
//! - HTTP endpoints: name-only login, options, cached results, voting, health
//! - WebSocket endpoint on its own port: registry, heartbeat eviction, result fan-out
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

pub mod api;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use server::{ServerHandle, TallyServer};
pub use shutdown::{wait_for_signal, ShutdownCoordinator, ShutdownReport};
pub use websocket::{BroadcastReport, BroadcastServer};
