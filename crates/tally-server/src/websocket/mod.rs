//! Realtime broadcast of poll results over WebSocket.

pub mod broadcast;
pub mod connection;
pub mod heartbeat;
pub mod registry;
pub mod session;

pub use broadcast::{AcceptError, BroadcastReport, BroadcastServer, InboundOutcome, SweepReport};
pub use connection::{Connection, Outbound, SendFailure};
pub use heartbeat::spawn_heartbeat;
pub use session::run_ws_session;
