//! # tally-client
//!
//! Live results consumer for the voting server.
//!
//! - [`ReconnectingClient`]: WebSocket connection state machine with
//!   exponential backoff, jitter, and bounded retries
//! - [`FallbackPoller`]: polls the HTTP results endpoint while the socket is down
//! - [`transport`]: the connector seam, with a `tokio-tungstenite` implementation
//!   and an in-memory pair for tests

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod fallback;
pub mod transport;

pub use client::ReconnectingClient;
pub use config::{poll_interval, ClientConfig};
pub use error::{ClientError, Result};
pub use events::ClientEvent;
pub use fallback::{FallbackPoller, HttpResultsSource, ResultsSource};
pub use transport::{Connector, Transport, TransportEvent, WsConnector};
