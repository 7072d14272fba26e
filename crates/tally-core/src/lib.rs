//! Shared types for the tally voting service.
//!
//! Everything here is transport-agnostic: the wire envelope exchanged over
//! the realtime channel, the result snapshot that rides inside it, the
//! client connection state machine vocabulary, and reconnect backoff math.

pub mod backoff;
pub mod envelope;
pub mod ids;
pub mod results;
pub mod state;

pub use backoff::BackoffConfig;
pub use envelope::{Envelope, EnvelopeError, MessageType};
pub use ids::{ConnectionId, RequestId};
pub use results::{percentage, OptionTally, ResultSnapshot};
pub use state::{ClientStatus, ConnectionState, StatusReport};
