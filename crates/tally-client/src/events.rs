use tally_core::{ConnectionState, Envelope, ResultSnapshot};

/// Notifications published by [`ReconnectingClient`](crate::ReconnectingClient).
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Every parsed inbound envelope, whatever its type.
    Message(Envelope),
    /// A `vote-update` replaced the local result state.
    ResultsUpdated(ResultSnapshot),
    /// A scheduled retry is starting.
    ReconnectAttempt { attempt: u32, max: u32 },
    /// Connected again after `attempts` retries.
    ReconnectSucceeded { attempts: u32 },
    /// Gave up; the client is now `failed`.
    ReconnectFailed { attempts: u32 },
    /// The transport closed, by either side.
    Closed { code: u16, reason: String },
    Error { message: String },
}
