/// Errors surfaced by the client, its transports, and the fallback poller.
///
/// `Clone` so the same error can be both returned and broadcast as an event.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("invalid message: {0}")]
    Parse(String),
    #[error("not connected")]
    NotConnected,
    #[error("client task has stopped")]
    Closed,
    #[error("results request failed: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
