//! The seam between the client state machine and a concrete socket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
const CLOSE_NO_STATUS: u16 = 1005;

/// What a transport yields to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// A data frame that could not be decoded as text. The connection is
    /// still usable.
    Undecodable(String),
    Closed { code: u16, reason: String },
    /// The connection itself failed.
    Error(String),
}

/// Binary frames carry UTF-8 JSON or nothing we can read.
pub fn decode_binary(data: &[u8]) -> TransportEvent {
    match std::str::from_utf8(data) {
        Ok(text) => TransportEvent::Text(text.to_owned()),
        Err(e) => TransportEvent::Undecodable(format!("non-UTF8 binary frame: {e}")),
    }
}

/// Opens transports. One call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}

/// One open connection.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
    /// Next inbound event; `None` once the stream has ended.
    ///
    /// Must be cancel-safe: the client polls it inside `select!`.
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Connects with `tokio-tungstenite` to a `ws://` URL.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Handshake(e.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(TransportEvent::Error(e.to_string())),
            };
            match msg {
                Message::Text(text) => return Some(TransportEvent::Text(text.as_str().to_owned())),
                Message::Binary(data) => return Some(decode_binary(&data)),
                Message::Close(frame) => {
                    let (code, reason) = frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                        (u16::from(f.code), f.reason.as_str().to_owned())
                    });
                    return Some(TransportEvent::Closed { code, reason });
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

pub mod memory {
    //! In-process transport pair. Each successful `connect` hands the far end
    //! to a [`MemoryListener`] as a [`MemoryPeer`].

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{decode_binary, Connector, Transport, TransportEvent};
    use crate::error::{ClientError, Result};

    /// A frame the client wrote.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Frame {
        Text(String),
        Close { code: u16, reason: String },
    }

    pub fn pair() -> (MemoryConnector, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        let accepting = Arc::new(AtomicBool::new(true));
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            MemoryConnector {
                peers: tx,
                accepting: accepting.clone(),
                attempts: attempts.clone(),
            },
            MemoryListener {
                peers: rx,
                accepting,
                attempts,
            },
        )
    }

    pub struct MemoryConnector {
        peers: mpsc::UnboundedSender<MemoryPeer>,
        accepting: Arc<AtomicBool>,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.accepting.load(Ordering::SeqCst) {
                return Err(ClientError::Handshake("connection refused".into()));
            }
            let (to_client, inbound) = mpsc::unbounded_channel();
            let (outbound, from_client) = mpsc::unbounded_channel();
            self.peers
                .send(MemoryPeer {
                    to_client,
                    from_client,
                })
                .map_err(|_| ClientError::Handshake("listener dropped".into()))?;
            Ok(Box::new(MemoryTransport { inbound, outbound }))
        }
    }

    /// Server side of [`pair`].
    pub struct MemoryListener {
        peers: mpsc::UnboundedReceiver<MemoryPeer>,
        accepting: Arc<AtomicBool>,
        attempts: Arc<AtomicUsize>,
    }

    impl MemoryListener {
        /// Refuse (or accept again) subsequent connection attempts.
        pub fn set_accepting(&self, accepting: bool) {
            self.accepting.store(accepting, Ordering::SeqCst);
        }

        /// Connection attempts seen so far, refused ones included.
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        pub async fn accept(&mut self) -> Option<MemoryPeer> {
            self.peers.recv().await
        }

        pub fn try_accept(&mut self) -> Option<MemoryPeer> {
            self.peers.try_recv().ok()
        }
    }

    /// Far end of one accepted connection. Dropping it looks like a lost
    /// connection to the client.
    pub struct MemoryPeer {
        to_client: mpsc::UnboundedSender<TransportEvent>,
        from_client: mpsc::UnboundedReceiver<Frame>,
    }

    impl MemoryPeer {
        pub fn send_text(&self, text: impl Into<String>) {
            let _ = self.to_client.send(TransportEvent::Text(text.into()));
        }

        /// Deliver a binary frame, decoded the way a real socket would be.
        pub fn send_binary(&self, data: &[u8]) {
            let _ = self.to_client.send(decode_binary(data));
        }

        pub fn close(&self, code: u16, reason: &str) {
            let _ = self.to_client.send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            });
        }

        pub fn fail(&self, message: &str) {
            let _ = self.to_client.send(TransportEvent::Error(message.to_string()));
        }

        pub async fn recv(&mut self) -> Option<Frame> {
            self.from_client.recv().await
        }

        pub fn try_recv(&mut self) -> Option<Frame> {
            self.from_client.try_recv().ok()
        }
    }

    struct MemoryTransport {
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
        outbound: mpsc::UnboundedSender<Frame>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send_text(&mut self, text: String) -> Result<()> {
            self.outbound
                .send(Frame::Text(text))
                .map_err(|_| ClientError::Transport("peer gone".into()))
        }

        async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
            let _ = self.outbound.send(Frame::Close {
                code,
                reason: reason.to_string(),
            });
            Ok(())
        }

        async fn recv(&mut self) -> Option<TransportEvent> {
            self.inbound.recv().await
        }
    }

}
