//! `ReconnectingClient`: one task owns the connection state machine; the
//! handle talks to it over a command channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tally_core::{BackoffConfig, ClientStatus, ConnectionState, Envelope, MessageType, ResultSnapshot};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::transport::{Connector, Transport, TransportEvent, CLOSE_NORMAL};

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Box<dyn Transport>>> + Send>>;

enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Send {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to a running client task.
///
/// Dropping every handle (or calling [`shutdown`](Self::shutdown)) closes
/// the transport with 1000 and stops the task.
pub struct ReconnectingClient {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ClientStatus>,
    results: watch::Receiver<Option<ResultSnapshot>>,
    events: broadcast::Sender<ClientEvent>,
    task: JoinHandle<()>,
}

impl ReconnectingClient {
    /// Spawn the client task in `disconnected`. Nothing happens until
    /// [`connect`](Self::connect).
    pub fn spawn(connector: impl Connector, config: ClientConfig) -> Self {
        Self::spawn_shared(Arc::new(connector), config)
    }

    pub fn spawn_shared(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        let (commands_tx, commands) = mpsc::channel(config.command_buffer.max(1));
        let status = ClientStatus::new(config.backoff.max_attempts);
        let (status_tx, status_rx) = watch::channel(status.clone());
        let (results_tx, results_rx) = watch::channel(None);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        let actor = Actor {
            connector,
            backoff: config.backoff,
            reconnect_enabled: config.reconnect_enabled,
            auto_reconnect: true,
            status,
            link: Link::Idle,
            commands,
            status_tx,
            results_tx,
            events: events.clone(),
        };
        let task = tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            status: status_rx,
            results: results_rx,
            events,
            task,
        }
    }

    /// Start connecting. Ignored unless `disconnected`; a `failed` client
    /// only recovers through [`reconnect`](Self::reconnect).
    pub async fn connect(&self) -> Result<()> {
        self.command(Command::Connect).await
    }

    /// Cancel any pending retry, close with 1000, and stay down.
    pub async fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect).await
    }

    /// Disconnect, reset the attempt counter, and connect afresh.
    pub async fn reconnect(&self) -> Result<()> {
        self.command(Command::Reconnect).await
    }

    /// Send `data` on the open connection. Strings go out verbatim, anything
    /// else as JSON.
    pub async fn send_message(&self, data: &Value) -> Result<()> {
        let text = match data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { text, reply }).await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Latest results received over the socket.
    pub fn results(&self) -> Option<ResultSnapshot> {
        self.results.borrow().clone()
    }

    pub fn watch_results(&self) -> watch::Receiver<Option<ResultSnapshot>> {
        self.results.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            warn!(error = %e, "client task panicked");
        }
    }

    async fn command(&self, cmd: Command) -> Result<()> {
        self.commands.send(cmd).await.map_err(|_| ClientError::Closed)
    }
}

enum Link {
    Idle,
    Connecting(ConnectFuture),
    Open(Box<dyn Transport>),
    Backoff(Pin<Box<Sleep>>),
}

enum Step {
    Command(Command),
    Handshake(Result<Box<dyn Transport>>),
    Inbound(Option<TransportEvent>),
    RetryDue,
    Stop,
}

struct Actor {
    connector: Arc<dyn Connector>,
    backoff: BackoffConfig,
    reconnect_enabled: bool,
    // cleared by disconnect(), set again by connect()/reconnect()
    auto_reconnect: bool,
    status: ClientStatus,
    link: Link,
    commands: mpsc::Receiver<Command>,
    status_tx: watch::Sender<ClientStatus>,
    results_tx: watch::Sender<Option<ResultSnapshot>>,
    events: broadcast::Sender<ClientEvent>,
}

impl Actor {
    #[instrument(name = "ws_client", skip_all)]
    async fn run(mut self) {
        loop {
            match self.next_step().await {
                Step::Stop => break,
                Step::Command(cmd) => self.on_command(cmd).await,
                Step::Handshake(res) => self.on_handshake(res),
                Step::Inbound(event) => self.on_inbound(event),
                Step::RetryDue => self.retry(),
            }
        }
        let _ = self.close_link("Client shutdown").await;
        debug!("client task stopped");
    }

    async fn next_step(&mut self) -> Step {
        let commands = &mut self.commands;
        match &mut self.link {
            Link::Idle => commands.recv().await.map_or(Step::Stop, Step::Command),
            Link::Connecting(handshake) => tokio::select! {
                res = handshake => Step::Handshake(res),
                cmd = commands.recv() => cmd.map_or(Step::Stop, Step::Command),
            },
            Link::Open(transport) => tokio::select! {
                event = transport.recv() => Step::Inbound(event),
                cmd = commands.recv() => cmd.map_or(Step::Stop, Step::Command),
            },
            Link::Backoff(timer) => tokio::select! {
                () = timer.as_mut() => Step::RetryDue,
                cmd = commands.recv() => cmd.map_or(Step::Stop, Step::Command),
            },
        }
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => match self.status.state {
                ConnectionState::Disconnected => {
                    self.auto_reconnect = true;
                    self.begin_connect();
                }
                state => debug!(%state, "connect ignored"),
            },
            Command::Disconnect => self.disconnect().await,
            Command::Reconnect => {
                self.disconnect().await;
                self.auto_reconnect = true;
                self.begin_connect();
            }
            Command::Send { text, reply } => {
                let res = match &mut self.link {
                    Link::Open(transport) => transport.send_text(text).await,
                    _ => Err(ClientError::NotConnected),
                };
                if let Err(ClientError::Transport(e)) = &res {
                    self.status.last_error = Some(e.clone());
                    self.publish();
                }
                let _ = reply.send(res);
            }
        }
    }

    async fn disconnect(&mut self) {
        self.auto_reconnect = false;
        if self.close_link("Manual disconnect").await {
            self.emit(ClientEvent::Closed {
                code: CLOSE_NORMAL,
                reason: "Manual disconnect".into(),
            });
        }
        self.status.reconnect_attempts = 0;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Drop whatever the link holds. Returns `true` if a transport was open.
    async fn close_link(&mut self, reason: &str) -> bool {
        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Open(mut transport) => {
                if let Err(e) = transport.close(CLOSE_NORMAL, reason).await {
                    debug!(error = %e, "close handshake failed");
                }
                true
            }
            _ => false,
        }
    }

    fn begin_connect(&mut self) {
        let connector = self.connector.clone();
        self.link = Link::Connecting(Box::pin(async move { connector.connect().await }));
        self.set_state(ConnectionState::Connecting);
    }

    fn on_handshake(&mut self, res: Result<Box<dyn Transport>>) {
        match res {
            Ok(transport) => {
                let attempts = self.status.reconnect_attempts;
                self.link = Link::Open(transport);
                self.status.reconnect_attempts = 0;
                self.status.last_error = None;
                self.set_state(ConnectionState::Connected);
                if attempts > 0 {
                    info!(attempts, "reconnected");
                    self.emit(ClientEvent::ReconnectSucceeded { attempts });
                } else {
                    info!("connected");
                }
            }
            Err(e) => {
                self.link = Link::Idle;
                self.connection_lost(e.to_string());
            }
        }
    }

    fn on_inbound(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Text(raw)) => self.on_message(&raw),
            Some(TransportEvent::Closed { code, reason }) => {
                self.link = Link::Idle;
                info!(code, %reason, "connection closed");
                if code == CLOSE_NORMAL {
                    self.emit(ClientEvent::Closed { code, reason });
                    self.set_state(ConnectionState::Disconnected);
                } else {
                    self.status.last_error = Some(close_error(code, &reason));
                    self.emit(ClientEvent::Closed { code, reason });
                    self.schedule_reconnect();
                }
            }
            Some(TransportEvent::Undecodable(message)) => {
                warn!(error = %message, "undecodable frame");
                self.emit(ClientEvent::Error {
                    message: ClientError::Parse(message).to_string(),
                });
            }
            Some(TransportEvent::Error(message)) => {
                self.link = Link::Idle;
                self.connection_lost(message);
            }
            None => {
                self.link = Link::Idle;
                self.connection_lost("connection ended without a close frame".into());
            }
        }
    }

    fn on_message(&mut self, raw: &str) {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "unparseable message");
                self.emit(ClientEvent::Error {
                    message: ClientError::Parse(e.to_string()).to_string(),
                });
                return;
            }
        };

        let update = match envelope.message_type() {
            Some(MessageType::VoteUpdate) => match envelope.snapshot() {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(error = %e, "bad vote-update payload");
                    self.emit(ClientEvent::Error {
                        message: ClientError::Parse(e.to_string()).to_string(),
                    });
                    None
                }
            },
            _ => None,
        };

        self.emit(ClientEvent::Message(envelope));
        if let Some(snapshot) = update {
            debug!(total_votes = snapshot.total_votes, "results updated");
            let _ = self.results_tx.send_replace(Some(snapshot.clone()));
            self.emit(ClientEvent::ResultsUpdated(snapshot));
        }
    }

    fn connection_lost(&mut self, reason: String) {
        warn!(error = %reason, attempts = self.status.reconnect_attempts, "connection lost");
        self.status.last_error = Some(reason.clone());
        self.emit(ClientEvent::Error { message: reason });
        self.set_state(ConnectionState::Error);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if !(self.reconnect_enabled && self.auto_reconnect) {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        let attempts = self.status.reconnect_attempts;
        let max = self.status.max_reconnect_attempts;
        if attempts >= max {
            warn!(attempts, max, "reconnect attempts exhausted");
            self.set_state(ConnectionState::Failed);
            self.emit(ClientEvent::ReconnectFailed { attempts });
            return;
        }

        let delay = self.backoff.delay(attempts);
        info!(
            attempt = attempts + 1,
            max,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.link = Link::Backoff(Box::pin(tokio::time::sleep(delay)));
        self.set_state(ConnectionState::Reconnecting);
    }

    fn retry(&mut self) {
        self.status.reconnect_attempts += 1;
        let attempt = self.status.reconnect_attempts;
        let max = self.status.max_reconnect_attempts;
        info!(attempt, max, "reconnect attempt");
        self.emit(ClientEvent::ReconnectAttempt { attempt, max });
        self.begin_connect();
    }

    fn set_state(&mut self, to: ConnectionState) {
        let from = self.status.state;
        self.status.state = to;
        self.publish();
        if from != to {
            debug!(%from, %to, "state change");
            self.emit(ClientEvent::StateChanged { from, to });
        }
    }

    fn publish(&self) {
        let _ = self.status_tx.send_replace(self.status.clone());
    }

    fn emit(&self, event: ClientEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

fn close_error(code: u16, reason: &str) -> String {
    if reason.is_empty() {
        format!("connection closed with code {code}")
    } else {
        format!("connection closed with code {code}: {reason}")
    }
}
