//! `TallyServer`: the HTTP API and the WebSocket endpoint on their own ports.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tally_settings::ServerSettings;
use tally_store::Database;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api::{self, ApiState, ResultsCache};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::websocket::{run_ws_session, spawn_heartbeat, BroadcastServer};

/// The voting server. Build once per process.
pub struct TallyServer {
    settings: ServerSettings,
    db: Database,
    broadcast: Arc<BroadcastServer>,
    results_cache: Arc<ResultsCache>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl TallyServer {
    pub fn new(settings: ServerSettings, db: Database) -> Self {
        let broadcast = Arc::new(BroadcastServer::new(settings.send_queue_capacity));
        let results_cache = Arc::new(ResultsCache::new(Duration::from_millis(
            settings.results_cache_ttl_ms,
        )));
        Self {
            settings,
            db,
            broadcast,
            results_cache,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Router for the HTTP port.
    pub fn api_router(&self) -> Router {
        api::router(ApiState {
            db: self.db.clone(),
            broadcast: self.broadcast.clone(),
            results_cache: self.results_cache.clone(),
            session_max_age_secs: self.settings.session_max_age_secs,
            start_time: self.start_time,
        })
        .layer(TraceLayer::new_for_http())
    }

    /// Router for the WebSocket port: a single upgrade route.
    pub fn ws_router(&self) -> Router {
        Router::new()
            .route(&self.settings.ws_path, get(ws_upgrade))
            .with_state(self.broadcast.clone())
    }

    pub fn broadcast(&self) -> &Arc<BroadcastServer> {
        &self.broadcast
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Bind both ports and spawn the serve loops plus the heartbeat.
    pub async fn start(self) -> io::Result<ServerHandle> {
        let host = self.settings.host.as_str();
        let http_listener = TcpListener::bind((host, self.settings.http_port)).await?;
        let ws_listener = TcpListener::bind((host, self.settings.ws_port)).await?;
        let http_addr = http_listener.local_addr()?;
        let ws_addr = ws_listener.local_addr()?;

        let token = self.shutdown.token();
        self.shutdown.track(
            "heartbeat",
            spawn_heartbeat(
                self.broadcast.clone(),
                Duration::from_millis(self.settings.heartbeat_interval_ms),
                token.clone(),
            ),
        );
        self.shutdown.spawn(
            "http",
            serve("http", http_listener, self.api_router(), token.clone()),
        );
        self.shutdown
            .spawn("ws", serve("ws", ws_listener, self.ws_router(), token));

        info!(%http_addr, %ws_addr, ws_path = %self.settings.ws_path, "server listening");
        Ok(ServerHandle {
            http_addr,
            ws_addr,
            broadcast: self.broadcast,
            shutdown: self.shutdown,
        })
    }
}

async fn serve(name: &'static str, listener: TcpListener, router: Router, token: CancellationToken) {
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await;
    if let Err(e) = result {
        error!(listener = name, error = %e, "serve loop failed");
    }
}

/// GET {ws_path}
async fn ws_upgrade(State(server): State<Arc<BroadcastServer>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws_session(socket, server))
}

/// A running server.
pub struct ServerHandle {
    pub http_addr: SocketAddr,
    pub ws_addr: SocketAddr,
    broadcast: Arc<BroadcastServer>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl ServerHandle {
    pub fn broadcast(&self) -> &Arc<BroadcastServer> {
        &self.broadcast
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    /// Close every socket with 1001, then stop the listeners and heartbeat.
    pub async fn shutdown(self, timeout: Option<Duration>) -> ShutdownReport {
        self.broadcast.shutdown();
        let report = self.shutdown.drain(timeout).await;
        info!(
            stopped = report.stopped.len(),
            aborted = report.aborted.len(),
            "server stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn make_server() -> TallyServer {
        TallyServer::new(ServerSettings::default(), Database::in_memory().unwrap())
    }

    #[test]
    fn accessors() {
        let server = make_server();
        assert_eq!(server.settings().ws_path, "/ws");
        assert_eq!(server.broadcast().connection_count(), 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn api_router_serves_health() {
        let resp = make_server()
            .api_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_route_rejects_plain_get() {
        let resp = make_server()
            .ws_router()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn ws_port_has_no_api_routes() {
        let resp = make_server()
            .ws_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_binds_ephemeral_ports_and_stops() {
        let settings = ServerSettings {
            host: "127.0.0.1".into(),
            http_port: 0,
            ws_port: 0,
            ..ServerSettings::default()
        };
        let handle = TallyServer::new(settings, Database::in_memory().unwrap())
            .start()
            .await
            .unwrap();
        assert_ne!(handle.http_addr.port(), 0);
        assert_ne!(handle.ws_addr.port(), 0);
        assert_ne!(handle.http_addr, handle.ws_addr);

        let token = handle.token();
        let report = handle.shutdown(Some(Duration::from_secs(5))).await;
        assert!(token.is_cancelled());
        assert!(report.is_clean());
        assert_eq!(report.stopped, ["heartbeat", "http", "ws"]);
    }
}
