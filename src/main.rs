//! `tally`: live poll server and results watcher.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tally_client::{
    poll_interval, ClientConfig, ClientEvent, FallbackPoller, HttpResultsSource,
    ReconnectingClient, ResultsSource, WsConnector,
};
use tally_core::ResultSnapshot;
use tally_server::{wait_for_signal, TallyServer};
use tally_settings::TallySettings;
use tally_store::{Database, OptionRepo};
use tally_telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "tally", about = "Single-poll voting server with live results")]
struct Cli {
    /// Settings file (default: ~/.tally/settings.json).
    #[arg(long, global = true, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Emit one JSON object per log line.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and the broadcast server.
    Serve {
        /// Override `server.httpPort`.
        #[arg(long)]
        http_port: Option<u16>,
        /// Override `server.wsPort`.
        #[arg(long)]
        ws_port: Option<u16>,
        /// Override `server.databasePath`.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Follow live results, falling back to HTTP polling while disconnected.
    Watch {
        /// Override `client.wsUrl`.
        #[arg(long)]
        ws_url: Option<String>,
        /// Override `client.httpUrl`.
        #[arg(long)]
        http_url: Option<String>,
    },
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<TallySettings> {
    let settings = match path {
        Some(path) => tally_settings::load_settings_from_path(path),
        None => tally_settings::load_settings(),
    };
    settings.context("Failed to load settings")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load_settings(args.config.as_deref())?;

    let _telemetry = init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        format: if args.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        ..TelemetryConfig::default()
    });

    match args.command {
        Command::Serve {
            http_port,
            ws_port,
            db_path,
        } => {
            let mut server = settings.server;
            if let Some(port) = http_port {
                server.http_port = port;
            }
            if let Some(port) = ws_port {
                server.ws_port = port;
            }
            if let Some(path) = db_path {
                server.database_path = path.to_string_lossy().into_owned();
            }
            serve(server).await
        }
        Command::Watch { ws_url, http_url } => {
            let mut client = settings.client;
            if let Some(url) = ws_url {
                client.ws_url = url;
            }
            if let Some(url) = http_url {
                client.http_url = url;
            }
            watch(client).await
        }
    }
}

async fn serve(settings: tally_settings::ServerSettings) -> Result<()> {
    let db = if settings.database_path == ":memory:" {
        Database::in_memory().context("Failed to open in-memory database")?
    } else {
        let path = settings.resolve_database_path(&tally_settings::settings_dir());
        ensure_parent_dir(&path)?;
        Database::open(&path)
            .with_context(|| format!("Failed to open database {}", path.display()))?
    };
    let seeded = OptionRepo::new(db.clone())
        .seed(&settings.seed_options)
        .context("Failed to seed poll options")?;
    if seeded > 0 {
        info!(count = seeded, "seeded poll options");
    }

    let handle = TallyServer::new(settings, db)
        .start()
        .await
        .context("Failed to bind server ports")?;
    info!(http = %handle.http_addr, ws = %handle.ws_addr, "tally server running");

    let token = handle.token();
    tokio::select! {
        () = wait_for_signal() => info!("shutdown signal received"),
        () = token.cancelled() => {}
    }
    let report = handle.shutdown(None).await;
    if !report.is_clean() {
        warn!(aborted = ?report.aborted, "some server tasks had to be aborted");
    }
    Ok(())
}

async fn watch(settings: tally_settings::ClientSettings) -> Result<()> {
    let source = HttpResultsSource::new(&settings.http_url);
    match source.fetch().await {
        Ok(snapshot) => log_results("http", &snapshot),
        Err(e) => warn!(error = %e, url = source.url(), "initial results fetch failed"),
    }

    let client = ReconnectingClient::spawn(
        WsConnector::new(settings.ws_url.clone()),
        ClientConfig::from_settings(&settings),
    );
    let mut events = client.subscribe();
    client
        .connect()
        .await
        .context("Client task exited before connecting")?;

    let cancel = CancellationToken::new();
    let (polled_tx, mut polled_rx) = mpsc::channel(8);
    let poller = tokio::spawn(FallbackPoller::new(source, poll_interval(&settings)).run(
        client.watch_status(),
        polled_tx,
        cancel.clone(),
    ));

    info!(url = %settings.ws_url, "watching results");
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(snapshot) = polled_rx.recv() => log_results("poll", &snapshot),
        }
    }

    cancel.cancel();
    if let Err(e) = poller.await {
        warn!(error = %e, "fallback poller task failed");
    }
    client.shutdown().await;
    Ok(())
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::StateChanged { from, to } => info!(%from, %to, "connection state"),
        ClientEvent::ResultsUpdated(snapshot) => log_results("ws", snapshot),
        ClientEvent::ReconnectAttempt { attempt, max } => {
            info!(attempt, max, "reconnecting");
        }
        ClientEvent::ReconnectSucceeded { attempts } => info!(attempts, "reconnected"),
        ClientEvent::ReconnectFailed { attempts } => {
            warn!(attempts, "gave up reconnecting, polling over http");
        }
        ClientEvent::Closed { code, reason } => info!(code, %reason, "connection closed"),
        ClientEvent::Error { message } => warn!(%message, "client error"),
        ClientEvent::Message(_) => {}
    }
}

fn log_results(via: &str, snapshot: &ResultSnapshot) {
    let tallies = snapshot
        .options
        .iter()
        .map(|o| format!("{}={} ({}%)", o.name, o.count, o.percentage))
        .collect::<Vec<_>>()
        .join(", ");
    info!(via, total = snapshot.total_votes, %tallies, "results");
}
