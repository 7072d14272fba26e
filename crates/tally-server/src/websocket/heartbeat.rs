//! Periodic liveness sweep over all registered connections.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::broadcast::BroadcastServer;

/// Sweep every `interval` until `cancel` fires.
///
/// The first sweep runs one full interval after start, so a fresh
/// connection always gets at least one probe before it can be evicted.
pub async fn run_heartbeat(
    server: Arc<BroadcastServer>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = server.sweep();
                debug!(probed = report.probed, terminated = report.terminated, "heartbeat tick");
            }
            () = cancel.cancelled() => {
                debug!("heartbeat stopped");
                return;
            }
        }
    }
}

pub fn spawn_heartbeat(
    server: Arc<BroadcastServer>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_heartbeat(server, interval, cancel))
}
