//! Owns the server's background tasks and stops them together.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits when no timeout is given.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Which tracked tasks stopped on their own and which had to be aborted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<&'static str>,
    pub aborted: Vec<&'static str>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty()
    }
}

struct Tracked {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// One cancellation token shared by the serve loops and the heartbeat, plus
/// the handles needed to wait for them.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<Tracked>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn `task` and keep its handle for [`drain`](Self::drain).
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.track(name, tokio::spawn(task));
    }

    pub fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().push(Tracked { name, handle });
    }

    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Cancel the token and wait for every tracked task until a shared
    /// deadline. Stragglers are aborted.
    pub async fn drain(&self, timeout: Option<Duration>) -> ShutdownReport {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.token.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!(
            tasks = tasks.len(),
            timeout_ms = timeout.as_millis() as u64,
            "draining server tasks"
        );

        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport::default();
        for Tracked { name, mut handle } in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.stopped.push(name),
                Ok(Err(e)) => {
                    warn!(task = name, error = %e, "task ended abnormally");
                    report.stopped.push(name);
                }
                Err(_) => {
                    warn!(task = name, "task missed the shutdown deadline, aborting");
                    handle.abort();
                    report.aborted.push(name);
                }
            }
        }
        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                let _ = sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_with_nothing_tracked() {
        let coord = ShutdownCoordinator::default();
        assert!(!coord.is_shutting_down());
        let report = coord.drain(None).await;
        assert!(coord.is_shutting_down());
        assert_eq!(report, ShutdownReport::default());
    }

    #[tokio::test]
    async fn cooperative_tasks_stop() {
        let coord = ShutdownCoordinator::new();
        for name in ["http", "ws"] {
            let token = coord.token();
            coord.spawn(name, async move { token.cancelled().await });
        }
        assert_eq!(coord.tracked(), 2);

        let report = coord.drain(Some(Duration::from_secs(5))).await;
        assert_eq!(report.stopped, ["http", "ws"]);
        assert!(report.is_clean());
        assert_eq!(coord.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_is_aborted_at_deadline() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        coord.spawn("heartbeat", async move { token.cancelled().await });
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        let abort = stuck.abort_handle();
        coord.track("stuck", stuck);

        let report = coord.drain(Some(Duration::from_millis(100))).await;
        assert_eq!(report.stopped, ["heartbeat"]);
        assert_eq!(report.aborted, ["stuck"]);
        for _ in 0..10 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn panicked_task_counts_as_stopped() {
        let coord = ShutdownCoordinator::new();
        coord.spawn("boom", async { panic!("heartbeat bug") });
        let report = coord.drain(Some(Duration::from_secs(5))).await;
        assert_eq!(report.stopped, ["boom"]);
    }
}
