//! HTTP polling of the results endpoint while the socket is unhealthy.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tally_core::{ClientStatus, ResultSnapshot};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

/// Where polled results come from.
#[async_trait]
pub trait ResultsSource: Send + Sync + 'static {
    async fn fetch(&self) -> Result<ResultSnapshot>;
}

/// `GET {base}/api/voting/results` through `reqwest`.
pub struct HttpResultsSource {
    http: reqwest::Client,
    url: String,
}

impl HttpResultsSource {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            url: format!("{}/api/voting/results", base_url.trim_end_matches('/')),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Deserialize)]
struct ResultsBody {
    #[serde(default)]
    success: bool,
    results: Option<ResultSnapshot>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[async_trait]
impl ResultsSource for HttpResultsSource {
    async fn fetch(&self) -> Result<ResultSnapshot> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;
        let status = resp.status();
        let body: ResultsBody = resp
            .json()
            .await
            .map_err(|e| ClientError::Http(format!("{status}: {e}")))?;
        match body {
            ResultsBody {
                success: true,
                results: Some(results),
                ..
            } => Ok(results),
            ResultsBody { error, .. } => Err(ClientError::Http(
                error.map_or_else(|| status.to_string(), |e| e.message),
            )),
        }
    }
}

/// Polls a [`ResultsSource`] every `interval` while the client status says
/// the socket cannot be relied on.
pub struct FallbackPoller<S> {
    source: S,
    interval: Duration,
}

impl<S: ResultsSource> FallbackPoller<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Run until `cancel` fires, the status sender is dropped, or `sink`
    /// is closed.
    ///
    /// The first poll comes one interval after fallback begins; returning to
    /// `connected` stops polling immediately.
    pub async fn run(
        self,
        mut status: watch::Receiver<ClientStatus>,
        sink: mpsc::Sender<ResultSnapshot>,
        cancel: CancellationToken,
    ) {
        let mut ticker: Option<Interval> = None;
        loop {
            let needed = status.borrow_and_update().needs_fallback();
            if needed && ticker.is_none() {
                info!(interval_ms = self.interval.as_millis() as u64, "starting fallback polling");
                let mut t = time::interval_at(Instant::now() + self.interval, self.interval);
                t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker = Some(t);
            } else if !needed && ticker.take().is_some() {
                info!("socket healthy, fallback polling stopped");
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                changed = status.changed() => {
                    if changed.is_err() {
                        debug!("client gone, fallback poller exiting");
                        return;
                    }
                }
                () = next_tick(&mut ticker) => {
                    if !self.poll_once(&sink).await {
                        return;
                    }
                }
            }
        }
    }

    async fn poll_once(&self, sink: &mpsc::Sender<ResultSnapshot>) -> bool {
        match self.source.fetch().await {
            Ok(snapshot) => {
                debug!(total_votes = snapshot.total_votes, "fallback poll");
                sink.send(snapshot).await.is_ok()
            }
            Err(e) => {
                warn!(error = %e, "fallback poll failed");
                true
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            let _ = t.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tally_core::ConnectionState;

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl ResultsSource for Counting {
        async fn fetch(&self) -> Result<ResultSnapshot> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            if self.fail {
                return Err(ClientError::Http("503".into()));
            }
            Ok(ResultSnapshot::from_counts(vec![(1, "A".into(), n)]))
        }
    }

    fn status(state: ConnectionState, attempts: u32) -> ClientStatus {
        ClientStatus {
            state,
            reconnect_attempts: attempts,
            ..ClientStatus::new(5)
        }
    }

    struct Harness {
        calls: Arc<AtomicUsize>,
        status: watch::Sender<ClientStatus>,
        rx: mpsc::Receiver<ResultSnapshot>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(initial: ClientStatus, fail: bool) -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let (status_tx, status_rx) = watch::channel(initial);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let poller = FallbackPoller::new(
            Counting {
                calls: calls.clone(),
                fail,
            },
            Duration::from_secs(5),
        );
        let task = tokio::spawn(poller.run(status_rx, tx, cancel.clone()));
        Harness {
            calls,
            status: status_tx,
            rx,
            cancel,
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_while_connected() {
        let h = start(status(ConnectionState::Connected, 0), false);
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn polls_every_interval_while_failed() {
        let mut h = start(status(ConnectionState::Failed, 5), false);
        time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);

        let first = h.rx.recv().await.unwrap();
        assert_eq!(first.total_votes, 1);
        let second = h.rx.recv().await.unwrap();
        assert_eq!(second.total_votes, 2);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn first_reconnect_wait_is_grace_period() {
        let h = start(status(ConnectionState::Reconnecting, 0), false);
        time::sleep(Duration::from_secs(12)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);

        h.status.send_replace(status(ConnectionState::Reconnecting, 1));
        time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_connected_again() {
        let mut h = start(status(ConnectionState::Disconnected, 0), false);
        let _ = h.rx.recv().await.unwrap();
        h.status.send_replace(status(ConnectionState::Connected, 0));
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn errors_do_not_stop_polling() {
        let h = start(status(ConnectionState::Failed, 5), true);
        time::sleep(Duration::from_millis(15_100)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exits_when_status_sender_dropped() {
        let h = start(status(ConnectionState::Connected, 0), false);
        drop(h.status);
        h.task.await.unwrap();
    }

    #[test]
    fn http_source_url() {
        assert_eq!(
            HttpResultsSource::new("http://127.0.0.1:3000/").url(),
            "http://127.0.0.1:3000/api/voting/results"
        );
    }
}
