/// Progress stream client: one long-lived server-push channel per
/// analysis run, translated into a running snapshot plus two terminal
/// callbacks.
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use super::events::{AnalysisStatus, ProgressEvent, ProgressSnapshot};
use crate::config::ProgressConfig;

/// What the error callback receives when the channel itself fails,
/// independent of any message content
pub const TRANSPORT_LOST: &str = "Connection lost";

pub struct ProgressCallbacks {
    pub on_complete: Box<dyn FnOnce() + Send>,
    pub on_error: Box<dyn FnOnce(String) + Send>,
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Pause between a `complete` event and the completion callback, so
    /// the final 100% snapshot stays visible
    pub complete_grace: Duration,
    pub detail_window: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            complete_grace: Duration::from_millis(1000),
            detail_window: 5,
        }
    }
}

impl From<&ProgressConfig> for StreamOptions {
    fn from(config: &ProgressConfig) -> Self {
        Self {
            complete_grace: Duration::from_millis(config.complete_grace_ms),
            detail_window: config.detail_window,
        }
    }
}

/// Consumes `GET {base}/progress/{run_id}` until a terminal event,
/// transport failure, or disposal.
///
/// Exactly one of the two callbacks fires per run, and neither fires
/// after `dispose()` returns, even for messages already in flight.
pub struct ProgressStreamClient {
    cancel: CancellationToken,
    snapshot: watch::Receiver<ProgressSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl ProgressStreamClient {
    /// Open the channel for `run_id`. An empty run id opens nothing and
    /// fires nothing.
    pub fn open(
        base_url: &str,
        run_id: &str,
        callbacks: ProgressCallbacks,
        options: StreamOptions,
    ) -> Option<Self> {
        if run_id.is_empty() {
            return None;
        }

        let url = format!(
            "{}/progress/{}",
            base_url.trim_end_matches('/'),
            urlencoding::encode(run_id)
        );
        let cancel = CancellationToken::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(ProgressSnapshot::initial());

        let task = tokio::spawn(run_stream(
            url,
            cancel.clone(),
            snapshot_tx,
            callbacks,
            options,
        ));

        Some(Self {
            cancel,
            snapshot: snapshot_rx,
            task: Some(task),
        })
    }

    /// Subscribe to snapshot updates
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshot.clone()
    }

    /// The snapshot feed as an async sequence; ends when the stream
    /// worker finishes
    pub fn updates(&self) -> WatchStream<ProgressSnapshot> {
        WatchStream::from_changes(self.snapshot.clone())
    }

    /// Stop the stream. Idempotent; local callbacks stop immediately,
    /// remote teardown may complete asynchronously.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    /// Wait for the stream worker to finish (terminal event, transport
    /// failure, or disposal)
    pub async fn wait(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ProgressStreamClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_stream(
    url: String,
    cancel: CancellationToken,
    snapshot_tx: watch::Sender<ProgressSnapshot>,
    callbacks: ProgressCallbacks,
    options: StreamOptions,
) {
    let mut on_complete = Some(callbacks.on_complete);
    let mut on_error = Some(callbacks.on_error);

    // Fire the error callback unless the client was disposed
    let fail = |on_error: &mut Option<Box<dyn FnOnce(String) + Send>>, message: String| {
        if cancel.is_cancelled() {
            return;
        }
        if let Some(cb) = on_error.take() {
            cb(message);
        }
    };

    let client = reqwest::Client::new();

    let res = tokio::select! {
        _ = cancel.cancelled() => return,
        res = client.get(&url).send() => res,
    };

    let res = match res {
        Ok(res) if res.status().is_success() => res,
        Ok(res) => {
            tracing::warn!("Progress channel refused: {}", res.status());
            fail(&mut on_error, TRANSPORT_LOST.to_string());
            return;
        }
        Err(e) => {
            tracing::warn!("Progress channel failed to open: {}", e);
            fail(&mut on_error, TRANSPORT_LOST.to_string());
            return;
        }
    };

    let mut stream = res.bytes_stream();
    use futures::StreamExt;

    let mut buffer = String::new();
    let mut snapshot = ProgressSnapshot::initial();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = stream.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                tracing::warn!("Progress channel broke: {}", e);
                fail(&mut on_error, TRANSPORT_LOST.to_string());
                return;
            }
            // Server closed the channel without a terminal event
            None => {
                tracing::warn!("Progress channel closed before a terminal event");
                fail(&mut on_error, TRANSPORT_LOST.to_string());
                return;
            }
        };

        buffer.push_str(&String::from_utf8_lossy(&bytes));

        // Process complete SSE frames (format: "data: <json>\n\n")
        while let Some(frame_end) = buffer.find("\n\n") {
            let frame = buffer[..frame_end].to_string();
            buffer.drain(..frame_end + 2);

            let Some(data) = frame
                .lines()
                .find_map(|line| line.strip_prefix("data: "))
            else {
                continue;
            };

            let event = match ProgressEvent::parse(data) {
                Ok(event) => event,
                Err(e) => {
                    // Skip and keep the stream open
                    tracing::warn!("Discarding malformed progress payload: {}", e);
                    continue;
                }
            };

            let update = match event {
                ProgressEvent::Keepalive => continue,
                ProgressEvent::Status(update) => update,
            };

            snapshot.apply(&update, options.detail_window);
            snapshot_tx.send_replace(snapshot.clone());

            match update.status {
                AnalysisStatus::Complete => {
                    // Let the 100% state render before reporting done
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(options.complete_grace) => {}
                    }
                    if cancel.is_cancelled() {
                        return;
                    }
                    if let Some(cb) = on_complete.take() {
                        cb();
                    }
                    return;
                }
                AnalysisStatus::Error => {
                    let message = update
                        .message
                        .unwrap_or_else(|| "Analysis failed".to_string());
                    fail(&mut on_error, message);
                    return;
                }
                _ => {}
            }
        }
    }
}
