//! Bounded-concurrency retrieval worker pool and outcome aggregation
//!
//! The [`Retriever`] executes a list of [`RetrievalTask`]s against a
//! [`FetchClient`] with a fixed concurrency ceiling, per-task retry with
//! exponential backoff, and cooperative cancellation. Outcomes are collected
//! into a [`RetrievalSummary`] and appended to a structured run log under
//! the destination root.
//!
//! Cancellation semantics: the token is checked before each task is
//! dispatched and between retry attempts. An in-flight fetch runs to
//! natural completion; tasks not yet dispatched are recorded as Skipped, so
//! a cancelled run still yields a valid partial summary.

use crate::client::{FetchClient, FetchedBytes};
use crate::config::Config;
use crate::error::{Error, FetchError, Result};
use crate::report;
use crate::retry::retry_with_backoff;
use crate::types::{
    Event, OutcomeStatus, RetrievalOutcome, RetrievalSummary, RetrievalTask, SkippedLink,
};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Executes retrieval runs against a fetch client
pub struct Retriever {
    config: Config,
    client: Arc<dyn FetchClient>,
    event_tx: broadcast::Sender<Event>,
    cancel_token: CancellationToken,
}

impl Retriever {
    /// Create a retriever over the given client
    pub fn new(config: Config, client: Arc<dyn FetchClient>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            client,
            event_tx,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Subscribe to pipeline events
    ///
    /// Subscribers that lag behind miss events; the pool never blocks on
    /// event delivery.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops the run when cancelled
    ///
    /// Cancelling stops dispatch of new tasks and interrupts backoff sleeps;
    /// already-in-flight fetches finish or fail on their own.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Emit an event to all subscribers
    ///
    /// send() returns Err when there are no receivers, which is fine, the
    /// event is simply dropped.
    fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Run the pool over the given tasks and persist the run log
    ///
    /// Parse-time skips are carried through into the summary but are not
    /// counted against `total`; conservation (`succeeded + skipped + failed
    /// == total`) holds over dispatched tasks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] when the remote service rejected the
    /// run's authorization; the partial summary is still appended to the run
    /// log before returning. Also fails if the log cannot be written.
    pub async fn run(
        &self,
        tasks: Vec<RetrievalTask>,
        parse_skipped: Vec<SkippedLink>,
    ) -> Result<RetrievalSummary> {
        let started_at = chrono::Utc::now();
        let total = tasks.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let unauthorized = Arc::new(AtomicBool::new(false));

        tracing::info!(
            total = total,
            concurrency = self.config.max_concurrent_fetches,
            "Starting retrieval run"
        );

        let mut outcomes: Vec<RetrievalOutcome> = stream::iter(tasks)
            .map(|task| {
                let completed = completed.clone();
                let unauthorized = unauthorized.clone();
                async move { self.run_task(task, total, completed, unauthorized).await }
            })
            .buffer_unordered(self.config.max_concurrent_fetches)
            .collect()
            .await;

        // Log order is stable regardless of completion order
        outcomes.sort_by(|a, b| a.task.destination.cmp(&b.task.destination));

        let mut summary = RetrievalSummary {
            started_at,
            total,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            parse_skipped,
            details: outcomes,
            cancelled: self.cancel_token.is_cancelled(),
        };
        for outcome in &summary.details {
            match outcome.status {
                OutcomeStatus::Success => summary.succeeded += 1,
                OutcomeStatus::Skipped { .. } => summary.skipped += 1,
                OutcomeStatus::Failed { .. } => summary.failed += 1,
            }
        }

        self.emit_event(Event::RetrievalComplete {
            succeeded: summary.succeeded,
            skipped: summary.skipped,
            failed: summary.failed,
        });

        tracing::info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            bytes = summary.bytes_written(),
            "Retrieval run finished"
        );

        report::append_retrieval_log(&self.config.destination_root, &summary)?;

        if unauthorized.load(Ordering::SeqCst) {
            return Err(Error::Unauthorized);
        }
        Ok(summary)
    }

    async fn run_task(
        &self,
        task: RetrievalTask,
        total: usize,
        completed: Arc<AtomicUsize>,
        unauthorized: Arc<AtomicBool>,
    ) -> RetrievalOutcome {
        // Checked at dispatch time: cancelled or aborted runs stop here,
        // before any network traffic for this task.
        if self.cancel_token.is_cancelled() {
            let status = OutcomeStatus::Skipped {
                reason: "cancelled".to_string(),
            };
            self.emit_event(Event::TaskFinished {
                file_id: task.file_id.clone(),
                target_name: task.target_name.clone(),
                status: status.clone(),
                completed: completed.fetch_add(1, Ordering::SeqCst) + 1,
                total,
            });
            return RetrievalOutcome {
                task,
                status,
                bytes_written: 0,
                elapsed: std::time::Duration::ZERO,
            };
        }

        self.emit_event(Event::TaskStarted {
            file_id: task.file_id.clone(),
            target_name: task.target_name.clone(),
        });

        let start = Instant::now();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_in_op = attempts.clone();
        let client = self.client.clone();
        let file_id = task.file_id.clone();
        let destination = task.destination.clone();

        let result = retry_with_backoff(&self.config.retry, &self.cancel_token, || {
            let client = client.clone();
            let file_id = file_id.clone();
            let destination = destination.clone();
            let attempts = attempts_in_op.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                let fetched = client.fetch(&file_id).await?;
                write_destination(fetched, &destination).await
            }
        })
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        let (status, bytes_written) = match result {
            Ok(bytes) => {
                tracing::debug!(
                    file_id = %task.file_id,
                    target = %task.target_name,
                    bytes = bytes,
                    attempts = attempts,
                    "Task succeeded"
                );
                (OutcomeStatus::Success, bytes)
            }
            Err(e) => {
                if matches!(e, FetchError::Unauthorized) {
                    // Fatal for the whole run: stop dispatching further tasks
                    unauthorized.store(true, Ordering::SeqCst);
                    self.cancel_token.cancel();
                }
                tracing::warn!(
                    file_id = %task.file_id,
                    target = %task.target_name,
                    error = %e,
                    attempts = attempts,
                    "Task failed"
                );
                (
                    OutcomeStatus::Failed {
                        kind: (&e).into(),
                        attempts,
                    },
                    0,
                )
            }
        };

        self.emit_event(Event::TaskFinished {
            file_id: task.file_id.clone(),
            target_name: task.target_name.clone(),
            status: status.clone(),
            completed: completed.fetch_add(1, Ordering::SeqCst) + 1,
            total,
        });

        RetrievalOutcome {
            task,
            status,
            bytes_written,
            elapsed: start.elapsed(),
        }
    }
}

fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Validate and persist one fetched payload
///
/// Empty bodies and size mismatches against the remote-reported length are
/// treated as transient so the retry budget gets a chance to recover a
/// truncated transfer. Bytes land in a `.part` staging file and are renamed
/// into place only when fully written, so the destination never holds a
/// partial object.
async fn write_destination(
    fetched: FetchedBytes,
    destination: &Path,
) -> std::result::Result<u64, FetchError> {
    if fetched.bytes.is_empty() {
        return Err(FetchError::TransientNetwork(
            "empty response body".to_string(),
        ));
    }
    if let Some(expected) = fetched.reported_size
        && expected != fetched.bytes.len() as u64
    {
        return Err(FetchError::TransientNetwork(format!(
            "size mismatch: remote reported {} bytes, received {}",
            expected,
            fetched.bytes.len()
        )));
    }

    let staging = staging_path(destination);
    let written: std::io::Result<()> = async {
        tokio::fs::write(&staging, &fetched.bytes).await?;
        tokio::fs::rename(&staging, destination).await?;
        Ok(())
    }
    .await;

    if let Err(e) = written {
        tokio::fs::remove_file(&staging).await.ok();
        return Err(FetchError::TransientNetwork(format!(
            "write to '{}' failed: {}",
            destination.display(),
            e
        )));
    }
    Ok(fetched.bytes.len() as u64)
}
