//! # docbatch
//!
//! Backend library for bulk document retrieval and consolidation.
//!
//! ## Design Philosophy
//!
//! docbatch is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Deterministic** - The same input rows produce the same filenames,
//!   and the same consolidation plan produces the same page sequence
//! - **Sensible defaults** - Works out of the box with zero configuration
//!
//! Two independent pipelines are provided. Retrieval turns a list of share
//! links into files on disk through a bounded-concurrency worker pool with
//! per-task retry. Consolidation classifies the documents in a folder and
//! appends every mergeable one into a single output document. The pipelines
//! share no state; composing them is up to the embedding application.
//!
//! ## Quick Start
//!
//! ```no_run
//! use docbatch::{Config, Consolidator, HttpFetchClient, Retriever};
//! use docbatch::merge::enumerate_folder;
//! use docbatch::source::{build_tasks, read_link_rows};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let rows = read_link_rows(Path::new("links.txt"))?;
//!     let (tasks, parse_skipped) = build_tasks(&rows, &config.destination_root);
//!
//!     let client = Arc::new(HttpFetchClient::new("https://objects.example.com/get")?);
//!     let destination = config.destination_root.clone();
//!     let retriever = Retriever::new(config, client);
//!
//!     // Subscribe to events
//!     let mut events = retriever.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = retriever.run(tasks, parse_skipped).await?;
//!     println!("Retrieved {} of {} files", summary.succeeded, summary.total);
//!
//!     let candidates = enumerate_folder(&destination)?;
//!     let merged = Consolidator::new().consolidate(&candidates, &destination.join("merged.pdf"))?;
//!     println!("Merged {} pages", merged.total_pages);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Remote object fetch client
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Document enumeration and consolidation
pub mod merge;
/// Run log persistence
pub mod report;
/// Retrieval worker pool
pub mod retrieval;
/// Retry logic with exponential backoff
pub mod retry;
/// Link source reading and task construction
pub mod source;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use client::{FetchClient, FetchedBytes, HttpFetchClient};
pub use config::{Config, RetryConfig};
pub use error::{Error, FetchError, Result};
pub use merge::{Consolidator, classify, enumerate_files, enumerate_folder};
pub use retrieval::Retriever;
pub use source::LinkRow;
pub use types::{
    Classification, ConsolidationPlan, DocumentCandidate, Event, FailureKind, FileId,
    MergeSummary, OutcomeStatus, RetrievalOutcome, RetrievalSummary, RetrievalTask, SkippedLink,
};

/// Cancel the given token when the process receives a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Intended to be wired to a [`Retriever`]'s cancellation token so a user
/// can stop a run within one retry-backoff interval:
///
/// ```no_run
/// use docbatch::{Config, HttpFetchClient, Retriever, cancel_on_signal};
/// use std::sync::Arc;
///
/// # async fn example(tasks: Vec<docbatch::RetrievalTask>) -> Result<(), Box<dyn std::error::Error>> {
/// let client = Arc::new(HttpFetchClient::new("https://objects.example.com/get")?);
/// let retriever = Retriever::new(Config::default(), client);
/// tokio::spawn(cancel_on_signal(retriever.cancellation_token()));
/// let summary = retriever.run(tasks, Vec::new()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn cancel_on_signal(token: tokio_util::sync::CancellationToken) {
    wait_for_signal().await;
    token.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
