//! Error types for docbatch
//!
//! This module provides error handling for the library, including:
//! - The fatal/per-item taxonomy used by both pipelines
//! - The five-way remote fetch error classification ([`FetchError`])
//!
//! Fatal errors (`Config`, `Unauthorized`, engine invariant violations) abort
//! a run and surface to the caller. Per-item errors are converted into
//! recorded outcomes by the pipelines and never interrupt sibling items:
//! failed fetches become Failed task outcomes, and unparseable or protected
//! documents become frozen classifications, not errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for docbatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for docbatch
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "destination_root")
        key: Option<String>,
    },

    /// Authorization rejected by the remote service: fatal to the whole run
    #[error("authorization rejected by the remote service")]
    Unauthorized,

    /// Remote fetch error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Page tree of the assembled output could not be built
    #[error("malformed page tree in {path}: {reason}")]
    PageTree {
        /// The document with the malformed page tree
        path: PathBuf,
        /// Description of the structural problem
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Every input to a merge run was skipped or failed: no output published
    #[error("no pages merged: every input was skipped or failed")]
    NoPagesMerged,

    /// The consolidated document's page count does not equal the sum of its inputs
    #[error("merged page count mismatch: expected {expected} pages, built {actual}")]
    PageCountMismatch {
        /// Sum of the included inputs' page counts
        expected: usize,
        /// Page count of the built document
        actual: usize,
    },
}

/// Remote fetch errors, as classified by a [`FetchClient`](crate::client::FetchClient)
///
/// `RateLimited` and `TransientNetwork` are retried within the configured
/// budget. `NotFound` and `PermissionDenied` are permanent per-task failures.
/// `Unauthorized` is fatal to the whole run and is never retried.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Remote object does not exist
    #[error("object not found")]
    NotFound,

    /// Remote service denied access to the object
    #[error("permission denied by the remote service")]
    PermissionDenied,

    /// Remote service is throttling requests
    #[error("rate limited by the remote service")]
    RateLimited,

    /// Transient network failure (timeout, connection reset, server error)
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Authorization expired or invalid: fatal to the whole run
    #[error("authorization expired or invalid")]
    Unauthorized,
}
