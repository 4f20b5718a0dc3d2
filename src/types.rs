//! Core types and events for docbatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::FetchError;

/// Opaque identifier naming a remote object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    /// Create a new FileId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FileId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of retrieval work: one remote object to fetch
///
/// Immutable once produced by the link source reader. Destination paths are
/// unique across a run; the collision rule in
/// [`source::build_tasks`](crate::source::build_tasks) guarantees it at
/// construction time, so no two workers ever write the same path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrievalTask {
    /// Remote object identifier
    pub file_id: FileId,
    /// Destination filename (sanitized, disambiguated)
    pub target_name: String,
    /// Absolute destination path
    pub destination: PathBuf,
}

/// Permanent failure classification recorded in outcomes and run logs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Remote object does not exist
    NotFound,
    /// Remote service denied access
    PermissionDenied,
    /// Retry budget exhausted while rate limited
    RateLimited,
    /// Retry budget exhausted on transient network failures
    TransientNetwork,
    /// Authorization rejected (fatal to the run)
    Unauthorized,
}

impl From<&FetchError> for FailureKind {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::NotFound => FailureKind::NotFound,
            FetchError::PermissionDenied => FailureKind::PermissionDenied,
            FetchError::RateLimited => FailureKind::RateLimited,
            FetchError::TransientNetwork(_) => FailureKind::TransientNetwork,
            FetchError::Unauthorized => FailureKind::Unauthorized,
        }
    }
}

/// Terminal status of one retrieval task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Bytes fully written to the destination path
    Success,
    /// Task was never attempted (e.g., run cancelled before dispatch)
    Skipped {
        /// Why the task was skipped
        reason: String,
    },
    /// Task failed after the recorded number of attempts
    Failed {
        /// Failure classification
        kind: FailureKind,
        /// Attempts made before giving up
        attempts: u32,
    },
}

impl OutcomeStatus {
    /// Short reason string for run logs
    pub fn reason(&self) -> String {
        match self {
            OutcomeStatus::Success => String::new(),
            OutcomeStatus::Skipped { reason } => reason.clone(),
            OutcomeStatus::Failed { kind, attempts } => {
                format!("{kind:?} after {attempts} attempt(s)")
            }
        }
    }
}

/// Terminal result of one retrieval task: owned by the aggregator once produced
#[derive(Clone, Debug)]
pub struct RetrievalOutcome {
    /// The task this outcome belongs to
    pub task: RetrievalTask,
    /// Terminal status
    pub status: OutcomeStatus,
    /// Bytes written to the destination (0 unless Success)
    pub bytes_written: u64,
    /// Wall-clock time spent on the task, including retries
    pub elapsed: Duration,
}

/// Classification of one document candidate, frozen at enumeration time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    /// Structurally valid, openable without a key
    Mergeable {
        /// Page count at enumeration time
        pages: usize,
    },
    /// Structurally valid but gated behind a protection key
    AccessProtected,
    /// Not a parseable document
    Invalid {
        /// Why the document was rejected
        reason: String,
    },
}

impl Classification {
    /// True for candidates that enter the consolidation plan
    pub fn is_mergeable(&self) -> bool {
        matches!(self, Classification::Mergeable { .. })
    }
}

/// One document considered for merging
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentCandidate {
    /// Absolute path of the candidate
    pub path: PathBuf,
    /// Size on disk at enumeration time
    pub size_bytes: u64,
    /// Frozen classification: never re-derived mid-merge
    pub classification: Classification,
}

/// Ordered sequence of mergeable candidates
///
/// Order is authoritative: lexicographic path order when enumerated from a
/// folder, caller-supplied order for explicit lists. The plan is frozen
/// before consolidation begins so the merge order and skip list are
/// reproducible for a given input set.
#[derive(Clone, Debug, Default)]
pub struct ConsolidationPlan {
    /// Mergeable inputs in merge order
    pub inputs: Vec<DocumentCandidate>,
}

impl ConsolidationPlan {
    /// Build a plan from classified candidates, keeping only mergeable ones
    /// in their original order
    pub fn from_candidates(candidates: &[DocumentCandidate]) -> Self {
        Self {
            inputs: candidates
                .iter()
                .filter(|c| c.classification.is_mergeable())
                .cloned()
                .collect(),
        }
    }

    /// Sum of the planned inputs' page counts
    pub fn expected_pages(&self) -> usize {
        self.inputs
            .iter()
            .map(|c| match c.classification {
                Classification::Mergeable { pages } => pages,
                _ => 0,
            })
            .sum()
    }

    /// Number of planned inputs
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// True when no candidate survived classification
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// A link that was rejected at parse time and never became a task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLink {
    /// Display name of the row the link came from
    pub display_name: String,
    /// The raw link text
    pub link: String,
    /// Why it was rejected (malformed, duplicate, ...)
    pub reason: String,
}

/// Aggregate report of one retrieval run
///
/// Append-only while the run progresses; finalized once after the last
/// worker completes. Conservation invariant: `succeeded + skipped + failed`
/// always equals `total`, and `total` equals the number of tasks the link
/// source reader produced.
#[derive(Clone, Debug)]
pub struct RetrievalSummary {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Number of tasks dispatched to the pool
    pub total: usize,
    /// Tasks whose bytes were fully written
    pub succeeded: usize,
    /// Tasks never attempted (cancellation)
    pub skipped: usize,
    /// Tasks that failed permanently or exhausted their retry budget
    pub failed: usize,
    /// Links rejected before task construction (not counted in `total`)
    pub parse_skipped: Vec<SkippedLink>,
    /// Per-task outcomes, ordered by destination path
    pub details: Vec<RetrievalOutcome>,
    /// True when the run was cancelled before all tasks dispatched
    pub cancelled: bool,
}

impl RetrievalSummary {
    /// Total bytes written by successful tasks
    pub fn bytes_written(&self) -> u64 {
        self.details.iter().map(|o| o.bytes_written).sum()
    }
}

/// Per-input record in a merge summary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeDetail {
    /// Input path
    pub path: PathBuf,
    /// Classification frozen at enumeration time
    pub classification: Classification,
    /// Whether the input's pages are in the output
    pub included: bool,
    /// Pages contributed to the output (0 unless included)
    pub pages: usize,
    /// Exclusion reason, when not included
    pub reason: Option<String>,
}

/// Aggregate report of one consolidation run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeSummary {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Path the consolidated document was published to
    pub output_path: PathBuf,
    /// Number of candidates considered
    pub total_inputs: usize,
    /// Inputs whose pages are in the output
    pub merged: usize,
    /// Inputs skipped as access-protected
    pub skipped_protected: usize,
    /// Inputs skipped as structurally invalid
    pub skipped_invalid: usize,
    /// Inputs that failed to open at merge time despite earlier classification
    pub late_failures: usize,
    /// Page count of the output: checked against the sum of merged inputs
    pub total_pages: usize,
    /// Per-input records in plan order
    pub details: Vec<MergeDetail>,
}

/// Event emitted during pipeline execution
///
/// Consumed by the (external) front-end to render running counts. The core
/// never blocks on event delivery; events to lagging or absent subscribers
/// are dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A retrieval task was dispatched to a worker
    TaskStarted {
        /// Remote object identifier
        file_id: FileId,
        /// Destination filename
        target_name: String,
    },

    /// A retrieval task reached a terminal status
    TaskFinished {
        /// Remote object identifier
        file_id: FileId,
        /// Destination filename
        target_name: String,
        /// Terminal status
        status: OutcomeStatus,
        /// Tasks finished so far
        completed: usize,
        /// Tasks in the run
        total: usize,
    },

    /// The retrieval run finished (normally or by cancellation)
    RetrievalComplete {
        /// Count of successful tasks
        succeeded: usize,
        /// Count of skipped tasks
        skipped: usize,
        /// Count of failed tasks
        failed: usize,
    },

    /// The consolidation engine is processing one input
    MergeStep {
        /// 1-based position in the plan
        index: usize,
        /// Plan length
        total: usize,
        /// Input path
        path: PathBuf,
    },

    /// The consolidation run finished and the output was published
    MergeComplete {
        /// Inputs merged into the output
        merged: usize,
        /// Output page count
        total_pages: usize,
        /// Published output path
        output_path: PathBuf,
    },
}
