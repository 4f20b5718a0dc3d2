//! Run log persistence
//!
//! Both pipelines leave a durable record under the destination root:
//! retrieval and merge runs each append one JSON line to their log, so a
//! crash mid-write can never corrupt earlier entries, and the merge pipeline
//! additionally writes a human-readable list of excluded documents so a user
//! can locate access-protected files and handle them manually.
//!
//! Failed and skipped tasks are logged with their identifier, target name,
//! and reason, which is enough to re-run only the failed subset.

use crate::error::Result;
use crate::types::{MergeSummary, OutcomeStatus, RetrievalSummary, SkippedLink};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Filename of the retrieval run log under the destination root.
pub const RETRIEVAL_LOG_NAME: &str = "retrieval-log.jsonl";

/// Filename of the merge run log under the destination root.
pub const MERGE_LOG_NAME: &str = "merge-log.jsonl";

/// Filename of the human-readable exclusion list under the destination root.
pub const EXCLUDED_LIST_NAME: &str = "excluded-documents.txt";

#[derive(Serialize)]
struct RetrievalLogRecord<'a> {
    started_at: DateTime<Utc>,
    logged_at: DateTime<Utc>,
    total: usize,
    succeeded: usize,
    skipped: usize,
    failed: usize,
    cancelled: bool,
    bytes_written: u64,
    tasks: Vec<TaskRecord>,
    parse_skipped: &'a [SkippedLink],
}

#[derive(Serialize)]
struct TaskRecord {
    file_id: String,
    target_name: String,
    #[serde(flatten)]
    status: OutcomeStatus,
    bytes_written: u64,
    elapsed_ms: u64,
}

/// Append one retrieval run to the run log
///
/// The log line is serialized fully before the write, and the write is an
/// append, never an in-place rewrite.
///
/// # Errors
///
/// Fails when the record cannot be serialized or the log file cannot be
/// opened or written.
pub fn append_retrieval_log(root: &Path, summary: &RetrievalSummary) -> Result<()> {
    let record = RetrievalLogRecord {
        started_at: summary.started_at,
        logged_at: Utc::now(),
        total: summary.total,
        succeeded: summary.succeeded,
        skipped: summary.skipped,
        failed: summary.failed,
        cancelled: summary.cancelled,
        bytes_written: summary.bytes_written(),
        tasks: summary
            .details
            .iter()
            .map(|o| TaskRecord {
                file_id: o.task.file_id.to_string(),
                target_name: o.task.target_name.clone(),
                status: o.status.clone(),
                bytes_written: o.bytes_written,
                elapsed_ms: o.elapsed.as_millis() as u64,
            })
            .collect(),
        parse_skipped: &summary.parse_skipped,
    };

    append_json_line(&root.join(RETRIEVAL_LOG_NAME), &record)
}

/// Append one merge run to the merge log
///
/// # Errors
///
/// Fails when the summary cannot be serialized or the log file cannot be
/// opened or written.
pub fn append_merge_log(root: &Path, summary: &MergeSummary) -> Result<()> {
    append_json_line(&root.join(MERGE_LOG_NAME), summary)
}

/// Write the human-readable list of documents excluded from the merge
///
/// Overwrites the previous list; it reflects the latest run only. The
/// file is omitted entirely when nothing was excluded.
///
/// # Errors
///
/// Fails when the list cannot be written.
pub fn write_excluded_list(root: &Path, summary: &MergeSummary) -> Result<()> {
    let excluded: Vec<_> = summary.details.iter().filter(|d| !d.included).collect();
    let path = root.join(EXCLUDED_LIST_NAME);
    if excluded.is_empty() {
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        return Ok(());
    }

    let mut content = format!(
        "Documents excluded from {} ({} of {} inputs):\n\n",
        summary.output_path.display(),
        excluded.len(),
        summary.total_inputs
    );
    for detail in excluded {
        let reason = detail.reason.as_deref().unwrap_or("excluded");
        content.push_str(&format!("{}\n    {}\n", detail.path.display(), reason));
    }

    std::fs::write(&path, content)?;
    tracing::debug!(path = %path.display(), "Wrote exclusion list");
    Ok(())
}

fn append_json_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    // Serialize first so a failed serialization never touches the log
    let line = serde_json::to_string(record)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", line)?;
    tracing::debug!(path = %path.display(), "Appended run log entry");
    Ok(())
}
