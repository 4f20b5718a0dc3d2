//! Candidate discovery and classification
//!
//! Classification opens each candidate's structural header without ever
//! requiring (or guessing) its protection key: a file that does not parse is
//! Invalid, one that parses but is protection-gated is AccessProtected,
//! everything else is Mergeable with its page count recorded. The result is
//! frozen before consolidation begins.

use crate::error::{Error, Result};
use crate::types::{Classification, DocumentCandidate};
use lopdf::Document;
use std::path::{Path, PathBuf};

/// Enumerate and classify every document in a folder
///
/// Only `.pdf` files (case-insensitive) are considered. Candidates are
/// returned in lexicographic path order, which is also the merge order for
/// folder-driven runs.
///
/// # Errors
///
/// Fails when the folder cannot be read. Unreadable or invalid individual
/// files never fail enumeration; they come back classified as Invalid.
pub fn enumerate_folder(folder: &Path) -> Result<Vec<DocumentCandidate>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(folder)
        .map_err(|e| Error::Config {
            message: format!("cannot read input folder '{}': {}", folder.display(), e),
            key: None,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    paths.sort();

    tracing::debug!(folder = %folder.display(), candidates = paths.len(), "Enumerated input folder");
    Ok(paths.iter().map(|p| classify(p)).collect())
}

/// Classify an explicit ordered file list
///
/// The caller's order is authoritative and preserved verbatim. Paths that do
/// not exist are classified Invalid rather than rejected.
pub fn enumerate_files(paths: &[PathBuf]) -> Vec<DocumentCandidate> {
    paths.iter().map(|p| classify(p)).collect()
}

/// Classify a single candidate document
pub fn classify(path: &Path) -> DocumentCandidate {
    let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    let classification = match Document::load(path) {
        Ok(doc) => {
            if doc.is_encrypted() {
                Classification::AccessProtected
            } else {
                let pages = doc.get_pages().len();
                if pages == 0 {
                    Classification::Invalid {
                        reason: "document has no pages".to_string(),
                    }
                } else {
                    Classification::Mergeable { pages }
                }
            }
        }
        Err(e) => {
            let reason = e.to_string();
            // Some loaders surface protection as a parse error; keep those
            // out of the Invalid bucket so the exclusion list stays honest
            if reason.to_ascii_lowercase().contains("encrypt")
                || reason.to_ascii_lowercase().contains("decrypt")
            {
                Classification::AccessProtected
            } else {
                Classification::Invalid { reason }
            }
        }
    };

    tracing::debug!(path = %path.display(), classification = ?classification, "Classified candidate");
    DocumentCandidate {
        path: path.to_path_buf(),
        size_bytes,
        classification,
    }
}
