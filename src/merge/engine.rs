//! Consolidation engine
//!
//! Builds one output document by appending the page sequence of every
//! planned input, in plan order. Inputs that fail to open at merge time
//! despite earlier classification are recorded as late failures and
//! skipped, never aborting the loop. The output is assembled in a staging
//! file and atomically renamed into place, so the final path never holds a
//! partially written document.
//!
//! Consolidation is strictly single-threaded: page appends into one
//! document have no safe concurrent ordering.

use crate::error::{Error, Result};
use crate::report;
use crate::types::{
    Classification, ConsolidationPlan, DocumentCandidate, Event, MergeDetail, MergeSummary,
};
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Outcome of one planned input inside the merge loop.
enum InputResult {
    Merged { pages: usize },
    LateFailure { reason: String },
}

/// Single-threaded consolidation engine
pub struct Consolidator {
    event_tx: broadcast::Sender<Event>,
}

impl Default for Consolidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Consolidator {
    /// Create a consolidator
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { event_tx }
    }

    /// Subscribe to merge progress events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Consolidate classified candidates into one output document
    ///
    /// The plan is derived from the frozen classifications: only Mergeable
    /// candidates enter the page loop, in their given order. On success the
    /// merge summary and the human-readable exclusion list are persisted
    /// next to the output document.
    ///
    /// # Errors
    ///
    /// Fails when not a single page could be merged, when the assembled
    /// output's page count does not equal the sum of the merged inputs'
    /// page counts, or when the output cannot be written.
    pub fn consolidate(
        &self,
        candidates: &[DocumentCandidate],
        output_path: &Path,
    ) -> Result<MergeSummary> {
        let started_at = chrono::Utc::now();
        let plan = ConsolidationPlan::from_candidates(candidates);

        tracing::info!(
            inputs = candidates.len(),
            planned = plan.len(),
            output = %output_path.display(),
            "Starting consolidation"
        );

        let mut max_id = 1u32;
        let mut merged_pages: Vec<(ObjectId, Object)> = Vec::new();
        let mut collected_objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
        // Indexed by plan position: an explicit list may name the same path
        // more than once, and each entry gets its own result
        let mut input_results: Vec<InputResult> = Vec::with_capacity(plan.len());

        for (index, input) in plan.inputs.iter().enumerate() {
            self.emit_event(Event::MergeStep {
                index: index + 1,
                total: plan.len(),
                path: input.path.clone(),
            });

            // Inputs can vanish or change between classification and merge;
            // re-check on open and skip instead of aborting
            let mut doc = match Document::load(&input.path) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(path = %input.path.display(), error = %e, "Input failed to open at merge time");
                    input_results.push(InputResult::LateFailure {
                        reason: format!("failed to open at merge time: {e}"),
                    });
                    continue;
                }
            };
            if doc.is_encrypted() {
                tracing::warn!(path = %input.path.display(), "Input became access protected");
                input_results.push(InputResult::LateFailure {
                    reason: "became access protected before merge".to_string(),
                });
                continue;
            }

            doc.renumber_objects_with(max_id);
            max_id = doc.max_id + 1;

            let pages = doc.get_pages();
            let page_count = pages.len();
            for (_number, object_id) in pages {
                if let Ok(object) = doc.get_object(object_id) {
                    merged_pages.push((object_id, object.to_owned()));
                }
            }
            collected_objects.extend(doc.objects);
            input_results.push(InputResult::Merged { pages: page_count });
        }

        let expected_pages: usize = input_results
            .iter()
            .map(|r| match r {
                InputResult::Merged { pages } => *pages,
                InputResult::LateFailure { .. } => 0,
            })
            .sum();
        if expected_pages == 0 {
            tracing::error!("No pages could be merged from any input");
            return Err(Error::NoPagesMerged);
        }

        let document = build_output(merged_pages, collected_objects, output_path)?;
        let summary = self.publish(
            document,
            candidates,
            &input_results,
            expected_pages,
            output_path,
            started_at,
        )?;

        Ok(summary)
    }

    /// Verify the page-count invariant, publish the staged output, and
    /// persist the run records.
    fn publish(
        &self,
        mut document: Document,
        candidates: &[DocumentCandidate],
        input_results: &[InputResult],
        expected_pages: usize,
        output_path: &Path,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<MergeSummary> {
        let actual_pages = document.get_pages().len();
        if actual_pages != expected_pages {
            return Err(Error::PageCountMismatch {
                expected: expected_pages,
                actual: actual_pages,
            });
        }

        let staging = staging_path(output_path);
        if let Err(e) = document.save(&staging) {
            std::fs::remove_file(&staging).ok();
            return Err(Error::Io(std::io::Error::other(e.to_string())));
        }
        std::fs::rename(&staging, output_path)?;

        let mut summary = MergeSummary {
            started_at,
            output_path: output_path.to_path_buf(),
            total_inputs: candidates.len(),
            merged: 0,
            skipped_protected: 0,
            skipped_invalid: 0,
            late_failures: 0,
            total_pages: expected_pages,
            details: Vec::with_capacity(candidates.len()),
        };

        // Mergeable candidates enter the plan in candidate order, so walking
        // the results in lockstep matches each plan entry to its candidate
        let mut plan_results = input_results.iter();
        for candidate in candidates {
            let detail = match &candidate.classification {
                Classification::AccessProtected => {
                    summary.skipped_protected += 1;
                    MergeDetail {
                        path: candidate.path.clone(),
                        classification: candidate.classification.clone(),
                        included: false,
                        pages: 0,
                        reason: Some("access protected".to_string()),
                    }
                }
                Classification::Invalid { reason } => {
                    summary.skipped_invalid += 1;
                    MergeDetail {
                        path: candidate.path.clone(),
                        classification: candidate.classification.clone(),
                        included: false,
                        pages: 0,
                        reason: Some(format!("invalid: {reason}")),
                    }
                }
                Classification::Mergeable { .. } => match plan_results.next() {
                    Some(InputResult::Merged { pages }) => {
                        summary.merged += 1;
                        MergeDetail {
                            path: candidate.path.clone(),
                            classification: candidate.classification.clone(),
                            included: true,
                            pages: *pages,
                            reason: None,
                        }
                    }
                    Some(InputResult::LateFailure { reason }) => {
                        summary.late_failures += 1;
                        MergeDetail {
                            path: candidate.path.clone(),
                            classification: candidate.classification.clone(),
                            included: false,
                            pages: 0,
                            reason: Some(reason.clone()),
                        }
                    }
                    None => {
                        summary.late_failures += 1;
                        MergeDetail {
                            path: candidate.path.clone(),
                            classification: candidate.classification.clone(),
                            included: false,
                            pages: 0,
                            reason: Some("never reached the merge loop".to_string()),
                        }
                    }
                },
            };
            summary.details.push(detail);
        }

        // The output is already renamed into place; a failed record write
        // must not turn a published merge into an error
        let log_root = output_path.parent().unwrap_or_else(|| Path::new("."));
        if let Err(e) = report::append_merge_log(log_root, &summary) {
            tracing::warn!(error = %e, "Failed to append merge log for published output");
        }
        if let Err(e) = report::write_excluded_list(log_root, &summary) {
            tracing::warn!(error = %e, "Failed to write exclusion list for published output");
        }

        self.emit_event(Event::MergeComplete {
            merged: summary.merged,
            total_pages: summary.total_pages,
            output_path: summary.output_path.clone(),
        });
        tracing::info!(
            merged = summary.merged,
            skipped_protected = summary.skipped_protected,
            skipped_invalid = summary.skipped_invalid,
            late_failures = summary.late_failures,
            total_pages = summary.total_pages,
            output = %output_path.display(),
            "Consolidation finished"
        );
        Ok(summary)
    }
}

/// Assemble the output document from the collected pages and objects
///
/// Pages keep their collection order, which is plan order, so the output's
/// page sequence is the concatenation of each input's pages unreordered.
fn build_output(
    merged_pages: Vec<(ObjectId, Object)>,
    collected_objects: BTreeMap<ObjectId, Object>,
    output_path: &Path,
) -> Result<Document> {
    let mut document = Document::with_version("1.5");

    let mut pages_root: Option<(ObjectId, lopdf::Dictionary)> = None;
    let mut catalog_root: Option<(ObjectId, lopdf::Dictionary)> = None;

    for (object_id, object) in collected_objects {
        match object.type_name().unwrap_or("") {
            "Catalog" => {
                if catalog_root.is_none()
                    && let Ok(dict) = object.as_dict()
                {
                    catalog_root = Some((object_id, dict.clone()));
                }
            }
            "Pages" => {
                if let Ok(dict) = object.as_dict() {
                    // Fold every source page tree root into one dictionary,
                    // keeping the first root's identity
                    match pages_root.as_mut() {
                        Some((_, merged_dict)) => merged_dict.extend(dict),
                        None => pages_root = Some((object_id, dict.clone())),
                    }
                }
            }
            // Page objects are re-inserted below with a fixed parent;
            // outlines are dropped, the output carries no bookmarks
            "Page" | "Outlines" | "Outline" => {}
            _ => {
                document.objects.insert(object_id, object);
            }
        }
    }

    let tree_error = |reason: &str| Error::PageTree {
        path: output_path.to_path_buf(),
        reason: reason.to_string(),
    };
    let (pages_id, mut pages_dict) = pages_root.ok_or_else(|| tree_error("no page tree root found"))?;
    let (catalog_id, mut catalog_dict) =
        catalog_root.ok_or_else(|| tree_error("no catalog found"))?;

    for (object_id, object) in &merged_pages {
        if let Ok(dict) = object.as_dict() {
            let mut dict = dict.clone();
            dict.set("Parent", pages_id);
            document.objects.insert(*object_id, Object::Dictionary(dict));
        }
    }

    pages_dict.set("Count", merged_pages.len() as u32);
    pages_dict.set(
        "Kids",
        merged_pages
            .iter()
            .map(|(id, _)| Object::Reference(*id))
            .collect::<Vec<Object>>(),
    );
    document
        .objects
        .insert(pages_id, Object::Dictionary(pages_dict));

    catalog_dict.set("Pages", pages_id);
    catalog_dict.remove(b"Outlines");
    document
        .objects
        .insert(catalog_id, Object::Dictionary(catalog_dict));

    document.trailer.set("Root", catalog_id);
    document.max_id = document.objects.len() as u32;
    document.renumber_objects();
    document.compress();

    Ok(document)
}

fn staging_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".staging");
    output.with_file_name(name)
}
