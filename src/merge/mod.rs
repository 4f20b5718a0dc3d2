//! Document enumeration and consolidation
//!
//! The merge pipeline has two stages. [`enumerator`] walks a folder (or an
//! explicit ordered file list) and classifies every candidate as mergeable,
//! access-protected, or invalid; the classification is frozen into a
//! [`ConsolidationPlan`](crate::types::ConsolidationPlan) before any page is
//! touched. [`engine`] then appends the page sequence of each planned input
//! into one output document, skipping inputs that fail late without
//! aborting the run.

pub mod engine;
pub mod enumerator;

pub use engine::Consolidator;
pub use enumerator::{classify, enumerate_files, enumerate_folder};
