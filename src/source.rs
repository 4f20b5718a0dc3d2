//! Link source reading and task construction
//!
//! Turns an external record list (rows with a display name and one or more
//! share links) into a deduplicated, order-stable sequence of
//! [`RetrievalTask`]. Malformed links and duplicate object identifiers are
//! reported as parse-time skips instead of being fed to the worker pool.
//!
//! Naming is deterministic: the same input rows always produce the same
//! target filenames, including disambiguation suffixes, so two runs over the
//! same source write to identical paths.

use crate::error::{Error, Result};
use crate::types::{FileId, RetrievalTask, SkippedLink};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

/// One row of the external source: a human-supplied title and the share
/// links embedded in that row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRow {
    /// Human-supplied title, used to derive the target filename
    pub display_name: String,
    /// Share links found in the row, in column order
    pub links: Vec<String>,
}

/// Known share-link shapes, tried in order. Each must capture the object
/// identifier in group 1.
#[allow(clippy::unwrap_used)]
static LINK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"id=([^&]+)",
        r"/file/d/([a-zA-Z0-9_-]+)",
        r"/open\?id=([a-zA-Z0-9_-]+)",
        r"/document/d/([a-zA-Z0-9_-]+)",
        r"/spreadsheets/d/([a-zA-Z0-9_-]+)",
        r"/presentation/d/([a-zA-Z0-9_-]+)",
        r"/u/\d+/file/d/([a-zA-Z0-9_-]+)",
        r"file/d/([a-zA-Z0-9_-]+)/preview",
        r"file/d/([a-zA-Z0-9_-]+)/view",
        r"d/([a-zA-Z0-9_-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Identifiers are opaque but have a known alphabet and minimum length;
/// anything shorter is a path fragment the patterns matched by accident.
#[allow(clippy::unwrap_used)]
static ID_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

const MIN_ID_LEN: usize = 11;

/// Maximum length of a sanitized filename stem.
const MAX_NAME_LEN: usize = 200;

/// Extract the opaque object identifier from a share link
///
/// Returns `None` when no known URL shape matches or the captured
/// identifier does not look like a real one.
pub fn extract_file_id(link: &str) -> Option<FileId> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    for pattern in LINK_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(link)
            && let Some(id) = captures.get(1)
        {
            let id = id.as_str();
            if id.len() >= MIN_ID_LEN && ID_SHAPE.is_match(id) {
                return Some(FileId(id.to_string()));
            }
        }
    }
    None
}

/// Sanitize a human-supplied title into a filesystem-safe filename stem
///
/// Reserved path characters become underscores, control characters are
/// stripped, and the result is capped at 200 characters.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => out.push('_'),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    let trimmed = out.trim();
    let capped: String = trimmed.chars().take(MAX_NAME_LEN).collect();
    capped
}

/// Read link rows from a delimited text file
///
/// Each non-empty line holds a display name followed by one or more links.
/// Fields are separated by tabs, or by commas when the line contains no
/// tab; in comma mode the link list starts at the first field shaped like a
/// URL, so display names may themselves contain commas. Lines starting with
/// `#` are ignored, as are comma-mode lines with no URL-shaped field. A
/// tab-less line that is a single bare link gets an empty display name.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_link_rows(path: &Path) -> Result<Vec<LinkRow>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("cannot read link source '{}': {}", path.display(), e),
        key: Some("link_source".to_string()),
    })?;

    let mut rows = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = if line.contains('\t') {
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            match fields.as_slice() {
                [] => continue,
                [only] => LinkRow {
                    display_name: String::new(),
                    links: vec![(*only).to_string()],
                },
                [name, links @ ..] => LinkRow {
                    display_name: (*name).to_string(),
                    links: links
                        .iter()
                        .filter(|l| !l.is_empty())
                        .map(|l| (*l).to_string())
                        .collect(),
                },
            }
        } else {
            // Display names may contain commas; the link list starts at the
            // first URL-shaped field
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields.iter().position(|f| looks_like_link(f)) {
                Some(split) => LinkRow {
                    display_name: fields[..split].join(", "),
                    links: fields[split..]
                        .iter()
                        .filter(|l| !l.is_empty())
                        .map(|l| (*l).to_string())
                        .collect(),
                },
                None => continue,
            }
        };
        if !row.links.is_empty() {
            rows.push(row);
        }
    }

    tracing::debug!(path = %path.display(), rows = rows.len(), "Read link source");
    Ok(rows)
}

/// Loose URL-shape check used only for field splitting; real validation
/// happens in [`extract_file_id`].
fn looks_like_link(field: &str) -> bool {
    field.contains("://") || field.starts_with("www.")
}

/// Build the retrieval task list from parsed rows
///
/// Rows fan out: every valid link in a row becomes its own task. Duplicate
/// object identifiers keep the first occurrence and skip the rest. Filename
/// collisions within the destination folder are resolved by appending `_2`,
/// `_3`, ... to the stem in encounter order, so naming is reproducible for a
/// given input.
///
/// Returns the task list and the links skipped at parse time.
pub fn build_tasks(
    rows: &[LinkRow],
    destination: &Path,
) -> (Vec<RetrievalTask>, Vec<SkippedLink>) {
    let mut tasks = Vec::new();
    let mut skipped = Vec::new();
    let mut seen_ids: HashSet<FileId> = HashSet::new();
    let mut used_names: HashSet<String> = HashSet::new();

    for (row_index, row) in rows.iter().enumerate() {
        let stem = {
            let s = sanitize_filename(&row.display_name);
            if s.is_empty() {
                format!("file_{}", row_index + 1)
            } else {
                s
            }
        };

        for (link_index, link) in row.links.iter().enumerate() {
            let Some(file_id) = extract_file_id(link) else {
                skipped.push(SkippedLink {
                    display_name: row.display_name.clone(),
                    link: link.clone(),
                    reason: "unrecognized link format".to_string(),
                });
                continue;
            };

            if !seen_ids.insert(file_id.clone()) {
                skipped.push(SkippedLink {
                    display_name: row.display_name.clone(),
                    link: link.clone(),
                    reason: "duplicate of an earlier link".to_string(),
                });
                continue;
            }

            // Second and later links of the same row carry their position
            let positional_stem = if link_index == 0 {
                stem.clone()
            } else {
                format!("{}_{}", stem, link_index + 1)
            };

            let target_name = disambiguate(&positional_stem, &mut used_names);
            let task = RetrievalTask {
                file_id,
                target_name: target_name.clone(),
                destination: destination.join(&target_name),
            };
            tasks.push(task);
        }
    }

    tracing::info!(
        tasks = tasks.len(),
        parse_skipped = skipped.len(),
        "Built retrieval task list"
    );
    (tasks, skipped)
}

/// Pick the first unused `<stem>.pdf` name, appending `_2`, `_3`, ... on
/// collision.
fn disambiguate(stem: &str, used: &mut HashSet<String>) -> String {
    let candidate = format!("{stem}.pdf");
    if used.insert(candidate.clone()) {
        return candidate;
    }
    let mut counter = 2u32;
    loop {
        let candidate = format!("{stem}_{counter}.pdf");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const ID_A: &str = "1aBcDeFgHiJkLmNoP";
    const ID_B: &str = "2qRsTuVwXyZ012345";

    fn row<S: AsRef<str>>(name: &str, links: &[S]) -> LinkRow {
        LinkRow {
            display_name: name.to_string(),
            links: links.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    #[test]
    fn extracts_id_from_known_url_shapes() {
        let cases = [
            format!("https://example.com/file/d/{ID_A}/view?usp=sharing"),
            format!("https://example.com/file/d/{ID_A}/preview"),
            format!("https://example.com/open?id={ID_A}"),
            format!("https://example.com/uc?export=download&id={ID_A}"),
            format!("https://example.com/document/d/{ID_A}/edit"),
            format!("https://example.com/spreadsheets/d/{ID_A}/edit#gid=0"),
            format!("https://example.com/presentation/d/{ID_A}/present"),
            format!("https://example.com/u/0/file/d/{ID_A}/view"),
        ];
        for link in &cases {
            assert_eq!(
                extract_file_id(link),
                Some(FileId(ID_A.to_string())),
                "failed for {link}"
            );
        }
    }

    #[test]
    fn rejects_short_or_malformed_identifiers() {
        assert_eq!(extract_file_id("https://example.com/file/d/short/view"), None);
        assert_eq!(extract_file_id("not a link at all"), None);
        assert_eq!(extract_file_id(""), None);
        assert_eq!(extract_file_id("https://example.com/folder/abc"), None);
    }

    #[test]
    fn sanitize_replaces_reserved_and_strips_control_chars() {
        assert_eq!(sanitize_filename("a/b:c*d?e"), "a_b_c_d_e");
        assert_eq!(sanitize_filename("report\x00\x1fname"), "reportname");
        assert_eq!(sanitize_filename("  spaced  "), "spaced");
        let long = "x".repeat(300);
        assert_eq!(sanitize_filename(&long).chars().count(), 200);
    }

    #[test]
    fn build_tasks_dedups_by_identifier_first_wins() {
        let dest = PathBuf::from("/tmp/out");
        let link = format!("https://example.com/file/d/{ID_A}/view");
        let rows = vec![row("first", &[&link]), row("second", &[&link])];

        let (tasks, skipped) = build_tasks(&rows, &dest);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].target_name, "first.pdf");
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].display_name, "second");
        assert_eq!(skipped[0].reason, "duplicate of an earlier link");
    }

    #[test]
    fn malformed_links_are_skipped_not_dispatched() {
        let dest = PathBuf::from("/tmp/out");
        let rows = vec![row("bad", &["https://example.com/nothing-here"])];

        let (tasks, skipped) = build_tasks(&rows, &dest);
        assert!(tasks.is_empty());
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].reason, "unrecognized link format");
    }

    #[test]
    fn multi_link_rows_fan_out_with_positional_names() {
        let dest = PathBuf::from("/tmp/out");
        let link_a = format!("https://example.com/file/d/{ID_A}/view");
        let link_b = format!("https://example.com/file/d/{ID_B}/view");
        let rows = vec![row("bundle", &[&link_a, &link_b])];

        let (tasks, skipped) = build_tasks(&rows, &dest);
        assert!(skipped.is_empty());
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].target_name, "bundle.pdf");
        assert_eq!(tasks[1].target_name, "bundle_2.pdf");
    }

    #[test]
    fn colliding_names_across_rows_get_deterministic_suffixes() {
        let dest = PathBuf::from("/tmp/out");
        let link_a = format!("https://example.com/file/d/{ID_A}/view");
        let link_b = format!("https://example.com/file/d/{ID_B}/view");
        let rows = vec![row("report", &[&link_a]), row("report", &[&link_b])];

        let (first_run, _) = build_tasks(&rows, &dest);
        let (second_run, _) = build_tasks(&rows, &dest);

        assert_eq!(first_run[0].target_name, "report.pdf");
        assert_eq!(first_run[1].target_name, "report_2.pdf");
        // Re-running over the same source yields identical naming
        assert_eq!(first_run, second_run);
    }

    #[test]
    fn destination_paths_are_unique() {
        let dest = PathBuf::from("/tmp/out");
        let link_a = format!("https://example.com/file/d/{ID_A}/view");
        let link_b = format!("https://example.com/file/d/{ID_B}/view");
        let rows = vec![row("same", &[&link_a]), row("same", &[&link_b])];

        let (tasks, _) = build_tasks(&rows, &dest);
        let paths: HashSet<_> = tasks.iter().map(|t| &t.destination).collect();
        assert_eq!(paths.len(), tasks.len());
    }

    #[test]
    fn three_row_source_with_fan_out_yields_four_distinct_tasks() {
        let dest = PathBuf::from("/tmp/out");
        let id_c1 = "3cccccccccccccc1";
        let id_c2 = "3cccccccccccccc2";
        let rows = vec![
            row("Row A", &[&format!("https://example.com/file/d/{ID_A}/view")]),
            row("Row B", &[&format!("https://example.com/file/d/{ID_B}/view")]),
            row(
                "Row C",
                &[
                    &format!("https://example.com/file/d/{id_c1}/view"),
                    &format!("https://example.com/file/d/{id_c2}/view"),
                ],
            ),
        ];

        let (tasks, skipped) = build_tasks(&rows, &dest);
        assert!(skipped.is_empty());
        assert_eq!(tasks.len(), 4);

        let names: Vec<_> = tasks.iter().map(|t| t.target_name.as_str()).collect();
        assert_eq!(names, vec!["Row A.pdf", "Row B.pdf", "Row C.pdf", "Row C_2.pdf"]);
    }

    #[test]
    fn nameless_rows_fall_back_to_indexed_stems() {
        let dest = PathBuf::from("/tmp/out");
        let link = format!("https://example.com/file/d/{ID_A}/view");
        let rows = vec![row("", &[&link])];

        let (tasks, _) = build_tasks(&rows, &dest);
        assert_eq!(tasks[0].target_name, "file_1.pdf");
    }

    #[test]
    fn read_link_rows_parses_tab_and_comma_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.txt");
        std::fs::write(
            &path,
            "# header comment\n\
             Alpha Report\thttps://example.com/file/d/1aBcDeFgHiJkLmNoP/view\n\
             Beta,https://example.com/open?id=2qRsTuVwXyZ012345\n\
             \n\
             https://example.com/file/d/3zzzzzzzzzzzzzzzz/view\n",
        )
        .unwrap();

        let rows = read_link_rows(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].display_name, "Alpha Report");
        assert_eq!(rows[1].display_name, "Beta");
        assert_eq!(rows[2].display_name, "");
        assert_eq!(rows[2].links.len(), 1);
    }

    #[test]
    fn comma_mode_keeps_commas_inside_display_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.txt");
        std::fs::write(
            &path,
            "Smith, John - Q3 scans,https://example.com/file/d/1aBcDeFgHiJkLmNoP/view\n\
             a note with, commas but no link\n",
        )
        .unwrap();

        let rows = read_link_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].display_name, "Smith, John - Q3 scans");
        assert_eq!(rows[0].links.len(), 1);
    }

    #[test]
    fn read_link_rows_missing_file_is_config_error() {
        let err = read_link_rows(Path::new("/nonexistent/links.txt")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
