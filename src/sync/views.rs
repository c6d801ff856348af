use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};

use crate::domain::record::Record;
use crate::files::{is_temp_file_name, write_if_changed};
use crate::layout::{sanitize_file_stem, VaultLayout};
use crate::report::FailedItem;

/// First line of every view this builder writes. Files without it are never
/// touched.
pub const GENERATED_MARKER: &str = "<!-- papermind:generated collection-view -->";

#[derive(Debug, Default)]
pub struct ViewReport {
    pub changed: u64,
    pub failures: Vec<FailedItem>,
}

pub struct CollectionViewBuilder<'a> {
    layout: &'a VaultLayout,
}

impl<'a> CollectionViewBuilder<'a> {
    pub fn new(layout: &'a VaultLayout) -> Self {
        Self { layout }
    }

    /// Regenerates one view per collection, including `known` collections that
    /// currently have no members, then removes generated views for collections
    /// that no longer exist.
    pub fn build(&self, records: &[Record], known: &[String], dry_run: bool) -> ViewReport {
        let mut report = ViewReport::default();
        let dir = self.layout.views_dir();
        if !dry_run {
            if let Err(err) = fs::create_dir_all(&dir) {
                report
                    .failures
                    .push(FailedItem::record_skipped(dir.display().to_string(), err));
                return report;
            }
        }

        let occupied = match hand_written_views(&dir) {
            Ok(names) => names,
            Err(err) => {
                report
                    .failures
                    .push(FailedItem::record_skipped(dir.display().to_string(), err));
                return report;
            }
        };

        let members = membership(records, known);
        let query_root = self.layout.projections_query_root();
        let mut written = BTreeSet::new();
        for (file_name, (collection, count)) in assign_file_names(&members, &occupied) {
            let content = render_view(collection, *count, &query_root);
            let path = dir.join(&file_name);
            match write_if_changed(&path, content.as_bytes(), dry_run) {
                Ok(outcome) => {
                    if outcome.changed() {
                        debug!(collection = %collection, ?outcome, "collection view changed");
                        report.changed += 1;
                    }
                }
                Err(err) => {
                    warn!(collection = %collection, error = %err, "collection view not written");
                    report
                        .failures
                        .push(FailedItem::record_skipped(format!("collection:{}", collection), err));
                }
            }
            written.insert(file_name);
        }

        report.changed += remove_stale_views(&dir, &written, dry_run, &mut report.failures);
        report
    }
}

fn membership<'r>(records: &'r [Record], known: &'r [String]) -> BTreeMap<&'r str, usize> {
    let mut members = BTreeMap::new();
    for name in known {
        let name = name.trim();
        if !name.is_empty() {
            members.entry(name).or_insert(0);
        }
    }
    for record in records {
        let mut seen = BTreeSet::new();
        for name in &record.collections {
            let name = name.trim();
            if !name.is_empty() && seen.insert(name) {
                *members.entry(name).or_insert(0) += 1;
            }
        }
    }
    members
}

/// Lowercased names of Markdown files in `dir` that lack the generated
/// marker. Views are never written over them.
fn hand_written_views(dir: &Path) -> std::io::Result<BTreeSet<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => return Err(err),
    };
    let mut names = BTreeSet::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".md") || is_temp_file_name(&name) {
            continue;
        }
        let path = entry.path();
        if path.exists() && !is_generated_view(&path) {
            names.insert(name.to_lowercase());
        }
    }
    Ok(names)
}

/// Sanitized names can collide (and differ only by case on some
/// filesystems); later collections in sorted order get a numeric suffix,
/// as do collections whose name is held by a hand-written file.
fn assign_file_names<'m>(
    members: &'m BTreeMap<&str, usize>,
    occupied: &BTreeSet<String>,
) -> BTreeMap<String, (&'m str, &'m usize)> {
    let mut taken = occupied.clone();
    let mut assigned = BTreeMap::new();
    for (name, count) in members {
        let stem = sanitize_file_stem(name);
        let mut candidate = format!("{}.md", stem);
        let mut counter = 2;
        while !taken.insert(candidate.to_lowercase()) {
            candidate = format!("{} ({}).md", stem, counter);
            counter += 1;
        }
        assigned.insert(candidate, (*name, count));
    }
    assigned
}

fn render_view(collection: &str, count: usize, query_root: &str) -> String {
    let quoted = collection.replace('\\', "\\\\").replace('"', "\\\"");
    let noun = if count == 1 { "paper" } else { "papers" };
    format!(
        "{marker}\n# {collection}\n\n```dataview\nTABLE\n  file.link as Paper,\n  title as Title\nFROM \"{query_root}\"\nWHERE contains(collections, \"{quoted}\")\nSORT title ASC\n```\n\n*{count} {noun} in this collection*\n",
        marker = GENERATED_MARKER,
    )
}

fn remove_stale_views(
    dir: &Path,
    keep: &BTreeSet<String>,
    dry_run: bool,
    failures: &mut Vec<FailedItem>,
) -> u64 {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return 0,
        Err(err) => {
            failures.push(FailedItem::record_skipped(dir.display().to_string(), err));
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if keep.contains(&name) || !name.ends_with(".md") || is_temp_file_name(&name) {
            continue;
        }
        let path = entry.path();
        if !path.is_file() || !is_generated_view(&path) {
            continue;
        }
        if !dry_run {
            if let Err(err) = fs::remove_file(&path) {
                failures.push(FailedItem::record_skipped(path.display().to_string(), err));
                continue;
            }
        }
        debug!(view = %name, "removed stale collection view");
        removed += 1;
    }
    removed
}

fn is_generated_view(path: &Path) -> bool {
    match fs::read(path) {
        Ok(bytes) => bytes
            .split(|byte| *byte == b'\n')
            .next()
            .is_some_and(|line| line.strip_suffix(b"\r").unwrap_or(line) == GENERATED_MARKER.as_bytes()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::{assign_file_names, render_view, GENERATED_MARKER};

    #[test]
    fn view_content_carries_marker_and_scoped_query() {
        let content = render_view("Deep \"RL\"", 1, "Zotero/repo");
        assert!(content.starts_with(GENERATED_MARKER));
        assert!(content.contains("FROM \"Zotero/repo\""));
        assert!(content.contains("WHERE contains(collections, \"Deep \\\"RL\\\"\")"));
        assert!(content.ends_with("*1 paper in this collection*\n"));
        assert!(render_view("Empty", 0, "Zotero/repo").contains("*0 papers in this collection*"));
    }

    #[test]
    fn colliding_file_names_get_suffixes() {
        let members = BTreeMap::from([("A/B", 1), ("A:B", 2), ("nlp", 0), ("NLP", 3)]);
        let assigned = assign_file_names(&members, &BTreeSet::new());
        let names = assigned.keys().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(names, vec!["A_B (2).md", "A_B.md", "NLP.md", "nlp (2).md"]);
        assert_eq!(assigned["A_B (2).md"].0, "A:B");
    }

    #[test]
    fn hand_written_names_are_skipped() {
        let members = BTreeMap::from([("NLP", 1), ("Vision", 0)]);
        let occupied = BTreeSet::from(["nlp.md".to_string()]);
        let assigned = assign_file_names(&members, &occupied);
        let names = assigned.keys().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(names, vec!["NLP (2).md", "Vision.md"]);
    }
}
