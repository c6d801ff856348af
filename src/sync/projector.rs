use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::document::{
    render_document, AnnotationFrontMatter, FrontMatter, PrimaryDocument,
};
use crate::domain::record::Record;
use crate::files::{
    is_temp_file_name, read_optional_string, sha256_hex, write_if_changed, WriteOutcome,
};
use crate::layout::{sanitize_file_stem, LayoutError, VaultLayout, PRIMARY_DOCUMENT};
use crate::manifest::{annotation_file_name, looks_generated, GeneratedFile, GeneratedKind};

const ATTACHMENT_PREFIX: &str = "attachment-";
const NOTES_PLACEHOLDER: &str = "*Add your notes here.*";

/// Per-record outcome of a projection. Variants are ordered by precedence:
/// a record that is both new and has attachments reports `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Unchanged,
    AttachmentUpdated,
    MetadataUpdated,
    Created,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Unchanged => "unchanged",
            ChangeKind::AttachmentUpdated => "attachment-updated",
            ChangeKind::MetadataUpdated => "metadata-updated",
            ChangeKind::Created => "created",
        }
    }
}

#[derive(Debug)]
pub struct Projection {
    pub change: ChangeKind,
    pub generated: Vec<GeneratedFile>,
}

#[derive(Debug)]
pub enum ProjectError {
    Layout(LayoutError),
    Attachment {
        name: String,
        source: std::io::Error,
    },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Render(serde_yaml::Error),
}

impl fmt::Display for ProjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectError::Layout(err) => write!(f, "{}", err),
            ProjectError::Attachment { name, source } => {
                write!(f, "attachment '{}' unreadable: {}", name, source)
            }
            ProjectError::Io { path, source } => {
                write!(f, "cannot write '{}': {}", path.display(), source)
            }
            ProjectError::Render(err) => write!(f, "front matter serialization failed: {}", err),
        }
    }
}

impl std::error::Error for ProjectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProjectError::Layout(err) => Some(err),
            ProjectError::Attachment { source, .. } => Some(source),
            ProjectError::Io { source, .. } => Some(source),
            ProjectError::Render(err) => Some(err),
        }
    }
}

impl From<LayoutError> for ProjectError {
    fn from(value: LayoutError) -> Self {
        ProjectError::Layout(value)
    }
}

struct PendingFile {
    name: String,
    kind: GeneratedKind,
    bytes: Vec<u8>,
}

pub struct MetadataProjector<'a> {
    layout: &'a VaultLayout,
}

impl<'a> MetadataProjector<'a> {
    pub fn new(layout: &'a VaultLayout) -> Self {
        Self { layout }
    }

    /// Writes the projection of `record`. `previous` is the record's manifest
    /// from the last applied sync; generated files that dropped out of the
    /// projection are removed only while they still match it.
    pub fn project(
        &self,
        record: &Record,
        previous: Option<&BTreeMap<String, String>>,
        dry_run: bool,
    ) -> Result<Projection, ProjectError> {
        let dir = self.layout.locate(&record.key)?;
        let dir_existed = dir.is_dir();

        let foreign = if dir_existed {
            foreign_names(&dir, previous)?
        } else {
            BTreeSet::new()
        };

        // Every attachment is read before anything is written, so an
        // unreadable one leaves the directory as it was.
        let mut used = BTreeSet::from([PRIMARY_DOCUMENT.to_string()]);
        let mut attachments = Vec::with_capacity(record.attachments.len());
        for attachment in &record.attachments {
            let bytes =
                attachment
                    .read_content()
                    .map_err(|source| ProjectError::Attachment {
                        name: attachment.name.clone(),
                        source,
                    })?;
            // Without a manifest an identical file is taken to be ours.
            let name = attachment_file_name(&attachment.name, &mut used, |candidate| {
                foreign.contains(candidate)
                    && (previous.is_some() || !same_content(&dir.join(candidate), &bytes))
            });
            attachments.push((name, attachment.media_type.as_deref(), bytes));
        }

        let primary_path = dir.join(PRIMARY_DOCUMENT);
        let existing = if dir_existed {
            read_optional_string(&primary_path).map_err(|source| ProjectError::Io {
                path: primary_path.clone(),
                source,
            })?
        } else {
            None
        };
        let document = PrimaryDocument::rebuild(
            FrontMatter::from_record(record),
            existing.as_deref(),
            || seed_body(record, &attachments),
        );
        let primary = document.render().map_err(ProjectError::Render)?;

        let mut pending = vec![PendingFile {
            name: PRIMARY_DOCUMENT.to_string(),
            kind: GeneratedKind::Primary,
            bytes: primary.into_bytes(),
        }];
        for (name, _, bytes) in attachments {
            pending.push(PendingFile {
                name,
                kind: GeneratedKind::Attachment,
                bytes,
            });
        }
        let mut next_index = 1;
        for annotation in record.ordered_annotations() {
            let front_matter = AnnotationFrontMatter {
                zotero_key: record.key.clone(),
                annotation_id: annotation.id.clone(),
                created_at: annotation.created_at.clone(),
            };
            let body = format!("\n{}\n", annotation.body.trim_end());
            let rendered = render_document(&front_matter, &body).map_err(ProjectError::Render)?;
            let name = loop {
                let candidate = annotation_file_name(next_index);
                next_index += 1;
                if !foreign.contains(&candidate) && used.insert(candidate.clone()) {
                    break candidate;
                }
            };
            pending.push(PendingFile {
                name,
                kind: GeneratedKind::Annotation,
                bytes: rendered.into_bytes(),
            });
        }

        if !dry_run {
            fs::create_dir_all(&dir).map_err(|source| ProjectError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        let mut change = if dir_existed {
            ChangeKind::Unchanged
        } else {
            ChangeKind::Created
        };
        let mut generated = Vec::with_capacity(pending.len());
        for file in pending {
            let path = dir.join(&file.name);
            let outcome =
                write_if_changed(&path, &file.bytes, dry_run).map_err(|source| ProjectError::Io {
                    path: path.clone(),
                    source,
                })?;
            change = change.max(classify(file.kind, outcome));
            debug!(record = %record.key, file = %file.name, ?outcome, "projected file");
            generated.push(GeneratedFile {
                fingerprint: sha256_hex(&file.bytes),
                name: file.name,
                kind: file.kind,
            });
        }

        if let Some(previous) = previous {
            let current = generated
                .iter()
                .map(|file| file.name.as_str())
                .collect::<BTreeSet<_>>();
            for (name, fingerprint) in previous {
                if current.contains(name.as_str()) {
                    continue;
                }
                if remove_if_unmodified(&dir.join(name), fingerprint, dry_run)? {
                    change = change.max(ChangeKind::AttachmentUpdated);
                }
            }
        }

        Ok(Projection { change, generated })
    }
}

fn classify(kind: GeneratedKind, outcome: WriteOutcome) -> ChangeKind {
    match (kind, outcome) {
        (_, WriteOutcome::Unchanged) => ChangeKind::Unchanged,
        (GeneratedKind::Primary, WriteOutcome::Created) => ChangeKind::Created,
        (GeneratedKind::Primary, WriteOutcome::Updated) => ChangeKind::MetadataUpdated,
        (_, _) => ChangeKind::AttachmentUpdated,
    }
}

/// Files already in `dir` that the projection does not own: names missing
/// from the previous manifest or, without one, names that do not look
/// generated. They are never written over.
fn foreign_names(
    dir: &Path,
    previous: Option<&BTreeMap<String, String>>,
) -> Result<BTreeSet<String>, ProjectError> {
    let io_err = |source| ProjectError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => return Err(io_err(err)),
    };
    let mut names = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == PRIMARY_DOCUMENT || is_temp_file_name(&name) {
            continue;
        }
        let owned = match previous {
            Some(previous) => previous.contains_key(&name),
            None => looks_generated(&name),
        };
        if !owned {
            names.insert(name);
        }
    }
    Ok(names)
}

fn same_content(path: &Path, bytes: &[u8]) -> bool {
    fs::read(path).is_ok_and(|existing| existing == bytes)
}

/// Keeps the source file name, made filesystem-safe and kept clear of the
/// names the projection itself uses and of names `occupied` rejects.
fn attachment_file_name(
    source_name: &str,
    used: &mut BTreeSet<String>,
    occupied: impl Fn(&str) -> bool,
) -> String {
    let mut name = sanitize_file_stem(source_name);
    if looks_generated(&name) {
        name = format!("{}{}", ATTACHMENT_PREFIX, name);
    }
    let (stem, extension) = match name.rfind('.') {
        Some(dot) if dot > 0 => (name[..dot].to_string(), name[dot..].to_string()),
        _ => (name.clone(), String::new()),
    };
    let mut counter = 2;
    while used.contains(&name) || occupied(&name) {
        name = format!("{} ({}){}", stem, counter, extension);
        counter += 1;
    }
    used.insert(name.clone());
    name
}

fn remove_if_unmodified(path: &Path, fingerprint: &str, dry_run: bool) -> Result<bool, ProjectError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(source) => {
            return Err(ProjectError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if sha256_hex(&bytes) != fingerprint {
        debug!(path = %path.display(), "keeping edited file that is no longer generated");
        return Ok(false);
    }
    if !dry_run {
        fs::remove_file(path).map_err(|source| ProjectError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(true)
}

fn seed_body(record: &Record, attachments: &[(String, Option<&str>, Vec<u8>)]) -> String {
    let mut body = String::from("\n");
    if let Some(abstract_note) = record
        .abstract_note
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
    {
        body.push_str("## Abstract\n\n");
        body.push_str(abstract_note);
        body.push_str("\n\n");
    }
    if !attachments.is_empty() {
        body.push_str("## Attachments\n\n");
        for (name, media_type, _) in attachments {
            match media_type {
                Some(media_type) => body.push_str(&format!("- [[{}]] ({})\n", name, media_type)),
                None => body.push_str(&format!("- [[{}]]\n", name)),
            }
        }
        body.push('\n');
    }
    body.push_str("## Notes\n\n");
    body.push_str(NOTES_PLACEHOLDER);
    body.push('\n');
    body
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{attachment_file_name, classify, ChangeKind};
    use crate::files::WriteOutcome;
    use crate::manifest::GeneratedKind;

    #[test]
    fn change_precedence_prefers_created() {
        assert!(ChangeKind::Created > ChangeKind::MetadataUpdated);
        assert!(ChangeKind::MetadataUpdated > ChangeKind::AttachmentUpdated);
        assert!(ChangeKind::AttachmentUpdated > ChangeKind::Unchanged);
        assert_eq!(
            classify(GeneratedKind::Annotation, WriteOutcome::Created),
            ChangeKind::AttachmentUpdated
        );
        assert_eq!(
            classify(GeneratedKind::Primary, WriteOutcome::Updated),
            ChangeKind::MetadataUpdated
        );
    }

    #[test]
    fn attachment_names_avoid_generated_and_duplicate_names() {
        let mut used = BTreeSet::from(["paper.md".to_string()]);
        let free = |_: &str| false;
        assert_eq!(attachment_file_name("paper.md", &mut used, free), "attachment-paper.md");
        assert_eq!(
            attachment_file_name("note-001.md", &mut used, free),
            "attachment-note-001.md"
        );
        assert_eq!(attachment_file_name("scan.pdf", &mut used, free), "scan.pdf");
        assert_eq!(attachment_file_name("scan.pdf", &mut used, free), "scan (2).pdf");
        assert_eq!(attachment_file_name("a/b:c.pdf", &mut used, free), "a_b_c.pdf");
        assert_eq!(
            attachment_file_name("slides.pdf", &mut used, |name| name == "slides.pdf"),
            "slides (2).pdf"
        );
    }
}
