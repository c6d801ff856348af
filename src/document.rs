//! Markdown documents with a YAML front matter block.
//!
//! A document is split exactly once into its two regions and reassembled
//! exactly once. The front matter of a primary document is owned by the sync
//! engine; the body belongs to the user and is carried through byte for byte.
//!
//! Delimiter contract: the first line is `---`, the front matter runs until the
//! next line that is exactly `---`, and the body is every byte after that
//! line's terminator. Anything that does not start this way has no front
//! matter and is body in its entirety.

use serde::{Deserialize, Serialize};

use crate::domain::record::{Identifiers, Record};

pub const FRONT_MATTER_DELIMITER: &str = "---";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentRegions<'a> {
    pub front_matter: Option<&'a str>,
    pub body: &'a str,
}

pub fn split_regions(content: &str) -> DocumentRegions<'_> {
    let whole = DocumentRegions {
        front_matter: None,
        body: content,
    };
    let text = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = text.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return whole;
    };
    if strip_terminator(first) != FRONT_MATTER_DELIMITER {
        return whole;
    }

    let yaml_start = first.len();
    let mut offset = yaml_start;
    for line in lines {
        if strip_terminator(line) == FRONT_MATTER_DELIMITER {
            return DocumentRegions {
                front_matter: Some(&text[yaml_start..offset]),
                body: &text[offset + line.len()..],
            };
        }
        offset += line.len();
    }
    whole
}

fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// Front matter of a primary document. Field order here is the order on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontMatter {
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Identifiers::is_empty")]
    pub identifiers: Identifiers,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub zotero_key: String,
}

impl FrontMatter {
    /// Authors keep source order; collections and tags are sorted so the
    /// rendered block only changes when the record does.
    pub fn from_record(record: &Record) -> Self {
        let title = if record.title.trim().is_empty() {
            "Untitled".to_string()
        } else {
            record.title.trim().to_string()
        };
        Self {
            title,
            authors: record
                .authors
                .iter()
                .map(|author| author.trim().to_string())
                .filter(|author| !author.is_empty())
                .collect(),
            collections: record.sorted_collections(),
            year: record.year,
            identifiers: record.identifiers.clone(),
            tags: record.sorted_tags(),
            zotero_key: record.key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryDocument {
    pub front_matter: FrontMatter,
    pub body: String,
}

impl PrimaryDocument {
    /// Keeps the body of `existing` (when there is one) under fresh front matter.
    pub fn rebuild(
        front_matter: FrontMatter,
        existing: Option<&str>,
        seed: impl FnOnce() -> String,
    ) -> Self {
        let body = match existing {
            Some(content) => split_regions(content).body.to_string(),
            None => seed(),
        };
        Self { front_matter, body }
    }

    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        render_document(&self.front_matter, &self.body)
    }
}

/// Front matter of a mirrored annotation. The block is informational only;
/// mirrors are regenerated wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationFrontMatter {
    pub zotero_key: String,
    pub annotation_id: String,
    pub created_at: String,
}

pub fn render_document<T: Serialize>(
    front_matter: &T,
    body: &str,
) -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(front_matter)?;
    let mut out = String::with_capacity(yaml.len() + body.len() + 8);
    out.push_str(FRONT_MATTER_DELIMITER);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(FRONT_MATTER_DELIMITER);
    out.push('\n');
    out.push_str(body);
    Ok(out)
}
