use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A paper as read from the canonical store, with every relation the
/// projection needs already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub collections: Vec<String>,
    pub tags: Vec<String>,
    pub identifiers: Identifiers,
    pub abstract_note: Option<String>,
    pub attachments: Vec<AttachmentDescriptor>,
    pub annotations: Vec<AnnotationDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication: Option<String>,
}

impl Identifiers {
    pub fn is_empty(&self) -> bool {
        self.doi.is_none()
            && self.url.is_none()
            && self.isbn.is_none()
            && self.publication.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDescriptor {
    pub name: String,
    pub source: AttachmentSource,
    pub media_type: Option<String>,
}

impl AttachmentDescriptor {
    pub fn read_content(&self) -> std::io::Result<Vec<u8>> {
        match &self.source {
            AttachmentSource::Path(path) => std::fs::read(path),
            AttachmentSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationDescriptor {
    pub id: String,
    pub body: String,
    /// Creation time as stored by the canonical store; compared lexically.
    pub created_at: String,
}

impl Record {
    /// Collections sorted and deduplicated, the order written to front matter.
    pub fn sorted_collections(&self) -> Vec<String> {
        sorted_unique(&self.collections)
    }

    pub fn sorted_tags(&self) -> Vec<String> {
        sorted_unique(&self.tags)
    }

    /// Annotations in creation order, ties broken by id.
    pub fn ordered_annotations(&self) -> Vec<&AnnotationDescriptor> {
        let mut ordered = self.annotations.iter().collect::<Vec<_>>();
        ordered.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        ordered
    }
}

fn sorted_unique(values: &[String]) -> Vec<String> {
    let mut out = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::{AnnotationDescriptor, Identifiers, Record};

    fn record() -> Record {
        Record {
            key: "ABCD1234".to_string(),
            title: "t".to_string(),
            authors: vec!["B".to_string(), "A".to_string()],
            year: None,
            collections: vec!["zeta".to_string(), "Alpha".to_string(), "zeta".to_string()],
            tags: vec![" ml ".to_string(), "".to_string(), "attention".to_string()],
            identifiers: Identifiers::default(),
            abstract_note: None,
            attachments: Vec::new(),
            annotations: vec![
                AnnotationDescriptor {
                    id: "B".to_string(),
                    body: "second".to_string(),
                    created_at: "2024-01-02 00:00:00".to_string(),
                },
                AnnotationDescriptor {
                    id: "A".to_string(),
                    body: "first".to_string(),
                    created_at: "2024-01-01 00:00:00".to_string(),
                },
            ],
        }
    }

    #[test]
    fn collections_and_tags_are_sorted_and_deduplicated() {
        let record = record();
        assert_eq!(record.sorted_collections(), vec!["Alpha", "zeta"]);
        assert_eq!(record.sorted_tags(), vec!["attention", "ml"]);
    }

    #[test]
    fn annotations_follow_creation_order() {
        let record = record();
        let bodies = record
            .ordered_annotations()
            .into_iter()
            .map(|note| note.body.as_str())
            .collect::<Vec<_>>();
        assert_eq!(bodies, vec!["first", "second"]);
    }
}
