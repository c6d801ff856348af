use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    RecordSkipped,
    ImportSkipped,
}

impl FailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::RecordSkipped => "record_skipped",
            FailureCategory::ImportSkipped => "import_skipped",
        }
    }
}

/// One record, view or document a run had to leave behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub item: String,
    pub category: FailureCategory,
    pub reason: String,
}

impl FailedItem {
    pub fn record_skipped(item: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            item: item.into(),
            category: FailureCategory::RecordSkipped,
            reason: reason.to_string(),
        }
    }

    pub fn import_skipped(item: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            item: item.into(),
            category: FailureCategory::ImportSkipped,
            reason: reason.to_string(),
        }
    }
}
