use std::cell::{Cell, RefCell};

use crate::domain::record::{AnnotationDescriptor, Record};

use super::{CanonicalStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedAnnotation {
    pub key: String,
    pub title: String,
    pub body: String,
}

/// Canonical store held in memory; appended annotations become part of the
/// record so a following forward sync mirrors them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RefCell<Vec<Record>>,
    collections: RefCell<Vec<String>>,
    appended: RefCell<Vec<AppendedAnnotation>>,
    fail_writes: Cell<bool>,
}

impl MemoryStore {
    pub fn new(records: Vec<Record>) -> Self {
        let store = Self::default();
        *store.records.borrow_mut() = records;
        store
    }

    pub fn with_collections(self, collections: &[&str]) -> Self {
        *self.collections.borrow_mut() = collections.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn appended(&self) -> Vec<AppendedAnnotation> {
        self.appended.borrow().clone()
    }

    pub fn update(&self, key: &str, apply: impl FnOnce(&mut Record)) {
        let mut records = self.records.borrow_mut();
        let record = records
            .iter_mut()
            .find(|record| record.key == key)
            .expect("record should exist in memory store");
        apply(record);
    }

    pub fn insert(&self, record: Record) {
        self.records.borrow_mut().push(record);
    }

    pub fn remove(&self, key: &str) {
        self.records.borrow_mut().retain(|record| record.key != key);
    }
}

impl CanonicalStore for MemoryStore {
    fn list_records(&self) -> Result<Vec<Record>, StoreError> {
        let mut records = self.records.borrow().clone();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let mut names = self.collections.borrow().clone();
        for record in self.records.borrow().iter() {
            names.extend(record.collections.iter().cloned());
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn contains_record(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.records.borrow().iter().any(|record| record.key == key))
    }

    fn append_annotation(&self, key: &str, title: &str, body: &str) -> Result<String, StoreError> {
        if self.fail_writes.get() {
            return Err(StoreError::Write("writes disabled".to_string()));
        }
        let mut records = self.records.borrow_mut();
        let record = records
            .iter_mut()
            .find(|record| record.key == key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let mut appended = self.appended.borrow_mut();
        let id = format!("N{:07}", appended.len() + 1);
        record.annotations.push(AnnotationDescriptor {
            id: id.clone(),
            body: format!("{}\n\n{}", title, body),
            created_at: format!("2099-01-01 00:00:{:02}", appended.len()),
        });
        appended.push(AppendedAnnotation {
            key: key.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(id)
    }
}
