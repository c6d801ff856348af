use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use uuid::Uuid;
use walkdir::WalkDir;

use super::ledger::DedupLedger;
use super::service::{ImportAction, ImportService};
use crate::cancel::CancelFlag;
use crate::db;
use crate::domain::record::{AnnotationDescriptor, Identifiers, Record};
use crate::files::sha256_hex;
use crate::layout::VaultLayout;
use crate::report::FailureCategory;
use crate::store::memory::MemoryStore;
use crate::sync::SyncService;

fn unique_vault() -> VaultLayout {
    let root = std::env::temp_dir().join(format!("papermind-import-test-{}", Uuid::now_v7()));
    fs::create_dir_all(&root).expect("vault root should be creatable");
    VaultLayout::new(root)
}

fn state(layout: &VaultLayout) -> Connection {
    db::open_state(&layout.state_db_path(), false).expect("state should open")
}

fn paper(key: &str) -> Record {
    Record {
        key: key.to_string(),
        title: format!("Paper {}", key),
        authors: vec!["Ada Lovelace".to_string()],
        year: Some(1843),
        collections: Vec::new(),
        tags: Vec::new(),
        identifiers: Identifiers::default(),
        abstract_note: None,
        attachments: Vec::new(),
        annotations: Vec::new(),
    }
}

fn write_doc(layout: &VaultLayout, key: &str, name: &str, content: &str) -> PathBuf {
    let dir = layout.projections_dir().join(key);
    fs::create_dir_all(&dir).expect("record dir should be creatable");
    let path = dir.join(name);
    fs::write(&path, content).expect("document should be writable");
    path
}

fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.expect("walk entry should be readable"))
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let bytes = fs::read(entry.path()).expect("file should be readable");
            (entry.into_path(), bytes)
        })
        .collect()
}

#[test]
fn user_note_is_imported_once_then_skipped() {
    let layout = unique_vault();
    let conn = state(&layout);
    let store = MemoryStore::new(vec![paper("R1")]);
    SyncService::new(&store, &conn, &layout)
        .run(false)
        .expect("forward sync should succeed");
    write_doc(&layout, "R1", "notes.md", "key idea: X\n");

    let service = ImportService::new(&store, &conn, &layout);
    let first = service.run(false, false).expect("import should succeed");
    assert_eq!(first.imported, 1);
    assert_eq!(first.failed, 0);
    assert_eq!(first.actions.len(), 1);
    assert_eq!(first.actions[0].document.as_deref(), Some("notes.md"));
    assert_eq!(first.actions[0].action, ImportAction::Import);

    let appended = store.appended();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].key, "R1");
    assert_eq!(appended[0].title, "notes");
    assert_eq!(appended[0].body, "key idea: X");

    let entry = DedupLedger::new(&conn)
        .get("R1", "notes.md")
        .expect("ledger should be readable")
        .expect("ledger entry should exist");
    assert_eq!(entry.fingerprint, sha256_hex(b"key idea: X\n"));
    assert_eq!(entry.annotation_key.as_deref(), Some("N0000001"));

    let second = service.run(false, false).expect("import should succeed");
    assert_eq!(second.imported, 0);
    assert_eq!(second.skipped_unchanged, 1);
    assert_eq!(store.appended().len(), 1);

    drop(conn);
    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn mirrored_annotations_are_not_reimported() {
    let layout = unique_vault();
    let conn = state(&layout);
    let mut record = paper("R1");
    record.annotations = vec![AnnotationDescriptor {
        id: "NOTE0001".to_string(),
        body: "from zotero".to_string(),
        created_at: "2024-01-01 00:00:00".to_string(),
    }];
    let store = MemoryStore::new(vec![record]);
    let sync = SyncService::new(&store, &conn, &layout);
    let import = ImportService::new(&store, &conn, &layout);

    sync.run(false).expect("forward sync should succeed");
    write_doc(&layout, "R1", "summary.md", "short summary");
    assert_eq!(import.run(false, false).expect("import should succeed").imported, 1);

    // The imported note comes back as a second mirror on the next sync.
    sync.run(false).expect("forward sync should succeed");
    assert!(layout.projections_dir().join("R1/note-002.md").exists());

    let report = import.run(false, false).expect("import should succeed");
    assert_eq!(report.imported, 0);
    assert_eq!(report.skipped_unchanged, 1);
    assert_eq!(report.actions.len(), 1);
    assert_eq!(store.appended().len(), 1);

    drop(conn);
    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn generated_names_are_recognised_without_a_manifest() {
    let layout = unique_vault();
    let conn = state(&layout);
    let store = MemoryStore::new(vec![paper("R1")]);
    write_doc(&layout, "R1", "paper.md", "---\ntitle: x\n---\nbody\n");
    write_doc(&layout, "R1", "note-001.md", "mirror");
    write_doc(&layout, "R1", "ideas.md", "an idea");
    write_doc(&layout, "R1", ".draft.md", "hidden");
    write_doc(&layout, "R1", "figure.png", "not markdown");

    let report = ImportService::new(&store, &conn, &layout)
        .run(false, false)
        .expect("import should succeed");
    assert_eq!(report.imported, 1);
    assert_eq!(store.appended()[0].title, "ideas");

    drop(conn);
    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn modified_documents_need_overwrite() {
    let layout = unique_vault();
    let conn = state(&layout);
    let store = MemoryStore::new(vec![paper("R1")]);
    let path = write_doc(&layout, "R1", "notes.md", "first draft");
    let service = ImportService::new(&store, &conn, &layout);
    service.run(false, false).expect("import should succeed");

    fs::write(&path, "second draft").expect("edit should be writable");
    let skipped = service.run(false, false).expect("import should succeed");
    assert_eq!(skipped.imported, 0);
    assert_eq!(skipped.skipped_modified, 1);
    assert_eq!(store.appended().len(), 1);

    let forced = service.run(true, false).expect("import should succeed");
    assert_eq!(forced.imported, 1);
    assert_eq!(forced.actions[0].action, ImportAction::Reimport);
    assert_eq!(store.appended()[1].body, "second draft");
    let entry = DedupLedger::new(&conn)
        .get("R1", "notes.md")
        .expect("ledger should be readable")
        .expect("ledger entry should exist");
    assert_eq!(entry.fingerprint, sha256_hex(b"second draft"));

    let settled = service.run(true, false).expect("import should succeed");
    assert_eq!(settled.imported, 0);
    assert_eq!(settled.skipped_unchanged, 1);

    drop(conn);
    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn directories_without_records_are_reported_not_found() {
    let layout = unique_vault();
    let conn = state(&layout);
    let store = MemoryStore::new(vec![paper("R1")]);
    write_doc(&layout, "STALE001", "notes.md", "orphaned thought");
    write_doc(&layout, "R1", "notes.md", "kept");

    let report = ImportService::new(&store, &conn, &layout)
        .run(false, false)
        .expect("import should succeed");
    assert_eq!(report.skipped_not_found, 1);
    assert_eq!(report.imported, 1);
    assert!(!report.has_failures());
    assert!(report
        .actions
        .iter()
        .any(|action| action.record_key == "STALE001"
            && action.document.is_none()
            && action.action == ImportAction::SkipNotFound));
    assert_eq!(
        DedupLedger::new(&conn).len().expect("ledger should be readable"),
        1
    );

    drop(conn);
    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn dry_run_leaves_store_ledger_and_tree_untouched() {
    let layout = unique_vault();
    let store = MemoryStore::new(vec![paper("R1")]);
    {
        let conn = state(&layout);
        SyncService::new(&store, &conn, &layout)
            .run(false)
            .expect("forward sync should succeed");
    }
    write_doc(&layout, "R1", "notes.md", "key idea: X");
    let before = snapshot(layout.root());

    let conn = db::open_state(&layout.state_db_path(), true).expect("preview should open");
    let report = ImportService::new(&store, &conn, &layout)
        .run(false, true)
        .expect("dry run should succeed");
    drop(conn);

    assert!(report.dry_run);
    assert_eq!(report.imported, 1);
    assert_eq!(report.actions[0].action, ImportAction::Import);
    assert!(store.appended().is_empty());
    assert_eq!(snapshot(layout.root()), before);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn store_write_failures_are_reported_and_retried_later() {
    let layout = unique_vault();
    let conn = state(&layout);
    let store = MemoryStore::new(vec![paper("R1")]);
    write_doc(&layout, "R1", "notes.md", "key idea: X");
    let service = ImportService::new(&store, &conn, &layout);

    store.fail_writes(true);
    let failed = service.run(false, false).expect("import should complete");
    assert_eq!(failed.failed, 1);
    assert_eq!(failed.failures[0].category, FailureCategory::ImportSkipped);
    assert_eq!(failed.failures[0].item, "R1/notes.md");
    assert!(DedupLedger::new(&conn)
        .get("R1", "notes.md")
        .expect("ledger should be readable")
        .is_none());

    store.fail_writes(false);
    let retried = service.run(false, false).expect("import should succeed");
    assert_eq!(retried.imported, 1);

    drop(conn);
    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn front_matter_is_stripped_and_empty_documents_skipped() {
    let layout = unique_vault();
    let conn = state(&layout);
    let store = MemoryStore::new(vec![paper("R1")]);
    write_doc(&layout, "R1", "tagged.md", "---\ntags: [idea]\n---\n\nBody text\n");
    write_doc(&layout, "R1", "todo.md", "   \n");

    let report = ImportService::new(&store, &conn, &layout)
        .run(false, false)
        .expect("import should succeed");
    assert_eq!(report.imported, 1);
    assert_eq!(report.skipped_empty, 1);
    assert_eq!(store.appended()[0].body, "Body text");

    drop(conn);
    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn corrupt_ledger_degrades_to_importing_once() {
    let layout = unique_vault();
    let store = MemoryStore::new(vec![paper("R1")]);
    write_doc(&layout, "R1", "notes.md", "key idea: X");
    fs::create_dir_all(layout.state_dir()).expect("state dir should be creatable");
    fs::write(layout.state_db_path(), vec![0u8; 2048]).expect("corrupt ledger should be writable");

    let conn = state(&layout);
    let service = ImportService::new(&store, &conn, &layout);
    assert_eq!(service.run(false, false).expect("import should succeed").imported, 1);
    assert_eq!(
        service
            .run(false, false)
            .expect("import should succeed")
            .skipped_unchanged,
        1
    );

    drop(conn);
    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn cancellation_stops_between_documents() {
    let layout = unique_vault();
    let conn = state(&layout);
    let store = MemoryStore::new(vec![paper("R1")]);
    write_doc(&layout, "R1", "a.md", "first");
    let cancel = CancelFlag::new();
    cancel.cancel();

    let report = ImportService::new(&store, &conn, &layout)
        .with_cancel(cancel)
        .run(false, false)
        .expect("cancelled import should still report");
    assert!(report.cancelled);
    assert_eq!(report.imported, 0);
    assert!(store.appended().is_empty());

    drop(conn);
    let _ = fs::remove_dir_all(layout.root());
}
