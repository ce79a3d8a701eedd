//! End-to-end scenarios exercising the DAG facade, the update editor, and
//! the file installer together, the way a real driver would call them.
//!
//! The `diff`/`patch`-backed installer tests assume both programs are on
//! `PATH`, same as the crate's own `external` module requires at runtime.

use std::fs;
use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use revtree_wc::admin::AdminArea;
use revtree_wc::admin::AdmPaths;
use revtree_wc::dag::Dag;
use revtree_wc::editor::UpdateEditor;
use revtree_wc::editor::WorkingCopyEditor;
use revtree_wc::entries::entries_read;
use revtree_wc::entries::EntryUpdate;
use revtree_wc::entries::EntryKind;
use revtree_wc::entries::THIS_DIR;
use revtree_wc::error::DagError;
use revtree_wc::error::WcError;
use revtree_wc::install::install_file;
use revtree_wc::install::FileInstallRequest;
use revtree_wc::install::MemoryWcPropStore;
use revtree_wc::log::LogCommand;
use revtree_wc::log::LogWriter;
use revtree_wc::noderev::NodeKind;
use revtree_wc::noderev::RevNum;
use revtree_wc::repo_path::RepoPathBuf;
use revtree_wc::store::MemoryStore;
use revtree_wc::store::NodeRevisionStore;

fn new_editor(root: &std::path::Path) -> WorkingCopyEditor {
    WorkingCopyEditor::new(root, Arc::new(MemoryWcPropStore::new()))
}

#[test]
fn clone_child_within_one_transaction_is_idempotent() {
    let mem = Arc::new(MemoryStore::new());
    let store: Arc<dyn NodeRevisionStore> = mem.clone();
    let dag = Dag::new(store.clone());
    let txn = mem.begin_txn(RevNum(0));
    let root_id = store.create(NodeKind::Dir, RepoPathBuf::root(), "", &txn).unwrap();
    let root = dag.txn_root(root_id, &txn).unwrap();

    let dir = dag.make_dir(&root, "trunk", &txn).unwrap();
    let first = dag.clone_child(&root, "trunk", "copy-a", &txn).unwrap();
    let second = dag.clone_child(&root, "trunk", "copy-b", &txn).unwrap();

    assert_eq!(first.id(), dir.id());
    assert_eq!(second.id(), dir.id());
}

#[test]
fn make_file_name_collision_is_already_exists() {
    let mem = Arc::new(MemoryStore::new());
    let store: Arc<dyn NodeRevisionStore> = mem.clone();
    let dag = Dag::new(store.clone());
    let txn = mem.begin_txn(RevNum(0));
    let root_id = store.create(NodeKind::Dir, RepoPathBuf::root(), "", &txn).unwrap();
    let root = dag.txn_root(root_id, &txn).unwrap();

    dag.make_file(&root, "readme.txt", &txn).unwrap();
    let err = dag.make_file(&root, "readme.txt", &txn).unwrap_err();
    assert_matches!(err, DagError::AlreadyExists { .. });
}

#[test]
fn mutating_a_node_from_a_foreign_transaction_is_rejected() {
    let mem = Arc::new(MemoryStore::new());
    let store: Arc<dyn NodeRevisionStore> = mem.clone();
    let dag = Dag::new(store.clone());
    let txn_a = mem.begin_txn(RevNum(0));
    let txn_b = mem.begin_txn(RevNum(0));
    let root_id = store.create(NodeKind::Dir, RepoPathBuf::root(), "", &txn_a).unwrap();
    let root = dag.txn_root(root_id, &txn_a).unwrap();

    // `root` is mutable in `txn_a` only; attempting to extend it as if it
    // belonged to the unrelated `txn_b` must fail, even though both are
    // "some in-progress transaction".
    let err = dag.make_dir(&root, "branches", &txn_b).unwrap_err();
    assert_matches!(err, DagError::NotMutable);
}

#[test]
fn update_with_unchanged_text_still_bumps_revision_and_text_time() {
    let dir = tempfile::tempdir().unwrap();
    let mut editor = new_editor(dir.path());

    editor.set_target_revision(RevNum(3)).unwrap();
    let root = editor.open_root(RevNum(0)).unwrap();
    let mut file = editor.add_file("a.txt", &root, None).unwrap();
    let incoming = dir.path().join("incoming-1");
    fs::write(&incoming, b"unchanged\n").unwrap();
    editor.apply_textdelta(&mut file, incoming).unwrap();
    editor.close_file(file, RevNum(3)).unwrap();
    editor.close_directory(root).unwrap();
    editor.close_edit().unwrap();

    let paths = AdmPaths::new(dir.path());
    let entries = entries_read(&paths.adm_dir).unwrap();
    assert_eq!(entries["a.txt"].revision, 3);

    // Second update: driver re-sends the same bytes (a true no-op update),
    // but the revision still advances and `text_time` is refreshed.
    let mut editor = new_editor(dir.path());
    editor.set_target_revision(RevNum(4)).unwrap();
    let root = editor.open_root(RevNum(3)).unwrap();
    let mut file = editor.open_file("a.txt", &root, RevNum(3)).unwrap();
    let incoming = dir.path().join("incoming-2");
    fs::write(&incoming, b"unchanged\n").unwrap();
    editor.apply_textdelta(&mut file, incoming).unwrap();
    editor.close_file(file, RevNum(4)).unwrap();
    editor.close_directory(root).unwrap();
    editor.close_edit().unwrap();

    let entries = entries_read(&paths.adm_dir).unwrap();
    assert_eq!(entries["a.txt"].revision, 4);
    assert_eq!(entries[THIS_DIR].revision, 4);
    assert!(entries["a.txt"].text_time.is_some());
    assert_eq!(fs::read(paths.working_file("a.txt")).unwrap(), b"unchanged\n");
}

#[test]
fn local_edit_and_incoming_edit_on_disjoint_lines_merge_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let paths = AdmPaths::new(dir.path());
    paths.ensure_initialized().unwrap();

    fs::write(paths.text_base("a.txt"), b"line1\nline2\nline3\n").unwrap();
    fs::write(paths.working_file("a.txt"), b"line1\nline2\nline3\nlocal addition\n").unwrap();

    let incoming = paths.tmp("incoming");
    fs::create_dir_all(incoming.parent().unwrap()).unwrap();
    fs::write(&incoming, b"line1\nLINE2 changed remotely\nline3\n").unwrap();

    let wc_props = MemoryWcPropStore::new();
    install_file(
        &wc_props,
        FileInstallRequest {
            parent_dir: dir.path(),
            basename: "a.txt",
            new_rev: RevNum(2),
            new_text_path: Some(incoming),
            props: vec![("svn:eol-style".to_owned(), Some("native".to_owned()))],
            is_full_proplist: false,
            new_url: None,
        },
    )
    .unwrap();

    let working = fs::read_to_string(paths.working_file("a.txt")).unwrap();
    assert!(working.contains("LINE2 changed remotely"), "remote change should be merged in: {working}");
    assert!(working.contains("local addition"), "local addition should survive the merge: {working}");

    let entries = entries_read(&paths.adm_dir).unwrap();
    assert!(!entries["a.txt"].conflicted);
    assert_eq!(entries["a.txt"].revision, 2);
}

#[test]
fn overlapping_local_and_incoming_edits_produce_a_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let paths = AdmPaths::new(dir.path());
    paths.ensure_initialized().unwrap();

    fs::write(paths.text_base("a.txt"), b"line1\nline2\nline3\n").unwrap();
    fs::write(paths.working_file("a.txt"), b"line1\nLOCAL line2\nline3\n").unwrap();

    let incoming = paths.tmp("incoming");
    fs::create_dir_all(incoming.parent().unwrap()).unwrap();
    fs::write(&incoming, b"line1\nREMOTE line2\nline3\n").unwrap();

    let wc_props = MemoryWcPropStore::new();
    install_file(
        &wc_props,
        FileInstallRequest {
            parent_dir: dir.path(),
            basename: "a.txt",
            new_rev: RevNum(2),
            new_text_path: Some(incoming),
            props: Vec::new(),
            is_full_proplist: false,
            new_url: None,
        },
    )
    .unwrap();

    let entries = entries_read(&paths.adm_dir).unwrap();
    assert!(entries["a.txt"].conflicted);
    let reject = entries["a.txt"].text_reject_file.clone().expect("reject file recorded");
    let reject_path = paths.adm_dir.join(reject);
    assert!(fs::metadata(&reject_path).map(|m| m.len() > 0).unwrap_or(false));
}

#[test]
fn add_directory_over_an_unversioned_path_is_obstructed() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("branches")).unwrap();
    fs::write(dir.path().join("branches").join("stray"), b"not ours\n").unwrap();

    let mut editor = new_editor(dir.path());
    let root = editor.open_root(RevNum(0)).unwrap();
    let err = editor.add_directory("branches", &root, None).unwrap_err();
    assert_matches!(err, WcError::ObstructedUpdate(path) if path == dir.path().join("branches"));
}

#[test]
fn an_interrupted_log_is_replayed_and_removed_on_next_lock() {
    let dir = tempfile::tempdir().unwrap();
    let paths = AdmPaths::new(dir.path());
    paths.ensure_initialized().unwrap();

    // Simulate a crash between `LogWriter::close` (the log hit disk) and
    // `replay` (the log was applied): write the log directly, but never
    // run it through `AdminArea`.
    let mut writer = LogWriter::new();
    writer.push(LogCommand::ModifyEntry {
        name: "a.txt".into(),
        update: EntryUpdate { kind: Some(EntryKind::File), revision: Some(9), ..Default::default() },
    });
    writer.close(&paths.adm_dir).unwrap();
    assert!(paths.adm_dir.join("log").exists());

    // The next lock acquisition must notice the stale log and finish the
    // job before handing back a usable entries table.
    let area = AdminArea::lock(dir.path()).unwrap();
    assert_eq!(area.entries["a.txt"].revision, 9);
    assert!(!paths.adm_dir.join("log").exists());
    area.unlock().unwrap();
}
