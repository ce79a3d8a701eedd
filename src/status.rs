// Copyright 2020 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The working-copy status classifier (§4.5).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::admin::AdmPaths;
use crate::entries::EntriesTable;
use crate::entries::EntryKind;
use crate::entries::Schedule;
use crate::entries::WcEntry;
use crate::entries::THIS_DIR;
use crate::error::WcResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStatus {
    None,
    Modified,
    Added,
    Deleted,
    Replaced,
    Conflicted,
    /// Supplemented from the original's distinction between "no entry" and
    /// "entry present but the working file is gone" (`status.c`).
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropStatus {
    None,
    Modified,
    Added,
    Replaced,
    Deleted,
    Conflicted,
}

/// The classification of one path (§4.5).
#[derive(Debug, Clone)]
pub struct Status {
    pub text_status: TextStatus,
    pub prop_status: PropStatus,
    pub entry: Option<WcEntry>,
    pub repos_rev: Option<u64>,
}

/// Classifies a single entry named `name` inside directory `paths`, given
/// its record in `entries` (`None` when unversioned).
pub fn status_of_entry(paths: &AdmPaths, entries: &EntriesTable, name: &str) -> WcResult<Status> {
    let entry = match entries.get(name) {
        Some(e) => e.clone(),
        None => {
            return Ok(Status { text_status: TextStatus::None, prop_status: PropStatus::None, entry: None, repos_rev: None });
        }
    };

    let working_path = if name == THIS_DIR { paths.wc_dir.clone() } else { paths.working_file(name) };
    let working_exists = working_path.exists();

    let mut text_status = TextStatus::None;
    let mut prop_status = PropStatus::None;

    if entry.kind == EntryKind::File {
        if !working_exists {
            text_status = TextStatus::Missing;
        } else if text_differs_from_base(paths, name, &working_path)? {
            text_status = TextStatus::Modified;
        }
    }

    if props_differ_from_base(paths, name)? {
        prop_status = PropStatus::Modified;
    }
    let prop_exists = paths.props(name).exists();

    match entry.schedule {
        Schedule::Normal => {}
        Schedule::Add => {
            text_status = TextStatus::Added;
            if prop_exists {
                prop_status = PropStatus::Added;
            }
        }
        Schedule::Replace => {
            text_status = TextStatus::Replaced;
            if prop_exists {
                prop_status = PropStatus::Replaced;
            }
        }
        Schedule::Delete => {
            text_status = TextStatus::Deleted;
            if prop_exists {
                prop_status = PropStatus::Deleted;
            }
        }
    }

    // Conflict wins unconditionally over whatever text/prop status was
    // computed above, as long as the reject files it names still exist on
    // disk (a resolved conflict leaves the entry's `conflicted` flag stale
    // until the next update/commit clears it).
    if entry.conflicted {
        if let Some(reject) = &entry.text_reject_file {
            if paths.adm_dir.join(reject).exists() {
                text_status = TextStatus::Conflicted;
            }
        }
        if let Some(reject) = &entry.prop_reject_file {
            if paths.adm_dir.join(reject).exists() {
                prop_status = PropStatus::Conflicted;
            }
        }
    }

    Ok(Status { text_status, prop_status, entry: Some(entry), repos_rev: None })
}

fn text_differs_from_base(paths: &AdmPaths, name: &str, working_path: &Path) -> WcResult<bool> {
    let base_path = paths.text_base(name);
    match fs::read(&base_path) {
        Ok(base) => {
            let working = fs::read(working_path).map_err(|e| crate::error::WcError::io(working_path, e))?;
            Ok(crate::eol::normalize_to_lf(&working) != base)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(working_path.exists()),
        Err(e) => Err(crate::error::WcError::io(&base_path, e)),
    }
}

fn props_differ_from_base(paths: &AdmPaths, name: &str) -> WcResult<bool> {
    let working = read_props(&paths.props(name))?;
    let base = read_props(&paths.prop_base(name))?;
    Ok(working != base)
}

fn read_props(path: &Path) -> WcResult<BTreeMap<String, String>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| crate::error::WcError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(crate::error::WcError::io(path, e)),
    }
}

/// One entry's status together with its relative name, as produced during a
/// directory walk.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub name: String,
    pub status: Status,
}

/// Walks `dir`'s entries table, classifying `<this-dir>` and every child.
/// For a child directory, descent uses the entry's *recorded* kind to decide
/// whether to classify it as a directory, but the *on-disk* kind to decide
/// whether `walk` should recurse into it — a directory entry whose on-disk
/// counterpart has been replaced by a plain file must still be reported, not
/// silently skipped (§4.5).
pub fn walk(paths: &AdmPaths) -> WcResult<Vec<StatusEntry>> {
    let entries = crate::entries::entries_read(&paths.adm_dir)?;
    let mut out = Vec::with_capacity(entries.len());
    let this_dir_status = status_of_entry(paths, &entries, THIS_DIR)?;
    out.push(StatusEntry { name: THIS_DIR.to_owned(), status: this_dir_status });
    for name in entries.keys() {
        if name == THIS_DIR {
            continue;
        }
        let status = status_of_entry(paths, &entries, name)?;
        out.push(StatusEntry { name: name.clone(), status });
    }

    for entry in out.clone() {
        let Some(wc_entry) = &entry.status.entry else { continue };
        if wc_entry.kind != EntryKind::Dir {
            continue;
        }
        let child_dir = paths.working_file(&entry.name);
        if !child_dir.is_dir() {
            // Recorded as a directory but obstructed on disk: reported above,
            // not descended into.
            continue;
        }
        let child_paths = AdmPaths::new(paths.wc_dir.join(&entry.name));
        if child_paths.adm_dir.join("entries").exists() {
            out.extend(walk(&child_paths)?);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::entries_write;
    use crate::entries::EntryUpdate;

    fn write_props(path: &Path, props: &BTreeMap<String, String>) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_vec(props).unwrap()).unwrap();
    }

    #[test]
    fn unversioned_path_has_none_status() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AdmPaths::new(dir.path());
        let entries = EntriesTable::new();
        let status = status_of_entry(&paths, &entries, "nope").unwrap();
        assert_eq!(status.text_status, TextStatus::None);
        assert!(status.entry.is_none());
    }

    #[test]
    fn missing_working_file_is_reported_missing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AdmPaths::new(dir.path());
        paths.ensure_initialized().unwrap();
        let mut entries = EntriesTable::new();
        crate::entries::modify_entry(
            &mut entries,
            "a",
            EntryUpdate { kind: Some(EntryKind::File), revision: Some(1), ..Default::default() },
        );
        std::fs::write(paths.text_base("a"), b"hi\n").unwrap();
        let status = status_of_entry(&paths, &entries, "a").unwrap();
        assert_eq!(status.text_status, TextStatus::Missing);
    }

    #[test]
    fn modified_text_is_detected_against_base() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AdmPaths::new(dir.path());
        paths.ensure_initialized().unwrap();
        let mut entries = EntriesTable::new();
        crate::entries::modify_entry(
            &mut entries,
            "a",
            EntryUpdate { kind: Some(EntryKind::File), revision: Some(1), ..Default::default() },
        );
        std::fs::write(paths.text_base("a"), b"hi\n").unwrap();
        std::fs::write(paths.working_file("a"), b"bye\n").unwrap();
        let status = status_of_entry(&paths, &entries, "a").unwrap();
        assert_eq!(status.text_status, TextStatus::Modified);
    }

    #[test]
    fn schedule_add_overrides_text_status() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AdmPaths::new(dir.path());
        paths.ensure_initialized().unwrap();
        let mut entries = EntriesTable::new();
        crate::entries::modify_entry(
            &mut entries,
            "a",
            EntryUpdate { kind: Some(EntryKind::File), schedule: Some(Schedule::Add), ..Default::default() },
        );
        std::fs::write(paths.working_file("a"), b"new\n").unwrap();
        let status = status_of_entry(&paths, &entries, "a").unwrap();
        assert_eq!(status.text_status, TextStatus::Added);
    }

    #[test]
    fn schedule_add_with_a_prop_file_reports_prop_added_even_if_unchanged_from_base() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AdmPaths::new(dir.path());
        paths.ensure_initialized().unwrap();
        let mut entries = EntriesTable::new();
        crate::entries::modify_entry(
            &mut entries,
            "a",
            EntryUpdate { kind: Some(EntryKind::File), schedule: Some(Schedule::Add), ..Default::default() },
        );
        std::fs::write(paths.working_file("a"), b"new\n").unwrap();
        // Working props happen to equal a stale prop-base, so the plain
        // diff-against-base check alone would report `None`; a prop file
        // existing at all under a scheduled add must still report `Added`.
        let mut props = BTreeMap::new();
        props.insert("svn:executable".to_owned(), "*".to_owned());
        write_props(&paths.props("a"), &props);
        write_props(&paths.prop_base("a"), &props);
        let status = status_of_entry(&paths, &entries, "a").unwrap();
        assert_eq!(status.prop_status, PropStatus::Added);
    }

    #[test]
    fn conflicted_wins_over_modified_while_reject_exists() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AdmPaths::new(dir.path());
        paths.ensure_initialized().unwrap();
        let mut entries = EntriesTable::new();
        crate::entries::modify_entry(
            &mut entries,
            "a",
            EntryUpdate {
                kind: Some(EntryKind::File),
                conflicted: Some(true),
                text_reject_file: Some(Some("a.rej".into())),
                ..Default::default()
            },
        );
        std::fs::write(paths.text_base("a"), b"hi\n").unwrap();
        std::fs::write(paths.working_file("a"), b"bye\n").unwrap();
        std::fs::write(paths.adm_dir.join("a.rej"), b"rejected hunk").unwrap();
        let status = status_of_entry(&paths, &entries, "a").unwrap();
        assert_eq!(status.text_status, TextStatus::Conflicted);
    }

    #[test]
    fn walk_includes_this_dir_and_descends_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AdmPaths::new(dir.path());
        paths.ensure_initialized().unwrap();
        let mut entries = EntriesTable::new();
        crate::entries::modify_entry(
            &mut entries,
            THIS_DIR,
            EntryUpdate { kind: Some(EntryKind::Dir), revision: Some(1), ..Default::default() },
        );
        crate::entries::modify_entry(
            &mut entries,
            "sub",
            EntryUpdate { kind: Some(EntryKind::Dir), revision: Some(1), ..Default::default() },
        );
        entries_write(&paths.adm_dir, &entries).unwrap();

        let sub_dir = dir.path().join("sub");
        let sub_paths = AdmPaths::new(&sub_dir);
        sub_paths.ensure_initialized().unwrap();
        let mut sub_entries = EntriesTable::new();
        crate::entries::modify_entry(
            &mut sub_entries,
            THIS_DIR,
            EntryUpdate { kind: Some(EntryKind::Dir), revision: Some(1), ..Default::default() },
        );
        entries_write(&sub_paths.adm_dir, &sub_entries).unwrap();

        let results = walk(&paths).unwrap();
        assert!(results.iter().any(|e| e.name == THIS_DIR));
        assert!(results.iter().any(|e| e.name == "sub"));
        let _ = write_props;
    }
}
