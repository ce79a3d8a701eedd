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

//! The working-copy entry table (§3.4): the per-directory `adm/entries`
//! record, read and written as a whole but mutated only through
//! [`crate::log`] replay.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::WcError;
use crate::error::WcResult;

/// The reserved entry name carrying a directory's own attributes.
pub const THIS_DIR: &str = "<this-dir>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Normal,
    Add,
    Delete,
    Replace,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Normal
    }
}

/// One record in the entries table (§3.4).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WcEntry {
    pub kind: EntryKind,
    pub url: Option<String>,
    pub revision: u64,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub conflicted: bool,
    #[serde(default)]
    pub text_reject_file: Option<String>,
    #[serde(default)]
    pub prop_reject_file: Option<String>,
    #[serde(default)]
    pub committed_rev: Option<u64>,
    #[serde(default)]
    pub committed_date: Option<String>,
    #[serde(default)]
    pub last_author: Option<String>,
    /// Recorded mtime (milliseconds since epoch) of the working file's text,
    /// used to short-circuit modification checks in §4.5.
    #[serde(default)]
    pub text_time: Option<i64>,
    #[serde(default)]
    pub prop_time: Option<i64>,
}

impl WcEntry {
    pub fn new(kind: EntryKind, url: Option<String>, revision: u64) -> Self {
        Self {
            kind,
            url,
            revision,
            schedule: Schedule::Normal,
            conflicted: false,
            text_reject_file: None,
            prop_reject_file: None,
            committed_rev: None,
            committed_date: None,
            last_author: None,
            text_time: None,
            prop_time: None,
        }
    }
}

/// The ordered entries table for one directory. Serialized as a JSON object
/// keyed by entry name (insertion order preserved via `BTreeMap`'s sorted
/// iteration, which is adequate here: entry order has no semantic meaning
/// in this design, only presence and field values do).
pub type EntriesTable = BTreeMap<String, WcEntry>;

/// `entries_read`: parses the entries file, returning an empty table if
/// absent (a freshly-initialized working copy has no file yet).
pub fn entries_read(adm_dir: &Path) -> WcResult<EntriesTable> {
    let path = adm_dir.join("entries");
    match fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| WcError::io(&path, io::Error::new(io::ErrorKind::InvalidData, e))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(EntriesTable::new()),
        Err(e) => Err(WcError::io(&path, e)),
    }
}

/// Writes the whole entries table atomically: a temp file in the same
/// directory, fsynced, then renamed over the target. A crash never leaves a
/// torn entries file (§5's rename-atomic guarantee for entry writes).
pub fn entries_write(adm_dir: &Path, table: &EntriesTable) -> WcResult<()> {
    let path = adm_dir.join("entries");
    let mut tmp = NamedTempFile::new_in(adm_dir).map_err(|e| WcError::io(adm_dir, e))?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), table)
        .map_err(|e| WcError::io(&path, io::Error::new(io::ErrorKind::Other, e)))?;
    tmp.as_file().sync_data().map_err(|e| WcError::io(&path, e))?;
    tmp.persist(&path).map_err(|e| WcError::io(&path, e.error))?;
    Ok(())
}

/// Applies a masked, single-field update to one entry in `table`, matching
/// the replay-time `MODIFY_ENTRY` command (§4.3's log grammar). Creates the
/// entry if it did not exist yet (this is how `add_file`/`add_directory`
/// populate a brand-new record: the first `MODIFY_ENTRY` for a name also
/// establishes it).
pub fn modify_entry(table: &mut EntriesTable, name: &str, update: EntryUpdate) {
    let entry = table.entry(name.to_owned()).or_insert_with(|| WcEntry::new(update.kind.unwrap_or(EntryKind::File), None, 0));
    if let Some(kind) = update.kind {
        entry.kind = kind;
    }
    if let Some(url) = update.url {
        entry.url = Some(url);
    }
    if let Some(revision) = update.revision {
        entry.revision = revision;
    }
    if let Some(schedule) = update.schedule {
        entry.schedule = schedule;
    }
    if let Some(conflicted) = update.conflicted {
        entry.conflicted = conflicted;
    }
    if let Some(text_reject_file) = update.text_reject_file {
        entry.text_reject_file = text_reject_file;
    }
    if let Some(prop_reject_file) = update.prop_reject_file {
        entry.prop_reject_file = prop_reject_file;
    }
    if let Some(committed_rev) = update.committed_rev {
        entry.committed_rev = committed_rev;
    }
    if let Some(committed_date) = update.committed_date {
        entry.committed_date = committed_date;
    }
    if let Some(last_author) = update.last_author {
        entry.last_author = last_author;
    }
    if let Some(text_time) = update.text_time {
        entry.text_time = Some(text_time);
    }
    if let Some(prop_time) = update.prop_time {
        entry.prop_time = Some(prop_time);
    }
}

/// `delete_entry`: removes the record for `name`, if present. Idempotent.
pub fn delete_entry(table: &mut EntriesTable, name: &str) {
    table.remove(name);
}

/// A masked update: every field is `Option`, `None` meaning "leave as is".
/// Mirrors the "masked update to one WCE record" contract in §4.3.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct EntryUpdate {
    pub kind: Option<EntryKind>,
    pub url: Option<String>,
    pub revision: Option<u64>,
    pub schedule: Option<Schedule>,
    pub conflicted: Option<bool>,
    pub text_reject_file: Option<Option<String>>,
    pub prop_reject_file: Option<Option<String>>,
    /// Tri-state like the reject-file fields above: `None` leaves the field
    /// untouched, `Some(None)` explicitly clears it, `Some(Some(v))` sets it.
    pub committed_rev: Option<Option<u64>>,
    pub committed_date: Option<Option<String>>,
    pub last_author: Option<Option<String>>,
    pub text_time: Option<Option<i64>>,
    pub prop_time: Option<Option<i64>>,
}
