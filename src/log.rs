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

//! The append-only log journal (§4.3's LOG command grammar) and its
//! idempotent replay.
//!
//! A [`LogWriter`] accumulates commands in memory, then [`LogWriter::close`]
//! appends them to `adm/log` as one JSON record per line (the native
//! equivalent of the specification's "self-closing tagged records") and
//! fsyncs before returning. [`replay`] re-reads that file and applies every
//! command; it is safe to call twice in a row, and safe to resume after a
//! crash mid-replay, because every command checks the state it's about to
//! change before changing it.

use std::fs;
use std::fs::File;
use std::io::BufRead as _;
use std::io::BufReader;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use tracing::instrument;

use crate::entries as entries_mod;
use crate::entries::EntriesTable;
use crate::entries::EntryUpdate;
use crate::error::WcError;
use crate::error::WcResult;
use crate::eol::EolStyle;
use crate::external;
use crate::keywords;
use crate::keywords::KeywordValues;

/// Text translation parameters for a `CP` command that copies file content
/// (as opposed to copying the text-base verbatim).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TextTranslation {
    pub eol: EolStyle,
    pub keywords: Vec<String>,
    pub keyword_values: KeywordValues,
    /// `true`: pristine → working (expand keywords, translate EOL to disk
    /// style). `false`: working → pristine (contract keywords, translate
    /// EOL to LF).
    pub expand: bool,
}

/// One command in the log grammar (§4.3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum LogCommand {
    ModifyEntry { name: String, update: EntryUpdate },
    DeleteEntry { name: String },
    /// Copies `src` to `dst`, optionally translating text along the way.
    /// `repair` requests best-effort EOL normalization before translating,
    /// rather than assuming the source is already consistent.
    Cp { src: PathBuf, dst: PathBuf, translation: Option<TextTranslation>, repair: bool },
    /// Moves `src` to `dst`. Idempotent: a missing `src` with an existing
    /// `dst` is treated as "already applied", not an error.
    Mv { src: PathBuf, dst: PathBuf },
    /// Removes `path`, if present.
    Rm { path: PathBuf },
    /// Clears the write bit on `path` (the pristine text-base is read-only
    /// on disk).
    Readonly { path: PathBuf },
    /// Runs an external program, optionally piping `infile`'s bytes to its
    /// stdin. Currently only `"patch"` is recognized; see [`crate::external`].
    RunCmd { name: String, args: Vec<String>, infile: Option<PathBuf> },
    /// Marks `name` conflicted iff `reject` is non-empty.
    DetectConflict { name: String, reject: PathBuf },
}

/// Accumulates log commands for one directory before they are flushed.
#[derive(Debug, Default)]
pub struct LogWriter {
    commands: Vec<LogCommand>,
}

impl LogWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: LogCommand) {
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Appends all accumulated commands to `adm_dir/log` and fsyncs. No
    /// irreversible change to the working file may happen before this
    /// returns (§4.4.3's crash-safety invariant).
    #[instrument(skip_all, fields(adm_dir = %adm_dir.display(), commands = self.commands.len()))]
    pub fn close(self, adm_dir: &Path) -> WcResult<()> {
        let log_path = adm_dir.join("log");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| WcError::io(&log_path, e))?;
        for command in &self.commands {
            let line = serde_json::to_string(command).expect("LogCommand is always serializable");
            writeln!(file, "{line}").map_err(|e| WcError::io(&log_path, e))?;
        }
        file.sync_data().map_err(|e| WcError::io(&log_path, e))?;
        Ok(())
    }
}

/// Reads every command currently in `adm_dir/log`, if any.
pub fn read_log(adm_dir: &Path) -> WcResult<Vec<LogCommand>> {
    let log_path = adm_dir.join("log");
    let file = match File::open(&log_path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(WcError::io(&log_path, e)),
    };
    let mut commands = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| WcError::io(&log_path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let command: LogCommand = serde_json::from_str(&line).map_err(|e| WcError::io(&log_path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        commands.push(command);
    }
    Ok(commands)
}

/// Replays every command in `adm_dir/log` against the working directory
/// `wc_dir` and the entries table `entries`, then removes the log file.
/// Replaying the same log twice is a no-op the second time: every command
/// either checks existence before acting, or is naturally idempotent
/// (last-write-wins for `MODIFY_ENTRY`, overwrite for `CP`).
#[instrument(skip_all, fields(adm_dir = %adm_dir.display()))]
pub fn replay(adm_dir: &Path, wc_dir: &Path, entries: &mut EntriesTable) -> WcResult<()> {
    let commands = read_log(adm_dir)?;
    for command in &commands {
        apply(command, wc_dir, entries)?;
    }
    entries_mod::entries_write(adm_dir, entries)?;
    let log_path = adm_dir.join("log");
    match fs::remove_file(&log_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(WcError::io(&log_path, e)),
    }
    Ok(())
}

fn apply(command: &LogCommand, wc_dir: &Path, entries: &mut EntriesTable) -> WcResult<()> {
    match command {
        LogCommand::ModifyEntry { name, update } => {
            tracing::trace!(name, "replay: MODIFY_ENTRY");
            entries_mod::modify_entry(entries, name, update.clone());
        }
        LogCommand::DeleteEntry { name } => {
            tracing::trace!(name, "replay: DELETE_ENTRY");
            entries_mod::delete_entry(entries, name);
        }
        LogCommand::Cp { src, dst, translation, repair } => {
            tracing::trace!(src = %src.display(), dst = %dst.display(), "replay: CP");
            let mut bytes = fs::read(src).map_err(|e| WcError::io(src, e))?;
            if let Some(t) = translation {
                if *repair {
                    bytes = crate::eol::normalize_to_lf(&bytes);
                }
                let enabled: std::collections::HashSet<&'static str> =
                    t.keywords.iter().filter_map(|k| leak_known_keyword(k)).collect();
                bytes = if t.expand {
                    let b = t.eol.to_disk(&bytes);
                    keywords::expand(&b, &enabled, &t.keyword_values)
                } else {
                    let b = keywords::contract(&bytes, &enabled);
                    t.eol.to_pristine(&b)
                };
            }
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| WcError::io(parent, e))?;
            }
            fs::write(dst, bytes).map_err(|e| WcError::io(dst, e))?;
        }
        LogCommand::Mv { src, dst } => {
            tracing::trace!(src = %src.display(), dst = %dst.display(), "replay: MV");
            if !src.exists() {
                // Already moved by a previous, interrupted replay.
                return Ok(());
            }
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| WcError::io(parent, e))?;
            }
            fs::rename(src, dst).map_err(|e| WcError::io(dst, e))?;
        }
        LogCommand::Rm { path } => {
            tracing::trace!(path = %path.display(), "replay: RM");
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(WcError::io(path, e)),
            }
        }
        LogCommand::Readonly { path } => {
            tracing::trace!(path = %path.display(), "replay: READONLY");
            set_readonly(path)?;
        }
        LogCommand::RunCmd { name, args, infile } => {
            tracing::trace!(name, ?args, "replay: RUN_CMD");
            run_cmd(name, args, infile.as_deref())?;
        }
        LogCommand::DetectConflict { name, reject } => {
            tracing::trace!(name, reject = %reject.display(), "replay: DETECT_CONFLICT");
            if external::reject_file_is_nonempty(reject) {
                entries_mod::modify_entry(entries, name, EntryUpdate { conflicted: Some(true), ..Default::default() });
            }
        }
    }
    let _ = wc_dir;
    Ok(())
}

fn leak_known_keyword(name: &str) -> Option<&'static str> {
    match name {
        "Revision" => Some("Revision"),
        "Date" => Some("Date"),
        "Author" => Some("Author"),
        "URL" => Some("URL"),
        _ => None,
    }
}

fn set_readonly(path: &Path) -> WcResult<()> {
    let metadata = fs::metadata(path).map_err(|e| WcError::io(path, e))?;
    let mut perms = metadata.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms).map_err(|e| WcError::io(path, e))
}

fn run_cmd(name: &str, args: &[String], infile: Option<&Path>) -> WcResult<()> {
    match name {
        "patch" => {
            // args: [target, reject_path]; patch text comes from `infile`.
            let target = Path::new(&args[0]);
            let reject_path = Path::new(&args[1]);
            let patch_bytes = match infile {
                Some(p) => fs::read(p).map_err(|e| WcError::io(p, e))?,
                None => Vec::new(),
            };
            external::apply_patch(target, &patch_bytes, reject_path)
        }
        other => Err(WcError::UnsupportedFeature(format!("RUN_CMD '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::EntryKind;
    use crate::entries::WcEntry;

    #[test]
    fn replay_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = LogWriter::new();
        writer.push(LogCommand::ModifyEntry {
            name: "foo".into(),
            update: EntryUpdate { kind: Some(EntryKind::File), revision: Some(5), ..Default::default() },
        });
        writer.close(dir.path()).unwrap();

        let mut entries = EntriesTable::new();
        replay(dir.path(), dir.path(), &mut entries).unwrap();
        assert_eq!(entries["foo"].revision, 5);
        assert!(!dir.path().join("log").exists());

        // Replaying an already-removed log is a further no-op.
        replay(dir.path(), dir.path(), &mut entries).unwrap();
        assert_eq!(entries["foo"].revision, 5);
    }

    #[test]
    fn mv_is_idempotent_when_src_already_moved() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        std::fs::write(&src, b"content").unwrap();
        let mut writer = LogWriter::new();
        writer.push(LogCommand::Mv { src: src.clone(), dst: dst.clone() });
        writer.close(dir.path()).unwrap();

        let mut entries = EntriesTable::new();
        replay(dir.path(), dir.path(), &mut entries).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"content");
        assert!(!src.exists());
        let _ = WcEntry::new(EntryKind::File, None, 0);
    }
}
