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

//! The working-copy administrative area (§3.5, §4.3): per-directory state
//! under `adm/` — entries, pristine text-base, property stores, scratch
//! space, log, lock.

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tracing::instrument;

use crate::entries::entries_read;
use crate::entries::EntriesTable;
use crate::error::WcError;
use crate::error::WcResult;
use crate::lock::DirLock;
use crate::log::replay;
use crate::log::LogWriter;

/// Which on-disk sub-area an `open_adm_file` call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmFileKind {
    TextBase,
    TmpTextBase,
    Props,
    PropBase,
    Tmp,
}

/// The paths making up one directory's administrative area, plus the
/// working directory it describes.
#[derive(Debug, Clone)]
pub struct AdmPaths {
    pub wc_dir: PathBuf,
    pub adm_dir: PathBuf,
}

impl AdmPaths {
    pub fn new(wc_dir: impl Into<PathBuf>) -> Self {
        let wc_dir = wc_dir.into();
        let adm_dir = wc_dir.join("adm");
        Self { wc_dir, adm_dir }
    }

    pub fn text_base(&self, name: &str) -> PathBuf {
        self.adm_dir.join("text-base").join(format!("{name}.base"))
    }

    pub fn tmp_text_base(&self, name: &str) -> PathBuf {
        self.adm_dir.join("tmp").join("text-base").join(format!("{name}.base"))
    }

    pub fn props(&self, name: &str) -> PathBuf {
        self.adm_dir.join("props").join(name)
    }

    pub fn prop_base(&self, name: &str) -> PathBuf {
        self.adm_dir.join("prop-base").join(name)
    }

    pub fn tmp(&self, name: &str) -> PathBuf {
        self.adm_dir.join("tmp").join(name)
    }

    pub fn working_file(&self, name: &str) -> PathBuf {
        self.wc_dir.join(name)
    }

    fn dir_for(&self, kind: AdmFileKind) -> PathBuf {
        match kind {
            AdmFileKind::TextBase => self.adm_dir.join("text-base"),
            AdmFileKind::TmpTextBase => self.adm_dir.join("tmp").join("text-base"),
            AdmFileKind::Props => self.adm_dir.join("props"),
            AdmFileKind::PropBase => self.adm_dir.join("prop-base"),
            AdmFileKind::Tmp => self.adm_dir.join("tmp"),
        }
    }

    /// Creates every `adm/` sub-directory for a brand-new working-copy
    /// directory (the disk-prep step of `add_directory`/`open_root`).
    pub fn ensure_initialized(&self) -> WcResult<()> {
        for dir in [
            self.adm_dir.clone(),
            self.dir_for(AdmFileKind::TextBase),
            self.dir_for(AdmFileKind::TmpTextBase),
            self.dir_for(AdmFileKind::Props),
            self.dir_for(AdmFileKind::PropBase),
            self.dir_for(AdmFileKind::Tmp),
        ] {
            fs::create_dir_all(&dir).map_err(|e| WcError::io(&dir, e))?;
        }
        Ok(())
    }
}

/// A single-use, crash-safe write handle under `adm/`. `close` renames the
/// temp file over the final name, the same atomic-rename pattern used
/// throughout this crate for on-disk state.
pub struct AdmFileHandle {
    temp: NamedTempFile,
    final_path: PathBuf,
}

impl std::io::Write for AdmFileHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.temp.flush()
    }
}

/// `open_adm_file`: opens a fresh scratch file under `adm/<kind>/<name>`.
pub fn open_adm_file(paths: &AdmPaths, kind: AdmFileKind, name: &str) -> WcResult<AdmFileHandle> {
    let dir = paths.dir_for(kind);
    fs::create_dir_all(&dir).map_err(|e| WcError::io(&dir, e))?;
    let temp = NamedTempFile::new_in(&dir).map_err(|e| WcError::io(&dir, e))?;
    Ok(AdmFileHandle { temp, final_path: dir.join(name) })
}

/// `close_adm_file`: persists the handle atomically. When `sync` is set,
/// the data is fsynced before the rename (used for the text-base and
/// entries file; scratch props files can skip it).
pub fn close_adm_file(handle: AdmFileHandle, sync: bool) -> WcResult<()> {
    if sync {
        handle.temp.as_file().sync_data().map_err(|e| WcError::io(&handle.final_path, e))?;
    }
    handle.temp.persist(&handle.final_path).map_err(|e| WcError::io(&handle.final_path, e.error))?;
    Ok(())
}

/// A directory's administrative area, locked for the duration of one
/// mutation sequence: entries table in memory, a log writer accumulating
/// commands, released back to disk on [`AdminArea::run_log`].
pub struct AdminArea {
    pub paths: AdmPaths,
    pub entries: EntriesTable,
    pub log: LogWriter,
    _lock: DirLock,
}

impl AdminArea {
    /// Locks `wc_dir`'s administrative area and loads its entries table. If
    /// a non-empty log is found, replays it first — a prior process crashed
    /// mid-mutation and recovery is required before any new command is
    /// queued (§3.6: "non-empty log after crash means recovery required").
    #[instrument(skip_all, fields(wc_dir = %wc_dir.as_ref().display()))]
    pub fn lock(wc_dir: impl AsRef<Path>) -> WcResult<Self> {
        let paths = AdmPaths::new(wc_dir.as_ref());
        paths.ensure_initialized()?;
        let dir_lock = DirLock::acquire(&paths.adm_dir)?;
        let mut entries = entries_read(&paths.adm_dir)?;
        if paths.adm_dir.join("log").exists() {
            tracing::info!(wc_dir = %paths.wc_dir.display(), "recovering incomplete log from a previous crash");
            replay(&paths.adm_dir, &paths.wc_dir, &mut entries)?;
        }
        Ok(Self { paths, entries, log: LogWriter::new(), _lock: dir_lock })
    }

    /// Closes the accumulated log, flushes it to disk, and replays it to
    /// completion, removing it afterward. This is the only point at which
    /// queued mutations take effect.
    #[instrument(skip_all, fields(wc_dir = %self.paths.wc_dir.display()))]
    pub fn run_log(&mut self) -> WcResult<()> {
        let writer = std::mem::take(&mut self.log);
        if writer.is_empty() {
            return Ok(());
        }
        writer.close(&self.paths.adm_dir)?;
        replay(&self.paths.adm_dir, &self.paths.wc_dir, &mut self.entries)?;
        Ok(())
    }

    /// Releases the directory lock. Any still-queued, unflushed commands
    /// are simply dropped (never having been written is the same as never
    /// having happened).
    pub fn unlock(self) -> WcResult<()> {
        self._lock.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::EntryKind;
    use crate::entries::EntryUpdate;
    use crate::log::LogCommand;

    #[test]
    fn lock_run_log_mutates_entries_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut area = AdminArea::lock(dir.path()).unwrap();
        area.log.push(LogCommand::ModifyEntry {
            name: "a".into(),
            update: EntryUpdate { kind: Some(EntryKind::File), revision: Some(3), ..Default::default() },
        });
        area.run_log().unwrap();
        assert_eq!(area.entries["a"].revision, 3);
        area.unlock().unwrap();

        // A fresh lock sees the persisted state.
        let area2 = AdminArea::lock(dir.path()).unwrap();
        assert_eq!(area2.entries["a"].revision, 3);
    }

    #[test]
    fn crashed_log_is_recovered_on_next_lock() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AdmPaths::new(dir.path());
        paths.ensure_initialized().unwrap();
        let mut writer = LogWriter::new();
        writer.push(LogCommand::ModifyEntry {
            name: "a".into(),
            update: EntryUpdate { revision: Some(9), kind: Some(EntryKind::File), ..Default::default() },
        });
        writer.close(&paths.adm_dir).unwrap();
        assert!(paths.adm_dir.join("log").exists());

        let area = AdminArea::lock(dir.path()).unwrap();
        assert_eq!(area.entries["a"].revision, 9);
        assert!(!paths.adm_dir.join("log").exists());
    }
}
