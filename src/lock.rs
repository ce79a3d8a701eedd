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

//! The per-directory exclusive lock (`adm/lock`, §4.3, §5). Presence-based:
//! holding the lock means the `adm/lock` file exists and was created by us.

use std::fs;
use std::fs::File;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use tracing::instrument;

use crate::error::WcError;
use crate::error::WcResult;

/// An exclusive, non-reentrant lock on one directory's administrative area.
/// Dropping it releases the lock (removes `adm/lock`).
#[derive(Debug)]
pub struct DirLock {
    lock_path: PathBuf,
    _file: File,
}

impl DirLock {
    /// Acquires the lock on `adm_dir`. Fails with
    /// [`WcError::AlreadyLocked`] if another holder's lock file is already
    /// present.
    #[instrument(skip_all, fields(adm_dir = %adm_dir.display()))]
    pub fn acquire(adm_dir: &Path) -> WcResult<Self> {
        let lock_path = adm_dir.join("lock");
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    WcError::AlreadyLocked(adm_dir.to_owned())
                } else {
                    WcError::io(&lock_path, e)
                }
            })?;
        tracing::trace!(lock_path = %lock_path.display(), "acquired directory lock");
        Ok(Self { lock_path, _file: file })
    }

    /// Releases the lock early. Also happens automatically on drop.
    pub fn release(self) -> WcResult<()> {
        drop(self._file);
        fs::remove_file(&self.lock_path).or_else(|e| if e.kind() == io::ErrorKind::NotFound { Ok(()) } else { Err(e) }).map_err(|e| WcError::io(&self.lock_path, e))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let first = DirLock::acquire(dir.path()).unwrap();
        let err = DirLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, WcError::AlreadyLocked(_)));
        drop(first);
        // Lock released on drop; a fresh acquire now succeeds.
        let _second = DirLock::acquire(dir.path()).unwrap();
    }
}
