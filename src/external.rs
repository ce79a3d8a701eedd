// Copyright 2025 The Jujutsu Authors
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

//! Invocation of the external `diff`/`patch` programs (§6, §4.4.3's merge
//! matrix). Both are synchronous; they are the only blocking operations in
//! this crate besides filesystem I/O (§5).

use std::io::Write as _;
use std::path::Path;
use std::process::Command;
use std::process::Stdio;

use tracing::instrument;

use crate::error::WcError;
use crate::error::WcResult;

/// Runs `diff -c -- old new` on two LF-normalized files and returns the
/// unified-diff patch text. Returns `None` when the files are identical
/// (diff's exit code 0).
#[instrument(skip_all, fields(old = %old.display(), new = %new.display()))]
pub fn diff_unified(old: &Path, new: &Path) -> WcResult<Option<Vec<u8>>> {
    let output = Command::new("diff")
        .arg("-c")
        .arg("--")
        .arg(old)
        .arg(new)
        .output()
        .map_err(|e| WcError::ExternalProgram { program: "diff", detail: e.to_string() })?;
    match output.status.code() {
        Some(0) => Ok(None),
        Some(1) => Ok(Some(output.stdout)),
        _ => Err(WcError::ExternalProgram {
            program: "diff",
            detail: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
    }
}

/// Applies `patch` (read from stdin) to `target` in place, writing rejected
/// hunks to `reject_path` and a `.orig` backup alongside `target`.
#[instrument(skip_all, fields(target = %target.display()))]
pub fn apply_patch(target: &Path, patch: &[u8], reject_path: &Path) -> WcResult<()> {
    let mut child = Command::new("patch")
        .arg("-r")
        .arg(reject_path)
        .arg("-B")
        .arg(format!("{}.", reject_path.display()))
        .arg("--silent")
        .arg("--")
        .arg(target)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| WcError::ExternalProgram { program: "patch", detail: e.to_string() })?;
    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(patch)
        .map_err(|e| WcError::ExternalProgram { program: "patch", detail: e.to_string() })?;
    let output = child.wait_with_output().map_err(|e| WcError::ExternalProgram { program: "patch", detail: e.to_string() })?;
    // `patch` exits non-zero when any hunk was rejected; that is not itself
    // an error here (§4.4.3: a non-empty reject file becomes a conflict
    // flag, not a propagated error). Only a hard spawn/signal failure is.
    if output.status.code().is_none() {
        return Err(WcError::ExternalProgram {
            program: "patch",
            detail: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// `DETECT_CONFLICT`: a reject file is non-empty iff the patch produced
/// unresolved hunks.
pub fn reject_file_is_nonempty(reject_path: &Path) -> bool {
    std::fs::metadata(reject_path).map(|m| m.len() > 0).unwrap_or(false)
}
