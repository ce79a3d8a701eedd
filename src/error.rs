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

//! Error taxonomy shared by the DAG/node-revision layer and the working-copy
//! layer (§7 of the design).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::repo_path::RepoPathBuf;

/// Errors raised by the node-revision store and the DAG facade over it.
#[derive(Debug, Error)]
pub enum DagError {
    #[error("Path '{path}' is not a single path component")]
    NotSinglePathComponent { path: String },
    #[error("'{path}' is not a directory")]
    NotDirectory { path: RepoPathBuf },
    #[error("'{path}' is not a file")]
    NotFile { path: RepoPathBuf },
    #[error("'{path}' already exists")]
    AlreadyExists { path: RepoPathBuf },
    #[error("'{path}' not found")]
    NotFound { path: RepoPathBuf },
    #[error("node is not mutable in this transaction")]
    NotMutable,
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("invariant violated: {0}")]
    Logic(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type DagResult<T> = Result<T, DagError>;

/// Errors raised by the working-copy administrative area, log journal,
/// status classifier and update editor.
#[derive(Debug, Error)]
pub enum WcError {
    #[error("working copy at '{0}' is already locked")]
    AlreadyLocked(PathBuf),
    #[error("no lock held on working copy at '{0}'")]
    NotLocked(PathBuf),
    #[error("entry '{0}' not found")]
    EntryNotFound(String),
    #[error("entry '{0}' has no recorded URL")]
    EntryMissingURL(String),
    #[error("'{0}' is not a valid entry name")]
    BadFilename(String),
    #[error("update obstructed: '{0}' already exists and is not under version control")]
    ObstructedUpdate(PathBuf),
    #[error("feature not supported by this editor: {0}")]
    UnsupportedFeature(String),
    #[error("external program '{program}' failed: {detail}")]
    ExternalProgram { program: &'static str, detail: String },
    #[error("invariant violated: {0}")]
    Logic(String),
    #[error(transparent)]
    Dag(#[from] DagError),
    #[error("I/O error at '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type WcResult<T> = Result<T, WcError>;

impl WcError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
