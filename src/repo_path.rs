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

//! Repository-relative paths.
//!
//! A [`RepoPathComponent`] is a single directory-entry name: no `/`, and
//! never `.` or `..` (§3.2's directory-entries invariant). A [`RepoPathBuf`]
//! is a `/`-joined sequence of components, always relative, never `.` or
//! `..` anywhere in it.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use crate::error::DagError;

/// A single, validated path component.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoPathComponentBuf(String);

impl RepoPathComponentBuf {
    pub fn new(value: impl Into<String>) -> Result<Self, DagError> {
        let value = value.into();
        if is_valid_component(&value) {
            Ok(Self(value))
        } else {
            Err(DagError::NotSinglePathComponent { path: value })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RepoPathComponentBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for RepoPathComponentBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

fn is_valid_component(value: &str) -> bool {
    !value.is_empty() && !value.contains('/') && value != "." && value != ".."
}

/// A `/`-joined, repository-relative path. The empty path denotes the root.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RepoPathBuf(String);

impl RepoPathBuf {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Joins a single validated component onto this path.
    pub fn join(&self, component: &RepoPathComponentBuf) -> Self {
        if self.0.is_empty() {
            Self(component.0.clone())
        } else {
            Self(format!("{}/{}", self.0, component.0))
        }
    }

    pub fn as_internal_str(&self) -> &str {
        &self.0
    }

    /// Splits into `(parent, basename)`. Fails on the root path.
    pub fn split(&self) -> Option<(RepoPathBuf, RepoPathComponentBuf)> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rsplit_once('/') {
            Some((parent, name)) => Some((Self(parent.to_owned()), RepoPathComponentBuf(name.to_owned()))),
            None => Some((Self::root(), RepoPathComponentBuf(self.0.clone()))),
        }
    }

    pub fn to_fs_path(&self, working_copy_root: &Path) -> PathBuf {
        let mut path = working_copy_root.to_owned();
        if !self.0.is_empty() {
            for component in self.0.split('/') {
                path.push(component);
            }
        }
        path
    }
}

impl fmt::Debug for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Validates that `name` is usable as a single directory-entry name and
/// returns it as a component. This is the check every DAG mutator performs
/// before creating or looking up an entry (§4.2's `NotSinglePathComponent`).
pub fn validate_entry_name(name: &str) -> Result<RepoPathComponentBuf, DagError> {
    RepoPathComponentBuf::new(name)
}
