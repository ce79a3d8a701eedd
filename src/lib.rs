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

//! A content-addressed DAG filesystem paired with a crash-safe working-copy
//! update editor.
//!
//! [`dag`] and [`noderev`] model the repository side: immutable node
//! revisions chained by predecessor, overlaid by mutable transactions.
//! [`editor`], [`admin`], [`log`] and [`install`] model the working-copy
//! side: a callback-driven tree-delta consumer that journals its intended
//! mutations before ever touching a working file, so a crash at any point
//! leaves the working copy recoverable. [`status`] reads the result of all
//! of the above without needing to understand how it got there.

pub mod admin;
pub mod dag;
pub mod editor;
pub mod entries;
pub mod eol;
pub mod error;
pub mod external;
pub mod install;
pub mod keywords;
pub mod lock;
pub mod log;
pub mod noderev;
pub mod repo_path;
pub mod status;
pub mod store;

pub use error::DagError;
pub use error::WcError;
