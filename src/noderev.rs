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

//! Node identifiers and immutable node revisions (§3.1–§3.2, §4.1).

use std::fmt;

use crate::repo_path::RepoPathBuf;

/// Monotonically increasing revision number. `RevNum::INVALID` is the
/// distinguished sentinel used where "no revision yet" must be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct RevNum(pub u64);

impl RevNum {
    pub const INVALID: RevNum = RevNum(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for RevNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "<invalid>")
        }
    }
}

/// Opaque identifier for an in-progress transaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TxnId(pub String);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a [`NodeId`]'s third component names an in-progress transaction
/// (making the node mutable) or a committed revision (making it immutable).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TxnOrRev {
    Txn(TxnId),
    Rev(RevNum),
}

/// A node identifier: `(node_key, copy_key, txn_or_rev)`.
///
/// `related(a, b)` holds when `node_key` matches (same line of history,
/// possibly at different points in it or under different transactions).
/// `same(a, b)` holds when all three components match (literally the same
/// node-revision).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub node_key: String,
    pub copy_key: String,
    pub txn_or_rev: TxnOrRev,
}

impl NodeId {
    pub fn new(node_key: impl Into<String>, copy_key: impl Into<String>, txn_or_rev: TxnOrRev) -> Self {
        Self { node_key: node_key.into(), copy_key: copy_key.into(), txn_or_rev }
    }

    /// A node-id is mutable iff it carries a [`TxnId`].
    pub fn is_mutable(&self) -> bool {
        matches!(self.txn_or_rev, TxnOrRev::Txn(_))
    }

    /// Returns the transaction this id is mutable within, if any.
    pub fn txn_id(&self) -> Option<&TxnId> {
        match &self.txn_or_rev {
            TxnOrRev::Txn(txn) => Some(txn),
            TxnOrRev::Rev(_) => None,
        }
    }
}

/// `related(a, b)`: same line of history.
pub fn related(a: &NodeId, b: &NodeId) -> bool {
    a.node_key == b.node_key
}

/// `same(a, b)`: literally the same node-revision identifier.
pub fn same(a: &NodeId, b: &NodeId) -> bool {
    a == b
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
    None,
    Unknown,
}

/// Opaque handle into the storage layer identifying a content or property
/// representation. Two reps compare equal (by [`noderev_same_rep_key`]) iff
/// they denote the same stored bytes; this crate never compares the bytes
/// themselves to decide "did this change".
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RepKey(pub String);

/// A handle to an in-progress write stream on a mutable file node. Single
/// use: the writer returned by [`crate::store::NodeRevisionStore::set_contents`]
/// consumes it when finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditKey(pub String);

/// The `copyroot` of a node revision: the nearest ancestor created by a
/// copy, together with the path/revision it was copied from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOrigin {
    pub copyfrom_path: RepoPathBuf,
    pub copyfrom_rev: RevNum,
    pub copyroot: NodeId,
}

/// An immutable (or, within its owning transaction, in-progress) node
/// revision. See §3.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRevision {
    pub id: NodeId,
    pub kind: NodeKind,
    pub predecessor_id: Option<NodeId>,
    /// Non-negative, or -1 meaning "unknown/unbounded".
    pub predecessor_count: i64,
    pub copy_origin: Option<CopyOrigin>,
    pub data_rep: Option<RepKey>,
    pub prop_rep: Option<RepKey>,
    pub edit_key: Option<EditKey>,
    pub created_path: RepoPathBuf,
}

impl NodeRevision {
    /// A template for a brand-new node of the given kind, not yet
    /// registered under any parent.
    pub fn new(id: NodeId, kind: NodeKind, created_path: RepoPathBuf) -> Self {
        Self {
            id,
            kind,
            predecessor_id: None,
            predecessor_count: 0,
            copy_origin: None,
            data_rep: None,
            prop_rep: None,
            edit_key: None,
            created_path,
        }
    }

    /// An NR is mutable iff its [`NodeId`] carries a [`TxnId`].
    pub fn is_mutable(&self) -> bool {
        self.id.is_mutable()
    }
}

/// `noderev_same_rep_key(a, b)`: opaque-key equality, never a byte compare.
pub fn noderev_same_rep_key(a: &Option<RepKey>, b: &Option<RepKey>) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn related_ignores_copy_and_txn() {
        let a = NodeId::new("n1", "c1", TxnOrRev::Rev(RevNum(1)));
        let b = NodeId::new("n1", "c2", TxnOrRev::Txn(TxnId("t1".into())));
        assert!(related(&a, &b));
        assert!(!same(&a, &b));
    }

    #[test]
    fn mutability_follows_txn_component() {
        let immutable = NodeId::new("n1", "c1", TxnOrRev::Rev(RevNum(1)));
        let mutable = NodeId::new("n1", "c1", TxnOrRev::Txn(TxnId("t1".into())));
        assert!(!immutable.is_mutable());
        assert!(mutable.is_mutable());
    }
}
