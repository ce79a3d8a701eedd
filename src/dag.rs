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

//! The DAG facade (§4.2): a thin, cache-aware object layer over the
//! node-revision store, exposing tree navigation, cloning for mutation, and
//! ancestry queries.
//!
//! The source this crate is modeled on threads an arena through every call
//! so that borrowed data lives exactly as long as its scope. In Rust the
//! ownership system does that job instead: a [`Dag`] holds an
//! [`Arc<dyn NodeRevisionStore>`] and handles are cheap, owned clones rather
//! than arena-bound borrows (see `DESIGN.md`, "Arena scoping").

use std::sync::Arc;

use crate::error::DagError;
use crate::error::DagResult;
use crate::noderev::related;
use crate::noderev::same;
use crate::noderev::CopyOrigin;
use crate::noderev::NodeId;
use crate::noderev::NodeKind;
use crate::noderev::NodeRevision;
use crate::noderev::RevNum;
use crate::noderev::TxnId;
use crate::noderev::TxnOrRev;
use crate::repo_path::validate_entry_name;
use crate::repo_path::RepoPathBuf;
use crate::store::DirEntry;
use crate::store::NodeRevisionStore;

/// A transient handle bundling a store reference, the node's id, its lazily
/// loaded node revision, and its created path (§3.3).
#[derive(Clone)]
pub struct DagNode {
    store: Arc<dyn NodeRevisionStore>,
    id: NodeId,
    nr: NodeRevision,
}

impl std::fmt::Debug for DagNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagNode")
            .field("id", &self.id)
            .field("kind", &self.nr.kind)
            .field("created_path", &self.nr.created_path)
            .finish()
    }
}

impl DagNode {
    fn load(store: Arc<dyn NodeRevisionStore>, id: NodeId) -> DagResult<Self> {
        let nr = store.get(&id)?;
        Ok(Self { store, id, nr })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.nr.kind
    }

    pub fn created_path(&self) -> &RepoPathBuf {
        &self.nr.created_path
    }

    /// A read-only view of the cached node revision. Must not be mutated
    /// through; see `DESIGN.md`'s note on cached-NR aliasing.
    pub fn node_revision(&self) -> &NodeRevision {
        &self.nr
    }

    fn check_mutable(&self, txn: &TxnId) -> DagResult<()> {
        if self.id.txn_id() == Some(txn) {
            Ok(())
        } else {
            Err(DagError::NotMutable)
        }
    }
}

/// The DAG facade over a [`NodeRevisionStore`].
#[derive(Clone)]
pub struct Dag {
    store: Arc<dyn NodeRevisionStore>,
}

impl Dag {
    pub fn new(store: Arc<dyn NodeRevisionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn NodeRevisionStore> {
        &self.store
    }

    /// Resolves the root of a committed revision.
    pub fn revision_root(&self, root_id: NodeId, rev: RevNum) -> DagResult<DagNode> {
        debug_assert!(matches!(root_id.txn_or_rev, TxnOrRev::Rev(r) if r == rev));
        DagNode::load(self.store.clone(), root_id)
    }

    /// Resolves the mutable root of an in-progress transaction.
    pub fn txn_root(&self, root_id: NodeId, txn: &TxnId) -> DagResult<DagNode> {
        debug_assert!(root_id.txn_id() == Some(txn));
        DagNode::load(self.store.clone(), root_id)
    }

    /// Resolves the *base* root (the immutable revision the transaction
    /// started from), for comparison purposes.
    pub fn txn_base_root(&self, base_id: NodeId) -> DagResult<DagNode> {
        DagNode::load(self.store.clone(), base_id)
    }

    /// Looks up `name` in `parent`'s directory representation.
    pub fn open(&self, parent: &DagNode, name: &str) -> DagResult<DagNode> {
        let component = validate_entry_name(name)?;
        if parent.kind() != NodeKind::Dir {
            return Err(DagError::NotDirectory { path: parent.created_path().clone() });
        }
        let entries = self.store.rep_contents_dir(&parent.nr)?;
        let entry = entries
            .into_iter()
            .find(|e| e.name == component)
            .ok_or_else(|| DagError::NotFound { path: parent.created_path().join(&component) })?;
        DagNode::load(self.store.clone(), entry.id)
    }

    /// Materializes `node`'s child mapping. Errors if `node` is not a
    /// directory.
    pub fn dir_entries(&self, node: &DagNode) -> DagResult<Vec<DirEntry>> {
        if node.kind() != NodeKind::Dir {
            return Err(DagError::NotDirectory { path: node.created_path().clone() });
        }
        self.store.rep_contents_dir(&node.nr)
    }

    fn make_entry(&self, parent: &DagNode, name: &str, txn: &TxnId, kind: NodeKind) -> DagResult<DagNode> {
        if parent.kind() != NodeKind::Dir {
            return Err(DagError::NotDirectory { path: parent.created_path().clone() });
        }
        parent.check_mutable(txn)?;
        let component = validate_entry_name(name)?;
        let child_path = parent.created_path().join(&component);
        if self.store.rep_contents_dir(&parent.nr)?.iter().any(|e| e.name == component) {
            return Err(DagError::AlreadyExists { path: child_path });
        }
        // The child must exist before it is registered in the parent: the
        // parent's set_entry requires a live child id, and this ordering
        // must be preserved to avoid a dangling entry on partial failure.
        let child_id = self.store.create(kind, child_path, &parent.id.copy_key, txn)?;
        self.store.set_entry(txn, &parent.id, &component, child_id.clone(), kind)?;
        DagNode::load(self.store.clone(), child_id)
    }

    pub fn make_file(&self, parent: &DagNode, name: &str, txn: &TxnId) -> DagResult<DagNode> {
        self.make_entry(parent, name, txn, NodeKind::File)
    }

    pub fn make_dir(&self, parent: &DagNode, name: &str, txn: &TxnId) -> DagResult<DagNode> {
        self.make_entry(parent, name, txn, NodeKind::Dir)
    }

    /// If the child named `name` under `parent` is already mutable within
    /// `txn`, returns it unchanged. Otherwise creates a successor of its NR
    /// and re-points the parent's entry at the new, mutable child.
    pub fn clone_child(&self, parent: &DagNode, name: &str, copy_key: &str, txn: &TxnId) -> DagResult<DagNode> {
        parent.check_mutable(txn)?;
        let child = self.open(parent, name)?;
        if child.id.txn_id() == Some(txn) {
            return Ok(child);
        }
        let component = validate_entry_name(name)?;
        let new_id = self.store.create_successor(&child.id, copy_key, txn, None)?;
        self.store.set_entry(txn, &parent.id, &component, new_id.clone(), child.kind())?;
        DagNode::load(self.store.clone(), new_id)
    }

    /// Copies `from_node` into `to_dir` under `name`. When `preserve_history`
    /// is set, allocates a successor of the source NR carrying
    /// `copyfrom_path`/`copyfrom_rev`; otherwise the new entry simply points
    /// at the existing immutable source id.
    pub fn copy(
        &self,
        to_dir: &DagNode,
        name: &str,
        from_node: &DagNode,
        preserve_history: bool,
        from_rev: RevNum,
        from_path: RepoPathBuf,
        txn: &TxnId,
    ) -> DagResult<DagNode> {
        to_dir.check_mutable(txn)?;
        let component = validate_entry_name(name)?;
        let dest_path = to_dir.created_path().join(&component);
        if self.store.rep_contents_dir(&to_dir.nr)?.iter().any(|e| e.name == component) {
            return Err(DagError::AlreadyExists { path: dest_path });
        }
        let new_id = if preserve_history {
            let copy_key = from_node.id.copy_key.clone();
            let origin = CopyOrigin { copyfrom_path: from_path, copyfrom_rev: from_rev, copyroot: from_node.id.clone() };
            self.store.create_successor(&from_node.id, &copy_key, txn, Some(origin))?
        } else {
            from_node.id.clone()
        };
        self.store.set_entry(txn, &to_dir.id, &component, new_id.clone(), from_node.kind())?;
        DagNode::load(self.store.clone(), new_id)
    }

    /// Walks `node`'s predecessor chain, invoking `callback(Some(node))` for
    /// each ancestor and `callback(None)` once when the chain is exhausted,
    /// or until the callback asks to stop.
    pub fn walk_predecessors<F>(&self, node: &DagNode, mut callback: F) -> DagResult<()>
    where
        F: FnMut(Option<&DagNode>) -> bool,
    {
        let mut current = node.clone();
        loop {
            let stop = callback(Some(&current));
            if stop {
                return Ok(());
            }
            match &current.nr.predecessor_id {
                None => {
                    callback(None);
                    return Ok(());
                }
                Some(pred_id) => {
                    current = DagNode::load(self.store.clone(), pred_id.clone())?;
                }
            }
        }
    }

    /// `is_ancestor(a, b)`: `a` is `b` or a predecessor of `b`, in the same
    /// line of history.
    pub fn is_ancestor(&self, a: &DagNode, b: &DagNode) -> DagResult<bool> {
        if !related(&a.id, &b.id) {
            return Ok(false);
        }
        let mut found = same(&a.id, &b.id);
        self.walk_predecessors(b, |node| {
            if found {
                return true;
            }
            if let Some(node) = node {
                if same(&node.id, &a.id) {
                    found = true;
                }
            }
            found
        })?;
        Ok(found)
    }

    /// `is_parent(a, b)`: `a` is exactly `b`'s immediate predecessor.
    pub fn is_parent(&self, a: &DagNode, b: &DagNode) -> DagResult<bool> {
        if !related(&a.id, &b.id) {
            return Ok(false);
        }
        Ok(b.nr.predecessor_id.as_ref().is_some_and(|p| same(p, &a.id)))
    }

    /// Compares two NRs' `prop_rep`/`data_rep` by opaque key equality; never
    /// compares bytes.
    pub fn things_different(&self, n1: &DagNode, n2: &DagNode) -> (bool, bool) {
        let props_changed = !crate::store::noderev_same_rep_key(&n1.nr.prop_rep, &n2.nr.prop_rep);
        let contents_changed = !crate::store::noderev_same_rep_key(&n1.nr.data_rep, &n2.nr.data_rep);
        (props_changed, contents_changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (Dag, Arc<MemoryStore>, TxnId, DagNode) {
        let mem = Arc::new(MemoryStore::new());
        let store: Arc<dyn NodeRevisionStore> = mem.clone();
        let dag = Dag::new(store.clone());
        let txn = mem.begin_txn(RevNum(0));
        let root_id = store.create(NodeKind::Dir, RepoPathBuf::root(), "", &txn).unwrap();
        let root = dag.txn_root(root_id, &txn).unwrap();
        (dag, mem, txn, root)
    }

    #[test]
    fn make_file_then_open_roundtrips() {
        let (dag, _mem, txn, root) = setup();
        let file = dag.make_file(&root, "foo", &txn).unwrap();
        assert_eq!(file.kind(), NodeKind::File);
        let opened = dag.open(&root, "foo").unwrap();
        assert_eq!(opened.id(), file.id());
    }

    #[test]
    fn make_file_name_collision_is_already_exists() {
        let (dag, _mem, txn, root) = setup();
        dag.make_file(&root, "foo", &txn).unwrap();
        let err = dag.make_file(&root, "foo", &txn).unwrap_err();
        assert!(matches!(err, DagError::AlreadyExists { .. }));
    }

    #[test]
    fn make_dir_on_immutable_parent_is_not_mutable() {
        let (dag, _mem, txn, root) = setup();
        // Re-wrap the same node revision as an immutable (revision-scoped)
        // handle: same store-side data, but its NodeId no longer carries
        // the transaction, so check_mutable must reject it.
        let immutable_id = NodeId::new(root.id().node_key.clone(), root.id().copy_key.clone(), TxnOrRev::Rev(RevNum(1)));
        let mut nr = root.node_revision().clone();
        nr.id = immutable_id.clone();
        let immutable_root = DagNode { store: dag.store.clone(), id: immutable_id, nr };
        let err = dag.make_dir(&immutable_root, "a", &txn).unwrap_err();
        assert!(matches!(err, DagError::NotMutable));
    }

    #[test]
    fn clone_child_is_idempotent_within_same_txn() {
        let (dag, _mem, txn, root) = setup();
        let dir = dag.make_dir(&root, "a", &txn).unwrap();
        let cloned_once = dag.clone_child(&root, "a", "copy-x", &txn).unwrap();
        assert_eq!(cloned_once.id(), dir.id());
    }

    #[test]
    fn copy_with_preserve_history_records_copy_origin() {
        use crate::repo_path::RepoPathComponentBuf;

        let (dag, _mem, txn, root) = setup();
        let file = dag.make_file(&root, "foo", &txn).unwrap();
        let branch = dag.make_dir(&root, "branch", &txn).unwrap();
        let from_path = RepoPathBuf::root().join(&RepoPathComponentBuf::new("foo").unwrap());
        let copied = dag.copy(&branch, "foo", &file, true, RevNum(3), from_path.clone(), &txn).unwrap();

        let origin = copied.node_revision().copy_origin.clone().expect("copy_origin recorded");
        assert_eq!(origin.copyfrom_rev, RevNum(3));
        assert_eq!(origin.copyfrom_path, from_path);
        assert_eq!(&origin.copyroot, file.id());
        assert_ne!(copied.id(), file.id());
    }

    #[test]
    fn copy_without_preserve_history_just_repoints_the_entry() {
        let (dag, _mem, txn, root) = setup();
        let file = dag.make_file(&root, "foo", &txn).unwrap();
        let branch = dag.make_dir(&root, "branch", &txn).unwrap();
        let copied = dag.copy(&branch, "foo", &file, false, RevNum(0), RepoPathBuf::root(), &txn).unwrap();
        assert_eq!(copied.id(), file.id());
        assert!(copied.node_revision().copy_origin.is_none());
    }
}
