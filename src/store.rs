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

//! The node-revision store (§4.1).
//!
//! This module defines the storage contract the DAG facade ([`crate::dag`])
//! is built on, plus [`MemoryStore`], an in-memory implementation used by
//! tests and by anything embedding this crate without its own persistence
//! layer. Low-level storage of node revisions and representations is
//! explicitly out of scope as a *feature* (see the specification's
//! Non-goals); [`MemoryStore`] exists only so the DAG facade and the
//! working-copy editor have something concrete to run against.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use md5::Digest as _;

use crate::error::DagError;
use crate::error::DagResult;
use crate::noderev::CopyOrigin;
use crate::noderev::NodeId;
use crate::noderev::NodeKind;
use crate::noderev::NodeRevision;
use crate::noderev::RepKey;
use crate::noderev::RevNum;
use crate::noderev::TxnId;
use crate::noderev::TxnOrRev;
use crate::repo_path::RepoPathBuf;
use crate::repo_path::RepoPathComponentBuf;

/// One child entry in a directory's entries representation: a single path
/// component mapped to the child it names (§3.2's directory-entries
/// invariant: keyed by one component, never a slash or `.`/`..`).
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: RepoPathComponentBuf,
    pub id: NodeId,
    pub kind: NodeKind,
}

/// A single-use writer for a file node's content representation. Dropping
/// it without calling [`ContentWriter::finalize`] discards the write.
pub struct ContentWriter<'a> {
    store: &'a MemoryStore,
    id: NodeId,
    buf: Vec<u8>,
}

impl Write for ContentWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ContentWriter<'_> {
    /// Finalizes the write, publishing a fresh [`RepKey`] as the node's
    /// `data_rep` and clearing its `edit_key`.
    pub fn finalize(self) -> DagResult<RepKey> {
        self.store.finish_contents(&self.id, self.buf)
    }
}

/// The node-revision store contract (§4.1). All operations are scoped to the
/// calling transaction where relevant; `get` never returns a handle that
/// outlives `self`, matching the specification's scope-bound-read guarantee.
pub trait NodeRevisionStore: std::fmt::Debug + Send + Sync {
    fn get(&self, id: &NodeId) -> DagResult<NodeRevision>;

    /// Creates a brand-new node revision of `kind`, born at `created_path`,
    /// carrying `copy_key` and mutable within `txn`. Returns its id.
    fn create(&self, kind: NodeKind, created_path: RepoPathBuf, copy_key: &str, txn: &TxnId) -> DagResult<NodeId>;

    /// Creates a successor of `old_id`: copies its attributes, sets
    /// `predecessor_id = old_id`, increments `predecessor_count` unless it
    /// is the "unknown" sentinel (-1), and allocates a new id sharing
    /// `old_id`'s node-key with the given `copy_key`/`txn` components.
    ///
    /// `copy_origin`, when `Some`, overrides the successor's `copy_origin`
    /// with the given copyfrom provenance (a `preserve_history` copy);
    /// `None` inherits `old_id`'s existing `copy_origin` unchanged (a plain
    /// mutable clone that isn't itself a copy).
    fn create_successor(&self, old_id: &NodeId, copy_key: &str, txn: &TxnId, copy_origin: Option<CopyOrigin>) -> DagResult<NodeId>;

    /// Registers `child_id` under `name` in `dir_id`'s directory-entries
    /// representation. `dir_id` must be mutable in `txn`.
    fn set_entry(&self, txn: &TxnId, dir_id: &NodeId, name: &RepoPathComponentBuf, child_id: NodeId, kind: NodeKind) -> DagResult<()>;

    fn rep_contents_dir(&self, dir_nr: &NodeRevision) -> DagResult<Vec<DirEntry>>;

    fn get_contents(&self, file_nr: &NodeRevision) -> DagResult<Vec<u8>>;

    fn set_contents<'a>(&'a self, file_id: &NodeId) -> DagResult<ContentWriter<'a>>;

    fn file_length(&self, nr: &NodeRevision) -> DagResult<u64> {
        Ok(self.get_contents(nr)?.len() as u64)
    }

    /// `md5(contents)`, 16 bytes.
    fn file_checksum(&self, nr: &NodeRevision) -> DagResult<[u8; 16]> {
        let contents = self.get_contents(nr)?;
        let digest = md5::Md5::digest(&contents);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest);
        Ok(out)
    }

    fn get_proplist(&self, nr: &NodeRevision) -> DagResult<BTreeMap<String, String>>;

    fn set_proplist(&self, txn: &TxnId, id: &NodeId, props: BTreeMap<String, String>) -> DagResult<()>;
}

/// `noderev_same_rep_key`, re-exported at store level for convenience;
/// see [`crate::noderev::noderev_same_rep_key`] for the canonical definition.
pub use crate::noderev::noderev_same_rep_key;

#[derive(Default)]
struct Inner {
    node_revisions: HashMap<NodeId, NodeRevision>,
    dir_entries: HashMap<String, Vec<DirEntry>>,
    file_contents: HashMap<String, Vec<u8>>,
    props: HashMap<NodeId, BTreeMap<String, String>>,
    next_key: u64,
    next_rep: u64,
}

/// An in-memory [`NodeRevisionStore`]. Not crash-safe; intended for tests
/// and for embedding this crate without a real backing store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    txn_counter: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh transaction id, based at `_base_rev` (recorded only
    /// for diagnostics; this reference implementation does not snapshot
    /// base-revision state separately from the live node-revision map).
    pub fn begin_txn(&self, _base_rev: RevNum) -> TxnId {
        let n = self.txn_counter.fetch_add(1, Ordering::SeqCst);
        TxnId(format!("txn-{n}"))
    }

    fn fresh_node_key(inner: &mut Inner) -> String {
        let n = inner.next_key;
        inner.next_key += 1;
        format!("node-{n}")
    }

    fn fresh_rep_key(inner: &mut Inner) -> RepKey {
        let n = inner.next_rep;
        inner.next_rep += 1;
        RepKey(format!("rep-{n}"))
    }

    fn finish_contents(&self, id: &NodeId, buf: Vec<u8>) -> DagResult<RepKey> {
        let mut inner = self.inner.lock().unwrap();
        let rep = Self::fresh_rep_key(&mut inner);
        inner.file_contents.insert(rep.0.clone(), buf);
        let nr = inner
            .node_revisions
            .get_mut(id)
            .ok_or_else(|| DagError::Logic("set_contents on unknown node".into()))?;
        nr.data_rep = Some(rep.clone());
        nr.edit_key = None;
        Ok(rep)
    }
}

impl NodeRevisionStore for MemoryStore {
    fn get(&self, id: &NodeId) -> DagResult<NodeRevision> {
        let inner = self.inner.lock().unwrap();
        inner
            .node_revisions
            .get(id)
            .cloned()
            .ok_or_else(|| DagError::Logic(format!("no such node revision: {id:?}")))
    }

    fn create(&self, kind: NodeKind, created_path: RepoPathBuf, copy_key: &str, txn: &TxnId) -> DagResult<NodeId> {
        let mut inner = self.inner.lock().unwrap();
        let node_key = Self::fresh_node_key(&mut inner);
        let id = NodeId::new(node_key, copy_key, TxnOrRev::Txn(txn.clone()));
        let nr = NodeRevision::new(id.clone(), kind, created_path);
        inner.node_revisions.insert(id.clone(), nr);
        Ok(id)
    }

    fn create_successor(&self, old_id: &NodeId, copy_key: &str, txn: &TxnId, copy_origin: Option<CopyOrigin>) -> DagResult<NodeId> {
        let mut inner = self.inner.lock().unwrap();
        let old = inner
            .node_revisions
            .get(old_id)
            .cloned()
            .ok_or_else(|| DagError::Logic(format!("no such node revision: {old_id:?}")))?;
        let new_id = NodeId::new(old_id.node_key.clone(), copy_key, TxnOrRev::Txn(txn.clone()));
        let predecessor_count = if old.predecessor_count < 0 { -1 } else { old.predecessor_count + 1 };
        let successor = NodeRevision {
            id: new_id.clone(),
            kind: old.kind,
            predecessor_id: Some(old_id.clone()),
            predecessor_count,
            copy_origin: copy_origin.or_else(|| old.copy_origin.clone()),
            data_rep: old.data_rep.clone(),
            prop_rep: old.prop_rep.clone(),
            edit_key: None,
            created_path: old.created_path.clone(),
        };
        inner.node_revisions.insert(new_id.clone(), successor);
        if let Some(props) = inner.props.get(old_id).cloned() {
            inner.props.insert(new_id.clone(), props);
        }
        Ok(new_id)
    }

    fn set_entry(&self, txn: &TxnId, dir_id: &NodeId, name: &RepoPathComponentBuf, child_id: NodeId, kind: NodeKind) -> DagResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let dir = inner
            .node_revisions
            .get(dir_id)
            .cloned()
            .ok_or_else(|| DagError::Logic(format!("no such node revision: {dir_id:?}")))?;
        if dir.id.txn_id() != Some(txn) {
            return Err(DagError::NotMutable);
        }
        let rep = dir.data_rep.clone().unwrap_or_else(|| {
            let rep = Self::fresh_rep_key(&mut inner);
            inner.dir_entries.insert(rep.0.clone(), Vec::new());
            rep
        });
        let entries = inner.dir_entries.entry(rep.0.clone()).or_default();
        entries.retain(|e| e.name != *name);
        entries.push(DirEntry { name: name.clone(), id: child_id, kind });
        inner.node_revisions.get_mut(dir_id).unwrap().data_rep = Some(rep);
        Ok(())
    }

    fn rep_contents_dir(&self, dir_nr: &NodeRevision) -> DagResult<Vec<DirEntry>> {
        let inner = self.inner.lock().unwrap();
        match &dir_nr.data_rep {
            None => Ok(Vec::new()),
            Some(rep) => Ok(inner.dir_entries.get(&rep.0).cloned().unwrap_or_default()),
        }
    }

    fn get_contents(&self, file_nr: &NodeRevision) -> DagResult<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        match &file_nr.data_rep {
            None => Ok(Vec::new()),
            Some(rep) => Ok(inner.file_contents.get(&rep.0).cloned().unwrap_or_default()),
        }
    }

    fn set_contents<'a>(&'a self, file_id: &NodeId) -> DagResult<ContentWriter<'a>> {
        Ok(ContentWriter { store: self, id: file_id.clone(), buf: Vec::new() })
    }

    fn get_proplist(&self, nr: &NodeRevision) -> DagResult<BTreeMap<String, String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.props.get(&nr.id).cloned().unwrap_or_default())
    }

    fn set_proplist(&self, txn: &TxnId, id: &NodeId, props: BTreeMap<String, String>) -> DagResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if id.txn_id() != Some(txn) {
            return Err(DagError::NotMutable);
        }
        inner.props.insert(id.clone(), props);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrips_and_checksums() {
        let store = MemoryStore::new();
        let txn = store.begin_txn(RevNum(0));
        let id = store.create(NodeKind::File, RepoPathBuf::root(), "", &txn).unwrap();
        let mut w = store.set_contents(&id).unwrap();
        w.write_all(b"hello").unwrap();
        w.finalize().unwrap();
        let nr = store.get(&id).unwrap();
        assert_eq!(store.get_contents(&nr).unwrap(), b"hello");
        let expected = md5::Md5::digest(b"hello");
        assert_eq!(&store.file_checksum(&nr).unwrap()[..], &expected[..]);
    }
}
